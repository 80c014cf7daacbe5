//! Error types for the embedding bridge

use garnet_engine::{Value, Vm};
use std::fmt;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the host
#[derive(Debug, Error)]
pub enum Error {
    /// An exception raised inside the runtime, including syntax errors and
    /// argument count mismatches
    #[error("{0}")]
    Runtime(#[from] Exception),

    /// The host misused the API before the runtime was entered
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A runtime value could not be decoded into the requested Rust type
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl Error {
    /// The runtime exception, if this is one
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Error::Runtime(exc) => Some(exc),
            _ => None,
        }
    }
}

/// An exception raised by script or host code.
///
/// The class name and message are read when the exception is caught, so
/// the error stays printable after the VM is gone. The [`value`] handle is
/// only meaningful while the VM that raised it is alive and the value has
/// not been collected.
///
/// [`value`]: Exception::value
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Exception {
    value: Value,
    class_name: String,
    message: String,
}

impl Exception {
    /// Capture an exception value
    pub fn from_value(vm: &Vm, value: Value) -> Self {
        Self {
            value,
            class_name: vm.obj_classname(value),
            message: vm.exc_message(value),
        }
    }

    /// The exception object
    pub fn value(&self) -> Value {
        self.value
    }

    /// Class name, e.g. `"ArgumentError"`
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of a host-defined method.
///
/// Returned from host callables; the dispatcher turns it into a runtime
/// exception that script code can `rescue`. Errors from nested bridge
/// calls convert with `?`.
#[derive(Debug)]
pub enum HostError {
    /// Raise a `RuntimeError` with this message
    Message(String),
    /// Raise an exception of the named class (`"ArgumentError"`,
    /// `"MyLib::Error"`) with a message
    Class {
        /// Class path
        class: String,
        /// Message
        message: String,
    },
    /// Raise an existing exception object
    Exception(Value),
    /// Re-raise the failure of a nested bridge call
    Nested(Error),
}

impl HostError {
    /// A `RuntimeError` with `message`
    pub fn new(message: impl Into<String>) -> Self {
        HostError::Message(message.into())
    }

    /// An exception of class `class` with `message`
    pub fn with_class(class: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Class {
            class: class.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::Message(message) => write!(f, "{}", message),
            HostError::Class { class, message } => write!(f, "{}: {}", class, message),
            HostError::Exception(value) => write!(f, "exception {:?}", value),
            HostError::Nested(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for HostError {}

impl From<Error> for HostError {
    fn from(err: Error) -> Self {
        HostError::Nested(err)
    }
}

impl From<Exception> for HostError {
    fn from(exc: Exception) -> Self {
        HostError::Exception(exc.value())
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        HostError::new(message)
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        HostError::Message(message)
    }
}

/// A value that does not fit the requested Rust type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Create a decode error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl serde::de::Error for DecodeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        DecodeError::new(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_conversions() {
        let err: HostError = "bad arg".into();
        assert_eq!(err.to_string(), "bad arg");

        let err = HostError::with_class("ArgumentError", "negative");
        assert_eq!(err.to_string(), "ArgumentError: negative");

        let err: HostError = Error::Argument("no block".into()).into();
        assert!(matches!(err, HostError::Nested(Error::Argument(_))));
    }

    #[test]
    fn test_exception_outlives_vm() {
        let exc = {
            let vm = Vm::new();
            let value = vm.exc_new(vm.core().argument_error, "boom");
            Exception::from_value(&vm, value)
        };
        assert_eq!(exc.class_name(), "ArgumentError");
        assert_eq!(exc.to_string(), "boom");
    }
}
