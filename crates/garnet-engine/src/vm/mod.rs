//! Garnet VM
//!
//! This module provides the runtime:
//! - Value representation and the object model
//! - Mark-sweep garbage collector with an arena of temporary roots
//! - Tree-walking interpreter
//! - Exception unwinding and protected calls
//! - Builtin classes

pub(crate) mod builtins;
pub mod defaults;
pub mod gc;
mod interpreter;
pub mod object;
pub mod options;
pub mod state;
pub mod unwind;
pub mod value;

pub use object::{ArgSpec, HeapObject, NativeFn, RBasic};
pub use options::{CompileOptions, VmOptions};
pub use state::{CallInfo, CoreClasses, Vm};
pub use unwind::{is_control_payload, UnwindTarget};
pub use value::{ObjRef, Value, ValueType};
