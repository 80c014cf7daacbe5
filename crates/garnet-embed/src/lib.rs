//! Garnet Embedding Bridge
//!
//! Safe calls between a Rust host and the Garnet runtime:
//! - **Protected calls**: every entry into the runtime runs under a fresh
//!   unwind target and resolves to a value or an error (`protect` module)
//! - **Host methods**: Rust closures registered as runtime methods, with
//!   errors and panics turned into script exceptions (`dispatch`, `class`)
//! - **Argument marshaling**: positional arguments plus the trailing block
//!   (`args` module)
//! - **GC control**: toggling, liveness checks and arena roots (`gc`)
//! - **Handles**: header views and host-to-runtime conversions (`handle`)
//!
//! # Example
//!
//! ```rust,ignore
//! use garnet_embed::{ArgSpec, Garnet, HostError, Value};
//!
//! let mrb = Garnet::new();
//! let class = mrb.define_class("Num", None)?;
//! class.define_method("double", ArgSpec::none(), |mrb, recv, _args| {
//!     let n = mrb.call(recv, "value", &[])?;
//!     Ok(Value::fixnum(n.as_integer() * 2))
//! });
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

pub mod args;
pub mod array;
pub mod class;
pub mod context;
pub mod decode;
mod dispatch;
pub mod error;
pub mod gc;
pub mod garnet;
pub mod handle;
pub mod hash;
pub mod protect;

pub use args::{collect_args, ArgumentBuffer};
pub use array::Array;
pub use class::Class;
pub use context::CompileContext;
pub use decode::{decode, ValueDeserializer};
pub use error::{DecodeError, Error, Exception, HostError, Result};
pub use gc::{ArenaScope, GcPause};
pub use garnet::Garnet;
pub use handle::{as_basic_object, basic_header, IntoValue};
pub use hash::Hash;
pub use protect::{run_protected, Operation};

pub use garnet_engine::{ArenaIndex, ArgSpec, GcStats, ObjRef, RBasic, Value, ValueType, VmOptions};
