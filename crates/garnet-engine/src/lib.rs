//! Garnet Embedded Runtime
//!
//! This crate provides the scripting runtime that `garnet-embed` hosts:
//! - **Parser**: logos lexer and recursive-descent parser for a Ruby subset (`parser` module)
//! - **VM**: tree-walking interpreter, object model, collector and the
//!   jump-based unwind primitive (`vm` module)
//!
//! The runtime signals script exceptions with a non-local jump. Only
//! [`Vm::protect`] intercepts those jumps, so every entry point that can
//! raise must run beneath a protected call.
//!
//! # Example
//!
//! ```rust,ignore
//! use garnet_engine::Vm;
//!
//! let vm = Vm::new();
//! let result = vm.protect(|vm| vm.load_string("1 + 2"));
//! assert_eq!(result.unwrap().as_integer(), 3);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Parser module: lexer, AST, and parser
pub mod parser;

/// VM module: values, heap, collector, interpreter, and builtins
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use parser::{ParseError, Parser, Symbol};

pub use vm::{
    // Values and handles
    ObjRef, Value, ValueType,
    // Object model
    ArgSpec, RBasic, NativeFn,
    // VM and execution
    CallInfo, CompileOptions, UnwindTarget, Vm, VmOptions,
    // GC
    gc::{ArenaIndex, GcStats},
};
