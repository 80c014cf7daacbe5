//! Tree-walking interpreter
//!
//! Each submodule implements part of the interpreter as `impl Vm` blocks:
//! - `eval`: expression and statement evaluation
//! - `call`: method dispatch, blocks and procs
//! - `load`: compiling source text and running top-level programs

mod call;
mod eval;
mod load;

use crate::parser::Symbol;
use crate::vm::value::{ObjRef, Value};

/// Lexical and dynamic context of the code being evaluated
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scope {
    /// `self`
    pub self_value: Value,
    /// Local variables
    pub env: ObjRef,
    /// Block of the enclosing method (nil if none)
    pub block: Value,
    /// Lexical class for constant lookup
    pub cref: ObjRef,
    /// Class that receives `def`
    pub target_class: ObjRef,
    /// Name of the enclosing method
    pub mid: Option<Symbol>,
    /// Frame id of the enclosing method, the destination of `return`
    pub home: u64,
}

/// Control flow leaving a statement list early.
///
/// These never cross a method or block boundary as `Err`: method bodies
/// turn `Return` into their value, block boundaries turn `Next` into the
/// block's value and send `Return`/`Break` on as non-local exits.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Flow {
    Return(Value),
    Break(Value),
    Next(Value),
}

pub(crate) type EvalResult = Result<Value, Flow>;
