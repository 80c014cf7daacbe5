//! Lexer and parser for the Garnet scripting language.
//!
//! The language is a Ruby subset: classes and modules, methods with
//! optional and block parameters, blocks, `begin/rescue/else/ensure`,
//! string interpolation, arrays and hashes.
//!
//! # Example
//!
//! ```ignore
//! use garnet_engine::parser::{Interner, Parser};
//!
//! let mut interner = Interner::new();
//! let program = Parser::new("1 + 2", &mut interner).parse().unwrap();
//! assert_eq!(program.body.len(), 1);
//! ```

pub mod ast;
pub mod interner;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;

pub use ast::{
    BeginNode, BlockNode, Body, CallNode, MethodDef, Node, Params, Program, RescueClause, StrPart,
    Target,
};
pub use interner::{Interner, Symbol};
pub use lexer::{Lexer, Span, Token};
pub use parser::Parser;

/// Syntax error produced while lexing or parsing source text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// Human readable description
    pub message: String,
    /// 1-based line number where the error was detected
    pub line: u32,
    /// 1-based column number where the error was detected
    pub column: u32,
}

impl ParseError {
    /// Create a parse error at the given location
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }
}
