//! Abstract syntax tree
//!
//! The interpreter walks this tree directly. Method and block bodies are
//! reference counted so closures and method tables can share them with the
//! program that defined them.

use super::Symbol;
use std::rc::Rc;

/// A sequence of statements; evaluates to the value of the last one
pub type Body = Vec<Node>;

/// A parsed compilation unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Top-level statements
    pub body: Body,
}

/// Expression node. Every construct in the language is an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `nil`
    Nil,
    /// `true`
    True,
    /// `false`
    False,
    /// `self`
    SelfRef,
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// String literal without interpolation
    Str(String),
    /// Interpolated string
    Interpolated(Vec<StrPart>),
    /// `:symbol`
    Symbol(Symbol),
    /// `[a, b, c]`
    Array(Vec<Node>),
    /// `{k => v}`
    Hash(Vec<(Node, Node)>),

    /// Local variable read
    LocalVar(Symbol),
    /// `@ivar` read
    IVar(Symbol),
    /// `$global` read
    GVar(Symbol),
    /// Constant lookup, optionally scoped (`A::B`)
    Const {
        /// Scope expression for `A::B`
        scope: Option<Box<Node>>,
        /// Constant name
        name: Symbol,
    },

    /// `target = value`
    Assign {
        /// Assignment target
        target: Target,
        /// Right-hand side
        value: Box<Node>,
    },
    /// `target op= value`, `op` is the binary method (`+`, `-`, `*`)
    OpAssign {
        /// Assignment target
        target: Target,
        /// Operator method
        op: Symbol,
        /// Right-hand side
        value: Box<Node>,
    },
    /// `target ||= value`
    OrAssign {
        /// Assignment target
        target: Target,
        /// Right-hand side
        value: Box<Node>,
    },

    /// Method call (operators are lowered to calls as well)
    Call(Box<CallNode>),
    /// `*expr` inside an argument list or array literal
    Splat(Box<Node>),

    /// `a && b`, `a and b`
    And(Box<Node>, Box<Node>),
    /// `a || b`, `a or b`
    Or(Box<Node>, Box<Node>),
    /// `!a`, `not a`
    Not(Box<Node>),

    /// `if`/`unless`/`elsif`, normalised to a two-way branch
    If {
        /// Condition
        cond: Box<Node>,
        /// Taken when the condition is truthy
        then_body: Body,
        /// Taken otherwise
        else_body: Body,
    },
    /// `while`/`until` loop
    While {
        /// Loop condition
        cond: Box<Node>,
        /// Loop body
        body: Body,
        /// `until`: loop while the condition is falsy
        negate: bool,
    },
    /// `begin ... rescue ... else ... ensure ... end`
    Begin(Box<BeginNode>),
    /// Parenthesised statement list
    Seq(Body),

    /// `def name ... end` / `def self.name ... end`
    Def {
        /// Define on the singleton class of `self`
        singleton: bool,
        /// Method definition
        def: Rc<MethodDef>,
    },
    /// `class Name < Super ... end`
    ClassDef {
        /// Class path (a `Const` node)
        path: Box<Node>,
        /// Superclass expression
        superclass: Option<Box<Node>>,
        /// Class body
        body: Body,
    },
    /// `module Name ... end`
    ModuleDef {
        /// Module path (a `Const` node)
        path: Box<Node>,
        /// Module body
        body: Body,
    },

    /// `return [value]`
    Return(Option<Box<Node>>),
    /// `break [value]`
    Break(Option<Box<Node>>),
    /// `next [value]`
    Next(Option<Box<Node>>),
    /// `yield args`
    Yield(Vec<Node>),
}

/// Piece of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    /// Literal text
    Lit(String),
    /// `#{...}`
    Code(Body),
}

/// Method call
#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    /// Receiver; `None` for a call on `self`
    pub recv: Option<Node>,
    /// Method name
    pub method: Symbol,
    /// Positional arguments (may contain `Splat`)
    pub args: Vec<Node>,
    /// Literal block
    pub block: Option<Rc<BlockNode>>,
    /// `&expr` block argument
    pub block_arg: Option<Node>,
    /// Bare identifier with no receiver, arguments or parentheses
    pub vcall: bool,
}

/// `begin` block with its handlers
#[derive(Debug, Clone, PartialEq)]
pub struct BeginNode {
    /// Protected body
    pub body: Body,
    /// `rescue` clauses, tried in order
    pub rescues: Vec<RescueClause>,
    /// `else` body, run when no exception was raised
    pub else_body: Option<Body>,
    /// `ensure` body, always run
    pub ensure_body: Option<Body>,
}

/// `rescue A, B => e`
#[derive(Debug, Clone, PartialEq)]
pub struct RescueClause {
    /// Exception classes; empty means `StandardError`
    pub classes: Vec<Node>,
    /// Variable bound to the exception
    pub var: Option<Symbol>,
    /// Handler body
    pub body: Body,
}

/// Assignable location
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Local variable
    Local(Symbol),
    /// Instance variable
    IVar(Symbol),
    /// Global variable
    GVar(Symbol),
    /// Constant in the current lexical scope
    Const(Symbol),
    /// `recv[args] = value`
    Index {
        /// Receiver
        recv: Box<Node>,
        /// Index arguments
        args: Vec<Node>,
    },
    /// `recv.name = value`
    Attr {
        /// Receiver
        recv: Box<Node>,
        /// Attribute name (without `=`)
        name: Symbol,
    },
}

/// Formal parameters of a method or block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    /// Required positional parameters
    pub required: Vec<Symbol>,
    /// Optional parameters with default expressions
    pub optional: Vec<(Symbol, Node)>,
    /// `*rest`
    pub rest: Option<Symbol>,
    /// `&block`
    pub block: Option<Symbol>,
}

impl Params {
    /// Minimum and maximum positional argument count (`None` = unbounded)
    pub fn arity(&self) -> (usize, Option<usize>) {
        let min = self.required.len();
        let max = if self.rest.is_some() {
            None
        } else {
            Some(min + self.optional.len())
        };
        (min, max)
    }
}

/// A method body
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: Symbol,
    /// Parameters
    pub params: Params,
    /// Body, wrapped in an implicit `begin` when it has `rescue`/`ensure`
    pub body: Body,
}

/// A literal block (`{ |x| ... }` or `do |x| ... end`)
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    /// Block parameters
    pub params: Params,
    /// Block body
    pub body: Body,
}
