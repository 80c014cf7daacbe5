//! Recursive-descent parser
//!
//! Operators are lowered to method calls while parsing (`a + b` becomes
//! `a.+(b)`), so the interpreter only has to know about calls. Local
//! variables are resolved here: an identifier that was assigned earlier in
//! the same method scope is a variable, anything else is a method call.

use super::ast::*;
use super::lexer::{unescape, Lexer, Span, Token};
use super::{Interner, ParseError, Symbol};
use rustc_hash::FxHashSet;
use std::rc::Rc;

/// Maximum nesting of primary expressions before the parser gives up
const MAX_PARSE_DEPTH: usize = 128;

/// Local variable scope. Method, class and top-level bodies are opaque;
/// blocks see the variables of their enclosing scope.
#[derive(Debug, Clone, Default)]
struct LocalScope {
    vars: FxHashSet<Symbol>,
    opaque: bool,
}

/// Parser for Garnet source text.
pub struct Parser<'a> {
    source: &'a str,
    interner: &'a mut Interner,

    /// Token stream, filled by `parse`
    tokens: Vec<(Token, Span)>,

    /// Current position in token stream
    pos: usize,

    scopes: Vec<LocalScope>,

    /// Set while parsing a `while` condition or command arguments, where
    /// `do` belongs to an enclosing construct
    no_do: bool,

    depth: usize,

    /// Added to reported lines while parsing an interpolated fragment
    line_offset: u32,
}

impl<'a> Parser<'a> {
    /// Create a parser over `source`; symbols are interned into `interner`.
    pub fn new(source: &'a str, interner: &'a mut Interner) -> Self {
        Self {
            source,
            interner,
            tokens: Vec::new(),
            pos: 0,
            scopes: vec![LocalScope {
                vars: FxHashSet::default(),
                opaque: true,
            }],
            no_do: false,
            depth: 0,
            line_offset: 0,
        }
    }

    /// Parse the whole source into a program.
    pub fn parse(mut self) -> Result<Program, ParseError> {
        self.tokens = Lexer::new(self.source).tokenize()?;
        self.pos = 0;

        let body = self.parse_statements(&[Token::Eof])?;
        self.expect(Token::Eof)?;
        Ok(Program { body })
    }

    // ========================================================================
    // Token Navigation
    // ========================================================================

    #[inline]
    fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    #[inline]
    fn current_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    #[inline]
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(tok, _)| tok)
    }

    #[inline]
    fn peek_span(&self) -> Option<Span> {
        self.tokens.get(self.pos + 1).map(|(_, span)| *span)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    #[inline]
    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(expected)
    }

    fn check_any(&self, expected: &[Token]) -> bool {
        expected.iter().any(|tok| self.check(tok))
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        if self.check(&expected) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected())
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    /// A leading-dot method chain continues the expression on the next line
    fn newline_then_dot(&self) -> bool {
        let mut i = self.pos;
        while let Some((Token::Newline, _)) = self.tokens.get(i) {
            i += 1;
        }
        i > self.pos && matches!(self.tokens.get(i), Some((Token::Dot, _)))
    }

    // ========================================================================
    // Error Handling
    // ========================================================================

    fn error_at(&self, message: impl Into<String>, span: Span) -> ParseError {
        let mut err = ParseError::new(message, span);
        err.line += self.line_offset;
        err
    }

    fn unexpected(&self) -> ParseError {
        self.error_at(
            format!("syntax error, unexpected {}", self.current()),
            self.current_span(),
        )
    }

    // ========================================================================
    // Local Variables
    // ========================================================================

    fn intern(&mut self, s: &str) -> Symbol {
        self.interner.intern(s)
    }

    fn declare_local(&mut self, name: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(name);
        }
    }

    fn is_local(&self, name: Symbol) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.vars.contains(&name) {
                return true;
            }
            if scope.opaque {
                break;
            }
        }
        false
    }

    fn push_scope(&mut self, opaque: bool) {
        self.scopes.push(LocalScope {
            vars: FxHashSet::default(),
            opaque,
        });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_statements(&mut self, terminators: &[Token]) -> Result<Body, ParseError> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.check_any(terminators) || self.check(&Token::Eof) {
                break;
            }
            body.push(self.parse_statement()?);
            if !self.check(&Token::Newline) && !self.check_any(terminators) {
                return Err(self.unexpected());
            }
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_expr_stmt()?;

        // Statement modifiers
        loop {
            match self.current() {
                Token::If | Token::Unless => {
                    let negate = self.check(&Token::Unless);
                    self.advance();
                    let cond = self.parse_expr_stmt()?;
                    let (then_body, else_body) = if negate {
                        (Vec::new(), vec![node])
                    } else {
                        (vec![node], Vec::new())
                    };
                    node = Node::If {
                        cond: Box::new(cond),
                        then_body,
                        else_body,
                    };
                }
                Token::While | Token::Until => {
                    let negate = self.check(&Token::Until);
                    self.advance();
                    let cond = self.parse_expr_stmt()?;
                    node = Node::While {
                        cond: Box::new(cond),
                        body: vec![node],
                        negate,
                    };
                }
                _ => break,
            }
        }

        Ok(node)
    }

    /// `not`, `and`, `or`: the loosest binding operators
    fn parse_expr_stmt(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_not()?;
        loop {
            if self.eat(&Token::And) {
                self.skip_newlines();
                let right = self.parse_not()?;
                left = Node::And(Box::new(left), Box::new(right));
            } else if self.eat(&Token::Or) {
                self.skip_newlines();
                let right = self.parse_not()?;
                left = Node::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_not(&mut self) -> Result<Node, ParseError> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Node::Not(Box::new(operand)));
        }
        self.parse_expr()
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn parse_expr(&mut self) -> Result<Node, ParseError> {
        let span = self.current_span();
        let lhs = self.parse_ternary()?;

        match self.current() {
            Token::Assign => {
                let target = self.to_target(lhs, span)?;
                self.advance();
                self.skip_newlines();
                let value = self.parse_rhs()?;
                Ok(Node::Assign {
                    target,
                    value: Box::new(value),
                })
            }
            Token::PlusEq | Token::MinusEq | Token::StarEq => {
                let op = match self.advance() {
                    Token::PlusEq => "+",
                    Token::MinusEq => "-",
                    _ => "*",
                };
                let op = self.intern(op);
                let target = self.to_target(lhs, span)?;
                self.skip_newlines();
                let value = self.parse_rhs()?;
                Ok(Node::OpAssign {
                    target,
                    op,
                    value: Box::new(value),
                })
            }
            Token::OrOrEq => {
                let target = self.to_target(lhs, span)?;
                self.advance();
                self.skip_newlines();
                let value = self.parse_rhs()?;
                Ok(Node::OrAssign {
                    target,
                    value: Box::new(value),
                })
            }
            _ => Ok(lhs),
        }
    }

    /// Right-hand side of an assignment; `a = 1, 2` builds an array
    fn parse_rhs(&mut self) -> Result<Node, ParseError> {
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            self.skip_newlines();
            items.push(self.parse_expr()?);
        }
        Ok(Node::Array(items))
    }

    fn to_target(&mut self, node: Node, span: Span) -> Result<Target, ParseError> {
        let target = match node {
            Node::LocalVar(name) => Target::Local(name),
            Node::IVar(name) => Target::IVar(name),
            Node::GVar(name) => Target::GVar(name),
            Node::Const { scope: None, name } => Target::Const(name),
            Node::Call(call) => {
                let call = *call;
                if call.vcall {
                    self.declare_local(call.method);
                    Target::Local(call.method)
                } else if let Some(recv) = call.recv {
                    if self.interner.resolve(call.method) == "[]" {
                        Target::Index {
                            recv: Box::new(recv),
                            args: call.args,
                        }
                    } else if call.args.is_empty() && call.block.is_none() {
                        Target::Attr {
                            recv: Box::new(recv),
                            name: call.method,
                        }
                    } else {
                        return Err(self.error_at("syntax error, unexpected '='", span));
                    }
                } else {
                    return Err(self.error_at("syntax error, unexpected '='", span));
                }
            }
            _ => return Err(self.error_at("syntax error, unexpected '='", span)),
        };
        Ok(target)
    }

    fn parse_ternary(&mut self) -> Result<Node, ParseError> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then_value = self.parse_ternary()?;
        self.skip_newlines();
        self.expect(Token::Colon)?;
        self.skip_newlines();
        let else_value = self.parse_ternary()?;
        Ok(Node::If {
            cond: Box::new(cond),
            then_body: vec![then_value],
            else_body: vec![else_value],
        })
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            self.skip_newlines();
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            self.skip_newlines();
            let right = self.parse_equality()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_comparison()?;
        match self.current() {
            Token::EqEq => {
                self.advance();
                self.skip_newlines();
                let right = self.parse_comparison()?;
                Ok(self.binop(left, "==", right))
            }
            Token::NotEq => {
                self.advance();
                self.skip_newlines();
                let right = self.parse_comparison()?;
                let eq = self.binop(left, "==", right);
                Ok(Node::Not(Box::new(eq)))
            }
            Token::Spaceship => {
                self.advance();
                self.skip_newlines();
                let right = self.parse_comparison()?;
                Ok(self.binop(left, "<=>", right))
            }
            _ => Ok(left),
        }
    }

    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.current() {
                Token::Less => "<",
                Token::Greater => ">",
                Token::LessEq => "<=",
                Token::GreaterEq => ">=",
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_shift()?;
            left = self.binop(left, op, right);
        }
    }

    fn parse_shift(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_additive()?;
        while self.eat(&Token::Shl) {
            self.skip_newlines();
            let right = self.parse_additive()?;
            left = self.binop(left, "<<", right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current() {
                Token::Plus => "+",
                Token::Minus => "-",
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_multiplicative()?;
            left = self.binop(left, op, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => "*",
                Token::Slash => "/",
                Token::Percent => "%",
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_unary()?;
            left = self.binop(left, op, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        match self.current() {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Node::Integer(i) => Node::Integer(i.wrapping_neg()),
                    Node::Float(f) => Node::Float(-f),
                    other => self.call_node(Some(other), "-@", Vec::new()),
                })
            }
            Token::Bang => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::Not(Box::new(operand)))
            }
            _ => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Result<Node, ParseError> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::StarStar) {
            self.skip_newlines();
            let exponent = self.parse_unary()?;
            return Ok(self.binop(base, "**", exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_primary()?;

        loop {
            if self.newline_then_dot() {
                self.skip_newlines();
            }
            match self.current() {
                Token::Dot => {
                    self.advance();
                    self.skip_newlines();
                    let name = self.method_name_after_dot()?;
                    node = self.parse_call_rest(Some(node), name)?;
                }
                Token::ColonColon => {
                    self.advance();
                    match self.current().clone() {
                        Token::Constant(name)
                            if !(self.peek() == Some(&Token::LeftParen)
                                && !self.peek_span().is_some_and(|s| s.space_before)) =>
                        {
                            self.advance();
                            let name = self.intern(&name);
                            node = Node::Const {
                                scope: Some(Box::new(node)),
                                name,
                            };
                        }
                        _ => {
                            let name = self.method_name_after_dot()?;
                            node = self.parse_call_rest(Some(node), name)?;
                        }
                    }
                }
                Token::LeftBracket if !self.current_span().space_before => {
                    self.advance();
                    self.skip_newlines();
                    let (args, _) = self.parse_arg_list(Some(&Token::RightBracket))?;
                    self.expect(Token::RightBracket)?;
                    node = self.call_node(Some(node), "[]", args);
                }
                _ => return Ok(node),
            }
        }
    }

    fn method_name_after_dot(&mut self) -> Result<Symbol, ParseError> {
        let name = match self.current() {
            Token::Ident(name) | Token::Constant(name) => name.clone(),
            Token::Class => "class".to_string(),
            Token::Then => "then".to_string(),
            Token::Begin => "begin".to_string(),
            Token::End => "end".to_string(),
            Token::Yield => "yield".to_string(),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(self.intern(&name))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn binop(&mut self, left: Node, op: &str, right: Node) -> Node {
        self.call_node(Some(left), op, vec![right])
    }

    fn call_node(&mut self, recv: Option<Node>, method: &str, args: Vec<Node>) -> Node {
        let method = self.intern(method);
        Node::Call(Box::new(CallNode {
            recv,
            method,
            args,
            block: None,
            block_arg: None,
            vcall: false,
        }))
    }

    /// Arguments and block of a call whose name has been consumed
    fn parse_call_rest(&mut self, recv: Option<Node>, method: Symbol) -> Result<Node, ParseError> {
        let mut args = Vec::new();
        let mut block_arg = None;
        let mut has_args = false;

        if self.check(&Token::LeftParen) && !self.current_span().space_before {
            self.advance();
            self.skip_newlines();
            let (parsed, block) = self.parse_arg_list(Some(&Token::RightParen))?;
            self.expect(Token::RightParen)?;
            args = parsed;
            block_arg = block;
            has_args = true;
        } else if self.can_start_command_arg() {
            let saved = self.no_do;
            self.no_do = true;
            let result = self.parse_arg_list(None);
            self.no_do = saved;
            let (parsed, block) = result?;
            args = parsed;
            block_arg = block;
            has_args = true;
        }

        let block = self.parse_block_opt()?;
        if block.is_some() && block_arg.is_some() {
            return Err(self.error_at(
                "both block arg and actual block given",
                self.current_span(),
            ));
        }

        let vcall = recv.is_none() && !has_args && block.is_none();
        Ok(Node::Call(Box::new(CallNode {
            recv,
            method,
            args,
            block,
            block_arg,
            vcall,
        })))
    }

    /// Whether the current token begins an unparenthesised argument
    fn can_start_command_arg(&self) -> bool {
        let span = self.current_span();
        if !span.space_before {
            return false;
        }
        let next_is_attached = self.peek_span().is_some_and(|s| !s.space_before);
        match self.current() {
            Token::Integer(_)
            | Token::Float(_)
            | Token::DString(_)
            | Token::SString(_)
            | Token::Symbol(_)
            | Token::Ident(_)
            | Token::Constant(_)
            | Token::IVar(_)
            | Token::GVar(_)
            | Token::Nil
            | Token::True
            | Token::False
            | Token::SelfKw
            | Token::LeftBracket
            | Token::LeftParen => true,
            Token::Minus | Token::Star | Token::Amp | Token::Bang => next_is_attached,
            _ => false,
        }
    }

    /// Whether the current token can begin the value of `return`/`break`/`next`
    fn can_start_value(&self) -> bool {
        matches!(
            self.current(),
            Token::Integer(_)
                | Token::Float(_)
                | Token::DString(_)
                | Token::SString(_)
                | Token::Symbol(_)
                | Token::Ident(_)
                | Token::Constant(_)
                | Token::IVar(_)
                | Token::GVar(_)
                | Token::Nil
                | Token::True
                | Token::False
                | Token::SelfKw
                | Token::LeftBracket
                | Token::LeftParen
                | Token::LeftBrace
                | Token::Minus
                | Token::Bang
                | Token::Not
        )
    }

    /// Argument list; `close` is the closing bracket, `None` for command calls.
    /// Trailing `key => value` pairs are gathered into a hash argument.
    fn parse_arg_list(&mut self, close: Option<&Token>) -> Result<(Vec<Node>, Option<Node>), ParseError> {
        let mut args = Vec::new();
        let mut pairs = Vec::new();
        let mut block_arg = None;

        let saved = self.no_do;
        if close.is_some() {
            self.no_do = false;
        }

        let result = (|| -> Result<(), ParseError> {
            if let Some(close) = close {
                if self.check(close) {
                    return Ok(());
                }
            }
            loop {
                if self.eat(&Token::Amp) {
                    block_arg = Some(self.parse_expr()?);
                } else if self.eat(&Token::Star) {
                    let value = self.parse_expr()?;
                    args.push(Node::Splat(Box::new(value)));
                } else {
                    let value = self.parse_expr()?;
                    if self.eat(&Token::FatArrow) {
                        self.skip_newlines();
                        let pair_value = self.parse_expr()?;
                        pairs.push((value, pair_value));
                    } else {
                        args.push(value);
                    }
                }
                if close.is_some() {
                    self.skip_newlines();
                }
                if block_arg.is_some() || !self.eat(&Token::Comma) {
                    return Ok(());
                }
                self.skip_newlines();
            }
        })();

        self.no_do = saved;
        result?;

        if !pairs.is_empty() {
            args.push(Node::Hash(pairs));
        }
        Ok((args, block_arg))
    }

    fn parse_block_opt(&mut self) -> Result<Option<Rc<BlockNode>>, ParseError> {
        let close = match self.current() {
            Token::LeftBrace => Token::RightBrace,
            Token::Do if !self.no_do => Token::End,
            _ => return Ok(None),
        };
        self.advance();

        let saved = self.no_do;
        self.no_do = false;
        self.push_scope(false);
        let result = self.parse_block_body(&close);
        self.pop_scope();
        self.no_do = saved;

        let block = result?;
        self.expect(close)?;
        Ok(Some(Rc::new(block)))
    }

    fn parse_block_body(&mut self, close: &Token) -> Result<BlockNode, ParseError> {
        let params = if self.eat(&Token::OrOr) {
            Params::default()
        } else if self.eat(&Token::Pipe) {
            let params = self.parse_params(&Token::Pipe)?;
            self.expect(Token::Pipe)?;
            params
        } else {
            Params::default()
        };
        let body = self.parse_statements(std::slice::from_ref(close))?;
        Ok(BlockNode { params, body })
    }

    fn parse_params(&mut self, close: &Token) -> Result<Params, ParseError> {
        let mut params = Params::default();
        let skip = !matches!(close, Token::Newline);

        loop {
            if skip {
                self.skip_newlines();
            }
            if self.check(close) {
                break;
            }
            match self.current().clone() {
                Token::Star => {
                    self.advance();
                    let name = self.param_name()?;
                    params.rest = Some(name);
                }
                Token::Amp => {
                    self.advance();
                    let name = self.param_name()?;
                    params.block = Some(name);
                }
                Token::Ident(name) => {
                    self.advance();
                    let name = self.intern(&name);
                    self.declare_local(name);
                    if self.eat(&Token::Assign) {
                        let default = self.parse_ternary()?;
                        params.optional.push((name, default));
                    } else {
                        params.required.push(name);
                    }
                }
                _ => return Err(self.unexpected()),
            }
            if skip {
                self.skip_newlines();
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(params)
    }

    fn param_name(&mut self) -> Result<Symbol, ParseError> {
        match self.current().clone() {
            Token::Ident(name) => {
                self.advance();
                let name = self.intern(&name);
                self.declare_local(name);
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    // ========================================================================
    // Primary Expressions
    // ========================================================================

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            self.depth -= 1;
            return Err(self.error_at("expression nested too deeply", self.current_span()));
        }
        let result = self.parse_primary_inner();
        self.depth -= 1;
        result
    }

    fn parse_primary_inner(&mut self) -> Result<Node, ParseError> {
        let span = self.current_span();
        match self.current().clone() {
            Token::Integer(i) => {
                self.advance();
                Ok(Node::Integer(i))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Node::Float(f))
            }
            Token::DString(raw) => {
                self.advance();
                self.parse_interpolated(&raw, span)
            }
            Token::SString(s) => {
                self.advance();
                Ok(Node::Str(s))
            }
            Token::Symbol(s) => {
                self.advance();
                Ok(Node::Symbol(self.intern(&s)))
            }
            Token::Nil => {
                self.advance();
                Ok(Node::Nil)
            }
            Token::True => {
                self.advance();
                Ok(Node::True)
            }
            Token::False => {
                self.advance();
                Ok(Node::False)
            }
            Token::SelfKw => {
                self.advance();
                Ok(Node::SelfRef)
            }
            Token::IVar(name) => {
                self.advance();
                Ok(Node::IVar(self.intern(&name)))
            }
            Token::GVar(name) => {
                self.advance();
                Ok(Node::GVar(self.intern(&name)))
            }
            Token::Constant(name) => {
                self.advance();
                let name = self.intern(&name);
                if self.check(&Token::LeftParen) && !self.current_span().space_before {
                    return self.parse_call_rest(None, name);
                }
                Ok(Node::Const { scope: None, name })
            }
            Token::Ident(name) => {
                self.advance();
                let name = self.intern(&name);
                let paren_call = self.check(&Token::LeftParen) && !self.current_span().space_before;
                if self.is_local(name) && !paren_call {
                    return Ok(Node::LocalVar(name));
                }
                self.parse_call_rest(None, name)
            }
            Token::LeftParen => {
                self.advance();
                let saved = self.no_do;
                self.no_do = false;
                let body = self.parse_statements(&[Token::RightParen]);
                self.no_do = saved;
                let mut body = body?;
                self.expect(Token::RightParen)?;
                Ok(match body.len() {
                    0 => Node::Nil,
                    1 => body.remove(0),
                    _ => Node::Seq(body),
                })
            }
            Token::LeftBracket => {
                self.advance();
                self.skip_newlines();
                let (items, _) = self.parse_arg_list(Some(&Token::RightBracket))?;
                self.expect(Token::RightBracket)?;
                Ok(Node::Array(items))
            }
            Token::LeftBrace => self.parse_hash_literal(),
            Token::If | Token::Unless => self.parse_if(),
            Token::While | Token::Until => self.parse_while(),
            Token::Begin => {
                self.advance();
                let begin = self.parse_begin_body()?;
                self.expect(Token::End)?;
                Ok(Node::Begin(Box::new(begin)))
            }
            Token::Def => self.parse_def(),
            Token::Class => self.parse_class(),
            Token::Module => self.parse_module(),
            Token::Return | Token::Break | Token::Next => {
                let keyword = self.advance();
                let value = if self.can_start_value() {
                    Some(Box::new(self.parse_rhs()?))
                } else {
                    None
                };
                Ok(match keyword {
                    Token::Return => Node::Return(value),
                    Token::Break => Node::Break(value),
                    _ => Node::Next(value),
                })
            }
            Token::Yield => {
                self.advance();
                let args = if self.check(&Token::LeftParen) && !self.current_span().space_before {
                    self.advance();
                    self.skip_newlines();
                    let (args, _) = self.parse_arg_list(Some(&Token::RightParen))?;
                    self.expect(Token::RightParen)?;
                    args
                } else if self.can_start_command_arg() {
                    self.parse_arg_list(None)?.0
                } else {
                    Vec::new()
                };
                Ok(Node::Yield(args))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_hash_literal(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::LeftBrace)?;
        let mut pairs = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RightBrace) {
                break;
            }
            let key = self.parse_expr()?;
            self.skip_newlines();
            self.expect(Token::FatArrow)?;
            self.skip_newlines();
            let value = self.parse_expr()?;
            pairs.push((key, value));
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.skip_newlines();
        self.expect(Token::RightBrace)?;
        Ok(Node::Hash(pairs))
    }

    /// Split a double-quoted string into literal and `#{}` parts
    fn parse_interpolated(&mut self, raw: &str, span: Span) -> Result<Node, ParseError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < raw.len() {
            let rest = &raw[i..];
            if let Some(escaped) = rest.strip_prefix('\\') {
                let len = escaped.chars().next().map_or(0, char::len_utf8);
                literal.push_str(&rest[..1 + len]);
                i += 1 + len;
                continue;
            }
            if rest.starts_with("#{") {
                let mut depth = 1usize;
                let mut end = None;
                for (offset, c) in rest[2..].char_indices() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i + 2 + offset);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| {
                    self.error_at("unterminated string interpolation", span)
                })?;
                if !literal.is_empty() {
                    parts.push(StrPart::Lit(unescape(&literal)));
                    literal.clear();
                }
                let body = self.parse_fragment(&raw[i + 2..end], span)?;
                parts.push(StrPart::Code(body));
                i = end + 1;
                continue;
            }
            let c = rest.chars().next().unwrap_or('\0');
            literal.push(c);
            i += c.len_utf8();
        }

        if parts.is_empty() {
            return Ok(Node::Str(unescape(&literal)));
        }
        if !literal.is_empty() {
            parts.push(StrPart::Lit(unescape(&literal)));
        }
        Ok(Node::Interpolated(parts))
    }

    /// Parse embedded code with the current local scopes
    fn parse_fragment(&mut self, code: &str, span: Span) -> Result<Body, ParseError> {
        let offset = self.line_offset + span.line - 1;
        let tokens = Lexer::new(code).tokenize().map_err(|mut err| {
            err.line += offset;
            err
        })?;

        let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
        let saved_pos = std::mem::replace(&mut self.pos, 0);
        let saved_offset = std::mem::replace(&mut self.line_offset, offset);
        let saved_no_do = std::mem::replace(&mut self.no_do, false);

        let result = self
            .parse_statements(&[Token::Eof])
            .and_then(|body| self.expect(Token::Eof).map(|_| body));

        self.tokens = saved_tokens;
        self.pos = saved_pos;
        self.line_offset = saved_offset;
        self.no_do = saved_no_do;
        result
    }

    // ========================================================================
    // Compound Expressions
    // ========================================================================

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let negate = self.check(&Token::Unless);
        self.advance();
        let node = self.parse_conditional(negate)?;
        self.expect(Token::End)?;
        Ok(node)
    }

    fn parse_conditional(&mut self, negate: bool) -> Result<Node, ParseError> {
        let cond = self.parse_expr_stmt()?;
        self.skip_newlines();
        self.eat(&Token::Then);

        let then_body = self.parse_statements(&[Token::Elsif, Token::Else, Token::End])?;
        let else_body = if self.eat(&Token::Elsif) {
            vec![self.parse_conditional(false)?]
        } else if self.eat(&Token::Else) {
            self.parse_statements(&[Token::End])?
        } else {
            Vec::new()
        };

        let (then_body, else_body) = if negate {
            (else_body, then_body)
        } else {
            (then_body, else_body)
        };
        Ok(Node::If {
            cond: Box::new(cond),
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> Result<Node, ParseError> {
        let negate = self.check(&Token::Until);
        self.advance();

        let saved = self.no_do;
        self.no_do = true;
        let cond = self.parse_expr_stmt();
        self.no_do = saved;
        let cond = cond?;

        self.eat(&Token::Do);
        let body = self.parse_statements(&[Token::End])?;
        self.expect(Token::End)?;
        Ok(Node::While {
            cond: Box::new(cond),
            body,
            negate,
        })
    }

    /// Body followed by optional `rescue`/`else`/`ensure` clauses; stops before `end`
    fn parse_begin_body(&mut self) -> Result<BeginNode, ParseError> {
        let body =
            self.parse_statements(&[Token::Rescue, Token::Else, Token::Ensure, Token::End])?;

        let mut rescues = Vec::new();
        while self.eat(&Token::Rescue) {
            let mut classes = Vec::new();
            while !self.check_any(&[Token::Newline, Token::Then, Token::FatArrow]) {
                classes.push(self.parse_postfix()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            let var = if self.eat(&Token::FatArrow) {
                let name = self.param_name()?;
                Some(name)
            } else {
                None
            };
            self.eat(&Token::Then);
            let body =
                self.parse_statements(&[Token::Rescue, Token::Else, Token::Ensure, Token::End])?;
            rescues.push(RescueClause { classes, var, body });
        }

        let else_body = if self.eat(&Token::Else) {
            Some(self.parse_statements(&[Token::Ensure, Token::End])?)
        } else {
            None
        };
        let ensure_body = if self.eat(&Token::Ensure) {
            Some(self.parse_statements(&[Token::End])?)
        } else {
            None
        };

        Ok(BeginNode {
            body,
            rescues,
            else_body,
            ensure_body,
        })
    }

    fn parse_def(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Def)?;

        let singleton = self.check(&Token::SelfKw) && self.peek() == Some(&Token::Dot);
        if singleton {
            self.advance();
            self.advance();
        }
        let name = self.parse_def_name()?;

        self.push_scope(true);
        let result = self.parse_def_rest(name);
        self.pop_scope();
        let def = result?;

        Ok(Node::Def {
            singleton,
            def: Rc::new(def),
        })
    }

    fn parse_def_rest(&mut self, name: Symbol) -> Result<MethodDef, ParseError> {
        let params = if self.check(&Token::LeftParen) {
            self.advance();
            let params = self.parse_params(&Token::RightParen)?;
            self.expect(Token::RightParen)?;
            params
        } else if self.check(&Token::Newline) {
            Params::default()
        } else {
            self.parse_params(&Token::Newline)?
        };

        let begin = self.parse_begin_body()?;
        self.expect(Token::End)?;

        let body = if begin.rescues.is_empty()
            && begin.else_body.is_none()
            && begin.ensure_body.is_none()
        {
            begin.body
        } else {
            vec![Node::Begin(Box::new(begin))]
        };

        Ok(MethodDef { name, params, body })
    }

    fn parse_def_name(&mut self) -> Result<Symbol, ParseError> {
        if self.check(&Token::Eof) || self.check(&Token::Newline) {
            return Err(self.unexpected());
        }
        let name = match self.advance() {
            Token::Ident(name) | Token::Constant(name) => {
                // Setter: `def name=(value)`
                let setter = self.check(&Token::Assign)
                    && !self.current_span().space_before
                    && self.peek() == Some(&Token::LeftParen);
                if setter {
                    self.advance();
                    format!("{}=", name)
                } else {
                    name
                }
            }
            Token::LeftBracket => {
                self.expect(Token::RightBracket)?;
                if self.check(&Token::Assign) && !self.current_span().space_before {
                    self.advance();
                    "[]=".to_string()
                } else {
                    "[]".to_string()
                }
            }
            Token::EqEq => "==".to_string(),
            Token::Spaceship => "<=>".to_string(),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::StarStar => "**".to_string(),
            Token::Slash => "/".to_string(),
            Token::Percent => "%".to_string(),
            Token::Less => "<".to_string(),
            Token::Greater => ">".to_string(),
            Token::LessEq => "<=".to_string(),
            Token::GreaterEq => ">=".to_string(),
            Token::Shl => "<<".to_string(),
            _ => {
                self.pos -= 1;
                return Err(self.unexpected());
            }
        };
        Ok(self.intern(&name))
    }

    fn parse_cpath(&mut self) -> Result<Node, ParseError> {
        let name = match self.current().clone() {
            Token::Constant(name) => name,
            _ => {
                return Err(self.error_at(
                    "class/module name must be CONSTANT",
                    self.current_span(),
                ))
            }
        };
        self.advance();
        let mut node = Node::Const {
            scope: None,
            name: self.intern(&name),
        };
        while self.check(&Token::ColonColon) {
            self.advance();
            let name = match self.current().clone() {
                Token::Constant(name) => name,
                _ => return Err(self.unexpected()),
            };
            self.advance();
            node = Node::Const {
                scope: Some(Box::new(node)),
                name: self.intern(&name),
            };
        }
        Ok(node)
    }

    fn parse_class(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Class)?;
        let path = self.parse_cpath()?;
        let superclass = if self.eat(&Token::Less) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        self.push_scope(true);
        let body = self.parse_statements(&[Token::End]);
        self.pop_scope();
        let body = body?;
        self.expect(Token::End)?;

        Ok(Node::ClassDef {
            path: Box::new(path),
            superclass,
            body,
        })
    }

    fn parse_module(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Module)?;
        let path = self.parse_cpath()?;

        self.push_scope(true);
        let body = self.parse_statements(&[Token::End]);
        self.pop_scope();
        let body = body?;
        self.expect(Token::End)?;

        Ok(Node::ModuleDef {
            path: Box::new(path),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (Program, Interner) {
        let mut interner = Interner::new();
        let program = Parser::new(source, &mut interner)
            .parse()
            .expect("should parse");
        (program, interner)
    }

    fn parse_err(source: &str) -> ParseError {
        let mut interner = Interner::new();
        Parser::new(source, &mut interner)
            .parse()
            .expect_err("should fail")
    }

    fn call(node: &Node) -> &CallNode {
        match node {
            Node::Call(call) => call,
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_operators_lower_to_calls() {
        let (program, interner) = parse("1 + 2 * 3");
        let add = call(&program.body[0]);
        assert_eq!(interner.resolve(add.method), "+");
        assert_eq!(add.recv, Some(Node::Integer(1)));
        let mul = call(&add.args[0]);
        assert_eq!(interner.resolve(mul.method), "*");
    }

    #[test]
    fn test_local_variables_shadow_calls() {
        let (program, _) = parse("x = 1\nx\ny");
        assert_eq!(program.body.len(), 3);
        assert!(matches!(program.body[1], Node::LocalVar(_)));
        assert!(call(&program.body[2]).vcall);
    }

    #[test]
    fn test_command_call_with_block() {
        let (program, interner) = parse("Num.new(5).double\nfoo 1, 2 do |a, b| a + b end");
        let double = call(&program.body[0]);
        assert_eq!(interner.resolve(double.method), "double");
        let foo = call(&program.body[1]);
        assert_eq!(foo.args.len(), 2);
        let block = foo.block.as_ref().expect("block");
        assert_eq!(block.params.required.len(), 2);
    }

    #[test]
    fn test_def_with_rescue() {
        let (program, interner) = parse(
            "def risky(a, b = 2, *rest, &blk)\n  raise 'x'\nrescue ArgumentError => e\n  e\nensure\n  1\nend",
        );
        match &program.body[0] {
            Node::Def { singleton, def } => {
                assert!(!singleton);
                assert_eq!(interner.resolve(def.name), "risky");
                assert_eq!(def.params.arity(), (1, None));
                assert!(def.params.block.is_some());
                assert!(matches!(def.body[0], Node::Begin(_)));
            }
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_class_and_module_paths() {
        let (program, interner) = parse("module Outer\n  class Inner < Object\n  end\nend\nOuter::Inner");
        assert!(matches!(program.body[0], Node::ModuleDef { .. }));
        match &program.body[1] {
            Node::Const { scope: Some(_), name } => assert_eq!(interner.resolve(*name), "Inner"),
            other => panic!("expected scoped constant, got {:?}", other),
        }
    }

    #[test]
    fn test_string_interpolation() {
        let (program, _) = parse(r#"name = "x"; "hello #{name}!""#);
        match &program.body[1] {
            Node::Interpolated(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], StrPart::Lit("hello ".into()));
                assert!(matches!(&parts[1], StrPart::Code(body) if matches!(body[0], Node::LocalVar(_))));
            }
            other => panic!("expected interpolation, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_targets() {
        let (program, _) = parse("@a = 1\n$b ||= 2\nh[1] = 3\nobj.name = 4\nx += 1");
        assert!(matches!(program.body[0], Node::Assign { target: Target::IVar(_), .. }));
        assert!(matches!(program.body[1], Node::OrAssign { target: Target::GVar(_), .. }));
        assert!(matches!(program.body[2], Node::Assign { target: Target::Index { .. }, .. }));
        assert!(matches!(program.body[3], Node::Assign { target: Target::Attr { .. }, .. }));
        assert!(matches!(program.body[4], Node::OpAssign { target: Target::Local(_), .. }));
    }

    #[test]
    fn test_modifiers_and_hash_args() {
        let (program, _) = parse("puts 1 if true\nfoo :a => 1, :b => 2");
        assert!(matches!(program.body[0], Node::If { .. }));
        let foo = call(&program.body[1]);
        assert!(matches!(&foo.args[0], Node::Hash(pairs) if pairs.len() == 2));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_err("def foo(");
        assert_eq!(err.line, 1);
        assert!(err.message.starts_with("syntax error"));

        let err = parse_err("x = 1\nif x\n  1\n");
        assert!(err.message.contains("end-of-input"));

        let err = parse_err("\"a\"\n\"#{1 +}\"");
        assert_eq!(err.line, 2);
    }
}
