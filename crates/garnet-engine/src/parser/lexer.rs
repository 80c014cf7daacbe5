//! Lexer for the Garnet scripting language.
//!
//! Built on the logos library. Newlines are significant (they terminate
//! statements) so they are emitted as tokens; the parser skips them where
//! an expression is obviously incomplete.

use super::ParseError;
use logos::Logos;
use std::fmt;

/// Source location of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// Whether the token is preceded by a space or tab
    pub space_before: bool,
}

/// A token of the Garnet language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum Token {
    // Statement terminators
    #[regex(r"\r?\n")]
    #[token(";")]
    Newline,

    // Keywords (must come before identifiers)
    #[token("def")]
    Def,
    #[token("end")]
    End,
    #[token("if")]
    If,
    #[token("elsif")]
    Elsif,
    #[token("else")]
    Else,
    #[token("unless")]
    Unless,
    #[token("while")]
    While,
    #[token("until")]
    Until,
    #[token("do")]
    Do,
    #[token("then")]
    Then,
    #[token("begin")]
    Begin,
    #[token("rescue")]
    Rescue,
    #[token("ensure")]
    Ensure,
    #[token("return")]
    Return,
    #[token("yield")]
    Yield,
    #[token("break")]
    Break,
    #[token("next")]
    Next,
    #[token("class")]
    Class,
    #[token("module")]
    Module,
    #[token("self")]
    SelfKw,
    #[token("nil")]
    Nil,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    // Literals
    #[regex(r"[0-9][0-9_]*", parse_int)]
    Integer(i64),
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", parse_float)]
    Float(f64),
    /// Double-quoted string; raw contents, escapes and `#{}` resolved by the parser
    #[regex(r#""([^"\\]|\\.)*""#, inner_text)]
    DString(String),
    /// Single-quoted string, already unescaped
    #[regex(r"'([^'\\]|\\.)*'", parse_single_quoted)]
    SString(String),
    #[regex(r":[a-zA-Z_][a-zA-Z0-9_]*[?!]?", |lex| lex.slice()[1..].to_string())]
    #[regex(r":(\*\*|<=>|==|!=|<=|>=|<<|\[\]=?|[-+*/%<>!])", |lex| lex.slice()[1..].to_string())]
    Symbol(String),

    // Names
    #[regex(r"[a-z_][a-zA-Z0-9_]*[?!]?", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"[A-Z][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Constant(String),
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    IVar(String),
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    GVar(String),

    // Operators
    #[token("**")]
    StarStar,
    #[token("<=>")]
    Spaceship,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<<")]
    Shl,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("||=")]
    OrOrEq,
    #[token("=>")]
    FatArrow,
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("!")]
    Bang,
    #[token("=")]
    Assign,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,

    /// End of input (appended by [`Lexer::tokenize`])
    Eof,
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().replace('_', "").parse().ok()
}

fn inner_text(lex: &mut logos::Lexer<'_, Token>) -> String {
    let s = lex.slice();
    s[1..s.len() - 1].to_string()
}

fn parse_single_quoted(lex: &mut logos::Lexer<'_, Token>) -> String {
    let s = lex.slice();
    let inner = &s[1..s.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped @ ('\\' | '\'')) => result.push(escaped),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Resolve backslash escapes of a double-quoted string segment
pub fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('s') => result.push(' '),
            Some('0') => result.push('\0'),
            Some('e') => result.push('\x1b'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }

    result
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Newline => write!(f, "end-of-line"),
            Token::Integer(i) => write!(f, "integer literal {}", i),
            Token::Float(x) => write!(f, "float literal {}", x),
            Token::DString(_) | Token::SString(_) => write!(f, "string literal"),
            Token::Symbol(s) => write!(f, "symbol :{}", s),
            Token::Ident(s) | Token::Constant(s) | Token::IVar(s) | Token::GVar(s) => {
                write!(f, "'{}'", s)
            }
            Token::Eof => write!(f, "end-of-input"),
            other => {
                let text = match other {
                    Token::Def => "def",
                    Token::End => "end",
                    Token::If => "if",
                    Token::Elsif => "elsif",
                    Token::Else => "else",
                    Token::Unless => "unless",
                    Token::While => "while",
                    Token::Until => "until",
                    Token::Do => "do",
                    Token::Then => "then",
                    Token::Begin => "begin",
                    Token::Rescue => "rescue",
                    Token::Ensure => "ensure",
                    Token::Return => "return",
                    Token::Yield => "yield",
                    Token::Break => "break",
                    Token::Next => "next",
                    Token::Class => "class",
                    Token::Module => "module",
                    Token::SelfKw => "self",
                    Token::Nil => "nil",
                    Token::True => "true",
                    Token::False => "false",
                    Token::And => "and",
                    Token::Or => "or",
                    Token::Not => "not",
                    Token::StarStar => "**",
                    Token::Spaceship => "<=>",
                    Token::EqEq => "==",
                    Token::NotEq => "!=",
                    Token::LessEq => "<=",
                    Token::GreaterEq => ">=",
                    Token::Shl => "<<",
                    Token::AndAnd => "&&",
                    Token::OrOr => "||",
                    Token::PlusEq => "+=",
                    Token::MinusEq => "-=",
                    Token::StarEq => "*=",
                    Token::OrOrEq => "||=",
                    Token::FatArrow => "=>",
                    Token::ColonColon => "::",
                    Token::Colon => ":",
                    Token::Question => "?",
                    Token::Plus => "+",
                    Token::Minus => "-",
                    Token::Star => "*",
                    Token::Slash => "/",
                    Token::Percent => "%",
                    Token::Less => "<",
                    Token::Greater => ">",
                    Token::Bang => "!",
                    Token::Assign => "=",
                    Token::Amp => "&",
                    Token::Pipe => "|",
                    Token::Dot => ".",
                    Token::Comma => ",",
                    Token::LeftParen => "(",
                    Token::RightParen => ")",
                    Token::LeftBracket => "[",
                    Token::RightBracket => "]",
                    Token::LeftBrace => "{",
                    Token::RightBrace => "}",
                    _ => "?",
                };
                write!(f, "'{}'", text)
            }
        }
    }
}

/// Converts source text into a token stream with source locations.
pub struct Lexer<'a> {
    source: &'a str,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source`
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    /// Tokenize the whole input. The returned stream always ends with `Token::Eof`.
    pub fn tokenize(self) -> Result<Vec<(Token, Span)>, ParseError> {
        let bytes = self.source.as_bytes();
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(self.source);

        let mut line = 1u32;
        let mut line_start = 0usize;
        let mut cursor = 0usize;

        while let Some(result) = lexer.next() {
            let range = lexer.span();

            // Advance line bookkeeping over everything since the last token start
            for (offset, byte) in bytes[cursor..range.start].iter().enumerate() {
                if *byte == b'\n' {
                    line += 1;
                    line_start = cursor + offset + 1;
                }
            }
            cursor = range.start;

            let span = Span {
                start: range.start,
                end: range.end,
                line,
                column: (range.start - line_start + 1) as u32,
                space_before: range.start > 0 && matches!(bytes[range.start - 1], b' ' | b'\t'),
            };

            match result {
                Ok(token) => tokens.push((token, span)),
                Err(()) => {
                    let ch = self.source[range.start..].chars().next().unwrap_or('\0');
                    let message = match ch {
                        '"' | '\'' => "unterminated string meets end of file".to_string(),
                        _ => format!("syntax error, unexpected character '{}'", ch),
                    };
                    return Err(ParseError::new(message, span));
                }
            }
        }

        for byte in &bytes[cursor..] {
            if *byte == b'\n' {
                line += 1;
            }
        }
        let eof = Span {
            start: self.source.len(),
            end: self.source.len(),
            line,
            column: 1,
            space_before: false,
        };
        tokens.push((Token::Eof, eof));

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .expect("should lex")
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("def defined nil? end"),
            vec![
                Token::Def,
                Token::Ident("defined".into()),
                Token::Ident("nil?".into()),
                Token::End,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_scoped_constant_is_not_a_symbol() {
        assert_eq!(
            kinds("Hello::World"),
            vec![
                Token::Constant("Hello".into()),
                Token::ColonColon,
                Token::Constant("World".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_operator_symbols() {
        assert_eq!(
            kinds("inject(:+) :<=> :[]= :! :!= ::Top"),
            vec![
                Token::Ident("inject".into()),
                Token::LeftParen,
                Token::Symbol("+".into()),
                Token::RightParen,
                Token::Symbol("<=>".into()),
                Token::Symbol("[]=".into()),
                Token::Symbol("!".into()),
                Token::Symbol("!=".into()),
                Token::ColonColon,
                Token::Constant("Top".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_numbers_and_method_calls() {
        assert_eq!(
            kinds("1.5 2.times"),
            vec![
                Token::Float(1.5),
                Token::Integer(2),
                Token::Dot,
                Token::Ident("times".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            kinds(r#""a\n#{b}" 'it\'s'"#),
            vec![
                Token::DString(r"a\n#{b}".into()),
                Token::SString("it's".into()),
                Token::Eof
            ]
        );
        assert_eq!(unescape(r"a\tb\\"), "a\tb\\");
    }

    #[test]
    fn test_comments_and_newlines() {
        let tokens = Lexer::new("a # comment\n$b; @c").tokenize().unwrap();
        let kinds: Vec<_> = tokens.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("a".into()),
                Token::Newline,
                Token::GVar("$b".into()),
                Token::Newline,
                Token::IVar("@c".into()),
                Token::Eof
            ]
        );
        assert_eq!(tokens[2].1.line, 2);
        assert_eq!(tokens[2].1.column, 1);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("x = \"abc").tokenize().unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated string"));
    }
}
