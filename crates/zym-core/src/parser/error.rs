//! Parser error types

use thiserror::Error;

use crate::lexer::{LexError, Span, TokenKind};

/// A parser error with location information
#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

impl ParseError {
    #[must_use]
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)
    }
}

impl std::error::Error for ParseError {}

/// The kind of parse error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("expected {expected}, found '{found}'")]
    UnexpectedToken {
        found: TokenKind,
        expected: &'static str,
    },

    #[error("expected expression, found '{0}'")]
    ExpectedExpression(TokenKind),

    #[error("expected identifier, found '{0}'")]
    ExpectedIdentifier(TokenKind),

    #[error("invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unknown tail-call mode '{0}', expected one of: off, safe, smart, aggressive")]
    InvalidTcoMode(String),

    #[error("'{0}' cannot qualify a variable declaration here")]
    MisplacedQualifier(&'static str),

    #[error("{0}")]
    Lex(LexError),
}
