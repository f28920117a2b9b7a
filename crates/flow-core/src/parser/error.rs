//! Parser error types for the Flow configuration language

use crate::lexer::{Span, TokenKind};
use thiserror::Error;

/// A parser error with location information
#[derive(Debug, Clone)]
pub struct ParseError {
    /// The kind of error
    pub kind: ParseErrorKind,
    /// Source location where the error occurred
    pub span: Span,
}

impl ParseError {
    /// Create a new parse error
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
    #[error("unexpected token: found {found}, expected {expected}")]
    UnexpectedToken {
        found: TokenKind,
        expected: &'static str,
    },

    #[error("unexpected end of file, expected {0}")]
    UnexpectedEof(&'static str),

    #[error("expected expression")]
    ExpectedExpression,

    #[error("expected declaration ('import', 'var' or 'handler')")]
    ExpectedDeclaration,

    #[error("invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("invalid IP address literal: {0}")]
    InvalidIp(String),

    #[error("unexpected character")]
    UnexpectedChar,
}
