//! Lexer for the Flow configuration language
//!
//! Converts source text into a token stream. Flow's lexical surface is
//! small: `#` line comments, single- or double-quoted strings, integer,
//! IP, and `/regex/` literals, dotted identifiers for namespaced native
//! names, and the operator set of the code generator's dispatch table.

mod span;
mod token;

pub use span::{LineIndex, Location, Span};
pub use token::TokenKind;

use logos::Logos;
use thiserror::Error;

/// A token with its kind, span, and source text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The span in the source code
    pub span: Span,
    /// The source text of the token
    pub lexeme: String,
}

impl Token {
    /// Create a new token
    #[must_use]
    pub fn new(kind: TokenKind, span: Span, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            lexeme: lexeme.into(),
        }
    }
}

/// Lexer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character")]
    UnexpectedChar,
}

/// A lexer error with location information
#[derive(Debug, Clone)]
pub struct SpannedError {
    pub error: LexError,
    pub span: Span,
}

impl std::fmt::Display for SpannedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.error, self.span)
    }
}

impl std::error::Error for SpannedError {}

/// The Flow lexer
pub struct Lexer;

impl Lexer {
    /// Tokenize an entire source text, collecting errors instead of
    /// stopping at the first bad character
    #[must_use]
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<SpannedError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut lexer = TokenKind::lexer(source);

        while let Some(result) = lexer.next() {
            let span = Span::from_range(lexer.span());
            match result {
                Ok(kind) => tokens.push(Token::new(kind, span, lexer.slice())),
                Err(()) => errors.push(SpannedError {
                    error: LexError::UnexpectedChar,
                    span,
                }),
            }
        }

        (tokens, errors)
    }
}

/// Decode the escape sequences of a quoted string literal.
///
/// The surrounding quotes must already be stripped. Unknown escapes keep
/// the escaped character as-is.
#[must_use]
pub(crate) fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::tokenize(source);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("handler main { deny; }"),
            vec![
                TokenKind::Handler,
                TokenKind::Ident,
                TokenKind::LBrace,
                TokenKind::Ident,
                TokenKind::Semicolon,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn dotted_identifier_is_one_token() {
        let (tokens, _) = Lexer::tokenize("req.path");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].lexeme, "req.path");
    }

    #[test]
    fn match_operators() {
        assert_eq!(
            kinds("a =^ b =$ c =~ d == e"),
            vec![
                TokenKind::Ident,
                TokenKind::PrefixMatch,
                TokenKind::Ident,
                TokenKind::SuffixMatch,
                TokenKind::Ident,
                TokenKind::RegexMatch,
                TokenKind::Ident,
                TokenKind::EqEq,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn ip_literals() {
        let (tokens, _) = Lexer::tokenize("192.168.0.1 ::1 2001:db8::1");
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![TokenKind::Ipv4, TokenKind::Ipv6, TokenKind::Ipv6]
        );
    }

    #[test]
    fn numbers_stay_numbers() {
        assert_eq!(kinds("42 1_000"), vec![TokenKind::Number, TokenKind::Number]);
    }

    #[test]
    fn string_quoting_styles() {
        let (tokens, _) = Lexer::tokenize(r#""double" 'single'"#);
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Str));
    }

    #[test]
    fn regex_literal_vs_division() {
        // a regex body may not contain unescaped whitespace, so a spaced
        // division never lexes as a regex
        assert_eq!(
            kinds("8 / 4"),
            vec![TokenKind::Number, TokenKind::Slash, TokenKind::Number]
        );
        let (tokens, _) = Lexer::tokenize(r"/^\/admin/");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Regex);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("var x = 1; # trailing comment\n# full line\nvar"),
            vec![
                TokenKind::Var,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Var,
            ]
        );
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r"a\nb\t\'"), "a\nb\t'");
    }
}
