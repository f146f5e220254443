//! Lexer for the Zym language
//!
//! The lexer converts source code into a stream of tokens, handling:
//! - Keywords, identifiers, and operators
//! - Numeric literals (int, float, hex)
//! - String literals with escapes
//! - Comments (line and block)
//! - Source location tracking

mod span;
mod token;

pub use span::{LineIndex, Span};
pub use token::TokenKind;

use logos::Logos;
use thiserror::Error;

/// A token with its kind, span, and source text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub lexeme: String,
}

impl Token {
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
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),
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

/// The Zym lexer
pub struct Lexer;

impl Lexer {
    /// Tokenize the entire source, returning all tokens and any errors.
    /// The token list always ends with `Eof`.
    #[must_use]
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<SpannedError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut lexer = TokenKind::lexer(source);

        while let Some(result) = lexer.next() {
            let span = Span::from_range(lexer.span());
            let lexeme = lexer.slice();
            match result {
                Ok(TokenKind::String) => {
                    if let Err(error) = unescape(lexeme) {
                        errors.push(SpannedError { error, span });
                    }
                    tokens.push(Token::new(TokenKind::String, span, lexeme));
                }
                Ok(kind) => tokens.push(Token::new(kind, span, lexeme)),
                Err(()) => {
                    let error = if lexeme.starts_with('"') {
                        LexError::UnterminatedString
                    } else {
                        LexError::UnexpectedChar(lexeme.to_string())
                    };
                    errors.push(SpannedError { error, span });
                    tokens.push(Token::new(TokenKind::Error, span, lexeme));
                }
            }
        }

        let end = source.len() as u32;
        tokens.push(Token::new(TokenKind::Eof, Span::new(end, end), ""));
        (tokens, errors)
    }
}

/// Decode a quoted string literal (quotes included) into its value
pub fn unescape(literal: &str) -> Result<String, LexError> {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or(LexError::UnterminatedString)?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
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
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => return Err(LexError::InvalidEscape(other)),
            None => return Err(LexError::UnterminatedString),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::tokenize(source);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_keywords_and_identifiers() {
        assert_eq!(
            lex_kinds("var ref slot val clone func refs"),
            vec![
                TokenKind::Var,
                TokenKind::Ref,
                TokenKind::Slot,
                TokenKind::Val,
                TokenKind::Clone,
                TokenKind::Func,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            lex_kinds("a += b << 2 && !c || d >= e"),
            vec![
                TokenKind::Ident,
                TokenKind::PlusEq,
                TokenKind::Ident,
                TokenKind::Shl,
                TokenKind::Int,
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Ident,
                TokenKind::Or,
                TokenKind::Ident,
                TokenKind::GtEq,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_numbers() {
        assert_eq!(
            lex_kinds("1 2.5 0xff 1e3"),
            vec![
                TokenKind::Int,
                TokenKind::Float,
                TokenKind::HexInt,
                TokenKind::Float,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex_kinds("a // line\n /* block\n * more */ b"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn tco_directive() {
        assert_eq!(
            lex_kinds("@tco smart"),
            vec![TokenKind::TcoDirective, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(unescape(r#""a\tb\n\"q\"""#).unwrap(), "a\tb\n\"q\"");
        assert_eq!(unescape(r#""\q""#), Err(LexError::InvalidEscape('q')));
    }

    #[test]
    fn errors_recover() {
        let (tokens, errors) = Lexer::tokenize("a $ b");
        assert_eq!(errors.len(), 1);
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }
}
