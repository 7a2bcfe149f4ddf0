//! Lexer for the Skarn programming language
//!
//! The lexer converts source code into a stream of tokens, handling
//! keywords, identifiers, operators, numeric and string literals, line
//! comments, and source line tracking.

mod token;

pub use token::TokenKind;

use logos::Logos;
use thiserror::Error;

/// A token with its kind, source line, and source text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The 1-indexed source line the token starts on
    pub line: u32,
    /// The source text of the token
    pub lexeme: String,
}

impl Token {
    /// Create a new token
    #[must_use]
    pub fn new(kind: TokenKind, line: u32, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            lexeme: lexeme.into(),
        }
    }
}

/// Lexer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),
}

/// A lexer error with the line it occurred on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub error: LexError,
    pub line: u32,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at line {}", self.error, self.line)
    }
}

impl std::error::Error for LineError {}

/// Maps byte offsets to 1-indexed line numbers
struct LineIndex {
    /// Byte offsets of newline characters, ascending
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let newlines = source
            .bytes()
            .enumerate()
            .filter_map(|(i, b)| (b == b'\n').then_some(i))
            .collect();
        Self { newlines }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn line_at(&self, offset: usize) -> u32 {
        let preceding = self.newlines.partition_point(|&nl| nl < offset);
        preceding as u32 + 1
    }
}

/// The Skarn lexer
pub struct Lexer;

impl Lexer {
    /// Tokenize a source string
    ///
    /// Returns all recognized tokens together with any lexical errors.
    /// An `Eof` token is always appended.
    #[must_use]
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LineError>) {
        let index = LineIndex::new(source);
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        let mut lexer = TokenKind::lexer(source);
        while let Some(result) = lexer.next() {
            let line = index.line_at(lexer.span().start);
            match result {
                Ok(kind) => tokens.push(Token::new(kind, line, lexer.slice())),
                Err(()) => {
                    let ch = lexer.slice().chars().next().unwrap_or('\0');
                    errors.push(LineError {
                        error: LexError::UnexpectedChar(ch),
                        line,
                    });
                }
            }
        }

        let last_line = index.line_at(source.len());
        tokens.push(Token::new(TokenKind::Eof, last_line, ""));
        (tokens, errors)
    }
}

/// Decode a quoted string literal's lexeme into its value
///
/// Supports `\\`, `\"`, `\n`, `\t`, and `\r` escapes. Unknown escapes are
/// reported as errors.
pub fn unescape_string(lexeme: &str) -> Result<String, LexError> {
    let inner = &lexeme[1..lexeme.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(LexError::InvalidEscape(other)),
            None => return Err(LexError::InvalidEscape('\0')),
        }
    }
    Ok(out)
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
    fn test_simple_assignment() {
        assert_eq!(
            kinds("a = 0"),
            vec![
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Int,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let (tokens, _) = Lexer::tokenize("a = 0\nb = 1\n\nc = 2\n");
        let lines: Vec<u32> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 1, 1, 2, 2, 2, 4, 4, 4, 5]);
    }

    #[test]
    fn test_keywords_vs_idents() {
        assert_eq!(
            kinds("fn global globals"),
            vec![
                TokenKind::Fn,
                TokenKind::Global,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a = 1 // trailing\n// full line\nb = 2"),
            vec![
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Int,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Int,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e && f || g"),
            vec![
                TokenKind::Ident,
                TokenKind::EqEq,
                TokenKind::Ident,
                TokenKind::NotEq,
                TokenKind::Ident,
                TokenKind::LtEq,
                TokenKind::Ident,
                TokenKind::GtEq,
                TokenKind::Ident,
                TokenKind::AndAnd,
                TokenKind::Ident,
                TokenKind::OrOr,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unexpected_character_reported() {
        let (_, errors) = Lexer::tokenize("a = $");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, LexError::UnexpectedChar('$'));
        assert_eq!(errors[0].line, 1);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_string(r#""a\nb""#).unwrap(), "a\nb");
        assert_eq!(unescape_string(r#""plain""#).unwrap(), "plain");
        assert!(unescape_string(r#""bad\q""#).is_err());
    }

    #[test]
    fn test_float_vs_int() {
        assert_eq!(
            kinds("1 1.5"),
            vec![TokenKind::Int, TokenKind::Float, TokenKind::Eof]
        );
    }
}
