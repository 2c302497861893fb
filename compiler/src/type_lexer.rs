// Lexer for port type strings.
//
// Tokenizes declarations such as `Signal<float>`, `Field<vec2> @unit(px)`,
// or `internal Event<trigger>`. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in a type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(TypeToken, Span)>,
    pub errors: Vec<LexError>,
}

/// Type-string tokens. Identifiers carry no value; use the span to
/// retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TypeToken {
    #[token("internal")]
    Internal,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("@")]
    At,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    /// Identifier: world, domain, annotation key, or annotation value.
    /// Dots and slashes are allowed so units like `m/s` or `0..1` lex whole.
    #[regex(r"[a-zA-Z0-9_][a-zA-Z0-9_./]*")]
    Ident,
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeToken::Internal => write!(f, "internal"),
            TypeToken::Lt => write!(f, "<"),
            TypeToken::Gt => write!(f, ">"),
            TypeToken::At => write!(f, "@"),
            TypeToken::LParen => write!(f, "("),
            TypeToken::RParen => write!(f, ")"),
            TypeToken::Ident => write!(f, "<ident>"),
        }
    }
}

/// Lex a type string into tokens. Lexing is non-fatal: errors are
/// collected and the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = TypeToken::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
