// Lexer for kernel description files.
//
// Uses the `logos` crate for DFA-based lexing. Whitespace, including
// newlines, is insignificant; `#` starts a comment running to end of line.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
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
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Kernel description token types.
///
/// Keywords and symbols are matched as fixed strings. Identifiers carry no
/// value - use the span to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("loop")]
    Loop,
    #[token("work_amount")]
    WorkAmount,
    #[token("entry")]
    Entry,
    #[token("exit")]
    Exit,
    #[token("dim")]
    Dim,
    #[token("fixed")]
    Fixed,
    #[token("loops")]
    Loops,
    #[token("layout")]
    Layout,
    #[token("in")]
    In,
    #[token("out")]
    Out,

    // ── Symbols ──
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // ── Literals ──
    /// Unsigned integer literal.
    #[regex(r"[0-9]+", parse_number)]
    Number(u64),

    /// Value reference `%name`; the payload excludes the sigil.
    #[regex(r"%[A-Za-z0-9_]+", parse_value)]
    Value(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Loop => write!(f, "loop"),
            Token::WorkAmount => write!(f, "work_amount"),
            Token::Entry => write!(f, "entry"),
            Token::Exit => write!(f, "exit"),
            Token::Dim => write!(f, "dim"),
            Token::Fixed => write!(f, "fixed"),
            Token::Loops => write!(f, "loops"),
            Token::Layout => write!(f, "layout"),
            Token::In => write!(f, "in"),
            Token::Out => write!(f, "out"),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::Question => write!(f, "?"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Value(name) => write!(f, "%{name}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

fn parse_value(lex: &mut logos::Lexer<'_, Token>) -> String {
    lex.slice()[1..].to_string()
}

// ── Public API ──

/// Lex a kernel source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
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
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("loop work_amount entry exit dim fixed loops layout in out");
        assert_eq!(
            tokens,
            vec![
                Token::Loop,
                Token::WorkAmount,
                Token::Entry,
                Token::Exit,
                Token::Dim,
                Token::Fixed,
                Token::Loops,
                Token::Layout,
                Token::In,
                Token::Out,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `loops` and `looped` must not split into `loop` + suffix.
        let tokens = lex_ok("loop loops looped input");
        assert_eq!(
            tokens,
            vec![Token::Loop, Token::Loops, Token::Ident, Token::Ident]
        );
    }

    #[test]
    fn symbols() {
        let tokens = lex_ok("= : ? . , ( ) [ ] { }");
        assert_eq!(
            tokens,
            vec![
                Token::Equals,
                Token::Colon,
                Token::Question,
                Token::Dot,
                Token::Comma,
                Token::LParen,
                Token::RParen,
                Token::LBracket,
                Token::RBracket,
                Token::LBrace,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn loop_port_reference() {
        let tokens = lex_ok("entry %ld.in[0] dim 2 fixed");
        assert_eq!(
            tokens,
            vec![
                Token::Entry,
                Token::Value("ld".into()),
                Token::Dot,
                Token::In,
                Token::LBracket,
                Token::Number(0),
                Token::RBracket,
                Token::Dim,
                Token::Number(2),
                Token::Fixed,
            ]
        );
    }

    #[test]
    fn comments_and_newlines_are_skipped() {
        let tokens = lex_ok("# header\n%x = Exp(%y) # trailing\n\n");
        assert_eq!(
            tokens,
            vec![
                Token::Value("x".into()),
                Token::Equals,
                Token::Ident,
                Token::LParen,
                Token::Value("y".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("%abc = Load");
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 4 });
        assert_eq!(result.tokens[2].1, Span { start: 7, end: 11 });
    }

    #[test]
    fn bad_characters_are_reported_and_skipped() {
        let result = lex("loop 0 @ work_amount");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 7, end: 8 });
        let tokens: Vec<_> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            tokens,
            vec![Token::Loop, Token::Number(0), Token::WorkAmount]
        );
    }

    #[test]
    fn oversized_number_is_an_error() {
        let result = lex("99999999999999999999999");
        assert!(result.tokens.is_empty());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn display_round_trips_symbols() {
        assert_eq!(Token::LBrace.to_string(), "{");
        assert_eq!(Token::Value("st".into()).to_string(), "%st");
        assert_eq!(Token::Number(7).to_string(), "7");
    }
}
