//! IMAP token types.

/// Token types produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Opening parenthesis.
    OpenParen,
    /// Closing parenthesis.
    CloseParen,
    /// Opening bracket.
    OpenBracket,
    /// Closing bracket.
    CloseBracket,
    /// Atom (unquoted run without special characters).
    Atom(Vec<u8>),
    /// Quoted string, unescaped.
    QuotedString(Vec<u8>),
    /// Literal payload.
    Literal(Vec<u8>),
}

impl Token {
    /// Appends the token's wire form to `out`.
    ///
    /// Quoted strings are re-quoted; literals are written as their payload.
    pub fn write_wire(&self, out: &mut Vec<u8>) {
        match self {
            Self::OpenParen => out.push(b'('),
            Self::CloseParen => out.push(b')'),
            Self::OpenBracket => out.push(b'['),
            Self::CloseBracket => out.push(b']'),
            Self::Atom(bytes) | Self::Literal(bytes) => out.extend_from_slice(bytes),
            Self::QuotedString(bytes) => {
                out.push(b'"');
                for &b in bytes {
                    if b == b'"' || b == b'\\' {
                        out.push(b'\\');
                    }
                    out.push(b);
                }
                out.push(b'"');
            }
        }
    }
}

/// A token together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    /// The token.
    pub token: Token,
    /// Byte offset of the token's first byte, counted across chunks.
    pub position: usize,
    /// True when no whitespace separates this token from the previous one.
    pub glued: bool,
}
