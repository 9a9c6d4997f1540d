//! Argument classification and quoting.

/// How an argument is sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentEncoding {
    /// Bare atom.
    Atom,
    /// Quoted string with `"` and `\` escaped.
    Quoted,
    /// Literal, `{N}` followed by the raw bytes.
    Literal,
}

/// Returns true if the byte cannot appear in a bare atom.
///
/// Covers the IMAP specials, the bytes the response lexer splits atoms on
/// and the characters that would start an escape or a literal marker.
const fn is_special(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'(' | b')' | b'%' | b'"' | b'[' | b']' | b'\\' | b'{'
    )
}

const fn is_control(b: u8) -> bool {
    b < 0x20
}

/// Decides how to send `bytes`.
///
/// Empty values are quoted. Any control byte (CR and LF included) or byte
/// at or above 0x80 forces a literal.
#[must_use]
pub fn classify(bytes: &[u8]) -> ArgumentEncoding {
    if bytes.iter().any(|&b| is_control(b) || b >= 0x80) {
        ArgumentEncoding::Literal
    } else if bytes.is_empty() || bytes.iter().any(|&b| is_special(b)) {
        ArgumentEncoding::Quoted
    } else {
        ArgumentEncoding::Atom
    }
}

/// Writes a quoted string.
pub fn write_quoted(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(b'"');
    for &b in bytes {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

/// Writes a literal marker, `{N}` or `{N+}`, followed by CRLF.
pub fn write_literal_marker(buf: &mut Vec<u8>, len: usize, non_synchronizing: bool) {
    buf.push(b'{');
    buf.extend_from_slice(len.to_string().as_bytes());
    if non_synchronizing {
        buf.push(b'+');
    }
    buf.extend_from_slice(b"}\r\n");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::parser::{Chunk, Token, tokenize};

    #[test]
    fn test_atoms() {
        assert_eq!(classify(b"INBOX"), ArgumentEncoding::Atom);
        assert_eq!(classify(b"user@example.com"), ArgumentEncoding::Atom);
        assert_eq!(classify(b"1:*"), ArgumentEncoding::Atom);
    }

    #[test]
    fn test_quoted() {
        assert_eq!(classify(b""), ArgumentEncoding::Quoted);
        assert_eq!(classify(b"Sent Items"), ArgumentEncoding::Quoted);
        assert_eq!(classify(b"a%b"), ArgumentEncoding::Quoted);
        assert_eq!(classify(b"say \"hi\""), ArgumentEncoding::Quoted);
        assert_eq!(classify(b"back\\slash"), ArgumentEncoding::Quoted);
        assert_eq!(classify(b"x[1]"), ArgumentEncoding::Quoted);
    }

    #[test]
    fn test_literals() {
        assert_eq!(classify(b"caf\xc3\xa9"), ArgumentEncoding::Literal);
        assert_eq!(classify(&[0xC3]), ArgumentEncoding::Literal);
        assert_eq!(classify(b"two\r\nlines"), ArgumentEncoding::Literal);
        assert_eq!(classify(b"tab\there"), ArgumentEncoding::Literal);
    }

    #[test]
    fn test_quoting_escapes() {
        let mut buf = Vec::new();
        write_quoted(&mut buf, br#"a "b" \c"#);
        assert_eq!(buf, br#""a \"b\" \\c""#);
    }

    #[test]
    fn test_quoting_agrees_with_lexer() {
        let value = br#"odd "quoted" \ value (x)"#;
        let mut buf = Vec::new();
        write_quoted(&mut buf, value);
        assert_eq!(
            tokenize(&[Chunk::line(buf)]).unwrap(),
            vec![Token::QuotedString(value.to_vec())]
        );
    }

    #[test]
    fn test_atoms_lex_as_single_tokens() {
        for value in [&b"INBOX"[..], b"a.b-c", b"1,2:4", b"$Label"] {
            assert_eq!(classify(value), ArgumentEncoding::Atom);
            assert_eq!(
                tokenize(&[Chunk::line(value)]).unwrap(),
                vec![Token::Atom(value.to_vec())]
            );
        }
    }

    #[test]
    fn test_literal_markers() {
        let mut buf = Vec::new();
        write_literal_marker(&mut buf, 11, false);
        write_literal_marker(&mut buf, 0, true);
        assert_eq!(buf, b"{11}\r\n{0+}\r\n");
    }
}
