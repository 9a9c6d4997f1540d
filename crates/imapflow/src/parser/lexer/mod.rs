//! IMAP lexer for tokenizing server responses.
//!
//! The lexer walks a sequence of [`Chunk`]s left to right. Space, tab, CR
//! and LF separate tokens; `(`, `)`, `[` and `]` are tokens of their own; a
//! `"` starts a quoted string. Everything else runs into an atom.
//!
//! A chunk's literal payload is emitted as a single [`Token::Literal`] at the
//! place where its `{N}` marker sat, so the parser never sees the marker.

mod chunk;
mod token;

pub use chunk::Chunk;
pub use token::{Lexeme, Token};

use crate::{Error, Result};

/// Cursor over the tokens of one response.
#[derive(Debug)]
pub struct Lexer<'a> {
    chunks: &'a [Chunk],
    index: usize,
    offset: usize,
    base: usize,
    last_end: Option<usize>,
    peeked: Option<Lexeme>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer over the given chunks.
    #[must_use]
    pub const fn new(chunks: &'a [Chunk]) -> Self {
        Self {
            chunks,
            index: 0,
            offset: 0,
            base: 0,
            last_end: None,
            peeked: None,
        }
    }

    /// Returns the current position, counted across chunks.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.base + self.offset
    }

    /// Returns the next lexeme without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the upcoming input is malformed.
    pub fn peek(&mut self) -> Result<Option<&Lexeme>> {
        if self.peeked.is_none() {
            self.peeked = self.read_lexeme()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Reads the next lexeme, or `None` at the end of the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for an unterminated quoted string, a bad or
    /// mismatched literal marker, or a literal payload with no marker.
    pub fn next_lexeme(&mut self) -> Result<Option<Lexeme>> {
        if let Some(lexeme) = self.peeked.take() {
            return Ok(Some(lexeme));
        }
        self.read_lexeme()
    }

    /// Reads the next token, dropping its position.
    ///
    /// # Errors
    ///
    /// See [`Lexer::next_lexeme`].
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        Ok(self.next_lexeme()?.map(|lexeme| lexeme.token))
    }

    fn read_lexeme(&mut self) -> Result<Option<Lexeme>> {
        let chunks = self.chunks;
        loop {
            let Some(chunk) = chunks.get(self.index) else {
                return Ok(None);
            };
            let line = chunk.line.as_slice();

            while self.offset < line.len() && is_whitespace(line[self.offset]) {
                self.offset += 1;
            }
            if self.offset >= line.len() {
                if chunk.literal.is_some() {
                    return Err(Error::parse(
                        self.position(),
                        "literal payload without a {N} marker",
                    ));
                }
                self.next_chunk(chunk);
                continue;
            }

            let start = self.offset;
            let position = self.position();
            let glued = self.last_end == Some(position);

            let (token, end) = match line[start] {
                b'(' => (Token::OpenParen, start + 1),
                b')' => (Token::CloseParen, start + 1),
                b'[' => (Token::OpenBracket, start + 1),
                b']' => (Token::CloseBracket, start + 1),
                b'"' => self.read_quoted(line, start)?,
                _ => {
                    let end = atom_end(line, start);
                    let atom = &line[start..end];
                    if is_marker_shape(atom) && is_trailing(line, end) {
                        if let Some(payload) = &chunk.literal {
                            let token = literal_token(atom, payload, position)?;
                            self.next_chunk(chunk);
                            self.last_end = Some(self.base);
                            return Ok(Some(Lexeme {
                                token,
                                position,
                                glued,
                            }));
                        }
                        if marker_length(atom).is_some() {
                            return Err(Error::parse(position, "literal marker without payload"));
                        }
                    }
                    (Token::Atom(atom.to_vec()), end)
                }
            };

            self.offset = end;
            self.last_end = Some(self.base + end);
            return Ok(Some(Lexeme {
                token,
                position,
                glued,
            }));
        }
    }

    fn read_quoted(&self, line: &[u8], start: usize) -> Result<(Token, usize)> {
        let mut out = Vec::new();
        let mut i = start + 1;

        while let Some(&byte) = line.get(i) {
            match byte {
                b'"' => return Ok((Token::QuotedString(out), i + 1)),
                b'\\' if matches!(line.get(i + 1), Some(b'"' | b'\\')) => {
                    out.push(line[i + 1]);
                    i += 2;
                }
                _ => {
                    out.push(byte);
                    i += 1;
                }
            }
        }

        Err(Error::parse(self.base + start, "unterminated quoted string"))
    }

    fn next_chunk(&mut self, chunk: &Chunk) {
        self.base += chunk.len();
        self.index += 1;
        self.offset = 0;
        // A line break separates tokens.
        self.last_end = None;
    }
}

/// Tokenizes a whole response.
///
/// # Errors
///
/// See [`Lexer::next_lexeme`].
pub fn tokenize(chunks: &[Chunk]) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(chunks);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

const fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

const fn ends_atom(b: u8) -> bool {
    is_whitespace(b) || matches!(b, b'(' | b')' | b'[' | b']' | b'"')
}

fn atom_end(line: &[u8], start: usize) -> usize {
    line[start..]
        .iter()
        .position(|&b| ends_atom(b))
        .map_or(line.len(), |n| start + n)
}

fn is_trailing(line: &[u8], end: usize) -> bool {
    line[end..].iter().all(|&b| is_whitespace(b))
}

fn is_marker_shape(atom: &[u8]) -> bool {
    atom.len() >= 2 && atom.first() == Some(&b'{') && atom.last() == Some(&b'}')
}

/// Length announced by `{N}` or `{N+}`.
fn marker_length(atom: &[u8]) -> Option<usize> {
    let inner = &atom[1..atom.len() - 1];
    let digits = inner.strip_suffix(b"+").unwrap_or(inner);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn literal_token(marker: &[u8], payload: &[u8], position: usize) -> Result<Token> {
    let announced = marker_length(marker).ok_or_else(|| {
        Error::parse(
            position,
            format!(
                "malformed literal marker {}",
                String::from_utf8_lossy(marker)
            ),
        )
    })?;
    if announced != payload.len() {
        return Err(Error::parse(
            position,
            format!(
                "literal marker announces {announced} bytes but {} follow",
                payload.len()
            ),
        ));
    }
    Ok(Token::Literal(payload.to_vec()))
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

    fn atom(s: &str) -> Token {
        Token::Atom(s.as_bytes().to_vec())
    }

    fn lex(line: &str) -> Vec<Token> {
        tokenize(&[Chunk::line(line)]).unwrap()
    }

    #[test]
    fn test_parens_and_atoms() {
        assert_eq!(
            lex("(FLAGS (\\Seen $Junk))"),
            vec![
                Token::OpenParen,
                atom("FLAGS"),
                Token::OpenParen,
                atom("\\Seen"),
                atom("$Junk"),
                Token::CloseParen,
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_brackets_are_tokens() {
        let chunks = [Chunk::line("BODY[HEADER] x")];
        let mut lexer = Lexer::new(&chunks);

        let body = lexer.next_lexeme().unwrap().unwrap();
        assert_eq!(body.token, atom("BODY"));
        assert!(!body.glued);

        let open = lexer.next_lexeme().unwrap().unwrap();
        assert_eq!(open.token, Token::OpenBracket);
        assert!(open.glued);
        assert_eq!(open.position, 4);

        assert_eq!(lexer.next_token().unwrap(), Some(atom("HEADER")));
        assert_eq!(lexer.next_token().unwrap(), Some(Token::CloseBracket));

        let x = lexer.next_lexeme().unwrap().unwrap();
        assert!(!x.glued);
        assert_eq!(x.position, 13);
        assert_eq!(lexer.next_lexeme().unwrap(), None);
    }

    #[test]
    fn test_line_break_separates_tokens() {
        let chunks = [Chunk::line("1 (FLAGS ())"), Chunk::line("2 (UID 7)")];
        let mut lexer = Lexer::new(&chunks);
        while let Some(lexeme) = lexer.next_lexeme().unwrap() {
            if lexeme.token == atom("2") {
                assert_eq!(lexeme.position, 12);
                assert!(!lexeme.glued);
                return;
            }
        }
        panic!("second line was not lexed");
    }

    #[test]
    fn test_whitespace_separators() {
        assert_eq!(lex("a\tb  c\r\n"), vec![atom("a"), atom("b"), atom("c")]);
        assert!(lex("   ").is_empty());
    }

    #[test]
    fn test_quoted_string_escapes() {
        assert_eq!(
            lex(r#""say \"hi\" \\ bye""#),
            vec![Token::QuotedString(br#"say "hi" \ bye"#.to_vec())]
        );
        assert_eq!(lex(r#""""#), vec![Token::QuotedString(Vec::new())]);
    }

    #[test]
    fn test_other_backslashes_are_kept() {
        assert_eq!(
            lex(r#""C:\temp""#),
            vec![Token::QuotedString(br"C:\temp".to_vec())]
        );
    }

    #[test]
    fn test_quoted_string_holds_specials() {
        assert_eq!(
            lex(r#"("a (b) [c]" x)"#),
            vec![
                Token::OpenParen,
                Token::QuotedString(b"a (b) [c]".to_vec()),
                atom("x"),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_unterminated_quoted_string() {
        let err = tokenize(&[Chunk::line(r#"1 (X "abc)"#)]).unwrap_err();
        assert!(matches!(err, Error::Parse { position: 5, .. }));
    }

    #[test]
    fn test_literal_replaces_marker() {
        let chunks = [
            Chunk::with_literal("1 (RFC822 {11}", "Hello World"),
            Chunk::line(")"),
        ];
        let mut lexer = Lexer::new(&chunks);
        let mut lexemes = Vec::new();
        while let Some(lexeme) = lexer.next_lexeme().unwrap() {
            lexemes.push(lexeme);
        }

        let tokens: Vec<_> = lexemes.iter().map(|l| l.token.clone()).collect();
        assert_eq!(
            tokens,
            vec![
                atom("1"),
                Token::OpenParen,
                atom("RFC822"),
                Token::Literal(b"Hello World".to_vec()),
                Token::CloseParen,
            ]
        );
        assert_eq!(lexemes[3].position, 10);
        assert_eq!(lexemes[4].position, 25);
        assert!(lexemes[4].glued);
    }

    #[test]
    fn test_literal_is_opaque() {
        let chunks = [
            Chunk::with_literal("* 1 FETCH (BODY[] {8}", "a (b\" ]\r\n"[..8].to_string()),
            Chunk::line(")"),
        ];
        let tokens = tokenize(&chunks).unwrap();
        assert_eq!(tokens[7], Token::Literal(b"a (b\" ]\r".to_vec()));
        assert_eq!(tokens[8], Token::CloseParen);
    }

    #[test]
    fn test_non_synchronizing_marker() {
        let chunks = [Chunk::with_literal("X {5+}", "hello")];
        assert_eq!(
            tokenize(&chunks).unwrap(),
            vec![atom("X"), Token::Literal(b"hello".to_vec())]
        );
    }

    #[test]
    fn test_consecutive_literals() {
        let chunks = [
            Chunk::with_literal("(A {1}", "x"),
            Chunk::with_literal(" B {2}", "yz"),
            Chunk::line(")"),
        ];
        assert_eq!(
            tokenize(&chunks).unwrap(),
            vec![
                Token::OpenParen,
                atom("A"),
                Token::Literal(b"x".to_vec()),
                atom("B"),
                Token::Literal(b"yz".to_vec()),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_empty_literal() {
        let chunks = [Chunk::with_literal("X {0}", "")];
        assert_eq!(
            tokenize(&chunks).unwrap(),
            vec![atom("X"), Token::Literal(Vec::new())]
        );
    }

    #[test]
    fn test_marker_length_mismatch() {
        let err = tokenize(&[Chunk::with_literal("X {4}", "hello")]).unwrap_err();
        assert!(matches!(err, Error::Parse { position: 2, .. }));
    }

    #[test]
    fn test_non_numeric_marker() {
        let err = tokenize(&[Chunk::with_literal("X {1a}", "h")]).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_payload_without_marker() {
        let err = tokenize(&[Chunk::with_literal("X Y", "h")]).unwrap_err();
        assert!(matches!(err, Error::Parse { position: 3, .. }));
    }

    #[test]
    fn test_marker_without_payload() {
        assert!(tokenize(&[Chunk::line("X {3}")]).is_err());
        assert_eq!(lex("X {abc}"), vec![atom("X"), atom("{abc}")]);
    }

    #[test]
    fn test_marker_mid_line_is_an_atom() {
        assert_eq!(lex("{3} X"), vec![atom("{3}"), atom("X")]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let chunks = [Chunk::line("A B")];
        let mut lexer = Lexer::new(&chunks);
        assert_eq!(lexer.peek().unwrap().unwrap().token, atom("A"));
        assert_eq!(lexer.peek().unwrap().unwrap().token, atom("A"));
        assert_eq!(lexer.next_token().unwrap(), Some(atom("A")));
        assert_eq!(lexer.next_token().unwrap(), Some(atom("B")));
        assert!(lexer.peek().unwrap().is_none());
    }

    #[test]
    fn test_positions_span_chunks() {
        let chunks = [Chunk::line("A"), Chunk::line("BC D")];
        let mut lexer = Lexer::new(&chunks);
        assert_eq!(lexer.next_lexeme().unwrap().unwrap().position, 0);
        let bc = lexer.next_lexeme().unwrap().unwrap();
        assert_eq!(bc.position, 1);
        assert_eq!(lexer.next_lexeme().unwrap().unwrap().position, 4);
    }

    #[test]
    fn test_high_bytes_in_atoms() {
        assert_eq!(
            tokenize(&[Chunk::line(b"caf\xc3\xa9".to_vec())]).unwrap(),
            vec![Token::Atom(b"caf\xc3\xa9".to_vec())]
        );
    }
}
