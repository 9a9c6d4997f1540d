//! IMAP response parser.
//!
//! Builds a tree of [`Atom`]s from the token stream of one response. Open
//! lists live on an explicit stack of frames, so nesting depth is bounded by
//! memory rather than by the call stack.
//!
//! A bracketed section glued to the preceding atom is folded into it, which
//! keeps FETCH keys such as `BODY[HEADER.FIELDS (FROM)]<0>` in one piece.

mod fetch;
mod types;
mod untagged;

pub use fetch::{FetchOptions, parse_fetch_response};
pub use types::{
    Address, Atom, BodyData, BodySection, Envelope, FetchRecord, FetchValue, SearchIds,
};
pub use untagged::{IdleEvent, Response, TaggedResponse, UntaggedResponse};

pub(crate) use untagged::capability_code;

use crate::parser::lexer::{Chunk, Lexeme, Lexer, Token};
use crate::{Error, Result};

struct Frame {
    position: usize,
    items: Vec<Atom>,
}

/// Parses a response into its top-level atoms.
///
/// # Errors
///
/// Returns [`Error::Parse`] for lexer errors, an unmatched `)` or `]`, or a
/// list still open at the end of the response.
pub fn parse_response(chunks: &[Chunk]) -> Result<Vec<Atom>> {
    let mut lexer = Lexer::new(chunks);
    let mut top = Vec::new();
    let mut open: Vec<Frame> = Vec::new();

    while let Some(lexeme) = lexer.next_lexeme()? {
        let atom = match lexeme.token {
            Token::OpenParen => {
                open.push(Frame {
                    position: lexeme.position,
                    items: Vec::new(),
                });
                continue;
            }
            Token::CloseParen => {
                let frame = open
                    .pop()
                    .ok_or_else(|| Error::parse(lexeme.position, "unexpected ')'"))?;
                Atom::List(frame.items)
            }
            Token::OpenBracket => {
                let mut section = read_section(&mut lexer, lexeme.position)?;
                append_glued_atom(&mut lexer, &mut section)?;
                let items = current(&mut open, &mut top);
                if lexeme.glued
                    && let Some(Atom::Text(prefix)) = items.last_mut()
                {
                    prefix.extend_from_slice(&section);
                    continue;
                }
                Atom::Text(section)
            }
            Token::CloseBracket => return Err(Error::parse(lexeme.position, "unexpected ']'")),
            Token::Atom(bytes) => classify_atom(bytes),
            Token::QuotedString(bytes) | Token::Literal(bytes) => Atom::Text(bytes),
        };
        current(&mut open, &mut top).push(atom);
    }

    if let Some(frame) = open.last() {
        return Err(Error::parse(
            lexer.position(),
            format!("list opened at {} is never closed", frame.position),
        ));
    }
    Ok(top)
}

fn current<'a>(open: &'a mut [Frame], top: &'a mut Vec<Atom>) -> &'a mut Vec<Atom> {
    match open.last_mut() {
        Some(frame) => &mut frame.items,
        None => top,
    }
}

fn classify_atom(bytes: Vec<u8>) -> Atom {
    if bytes.eq_ignore_ascii_case(b"NIL") {
        return Atom::Nil;
    }
    if !bytes.is_empty() && bytes.iter().all(u8::is_ascii_digit) {
        // Digits only, so this is valid UTF-8; overflow falls back to text.
        if let Some(n) = std::str::from_utf8(&bytes).ok().and_then(|s| s.parse().ok()) {
            return Atom::Number(n);
        }
    }
    Atom::Text(bytes)
}

/// Reads up to the matching `]`, rendering the section as it was sent.
fn read_section(lexer: &mut Lexer<'_>, position: usize) -> Result<Vec<u8>> {
    let mut out = vec![b'['];
    let mut depth = 1usize;

    loop {
        let lexeme = lexer
            .next_lexeme()?
            .ok_or_else(|| Error::parse(position, "'[' is never closed"))?;
        match lexeme.token {
            Token::OpenBracket => depth += 1,
            Token::CloseBracket => depth -= 1,
            _ => {}
        }
        if !lexeme.glued {
            out.push(b' ');
        }
        lexeme.token.write_wire(&mut out);
        if depth == 0 {
            return Ok(out);
        }
    }
}

/// Appends a partial-fetch origin such as `<0>` that follows a section.
fn append_glued_atom(lexer: &mut Lexer<'_>, out: &mut Vec<u8>) -> Result<()> {
    let glued_atom = matches!(
        lexer.peek()?,
        Some(Lexeme {
            token: Token::Atom(_),
            glued: true,
            ..
        })
    );
    if glued_atom
        && let Some(Lexeme {
            token: Token::Atom(bytes),
            ..
        }) = lexer.next_lexeme()?
    {
        out.extend_from_slice(&bytes);
    }
    Ok(())
}

/// Parses the data of SEARCH or SORT responses.
///
/// The data may span several untagged responses. A `(MODSEQ n)` group sets
/// [`SearchIds::modseq`].
///
/// # Errors
///
/// Returns an error if the data holds anything but ids and one MODSEQ group.
pub fn parse_message_list(chunks: &[Chunk]) -> Result<SearchIds> {
    let mut result = SearchIds::default();

    for atom in parse_response(chunks)? {
        match atom {
            Atom::Number(id) => result.ids.push(id),
            Atom::List(items) => match items.as_slice() {
                [key, Atom::Number(modseq)] if key.is_word("MODSEQ") => {
                    result.modseq = Some(*modseq);
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "unexpected group in message list: {items:?}"
                    )));
                }
            },
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected item in message list: {other:?}"
                )));
            }
        }
    }

    Ok(result)
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
    use proptest::prelude::*;

    use super::*;

    fn text(s: &str) -> Atom {
        Atom::Text(s.as_bytes().to_vec())
    }

    fn parse(line: &str) -> Result<Vec<Atom>> {
        parse_response(&[Chunk::line(line)])
    }

    #[test]
    fn test_literal_bearing_fetch() {
        let chunks = [
            Chunk::with_literal("1 (RFC822 {11}", "Hello World"),
            Chunk::line(")"),
        ];
        assert_eq!(
            parse_response(&chunks).unwrap(),
            vec![
                Atom::Number(1),
                Atom::List(vec![text("RFC822"), text("Hello World")]),
            ]
        );
    }

    #[test]
    fn test_nested_lists() {
        assert_eq!(
            parse("(a (b (c)) ()) d").unwrap(),
            vec![
                Atom::List(vec![
                    text("a"),
                    Atom::List(vec![text("b"), Atom::List(vec![text("c")])]),
                    Atom::List(vec![]),
                ]),
                text("d"),
            ]
        );
    }

    #[test]
    fn test_numbers_and_text() {
        assert_eq!(
            parse(r#"42 4a "42" 007"#).unwrap(),
            vec![Atom::Number(42), text("4a"), text("42"), Atom::Number(7)]
        );
    }

    #[test]
    fn test_huge_number_stays_text() {
        assert_eq!(
            parse("99999999999999999999999").unwrap(),
            vec![text("99999999999999999999999")]
        );
    }

    #[test]
    fn test_nil() {
        assert_eq!(
            parse(r#"NIL nil "NIL""#).unwrap(),
            vec![Atom::Nil, Atom::Nil, text("NIL")]
        );
    }

    #[test]
    fn test_literal_digits_stay_text() {
        let chunks = [Chunk::with_literal("X {3}", "123")];
        assert_eq!(
            parse_response(&chunks).unwrap(),
            vec![text("X"), text("123")]
        );
    }

    #[test]
    fn test_unmatched_close_paren() {
        let err = parse("(a) b)").unwrap_err();
        assert!(matches!(err, Error::Parse { position: 5, .. }));
    }

    #[test]
    fn test_unclosed_list_is_an_error() {
        let err = parse("1 (FLAGS (\\Seen)").unwrap_err();
        assert!(matches!(err, Error::Parse { position: 16, .. }));
    }

    #[test]
    fn test_stray_close_bracket() {
        assert!(parse("a]").is_err());
        assert!(parse("BODY[TEXT").is_err());
    }

    #[test]
    fn test_section_folds_into_key() {
        let chunks = [
            Chunk::with_literal("1 (BODY[HEADER.FIELDS (FROM SUBJECT)] {5}", "From:"),
            Chunk::line(" UID 9)"),
        ];
        assert_eq!(
            parse_response(&chunks).unwrap(),
            vec![
                Atom::Number(1),
                Atom::List(vec![
                    text("BODY[HEADER.FIELDS (FROM SUBJECT)]"),
                    text("From:"),
                    text("UID"),
                    Atom::Number(9),
                ]),
            ]
        );
    }

    #[test]
    fn test_section_with_origin() {
        assert_eq!(
            parse(r#"(BODY[]<0> "abc" BODY[1.2] NIL)"#).unwrap(),
            vec![Atom::List(vec![
                text("BODY[]<0>"),
                text("abc"),
                text("BODY[1.2]"),
                Atom::Nil,
            ])]
        );
    }

    #[test]
    fn test_nested_brackets() {
        assert_eq!(parse("X[a[b]c]").unwrap(), vec![text("X[a[b]c]")]);
    }

    #[test]
    fn test_standalone_section() {
        assert_eq!(
            parse("[ALERT] hello").unwrap(),
            vec![text("[ALERT]"), text("hello")]
        );
    }

    #[test]
    fn test_reparse_is_stable() {
        let chunks = [
            Chunk::with_literal("2 (FLAGS (\\Seen) BODY[] {3}", "abc"),
            Chunk::line(")"),
        ];
        assert_eq!(
            parse_response(&chunks).unwrap(),
            parse_response(&chunks).unwrap()
        );
    }

    /// Writes `atom` the way a server would, sending unprintable text as a
    /// literal.
    fn write_atom(atom: &Atom, line: &mut Vec<u8>, chunks: &mut Vec<Chunk>) {
        match atom {
            Atom::Nil => line.extend_from_slice(b"NIL"),
            Atom::Number(n) => line.extend_from_slice(n.to_string().as_bytes()),
            Atom::Text(bytes) if bytes.iter().all(|b| (0x20..0x7f).contains(b)) => {
                line.push(b'"');
                for &b in bytes {
                    if b == b'"' || b == b'\\' {
                        line.push(b'\\');
                    }
                    line.push(b);
                }
                line.push(b'"');
            }
            Atom::Text(bytes) => {
                line.extend_from_slice(format!("{{{}}}", bytes.len()).as_bytes());
                chunks.push(Chunk::with_literal(std::mem::take(line), bytes.clone()));
            }
            Atom::List(items) => {
                line.push(b'(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        line.push(b' ');
                    }
                    write_atom(item, line, chunks);
                }
                line.push(b')');
            }
        }
    }

    fn to_chunks(atoms: &[Atom]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut line = Vec::new();
        for (i, atom) in atoms.iter().enumerate() {
            if i > 0 {
                line.push(b' ');
            }
            write_atom(atom, &mut line, &mut chunks);
        }
        chunks.push(Chunk::line(line));
        chunks
    }

    fn atom_tree() -> impl Strategy<Value = Atom> {
        let leaf = prop_oneof![
            Just(Atom::Nil),
            any::<u64>().prop_map(Atom::Number),
            "[ -~]{0,12}".prop_map(|s| Atom::Text(s.into_bytes())),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Atom::Text),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(Atom::List)
        })
    }

    proptest! {
        #[test]
        fn parse_recovers_written_tree(atoms in prop::collection::vec(atom_tree(), 1..4)) {
            let chunks = to_chunks(&atoms);
            let parsed = parse_response(&chunks).unwrap();
            prop_assert_eq!(&parsed, &atoms);
            prop_assert_eq!(parse_response(&to_chunks(&parsed)).unwrap(), parsed);
        }
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 5_000;
        let line = format!("{}{}", "(".repeat(depth), ")".repeat(depth));
        let atoms = parse(&line).unwrap();

        let mut seen = 0;
        let mut node = atoms.first();
        while let Some(Atom::List(items)) = node {
            seen += 1;
            node = items.first();
        }
        assert_eq!(seen, depth);
    }

    #[test]
    fn test_message_list() {
        let ids = parse_message_list(&[Chunk::line("1 2 3")]).unwrap();
        assert_eq!(ids.ids, vec![1, 2, 3]);
        assert_eq!(ids.modseq, None);
    }

    #[test]
    fn test_message_list_with_modseq() {
        let ids = parse_message_list(&[Chunk::line("1 2 3 (MODSEQ 917162)")]).unwrap();
        assert_eq!(ids.ids, vec![1, 2, 3]);
        assert_eq!(ids.modseq, Some(917162));
    }

    #[test]
    fn test_message_list_over_several_lines() {
        let ids = parse_message_list(&[Chunk::line("5 6"), Chunk::line("7")]).unwrap();
        assert_eq!(ids.ids, vec![5, 6, 7]);
    }

    #[test]
    fn test_empty_message_list() {
        assert!(parse_message_list(&[Chunk::line("")]).unwrap().is_empty());
        assert!(parse_message_list(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_message_list_rejects_garbage() {
        assert!(matches!(
            parse_message_list(&[Chunk::line("1 two 3")]),
            Err(Error::Protocol(_))
        ));
    }
}
