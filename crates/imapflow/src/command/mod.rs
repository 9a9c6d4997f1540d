//! IMAP command encoding.
//!
//! A command is a tag, a name and a list of [`Argument`]s. Encoding splits
//! the wire image into [`Segment`]s: each synchronizing literal ends a
//! segment, because its payload may only be sent after the server answered
//! the `{N}` marker with a continuation.

mod serialize;
mod table;
mod tag_generator;

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::datetime::{datetime_to_internaldate, format_criteria_date};
use crate::utf7::MailboxName;

pub use serialize::{ArgumentEncoding, classify};
pub use table::{COMMANDS, CommandSpec, check as check_command, lookup as lookup_command};
pub use tag_generator::TagGenerator;

use serialize::{write_literal_marker, write_quoted};

/// A command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Sent as an atom, quoted string or literal, whichever the bytes allow.
    Value(Vec<u8>),
    /// Always sent as a literal.
    Literal(Vec<u8>),
    /// Sent verbatim, for pre-formed protocol text such as `(FLAGS UID)`.
    Raw(Vec<u8>),
    /// Parenthesised list, elements separated by a space.
    List(Vec<Self>),
}

impl Argument {
    /// Auto-classified value.
    pub fn value(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Value(bytes.into())
    }

    /// Forced literal.
    pub fn literal(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Literal(bytes.into())
    }

    /// Verbatim protocol text.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Raw(bytes.into())
    }

    /// Mailbox name; unicode names are encoded to modified UTF-7.
    pub fn mailbox<'a>(name: impl Into<MailboxName<'a>>) -> Self {
        Self::Value(name.into().to_wire())
    }

    /// Search criteria date, `DD-Mon-YYYY`.
    #[must_use]
    pub fn date(date: NaiveDate) -> Self {
        Self::Raw(format_criteria_date(date).into_bytes())
    }

    /// INTERNALDATE value, as taken by APPEND.
    #[must_use]
    pub fn internal_date<Tz>(dt: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut buf = Vec::new();
        write_quoted(&mut buf, datetime_to_internaldate(dt).as_bytes());
        Self::Raw(buf)
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Self::Value(s.as_bytes().to_vec())
    }
}

impl From<String> for Argument {
    fn from(s: String) -> Self {
        Self::Value(s.into_bytes())
    }
}

impl From<&[u8]> for Argument {
    fn from(bytes: &[u8]) -> Self {
        Self::Value(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Argument {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Value(bytes)
    }
}

impl From<u64> for Argument {
    fn from(n: u64) -> Self {
        Self::Raw(n.to_string().into_bytes())
    }
}

/// Literal payload waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLiteral {
    data: Vec<u8>,
    synchronizing: bool,
}

impl PendingLiteral {
    /// Payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Announced length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if a continuation must be awaited before sending.
    #[must_use]
    pub const fn is_synchronizing(&self) -> bool {
        self.synchronizing
    }
}

/// Command text up to and including a literal marker, plus that literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Text to write, ending in `{N}\r\n` when a literal follows, or in CRLF
    /// for the last segment.
    pub text: Vec<u8>,
    /// Literal announced at the end of `text`.
    pub literal: Option<PendingLiteral>,
}

/// A command ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    tag: String,
    name: String,
    segments: Vec<Segment>,
}

impl EncodedCommand {
    /// Encodes `tag name args...`.
    ///
    /// With `literal_plus` every literal is sent non-synchronizing, `{N+}`,
    /// and never waits for a continuation.
    #[must_use]
    pub fn encode(tag: &str, name: &str, args: &[Argument], literal_plus: bool) -> Self {
        let mut encoder = Encoder {
            literal_plus,
            segments: Vec::new(),
            current: Vec::new(),
        };
        encoder.current.extend_from_slice(tag.as_bytes());
        encoder.current.push(b' ');
        encoder.current.extend_from_slice(name.as_bytes());
        for arg in args {
            encoder.current.push(b' ');
            encoder.write(arg);
        }
        encoder.current.extend_from_slice(b"\r\n");
        encoder.segments.push(Segment {
            text: encoder.current,
            literal: None,
        });

        Self {
            tag: tag.to_string(),
            name: name.to_string(),
            segments: encoder.segments,
        }
    }

    /// Command tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segments in transmission order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Consumes the command, returning its segments.
    #[must_use]
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Full wire image, with every literal in place.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in &self.segments {
            out.extend_from_slice(&segment.text);
            if let Some(literal) = &segment.literal {
                out.extend_from_slice(literal.data());
            }
        }
        out
    }
}

struct Encoder {
    literal_plus: bool,
    segments: Vec<Segment>,
    current: Vec<u8>,
}

impl Encoder {
    fn write(&mut self, arg: &Argument) {
        match arg {
            Argument::Value(bytes) => match classify(bytes) {
                ArgumentEncoding::Atom => self.current.extend_from_slice(bytes),
                ArgumentEncoding::Quoted => write_quoted(&mut self.current, bytes),
                ArgumentEncoding::Literal => self.literal(bytes),
            },
            Argument::Literal(bytes) => self.literal(bytes),
            Argument::Raw(bytes) => self.current.extend_from_slice(bytes),
            Argument::List(items) => {
                self.current.push(b'(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.current.push(b' ');
                    }
                    self.write(item);
                }
                self.current.push(b')');
            }
        }
    }

    fn literal(&mut self, bytes: &[u8]) {
        write_literal_marker(&mut self.current, bytes.len(), self.literal_plus);
        self.segments.push(Segment {
            text: std::mem::take(&mut self.current),
            literal: Some(PendingLiteral {
                data: bytes.to_vec(),
                synchronizing: !self.literal_plus,
            }),
        });
    }
}

/// Joins message ids into a sequence set, `1,2,3`.
#[must_use]
pub fn join_message_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
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
    use chrono::{FixedOffset, TimeZone};
    use proptest::prelude::*;

    use super::*;

    fn wire(name: &str, args: &[Argument]) -> Vec<u8> {
        EncodedCommand::encode("A0001", name, args, false).to_bytes()
    }

    #[test]
    fn test_simple_command() {
        let cmd = EncodedCommand::encode("A0001", "NOOP", &[], false);
        assert_eq!(cmd.segments().len(), 1);
        assert_eq!(cmd.to_bytes(), b"A0001 NOOP\r\n");
        assert_eq!(cmd.tag(), "A0001");
    }

    #[test]
    fn test_atoms_and_quoted() {
        assert_eq!(
            wire("LOGIN", &["user".into(), "pass word".into()]),
            b"A0001 LOGIN user \"pass word\"\r\n"
        );
        assert_eq!(wire("SELECT", &["".into()]), b"A0001 SELECT \"\"\r\n");
    }

    #[test]
    fn test_eight_bit_value_becomes_literal() {
        let cmd = EncodedCommand::encode(
            "A0001",
            "SEARCH",
            &[
                Argument::raw("CHARSET"),
                "UTF-8".into(),
                Argument::raw("SUBJECT"),
                Argument::value("caf\u{e9}"),
            ],
            false,
        );

        let segments = cmd.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, b"A0001 SEARCH CHARSET UTF-8 SUBJECT {5}\r\n");
        let literal = segments[0].literal.as_ref().unwrap();
        assert!(literal.is_synchronizing());
        assert_eq!(literal.data(), "caf\u{e9}".as_bytes());
        assert_eq!(segments[1].text, b"\r\n");
        assert_eq!(segments[1].literal, None);
    }

    #[test]
    fn test_multiple_literals_each_get_a_segment() {
        let cmd = EncodedCommand::encode(
            "A0001",
            "LOGIN",
            &[Argument::literal("user"), Argument::literal("p\u{e4}ss")],
            false,
        );
        let segments = cmd.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, b"A0001 LOGIN {4}\r\n");
        assert_eq!(segments[1].text, b" {5}\r\n");
        assert_eq!(segments[2].text, b"\r\n");
    }

    #[test]
    fn test_literal_plus() {
        let cmd = EncodedCommand::encode(
            "A0001",
            "APPEND",
            &[Argument::mailbox("INBOX"), Argument::literal("hello")],
            true,
        );
        assert_eq!(cmd.to_bytes(), b"A0001 APPEND INBOX {5+}\r\nhello\r\n");
        assert!(!cmd.segments()[0].literal.as_ref().unwrap().is_synchronizing());
    }

    #[test]
    fn test_nested_lists() {
        assert_eq!(
            wire(
                "SEARCH",
                &[
                    Argument::raw("NOT"),
                    Argument::List(vec![
                        Argument::raw("FROM"),
                        "a b".into(),
                        Argument::List(vec![Argument::raw("SEEN")]),
                    ]),
                ],
            ),
            b"A0001 SEARCH NOT (FROM \"a b\" (SEEN))\r\n"
        );
    }

    #[test]
    fn test_mailbox_arguments() {
        assert_eq!(
            wire("SELECT", &[Argument::mailbox("Entw\u{fc}rfe")]),
            b"A0001 SELECT Entw&APw-rfe\r\n"
        );
        assert_eq!(
            wire("SELECT", &[Argument::mailbox("Sent Items")]),
            b"A0001 SELECT \"Sent Items\"\r\n"
        );
        assert_eq!(
            wire("SELECT", &[Argument::mailbox(&b"Foo &- Bar"[..])]),
            b"A0001 SELECT \"Foo &- Bar\"\r\n"
        );
    }

    #[test]
    fn test_date_arguments() {
        let since = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        assert_eq!(
            wire("SEARCH", &[Argument::raw("SINCE"), Argument::date(since)]),
            b"A0001 SEARCH SINCE 01-Feb-2020\r\n"
        );

        let offset = FixedOffset::east_opt(3600).unwrap();
        let dt = offset.with_ymd_and_hms(2020, 2, 1, 9, 30, 0).unwrap();
        assert_eq!(
            Argument::internal_date(&dt),
            Argument::raw("\"01-Feb-2020 09:30:00 +0100\"")
        );
    }

    #[test]
    fn test_numbers_are_raw() {
        assert_eq!(Argument::from(42_u64), Argument::raw("42"));
    }

    #[test]
    fn test_join_message_ids() {
        assert_eq!(join_message_ids(&[1, 2, 3]), "1,2,3");
        assert_eq!(join_message_ids(&[7]), "7");
        assert_eq!(join_message_ids(&[]), "");
    }

    proptest! {
        #[test]
        fn literal_marker_matches_payload(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let cmd = EncodedCommand::encode(
                "A0001",
                "APPEND",
                &[Argument::mailbox("INBOX"), Argument::Literal(data.clone())],
                false,
            );
            let segments = cmd.segments();
            prop_assert_eq!(segments.len(), 2);

            let text = &segments[0].text;
            let marker = format!(" {{{}}}\r\n", data.len());
            prop_assert!(text.ends_with(marker.as_bytes()));

            let literal = segments[0].literal.as_ref().unwrap();
            prop_assert_eq!(literal.len(), data.len());
            prop_assert_eq!(literal.data(), &data[..]);
        }
    }
}
