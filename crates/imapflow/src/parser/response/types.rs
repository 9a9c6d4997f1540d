//! Response data types.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::types::Flag;

/// A parsed response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Unquoted `NIL`.
    Nil,
    /// Atom made only of ASCII digits.
    Number(u64),
    /// Any other atom, quoted string or literal, as raw bytes.
    Text(Vec<u8>),
    /// Parenthesised list.
    List(Vec<Self>),
}

impl Atom {
    /// Returns the number, if this is one.
    #[must_use]
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the raw bytes of a text atom.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the text lossily decoded as UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        self.as_bytes().map(String::from_utf8_lossy)
    }

    /// Returns the elements of a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true for `NIL`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns true if this text atom equals `word`, ignoring ASCII case.
    #[must_use]
    pub fn is_word(&self, word: &str) -> bool {
        self.as_bytes()
            .is_some_and(|bytes| bytes.eq_ignore_ascii_case(word.as_bytes()))
    }

    /// Converts a nillable string value: `NIL` is `None`, numbers keep their
    /// digits.
    #[must_use]
    pub fn into_nstring(self) -> Option<Vec<u8>> {
        match self {
            Self::Text(bytes) => Some(bytes),
            Self::Number(n) => Some(n.to_string().into_bytes()),
            Self::Nil | Self::List(_) => None,
        }
    }
}

/// Message envelope (RFC 3501 section 7.4.2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Date header; `None` when absent or unparseable.
    pub date: Option<DateTime<FixedOffset>>,
    /// Subject header.
    pub subject: Option<Vec<u8>>,
    /// From addresses.
    pub from: Option<Vec<Address>>,
    /// Sender addresses.
    pub sender: Option<Vec<Address>>,
    /// Reply-To addresses.
    pub reply_to: Option<Vec<Address>>,
    /// To addresses.
    pub to: Option<Vec<Address>>,
    /// Cc addresses.
    pub cc: Option<Vec<Address>>,
    /// Bcc addresses.
    pub bcc: Option<Vec<Address>>,
    /// In-Reply-To header.
    pub in_reply_to: Option<Vec<u8>>,
    /// Message-ID header.
    pub message_id: Option<Vec<u8>>,
}

/// Email address from an envelope.
///
/// RFC 2822 groups appear as a start marker (`host` is `None`, `mailbox` is
/// the group name) followed by the members and an end marker (`mailbox` and
/// `host` both `None`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Display name.
    pub name: Option<Vec<u8>>,
    /// Source route (obsolete).
    pub route: Option<Vec<u8>>,
    /// Mailbox name (local part).
    pub mailbox: Option<Vec<u8>>,
    /// Host name (domain part).
    pub host: Option<Vec<u8>>,
}

impl Address {
    /// Returns true if this address opens a group.
    #[must_use]
    pub const fn is_group_start(&self) -> bool {
        self.host.is_none() && self.mailbox.is_some()
    }

    /// Returns true if this address closes a group.
    #[must_use]
    pub const fn is_group_end(&self) -> bool {
        self.host.is_none() && self.mailbox.is_none()
    }

    /// Returns `mailbox@host`, if both parts are present.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => Some(format!(
                "{}@{}",
                String::from_utf8_lossy(m),
                String::from_utf8_lossy(h)
            )),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.email(), &self.name) {
            (Some(email), Some(name)) => {
                write!(f, "{} <{email}>", String::from_utf8_lossy(name))
            }
            (Some(email), None) => f.write_str(&email),
            (None, _) => match &self.mailbox {
                Some(group) => f.write_str(&String::from_utf8_lossy(group)),
                None => Ok(()),
            },
        }
    }
}

/// BODY or BODYSTRUCTURE data.
///
/// Multipart bodies carry their parts first, followed by the multipart
/// fields (subtype, parameters, ...). Single-part bodies only have fields.
/// Fields are kept as parsed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyData {
    /// Nested parts; empty for a single-part body.
    pub parts: Vec<Self>,
    /// Remaining fields, in server order.
    pub fields: Vec<Atom>,
}

impl BodyData {
    /// Builds body data from the elements of a BODY/BODYSTRUCTURE list.
    #[must_use]
    pub fn from_atoms(items: Vec<Atom>) -> Self {
        let mut parts = Vec::new();
        let mut items = items.into_iter().peekable();
        while let Some(Atom::List(_)) = items.peek() {
            if let Some(Atom::List(inner)) = items.next() {
                parts.push(Self::from_atoms(inner));
            }
        }
        Self {
            parts,
            fields: items.collect(),
        }
    }

    /// Returns true for multipart bodies.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Returns the media subtype of a multipart body, or the media type of a
    /// single part.
    #[must_use]
    pub fn media_type(&self) -> Option<Cow<'_, str>> {
        self.fields.first().and_then(Atom::as_text)
    }
}

/// Content of a `BODY[section]<origin>` fetch item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodySection {
    /// Section specifier between the brackets, e.g. `HEADER.FIELDS (FROM)`.
    pub section: String,
    /// Partial fetch origin.
    pub origin: Option<u64>,
    /// Section bytes; `None` for NIL.
    pub data: Option<Vec<u8>>,
}

/// Result of a SEARCH or SORT.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchIds {
    /// Matching message ids, in server order.
    pub ids: Vec<u64>,
    /// Highest mod-sequence of the matches, when the search used MODSEQ.
    pub modseq: Option<u64>,
}

impl SearchIds {
    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Decoded value of one FETCH field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchValue {
    /// Field without a dedicated decoder, as parsed.
    Atom(Atom),
    /// INTERNALDATE.
    Timestamp(DateTime<FixedOffset>),
    /// ENVELOPE.
    Envelope(Box<Envelope>),
    /// BODY or BODYSTRUCTURE.
    Body(BodyData),
    /// BODY[...] section content.
    Section(BodySection),
}

/// Fields returned by FETCH for one message, keyed by upper-case name.
///
/// Always contains `SEQ`, the sequence number the server reported the
/// message under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchRecord {
    fields: BTreeMap<String, FetchValue>,
}

impl FetchRecord {
    /// Returns a field by name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FetchValue> {
        self.fields.get(&name.to_ascii_uppercase())
    }

    /// Returns true if the record holds `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sequence number of the message.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.number("SEQ")
    }

    /// UID of the message, if fetched.
    #[must_use]
    pub fn uid(&self) -> Option<u64> {
        self.number("UID")
    }

    /// Parsed FLAGS, if fetched.
    #[must_use]
    pub fn flags(&self) -> Option<Vec<Flag>> {
        match self.get("FLAGS")? {
            FetchValue::Atom(Atom::List(items)) => Some(
                items
                    .iter()
                    .filter_map(Atom::as_bytes)
                    .map(Flag::from_bytes)
                    .collect(),
            ),
            _ => None,
        }
    }

    /// INTERNALDATE, if fetched.
    #[must_use]
    pub fn internal_date(&self) -> Option<&DateTime<FixedOffset>> {
        match self.get("INTERNALDATE")? {
            FetchValue::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// ENVELOPE, if fetched.
    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self.get("ENVELOPE")? {
            FetchValue::Envelope(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// Content of a body section by its full key, e.g. `BODY[TEXT]`.
    #[must_use]
    pub fn section(&self, key: &str) -> Option<&BodySection> {
        match self.get(key)? {
            FetchValue::Section(section) => Some(section),
            _ => None,
        }
    }

    /// Iterates over the fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FetchValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, value: FetchValue) {
        self.fields.insert(name, value);
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.fields.extend(other.fields);
    }

    fn number(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            FetchValue::Atom(atom) => atom.as_number(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn text(s: &str) -> Atom {
        Atom::Text(s.as_bytes().to_vec())
    }

    #[test]
    fn test_atom_accessors() {
        assert_eq!(Atom::Number(7).as_number(), Some(7));
        assert_eq!(text("x").as_bytes(), Some(&b"x"[..]));
        assert!(Atom::Nil.is_nil());
        assert!(text("fetch").is_word("FETCH"));
        assert_eq!(Atom::Number(12).into_nstring(), Some(b"12".to_vec()));
        assert_eq!(Atom::Nil.into_nstring(), None);
    }

    #[test]
    fn test_address_display() {
        let addr = Address {
            name: Some(b"John Doe".to_vec()),
            route: None,
            mailbox: Some(b"john".to_vec()),
            host: Some(b"example.com".to_vec()),
        };
        assert_eq!(addr.email().as_deref(), Some("john@example.com"));
        assert_eq!(addr.to_string(), "John Doe <john@example.com>");
        assert!(!addr.is_group_start());
    }

    #[test]
    fn test_group_markers() {
        let start = Address {
            mailbox: Some(b"undisclosed-recipients".to_vec()),
            ..Address::default()
        };
        assert!(start.is_group_start());
        assert_eq!(start.to_string(), "undisclosed-recipients");
        assert!(Address::default().is_group_end());
    }

    #[test]
    fn test_body_data_multipart() {
        let part = |sub: &str| {
            Atom::List(vec![text("TEXT"), text(sub), Atom::Nil, Atom::Number(10)])
        };
        let body = BodyData::from_atoms(vec![part("PLAIN"), part("HTML"), text("ALTERNATIVE")]);
        assert!(body.is_multipart());
        assert_eq!(body.parts.len(), 2);
        assert!(!body.parts[0].is_multipart());
        assert_eq!(body.parts[1].fields[1], text("HTML"));
        assert_eq!(body.media_type().unwrap(), "ALTERNATIVE");
    }

    #[test]
    fn test_body_data_single_part_keeps_nested_lists() {
        let body = BodyData::from_atoms(vec![
            text("TEXT"),
            text("PLAIN"),
            Atom::List(vec![text("CHARSET"), text("utf-8")]),
        ]);
        assert!(!body.is_multipart());
        assert_eq!(body.fields.len(), 3);
    }

    #[test]
    fn test_record_accessors() {
        let mut record = FetchRecord::default();
        record.insert("SEQ".to_string(), FetchValue::Atom(Atom::Number(3)));
        record.insert(
            "FLAGS".to_string(),
            FetchValue::Atom(Atom::List(vec![text("\\Seen"), text("$Label")])),
        );
        assert_eq!(record.seq(), Some(3));
        assert_eq!(record.uid(), None);
        assert_eq!(
            record.flags().unwrap(),
            vec![Flag::Seen, Flag::Keyword("$Label".to_string())]
        );
        assert!(record.contains("flags"));
        assert_eq!(record.len(), 2);
    }
}
