//! FETCH response interpretation.
//!
//! Takes the data of FETCH responses, `id (key value key value ...)` one per
//! message, and decodes the values of the fields that have a dedicated
//! decoder.

use std::collections::BTreeMap;

use tracing::warn;

use super::parse_response;
use super::types::{Address, Atom, BodyData, BodySection, Envelope, FetchRecord, FetchValue};
use crate::datetime::parse_to_datetime;
use crate::parser::lexer::Chunk;
use crate::{Error, Result};

/// Options for [`parse_fetch_response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Convert timestamps to the local time zone.
    pub normalise_times: bool,
    /// Key records by UID instead of sequence number when a UID is present.
    pub uid_is_key: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            normalise_times: true,
            uid_is_key: true,
        }
    }
}

/// Parses FETCH response data into records keyed by message id.
///
/// Responses for the same message are merged. Every record gets a `SEQ`
/// field; with `uid_is_key` the record is stored under its UID, which also
/// stays available as the `UID` field.
///
/// # Errors
///
/// Returns [`Error::Parse`] for malformed tokens and [`Error::Protocol`] for
/// a non-numeric message id, a missing or odd-length field list, or a field
/// value its decoder cannot handle.
pub fn parse_fetch_response(
    chunks: &[Chunk],
    options: FetchOptions,
) -> Result<BTreeMap<u64, FetchRecord>> {
    let mut records: BTreeMap<u64, FetchRecord> = BTreeMap::new();
    let mut atoms = parse_response(chunks)?.into_iter();

    while let Some(id) = atoms.next() {
        let seq = id
            .as_number()
            .ok_or_else(|| Error::Protocol(format!("invalid message ID: {id:?}")))?;
        let pairs = match atoms.next() {
            Some(Atom::List(pairs)) => pairs,
            Some(other) => {
                return Err(Error::Protocol(format!("bad response type: {other:?}")));
            }
            None => {
                return Err(Error::Protocol(format!(
                    "FETCH response for message {seq} has no field list"
                )));
            }
        };
        if pairs.len() % 2 != 0 {
            return Err(Error::Protocol(format!(
                "uneven number of response items for message {seq}"
            )));
        }

        let (key, record) = interpret_record(seq, pairs, options)?;
        records.entry(key).or_default().merge(record);
    }

    Ok(records)
}

fn interpret_record(
    seq: u64,
    pairs: Vec<Atom>,
    options: FetchOptions,
) -> Result<(u64, FetchRecord)> {
    let mut key = seq;
    let mut record = FetchRecord::default();
    record.insert("SEQ".to_string(), FetchValue::Atom(Atom::Number(seq)));

    let mut pairs = pairs.into_iter();
    while let (Some(name), Some(value)) = (pairs.next(), pairs.next()) {
        let name = match name {
            Atom::Text(bytes) => String::from_utf8_lossy(&bytes).to_ascii_uppercase(),
            other => {
                return Err(Error::Protocol(format!(
                    "FETCH field name is not an atom: {other:?}"
                )));
            }
        };

        let value = match name.as_str() {
            "UID" => {
                let uid = value
                    .as_number()
                    .ok_or_else(|| Error::Protocol(format!("invalid UID: {value:?}")))?;
                if options.uid_is_key {
                    key = uid;
                }
                FetchValue::Atom(Atom::Number(uid))
            }
            "INTERNALDATE" => {
                let raw = value.as_bytes().ok_or_else(|| {
                    Error::Protocol(format!("INTERNALDATE is not a string: {value:?}"))
                })?;
                FetchValue::Timestamp(parse_to_datetime(raw, options.normalise_times)?)
            }
            "ENVELOPE" => {
                FetchValue::Envelope(Box::new(convert_envelope(value, options.normalise_times)?))
            }
            "BODY" | "BODYSTRUCTURE" => match value {
                Atom::List(items) => FetchValue::Body(BodyData::from_atoms(items)),
                other => FetchValue::Atom(other),
            },
            _ => match section_key(&name) {
                Some((section, origin)) => FetchValue::Section(BodySection {
                    section,
                    origin,
                    data: value.into_nstring(),
                }),
                None => FetchValue::Atom(value),
            },
        };
        record.insert(name, value);
    }

    Ok((key, record))
}

/// Splits `BODY[section]<origin>` or `BODY.PEEK[section]<origin>`.
fn section_key(name: &str) -> Option<(String, Option<u64>)> {
    let rest = name
        .strip_prefix("BODY[")
        .or_else(|| name.strip_prefix("BODY.PEEK["))?;
    let close = rest.rfind(']')?;
    let section = rest[..close].to_string();
    let origin = rest[close + 1..]
        .strip_prefix('<')
        .and_then(|o| o.strip_suffix('>'))
        .and_then(|o| o.parse().ok());
    Some((section, origin))
}

fn convert_envelope(value: Atom, normalise: bool) -> Result<Envelope> {
    let Atom::List(items) = value else {
        return Err(Error::Protocol(format!("ENVELOPE is not a list: {value:?}")));
    };
    let Ok(fields) = <[Atom; 10]>::try_from(items) else {
        return Err(Error::Protocol(
            "ENVELOPE does not have 10 fields".to_string(),
        ));
    };
    let [
        date,
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    ] = fields;

    Ok(Envelope {
        date: envelope_date(date, normalise),
        subject: subject.into_nstring(),
        from: address_list(from)?,
        sender: address_list(sender)?,
        reply_to: address_list(reply_to)?,
        to: address_list(to)?,
        cc: address_list(cc)?,
        bcc: address_list(bcc)?,
        in_reply_to: in_reply_to.into_nstring(),
        message_id: message_id.into_nstring(),
    })
}

fn envelope_date(value: Atom, normalise: bool) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let raw = value.into_nstring().filter(|raw| !raw.is_empty())?;
    match parse_to_datetime(&raw, normalise) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(date = %String::from_utf8_lossy(&raw), error = %e, "Ignoring unparseable envelope date");
            None
        }
    }
}

fn address_list(value: Atom) -> Result<Option<Vec<Address>>> {
    let Atom::List(items) = value else {
        return Ok(None);
    };
    if items.is_empty() {
        return Ok(None);
    }
    items.into_iter().map(address).collect::<Result<_>>().map(Some)
}

fn address(value: Atom) -> Result<Address> {
    let Atom::List(items) = value else {
        return Err(Error::Protocol(format!("address is not a list: {value:?}")));
    };
    let Ok([name, route, mailbox, host]) = <[Atom; 4]>::try_from(items) else {
        return Err(Error::Protocol("address does not have 4 fields".to_string()));
    };
    Ok(Address {
        name: name.into_nstring(),
        route: route.into_nstring(),
        mailbox: mailbox.into_nstring(),
        host: host.into_nstring(),
    })
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
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::types::Flag;

    fn fetch(line: &str, options: FetchOptions) -> Result<BTreeMap<u64, FetchRecord>> {
        parse_fetch_response(&[Chunk::line(line)], options)
    }

    const SEQ_KEYED: FetchOptions = FetchOptions {
        normalise_times: false,
        uid_is_key: false,
    };

    #[test]
    fn test_uid_keying() {
        let records = fetch(
            r#"1 (FLAGS (\Seen) INTERNALDATE "01-Jan-2020 00:00:00 +0000" UID 42)"#,
            FetchOptions::default(),
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[&42];
        assert_eq!(record.seq(), Some(1));
        assert_eq!(record.uid(), Some(42));
        assert_eq!(record.flags().unwrap(), vec![Flag::Seen]);
        assert_eq!(
            *record.internal_date().unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_sequence_keying() {
        let records = fetch("7 (UID 42 RFC822.SIZE 1024)", SEQ_KEYED).unwrap();
        let record = &records[&7];
        assert_eq!(record.seq(), Some(7));
        assert_eq!(record.uid(), Some(42));
        assert_eq!(
            record.get("rfc822.size"),
            Some(&FetchValue::Atom(Atom::Number(1024)))
        );
    }

    #[test]
    fn test_internaldate_keeps_server_offset() {
        let records = fetch(
            r#"1 (INTERNALDATE " 9-Feb-2007 17:08:08 -0800")"#,
            SEQ_KEYED,
        )
        .unwrap();
        let date = records[&1].internal_date().unwrap();
        assert_eq!(date.offset().local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn test_several_messages_and_merging() {
        let chunks = [
            Chunk::line("1 (FLAGS ())"),
            Chunk::line("2 (FLAGS (\\Deleted))"),
            Chunk::line("1 (RFC822.SIZE 10)"),
        ];
        let records = parse_fetch_response(&chunks, SEQ_KEYED).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[&1].flags().unwrap(), vec![]);
        assert!(records[&1].contains("RFC822.SIZE"));
        assert_eq!(records[&2].flags().unwrap(), vec![Flag::Deleted]);
    }

    #[test]
    fn test_literal_body_section() {
        let chunks = [
            Chunk::with_literal("3 (UID 8 BODY[HEADER.FIELDS (SUBJECT)] {13}", "Subject: hi\r\n"),
            Chunk::line(" BODY[TEXT]<0> NIL)"),
        ];
        let records = parse_fetch_response(&chunks, FetchOptions::default()).unwrap();
        let record = &records[&8];

        let header = record.section("BODY[HEADER.FIELDS (SUBJECT)]").unwrap();
        assert_eq!(header.section, "HEADER.FIELDS (SUBJECT)");
        assert_eq!(header.origin, None);
        assert_eq!(header.data.as_deref(), Some(&b"Subject: hi\r\n"[..]));

        let text = record.section("body[text]<0>").unwrap();
        assert_eq!(text.section, "TEXT");
        assert_eq!(text.origin, Some(0));
        assert_eq!(text.data, None);
    }

    #[test]
    fn test_peek_section_key() {
        assert_eq!(
            section_key("BODY.PEEK[1.MIME]<100>"),
            Some(("1.MIME".to_string(), Some(100)))
        );
        assert_eq!(section_key("BODY[]"), Some((String::new(), None)));
        assert_eq!(section_key("BODYSTRUCTURE"), None);
    }

    #[test]
    fn test_envelope() {
        let line = concat!(
            r#"1 (ENVELOPE ("Wed, 17 Jul 1996 02:23:25 -0700" "IMAP4rev1 WG mtg summary" "#,
            r#"(("Terry Gray" NIL "gray" "cac.washington.edu")) "#,
            r#"(("Terry Gray" NIL "gray" "cac.washington.edu")) "#,
            r#"NIL "#,
            r#"((NIL NIL "imap" "cac.washington.edu")) "#,
            r#"((NIL NIL "minutes" "CNRI.Reston.VA.US")("John Klensin" NIL "KLENSIN" "MIT.EDU")) "#,
            r#"NIL NIL "<B27397-0100000@cac.washington.edu>"))"#,
        );
        let records = fetch(line, SEQ_KEYED).unwrap();
        let envelope = records[&1].envelope().unwrap();

        assert_eq!(
            envelope.date.unwrap(),
            Utc.with_ymd_and_hms(1996, 7, 17, 9, 23, 25).unwrap()
        );
        assert_eq!(
            envelope.subject.as_deref(),
            Some(&b"IMAP4rev1 WG mtg summary"[..])
        );
        let from = envelope.from.as_ref().unwrap();
        assert_eq!(from[0].to_string(), "Terry Gray <gray@cac.washington.edu>");
        assert_eq!(envelope.reply_to, None);
        assert_eq!(envelope.cc.as_ref().unwrap().len(), 2);
        assert_eq!(envelope.bcc, None);
        assert_eq!(envelope.in_reply_to, None);
        assert_eq!(
            envelope.message_id.as_deref(),
            Some(&b"<B27397-0100000@cac.washington.edu>"[..])
        );
    }

    #[test]
    fn test_envelope_with_bad_date() {
        let line = r#"1 (ENVELOPE ("not a date" NIL NIL NIL NIL NIL NIL NIL NIL NIL))"#;
        let records = fetch(line, SEQ_KEYED).unwrap();
        let envelope = records[&1].envelope().unwrap();
        assert_eq!(envelope.date, None);
        assert_eq!(envelope.subject, None);
    }

    #[test]
    fn test_envelope_groups() {
        let line = concat!(
            r#"1 (ENVELOPE (NIL NIL NIL NIL NIL "#,
            r#"((NIL NIL "undisclosed-recipients" NIL)(NIL NIL NIL NIL)) "#,
            r#"NIL NIL NIL NIL))"#,
        );
        let records = fetch(line, SEQ_KEYED).unwrap();
        let to = records[&1].envelope().unwrap().to.clone().unwrap();
        assert!(to[0].is_group_start());
        assert!(to[1].is_group_end());
    }

    #[test]
    fn test_short_envelope_is_an_error() {
        assert!(matches!(
            fetch("1 (ENVELOPE (NIL NIL))", SEQ_KEYED),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_bodystructure() {
        let line = concat!(
            r#"1 (BODYSTRUCTURE (("TEXT" "PLAIN" ("CHARSET" "US-ASCII") NIL NIL "7BIT" 1152 23)"#,
            r#"("TEXT" "HTML" ("CHARSET" "US-ASCII") NIL NIL "QUOTED-PRINTABLE" 4096 46) "#,
            r#""ALTERNATIVE"))"#,
        );
        let records = fetch(line, SEQ_KEYED).unwrap();
        let Some(FetchValue::Body(body)) = records[&1].get("BODYSTRUCTURE") else {
            panic!("expected body data");
        };
        assert!(body.is_multipart());
        assert_eq!(body.parts.len(), 2);
        assert_eq!(body.parts[1].fields[1], Atom::Text(b"HTML".to_vec()));
        assert_eq!(body.media_type().unwrap(), "ALTERNATIVE");
    }

    #[test]
    fn test_unknown_fields_stay_raw() {
        let records = fetch("1 (X-GM-LABELS (\\Inbox foo) MODSEQ (12))", SEQ_KEYED).unwrap();
        assert_eq!(
            records[&1].get("MODSEQ"),
            Some(&FetchValue::Atom(Atom::List(vec![Atom::Number(12)])))
        );
    }

    #[test]
    fn test_malformed_shapes() {
        assert!(matches!(
            fetch("1 (FLAGS)", SEQ_KEYED),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            fetch("x (FLAGS ())", SEQ_KEYED),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(fetch("1", SEQ_KEYED), Err(Error::Protocol(_))));
        assert!(matches!(fetch("1 FLAGS", SEQ_KEYED), Err(Error::Protocol(_))));
        assert!(matches!(
            fetch("1 (UID abc)", SEQ_KEYED),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            fetch("1 (FLAGS (\\Seen)", SEQ_KEYED),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_empty_response() {
        assert!(fetch("", SEQ_KEYED).unwrap().is_empty());
    }
}
