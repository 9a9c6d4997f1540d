//! Response classification.
//!
//! Splits a response into continuation, tagged completion or untagged data
//! by looking at its first words. The data of untagged responses is kept as
//! chunks and only tokenized on demand, since status text is free-form.

use super::fetch::{FetchOptions, parse_fetch_response};
use super::parse_response;
use super::types::{Atom, FetchRecord};
use crate::parser::lexer::Chunk;
use crate::types::{Capability, Status};
use crate::{Error, Result};

/// A classified server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `+` continuation request, with its text.
    Continuation(String),
    /// Tagged command completion.
    Tagged(TaggedResponse),
    /// Untagged data or status.
    Untagged(UntaggedResponse),
}

impl Response {
    /// Classifies a complete response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an empty response or a tagged line
    /// without a valid status.
    pub fn classify(chunks: Vec<Chunk>) -> Result<Self> {
        let mut chunks = chunks.into_iter();
        let first = chunks
            .next()
            .ok_or_else(|| Error::Protocol("empty response".to_string()))?;

        if let Some(text) = first.line.strip_prefix(b"+") {
            let text = text.strip_prefix(b" ").unwrap_or(text);
            return Ok(Self::Continuation(
                String::from_utf8_lossy(text).into_owned(),
            ));
        }

        let (tag, rest) = split_word(&first.line);
        if tag == b"*" {
            let (word, after) = split_word(rest);
            let (number, keyword, data) = match parse_number(word) {
                Some(n) => {
                    let (keyword, data) = split_word(after);
                    (Some(n), keyword, data)
                }
                None => (None, word, after),
            };
            let mut lines = vec![Chunk {
                line: data.to_vec(),
                literal: first.literal,
            }];
            lines.extend(chunks);
            return Ok(Self::Untagged(UntaggedResponse {
                number,
                keyword: String::from_utf8_lossy(keyword).to_ascii_uppercase(),
                data: lines,
            }));
        }

        let (word, text) = split_word(rest);
        let status = Status::parse(word)
            .filter(|s| matches!(s, Status::Ok | Status::No | Status::Bad))
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "tagged response without status: {}",
                    String::from_utf8_lossy(&first.line)
                ))
            })?;
        Ok(Self::Tagged(TaggedResponse {
            tag: String::from_utf8_lossy(tag).into_owned(),
            status,
            text: String::from_utf8_lossy(text).into_owned(),
        }))
    }
}

/// Tagged completion of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResponse {
    /// Command tag.
    pub tag: String,
    /// OK, NO or BAD.
    pub status: Status,
    /// Response text, including any `[CODE]` prefix.
    pub text: String,
}

/// Untagged response: `* [number] KEYWORD data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntaggedResponse {
    /// Leading number, as in `* 23 EXISTS`.
    pub number: Option<u64>,
    /// Upper-cased keyword.
    pub keyword: String,
    /// Everything after the keyword.
    pub data: Vec<Chunk>,
}

impl UntaggedResponse {
    /// Returns true if the keyword is `keyword`, ignoring case.
    #[must_use]
    pub fn is(&self, keyword: &str) -> bool {
        self.keyword.eq_ignore_ascii_case(keyword)
    }

    /// Status of an untagged OK, NO, BAD, PREAUTH or BYE.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        if self.number.is_some() {
            return None;
        }
        Status::parse(self.keyword.as_bytes())
    }

    /// Text of the first data line.
    #[must_use]
    pub fn text(&self) -> String {
        self.data
            .first()
            .map(|chunk| String::from_utf8_lossy(&chunk.line).into_owned())
            .unwrap_or_default()
    }

    /// Parses the data into atoms.
    ///
    /// # Errors
    ///
    /// See [`parse_response`].
    pub fn atoms(&self) -> Result<Vec<Atom>> {
        parse_response(&self.data)
    }

    /// Capabilities from a `* CAPABILITY` response or a status response with
    /// a `[CAPABILITY ...]` code.
    #[must_use]
    pub fn capabilities(&self) -> Option<Vec<Capability>> {
        if self.is("CAPABILITY") {
            return Some(parse_capabilities(&self.text()));
        }
        self.status().and_then(|_| capability_code(&self.text()))
    }

    /// The data in `id (fields)` form, as taken by
    /// [`parse_fetch_response`].
    #[must_use]
    pub fn fetch_data(&self) -> Vec<Chunk> {
        let mut chunks = self.data.clone();
        if let (Some(n), Some(first)) = (self.number, chunks.first_mut()) {
            let mut line = format!("{n} ").into_bytes();
            line.append(&mut first.line);
            first.line = line;
        }
        chunks
    }
}

/// Unsolicited response received while idling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    /// Mailbox size changed.
    Exists(u64),
    /// Message was expunged.
    Expunge(u64),
    /// Number of recent messages changed.
    Recent(u64),
    /// Message data changed, usually flags.
    Fetch {
        /// Sequence number of the message.
        seq: u64,
        /// Changed fields.
        record: FetchRecord,
    },
    /// Untagged status such as `* OK Still here` or `* BYE`.
    Status {
        /// Status word.
        status: Status,
        /// Status text.
        text: String,
    },
    /// Anything else, left unparsed.
    Other(UntaggedResponse),
}

impl IdleEvent {
    /// Interprets an untagged response.
    ///
    /// # Errors
    ///
    /// Returns an error if a FETCH response is malformed.
    pub fn from_untagged(response: UntaggedResponse, normalise_times: bool) -> Result<Self> {
        if let Some(n) = response.number {
            match response.keyword.as_str() {
                "EXISTS" => return Ok(Self::Exists(n)),
                "EXPUNGE" => return Ok(Self::Expunge(n)),
                "RECENT" => return Ok(Self::Recent(n)),
                "FETCH" => {
                    let options = FetchOptions {
                        normalise_times,
                        uid_is_key: false,
                    };
                    let mut records = parse_fetch_response(&response.fetch_data(), options)?;
                    return Ok(Self::Fetch {
                        seq: n,
                        record: records.remove(&n).unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }
        if let Some(status) = response.status() {
            return Ok(Self::Status {
                status,
                text: response.text(),
            });
        }
        Ok(Self::Other(response))
    }
}

/// Capabilities in a `[CAPABILITY ...]` response code at the start of `text`.
pub(crate) fn capability_code(text: &str) -> Option<Vec<Capability>> {
    let code = text.strip_prefix('[')?;
    let (code, _) = code.split_once(']')?;
    let (name, args) = code.split_once(' ').unwrap_or((code, ""));
    name.eq_ignore_ascii_case("CAPABILITY")
        .then(|| parse_capabilities(args))
}

fn parse_capabilities(text: &str) -> Vec<Capability> {
    text.split_ascii_whitespace().map(Capability::parse).collect()
}

fn split_word(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, &[]),
    }
}

fn parse_number(word: &[u8]) -> Option<u64> {
    if word.is_empty() || !word.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(word).ok()?.parse().ok()
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
    use crate::types::Flag;

    fn classify(line: &str) -> Response {
        Response::classify(vec![Chunk::line(line)]).unwrap()
    }

    fn untagged(line: &str) -> UntaggedResponse {
        match classify(line) {
            Response::Untagged(response) => response,
            other => panic!("expected untagged response, got {other:?}"),
        }
    }

    #[test]
    fn test_tagged() {
        assert_eq!(
            classify("A0001 OK [READ-WRITE] SELECT completed"),
            Response::Tagged(TaggedResponse {
                tag: "A0001".to_string(),
                status: Status::Ok,
                text: "[READ-WRITE] SELECT completed".to_string(),
            })
        );
        let Response::Tagged(tagged) = classify("A0002 no") else {
            panic!("expected tagged");
        };
        assert_eq!(tagged.status, Status::No);
        assert_eq!(tagged.text, "");
    }

    #[test]
    fn test_tagged_without_status() {
        assert!(Response::classify(vec![Chunk::line("A1 FETCH x")]).is_err());
        assert!(Response::classify(vec![Chunk::line("A1 PREAUTH x")]).is_err());
        assert!(Response::classify(vec![]).is_err());
    }

    #[test]
    fn test_continuation() {
        assert_eq!(
            classify("+ Ready for literal data"),
            Response::Continuation("Ready for literal data".to_string())
        );
        assert_eq!(classify("+"), Response::Continuation(String::new()));
        assert_eq!(
            classify("+ idling"),
            Response::Continuation("idling".to_string())
        );
    }

    #[test]
    fn test_numbered_untagged() {
        let response = untagged("* 23 EXISTS");
        assert_eq!(response.number, Some(23));
        assert_eq!(response.keyword, "EXISTS");
        assert_eq!(response.status(), None);
    }

    #[test]
    fn test_status_untagged() {
        let response = untagged("* ok [UIDVALIDITY 3857529045] UIDs valid");
        assert_eq!(response.status(), Some(Status::Ok));
        assert_eq!(response.text(), "[UIDVALIDITY 3857529045] UIDs valid");
        assert_eq!(response.capabilities(), None);
    }

    #[test]
    fn test_untagged_keeps_literal() {
        let chunks = vec![
            Chunk::with_literal("* 1 FETCH (BODY[] {3}", "abc"),
            Chunk::line(")"),
        ];
        let Response::Untagged(response) = Response::classify(chunks).unwrap() else {
            panic!("expected untagged");
        };
        assert_eq!(response.data[0], Chunk::with_literal("(BODY[] {3}", "abc"));
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.fetch_data()[0].line, b"1 (BODY[] {3}");
    }

    #[test]
    fn test_capabilities() {
        let response = untagged("* CAPABILITY IMAP4rev1 IDLE LITERAL+ AUTH=PLAIN");
        assert_eq!(
            response.capabilities().unwrap(),
            vec![
                Capability::Imap4Rev1,
                Capability::Idle,
                Capability::LiteralPlus,
                Capability::Auth("PLAIN".to_string()),
            ]
        );

        let greeting = untagged("* OK [CAPABILITY IMAP4rev1 STARTTLS] Dovecot ready.");
        assert_eq!(
            greeting.capabilities().unwrap(),
            vec![Capability::Imap4Rev1, Capability::StartTls]
        );
    }

    #[test]
    fn test_capability_code() {
        assert_eq!(
            capability_code("[CAPABILITY IDLE] Logged in"),
            Some(vec![Capability::Idle])
        );
        assert_eq!(capability_code("[ALERT] hi"), None);
        assert_eq!(capability_code("Logged in"), None);
    }

    #[test]
    fn test_idle_events() {
        assert_eq!(
            IdleEvent::from_untagged(untagged("* 4 EXISTS"), true).unwrap(),
            IdleEvent::Exists(4)
        );
        assert_eq!(
            IdleEvent::from_untagged(untagged("* 2 EXPUNGE"), true).unwrap(),
            IdleEvent::Expunge(2)
        );
        assert_eq!(
            IdleEvent::from_untagged(untagged("* 1 RECENT"), true).unwrap(),
            IdleEvent::Recent(1)
        );
        assert_eq!(
            IdleEvent::from_untagged(untagged("* OK Still here"), true).unwrap(),
            IdleEvent::Status {
                status: Status::Ok,
                text: "Still here".to_string(),
            }
        );
    }

    #[test]
    fn test_idle_fetch_event() {
        let event = IdleEvent::from_untagged(untagged("* 3 FETCH (FLAGS (\\Seen) UID 99)"), true)
            .unwrap();
        let IdleEvent::Fetch { seq, record } = event else {
            panic!("expected fetch event");
        };
        assert_eq!(seq, 3);
        assert_eq!(record.seq(), Some(3));
        assert_eq!(record.uid(), Some(99));
        assert_eq!(record.flags().unwrap(), vec![Flag::Seen]);
    }

    #[test]
    fn test_unknown_untagged_is_kept() {
        let response = untagged("* VANISHED (EARLIER) 41,43:116");
        let event = IdleEvent::from_untagged(response.clone(), true).unwrap();
        assert_eq!(event, IdleEvent::Other(response));
    }
}
