//! Modified UTF-7 mailbox name codec (RFC 3501 section 5.1.3).
//!
//! Printable ASCII other than `&` is sent as-is. Every other run of
//! characters is encoded as UTF-16BE, then base64 with `,` in place of `/`
//! and no padding, and wrapped in `&` ... `-`. A literal `&` is sent as `&-`.

use base64::Engine;
use base64::alphabet::IMAP_MUTF7;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::{Error, Result};

const MUTF7: GeneralPurpose = GeneralPurpose::new(
    &IMAP_MUTF7,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encodes a unicode mailbox name into modified UTF-7.
#[must_use]
pub fn encode(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len());
    let mut pending: Vec<u16> = Vec::new();

    for ch in name.chars() {
        match ch {
            '&' => {
                flush_run(&mut out, &mut pending);
                out.extend_from_slice(b"&-");
            }
            ' '..='~' => {
                flush_run(&mut out, &mut pending);
                out.extend_from_slice(ch.encode_utf8(&mut [0; 4]).as_bytes());
            }
            _ => pending.extend_from_slice(ch.encode_utf16(&mut [0; 2])),
        }
    }
    flush_run(&mut out, &mut pending);

    out
}

fn flush_run(out: &mut Vec<u8>, pending: &mut Vec<u16>) {
    if pending.is_empty() {
        return;
    }
    let utf16: Vec<u8> = pending.iter().flat_map(|unit| unit.to_be_bytes()).collect();
    out.push(b'&');
    out.extend_from_slice(MUTF7.encode(utf16).as_bytes());
    out.push(b'-');
    pending.clear();
}

/// Decodes a modified UTF-7 mailbox name.
///
/// # Errors
///
/// Returns [`Error::Encoding`] when an escape run is not terminated by `-`,
/// holds bytes outside the modified base64 alphabet, or does not decode to
/// whole, well-formed UTF-16 code units.
pub fn decode(raw: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some((&byte, tail)) = rest.split_first() {
        if byte != b'&' {
            out.push(char::from(byte));
            rest = tail;
            continue;
        }

        let end = tail.iter().position(|&b| b == b'-').ok_or_else(|| {
            Error::Encoding(format!(
                "unterminated escape run in {:?}",
                String::from_utf8_lossy(raw)
            ))
        })?;
        let run = &tail[..end];
        if run.is_empty() {
            out.push('&');
        } else {
            decode_run(run, &mut out)?;
        }
        rest = &tail[end + 1..];
    }

    Ok(out)
}

fn decode_run(run: &[u8], out: &mut String) -> Result<()> {
    let bytes = MUTF7
        .decode(run)
        .map_err(|e| Error::Encoding(format!("invalid modified base64: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(Error::Encoding(format!(
            "escape run decodes to {} bytes, not whole UTF-16 code units",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16(&units)
        .map_err(|_| Error::Encoding("unpaired UTF-16 surrogate".to_string()))?;
    out.push_str(&text);
    Ok(())
}

/// A mailbox name given either as unicode text or as already-encoded bytes.
///
/// Unicode names are encoded on the way out; encoded bytes pass through
/// unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxName<'a> {
    /// Unicode name, encoded with [`encode`].
    Unicode(&'a str),
    /// Bytes already in wire form.
    Encoded(&'a [u8]),
}

impl MailboxName<'_> {
    /// Returns the wire form of the name.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Unicode(name) => encode(name),
            Self::Encoded(raw) => raw.to_vec(),
        }
    }
}

impl<'a> From<&'a str> for MailboxName<'a> {
    fn from(name: &'a str) -> Self {
        Self::Unicode(name)
    }
}

impl<'a> From<&'a String> for MailboxName<'a> {
    fn from(name: &'a String) -> Self {
        Self::Unicode(name)
    }
}

impl<'a> From<&'a [u8]> for MailboxName<'a> {
    fn from(raw: &'a [u8]) -> Self {
        Self::Encoded(raw)
    }
}

impl<'a> From<&'a Vec<u8>> for MailboxName<'a> {
    fn from(raw: &'a Vec<u8>) -> Self {
        Self::Encoded(raw)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ascii_is_identity() {
        assert_eq!(encode("Sent"), b"Sent");
        assert_eq!(encode("INBOX.Sent Items"), b"INBOX.Sent Items");
        assert_eq!(decode(b"Sent").unwrap(), "Sent");
    }

    #[test]
    fn ampersand_escapes() {
        assert_eq!(encode("Foo & Bar"), b"Foo &- Bar");
        assert_eq!(encode("&"), b"&-");
        assert_eq!(decode(b"Foo &- Bar").unwrap(), "Foo & Bar");
    }

    #[test]
    fn rfc3501_example() {
        let name = "~peter/mail/\u{53f0}\u{5317}/\u{65e5}\u{672c}\u{8a9e}";
        assert_eq!(encode(name), b"~peter/mail/&U,BTFw-/&ZeVnLIqe-");
        assert_eq!(decode(b"~peter/mail/&U,BTFw-/&ZeVnLIqe-").unwrap(), name);
    }

    #[test]
    fn runs_flush_before_ascii() {
        assert_eq!(encode("\u{263a}!"), b"&Jjo-!");
        assert_eq!(encode("Caf\u{e9}s"), b"Caf&AOk-s");
        assert_eq!(decode(b"Caf&AOk-s").unwrap(), "Caf\u{e9}s");
    }

    #[test]
    fn astral_characters_use_surrogate_pairs() {
        let name = "mail \u{1f4ec}";
        let encoded = encode(name);
        assert_eq!(encoded, b"mail &2D3c7A-");
        assert_eq!(decode(&encoded).unwrap(), name);
    }

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(encode("a\tb"), b"a&AAk-b");
    }

    #[test]
    fn unterminated_run_is_an_error() {
        assert!(matches!(decode(b"&Jjo!"), Err(Error::Encoding(_))));
        assert!(matches!(decode(b"Drafts&U,BTFw"), Err(Error::Encoding(_))));
    }

    #[test]
    fn odd_length_run_is_an_error() {
        assert!(matches!(decode(b"&AA-"), Err(Error::Encoding(_))));
    }

    #[test]
    fn lone_surrogate_is_an_error() {
        assert!(matches!(decode(b"&2D0-"), Err(Error::Encoding(_))));
    }

    #[test]
    fn encoded_names_pass_through() {
        let raw: &[u8] = b"INBOX.&AOk-t&AOk-";
        assert_eq!(MailboxName::from(raw).to_wire(), raw);
        assert_eq!(MailboxName::from("\u{e9}t\u{e9}").to_wire(), b"&AOk-t&AOk-");
    }

    proptest! {
        #[test]
        fn round_trip(name in any::<String>()) {
            let encoded = encode(&name);
            prop_assert!(encoded.iter().all(|b| (0x20..=0x7e).contains(b)));
            prop_assert_eq!(decode(&encoded).unwrap(), name);
        }
    }
}
