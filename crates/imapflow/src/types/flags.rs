//! Message flags.

use std::fmt;

/// Message flag as carried in FLAGS responses and APPEND/STORE arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for special attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message is recent (first session to see it).
    Recent,
    /// Keyword or any other flag, kept as sent.
    Keyword(String),
}

impl Flag {
    /// Parses a flag atom. System flags are matched case-insensitively.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        match raw.to_ascii_uppercase().as_slice() {
            b"\\SEEN" => Self::Seen,
            b"\\ANSWERED" => Self::Answered,
            b"\\FLAGGED" => Self::Flagged,
            b"\\DELETED" => Self::Deleted,
            b"\\DRAFT" => Self::Draft,
            b"\\RECENT" => Self::Recent,
            _ => Self::Keyword(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    /// Returns the flag as an IMAP string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_flags_ignore_case() {
        assert_eq!(Flag::from_bytes(b"\\Seen"), Flag::Seen);
        assert_eq!(Flag::from_bytes(b"\\FLAGGED"), Flag::Flagged);
        assert_eq!(Flag::from_bytes(b"\\deleted"), Flag::Deleted);
    }

    #[test]
    fn keywords_are_preserved() {
        assert_eq!(
            Flag::from_bytes(b"$Forwarded"),
            Flag::Keyword("$Forwarded".to_string())
        );
        assert_eq!(Flag::from_bytes(b"\\NotJunk").as_str(), "\\NotJunk");
    }

    #[test]
    fn display_uses_wire_form() {
        assert_eq!(Flag::Answered.to_string(), "\\Answered");
    }
}
