//! Server capabilities and response status.

use std::fmt;

/// Status word of a tagged or untagged status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting (pre-authenticated).
    PreAuth,
    /// Server is closing connection.
    Bye,
}

impl Status {
    /// Parses a status word, case-insensitively.
    #[must_use]
    pub fn parse(word: &[u8]) -> Option<Self> {
        match word.to_ascii_uppercase().as_slice() {
            b"OK" => Some(Self::Ok),
            b"NO" => Some(Self::No),
            b"BAD" => Some(Self::Bad),
            b"PREAUTH" => Some(Self::PreAuth),
            b"BYE" => Some(Self::Bye),
            _ => None,
        }
    }

    /// Returns true if this is a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }

    /// Returns the status word as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::PreAuth => "PREAUTH",
            Self::Bye => "BYE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1` (RFC 3501)
    Imap4Rev1,
    /// `IMAP4rev2` (RFC 9051)
    Imap4Rev2,
    /// IDLE command support (RFC 2177)
    Idle,
    /// LITERAL+ non-synchronizing literals (RFC 7888)
    LiteralPlus,
    /// LITERAL- non-synchronizing literals up to 4096 bytes (RFC 7888)
    LiteralMinus,
    /// STARTTLS support
    StartTls,
    /// LOGIN disabled
    LoginDisabled,
    /// AUTH mechanism
    Auth(String),
    /// CONDSTORE (RFC 7162)
    CondStore,
    /// UIDPLUS extension (RFC 4315)
    UidPlus,
    /// MOVE extension (RFC 6851)
    Move,
    /// MULTIAPPEND extension (RFC 3502)
    MultiAppend,
    /// Any other capability, kept as sent.
    Other(String),
}

impl Capability {
    /// Parses a capability atom.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IMAP4REV2" => Self::Imap4Rev2,
            "IDLE" => Self::Idle,
            "LITERAL+" => Self::LiteralPlus,
            "LITERAL-" => Self::LiteralMinus,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "CONDSTORE" => Self::CondStore,
            "UIDPLUS" => Self::UidPlus,
            "MOVE" => Self::Move,
            "MULTIAPPEND" => Self::MultiAppend,
            _ if upper.starts_with("AUTH=") => Self::Auth(s[5..].to_string()),
            _ => Self::Other(upper),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::Imap4Rev2 => f.write_str("IMAP4rev2"),
            Self::Idle => f.write_str("IDLE"),
            Self::LiteralPlus => f.write_str("LITERAL+"),
            Self::LiteralMinus => f.write_str("LITERAL-"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::CondStore => f.write_str("CONDSTORE"),
            Self::UidPlus => f.write_str("UIDPLUS"),
            Self::Move => f.write_str("MOVE"),
            Self::MultiAppend => f.write_str("MULTIAPPEND"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words() {
        assert_eq!(Status::parse(b"ok"), Some(Status::Ok));
        assert_eq!(Status::parse(b"PREAUTH"), Some(Status::PreAuth));
        assert_eq!(Status::parse(b"FETCH"), None);
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::Bad.is_ok());
        assert_eq!(Status::No.to_string(), "NO");
    }

    #[test]
    fn parse_known_capabilities() {
        assert_eq!(Capability::parse("imap4rev1"), Capability::Imap4Rev1);
        assert_eq!(Capability::parse("IDLE"), Capability::Idle);
        assert_eq!(Capability::parse("LITERAL+"), Capability::LiteralPlus);
        assert_eq!(
            Capability::parse("AUTH=XOAUTH2"),
            Capability::Auth("XOAUTH2".to_string())
        );
    }

    #[test]
    fn unknown_capabilities_are_upper_cased() {
        assert_eq!(
            Capability::parse("x-gm-ext-1"),
            Capability::Other("X-GM-EXT-1".to_string())
        );
        assert_eq!(Capability::parse("X-GM-EXT-1").to_string(), "X-GM-EXT-1");
    }

    #[test]
    fn display_round_trips_through_parse() {
        for cap in [
            Capability::Imap4Rev2,
            Capability::LiteralMinus,
            Capability::Auth("PLAIN".to_string()),
            Capability::MultiAppend,
        ] {
            assert_eq!(Capability::parse(&cap.to_string()), cap);
        }
    }
}
