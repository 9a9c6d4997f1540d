//! Connection state types.
//!
//! This module defines the states an IMAP connection moves through,
//! following RFC 3501 section 3, plus the IDLE sub-state.

use std::fmt;

/// Protocol state as defined by RFC 3501.
///
/// - `NotAuthenticated`: Initial state, only authentication commands allowed
/// - `Authenticated`: User is authenticated, can select mailboxes
/// - `Selected`: A mailbox is selected, can manipulate messages
/// - `Logout`: Connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not authenticated - waiting for credentials.
    #[default]
    NotAuthenticated,
    /// Authenticated - user has logged in.
    Authenticated,
    /// Selected - a mailbox is currently open.
    Selected,
    /// Logout - connection is being closed.
    Logout,
}

impl ConnectionState {
    /// Returns the state name used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAuthenticated => "NONAUTH",
            Self::Authenticated => "AUTH",
            Self::Selected => "SELECTED",
            Self::Logout => "LOGOUT",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IDLE sub-state of a connection (RFC 2177).
///
/// `Idle` is normal command mode. `Idling` starts once the server accepted
/// the IDLE command with a continuation, `Ending` once DONE was written and
/// the tagged completion is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleState {
    /// Normal command mode.
    #[default]
    Idle,
    /// Server-push mode; no command may be issued.
    Idling,
    /// DONE was sent; waiting for the tagged completion.
    Ending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(ConnectionState::default(), ConnectionState::NotAuthenticated);
        assert_eq!(IdleState::default(), IdleState::Idle);
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Selected.to_string(), "SELECTED");
    }
}
