//! Supported commands and the connection states they may be issued in.

use crate::types::ConnectionState::{self, Authenticated, Logout, NotAuthenticated, Selected};
use crate::{Error, Result};

/// A supported command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Upper-case command name.
    pub name: &'static str,
    states: &'static [ConnectionState],
}

impl CommandSpec {
    /// Returns true if the command may be issued in `state`.
    #[must_use]
    pub fn allows(&self, state: ConnectionState) -> bool {
        self.states.contains(&state)
    }

    /// States the command may be issued in.
    #[must_use]
    pub const fn states(&self) -> &'static [ConnectionState] {
        self.states
    }
}

const ANY: &[ConnectionState] = &[NotAuthenticated, Authenticated, Selected, Logout];
const CONNECTED: &[ConnectionState] = &[NotAuthenticated, Authenticated, Selected];
const NONAUTH: &[ConnectionState] = &[NotAuthenticated];
const AUTH: &[ConnectionState] = &[Authenticated];
const AUTH_OR_SELECTED: &[ConnectionState] = &[Authenticated, Selected];
const SELECTED: &[ConnectionState] = &[Selected];

const fn spec(name: &'static str, states: &'static [ConnectionState]) -> CommandSpec {
    CommandSpec { name, states }
}

/// All supported commands, sorted by name.
pub static COMMANDS: &[CommandSpec] = &[
    spec("APPEND", AUTH_OR_SELECTED),
    spec("AUTHENTICATE", NONAUTH),
    spec("CAPABILITY", ANY),
    spec("CHECK", SELECTED),
    spec("CLOSE", SELECTED),
    spec("COPY", SELECTED),
    spec("CREATE", AUTH_OR_SELECTED),
    spec("DELETE", AUTH_OR_SELECTED),
    spec("DELETEACL", AUTH_OR_SELECTED),
    spec("ENABLE", AUTH),
    spec("EXAMINE", AUTH_OR_SELECTED),
    spec("EXPUNGE", SELECTED),
    spec("FETCH", SELECTED),
    spec("GETACL", AUTH_OR_SELECTED),
    spec("GETQUOTA", AUTH_OR_SELECTED),
    spec("GETQUOTAROOT", AUTH_OR_SELECTED),
    spec("ID", CONNECTED),
    spec("IDLE", CONNECTED),
    spec("LIST", AUTH_OR_SELECTED),
    spec("LOGIN", NONAUTH),
    spec("LOGOUT", ANY),
    spec("LSUB", AUTH_OR_SELECTED),
    spec("MOVE", SELECTED),
    spec("MYRIGHTS", AUTH_OR_SELECTED),
    spec("NAMESPACE", AUTH_OR_SELECTED),
    spec("NOOP", ANY),
    spec("RENAME", AUTH_OR_SELECTED),
    spec("SEARCH", SELECTED),
    spec("SELECT", AUTH_OR_SELECTED),
    spec("SETACL", AUTH_OR_SELECTED),
    spec("SETQUOTA", AUTH_OR_SELECTED),
    spec("SORT", SELECTED),
    spec("STARTTLS", NONAUTH),
    spec("STATUS", AUTH_OR_SELECTED),
    spec("STORE", SELECTED),
    spec("SUBSCRIBE", AUTH_OR_SELECTED),
    spec("THREAD", SELECTED),
    spec("UID", SELECTED),
    spec("UNSELECT", AUTH_OR_SELECTED),
    spec("UNSUBSCRIBE", AUTH_OR_SELECTED),
    spec("XLIST", CONNECTED),
];

/// Looks up a command by name, ignoring case.
///
/// For compound names such as `UID FETCH` the first word is looked up.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    let word = name.split(' ').next().unwrap_or(name).to_ascii_uppercase();
    COMMANDS
        .binary_search_by(|spec| spec.name.cmp(word.as_str()))
        .ok()
        .map(|i| &COMMANDS[i])
}

/// Checks that `name` is supported and allowed in `state`.
///
/// # Errors
///
/// Returns [`Error::InvalidState`] for unknown commands and for commands the
/// state does not allow.
pub fn check(name: &str, state: ConnectionState) -> Result<&'static CommandSpec> {
    let spec =
        lookup(name).ok_or_else(|| Error::InvalidState(format!("unknown command {name}")))?;
    if !spec.allows(state) {
        return Err(Error::InvalidState(format!(
            "command {name} illegal in state {state}, only allowed in states {}",
            spec.states()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(spec)
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

    #[test]
    fn test_table_is_sorted() {
        assert!(COMMANDS.windows(2).all(|w| w[0].name < w[1].name));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("fetch").unwrap().name, "FETCH");
        assert_eq!(lookup("UID FETCH").unwrap().name, "UID");
        assert!(lookup("FROBNICATE").is_none());
    }

    #[test]
    fn test_state_checks() {
        assert!(check("LOGIN", NotAuthenticated).is_ok());
        assert!(check("LOGIN", Authenticated).is_err());
        assert!(check("FETCH", Selected).is_ok());
        assert!(check("CAPABILITY", Logout).is_ok());
        assert!(check("IDLE", Authenticated).is_ok());
        assert!(check("MOVE", Selected).is_ok());
        assert!(check("UID MOVE", Selected).is_ok());
        assert!(check("MOVE", Authenticated).is_err());
    }

    #[test]
    fn test_rejection_names_allowed_states() {
        let err = check("FETCH", Authenticated).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state: command FETCH illegal in state AUTH, only allowed in states SELECTED"
        );
        assert!(matches!(
            check("XYZZY", Selected),
            Err(Error::InvalidState(_))
        ));
    }
}
