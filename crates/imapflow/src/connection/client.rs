//! IMAP connection over an established stream.
//!
//! [`Connection`] drives one command at a time: it frames the arguments,
//! performs the continuation handshake for synchronizing literals, collects
//! untagged data until the tagged completion and keeps the protocol state
//! in step with what the server accepted.

#![allow(clippy::missing_errors_doc)]

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use super::config::ConnectionOptions;
use super::framed::FramedStream;
use super::idle::PushQueue;
use crate::command::{Argument, EncodedCommand, TagGenerator, check_command, join_message_ids};
use crate::parser::{
    Chunk, FetchOptions, FetchRecord, Response, SearchIds, TaggedResponse, UntaggedResponse,
    capability_code, parse_fetch_response, parse_message_list,
};
use crate::types::{Capability, ConnectionState, Flag, IdleState, Status};
use crate::utf7::MailboxName;
use crate::{CapabilityError, Error, Result};

/// Commands whose arguments never reach the log.
const SENSITIVE_COMMANDS: &[&str] = &["LOGIN", "AUTHENTICATE"];

/// Outcome of a command the server completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Command tag.
    pub tag: String,
    /// Tagged status.
    pub status: Status,
    /// Tagged response text, including any `[CODE]` prefix.
    pub text: String,
    /// Untagged responses received while the command ran, in order.
    pub untagged: Vec<UntaggedResponse>,
}

impl CommandResponse {
    fn new(tagged: TaggedResponse, untagged: Vec<UntaggedResponse>) -> Self {
        Self {
            tag: tagged.tag,
            status: tagged.status,
            text: tagged.text,
            untagged,
        }
    }

    /// Returns true if the command completed with OK.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Untagged responses with the given keyword.
    pub fn untagged_with<'a>(
        &'a self,
        keyword: &'a str,
    ) -> impl Iterator<Item = &'a UntaggedResponse> + 'a {
        self.untagged.iter().filter(move |r| r.is(keyword))
    }

    /// Data of every untagged response with the given keyword, concatenated.
    #[must_use]
    pub fn data_of(&self, keyword: &str) -> Vec<Chunk> {
        self.untagged_with(keyword)
            .flat_map(|r| r.data.iter().cloned())
            .collect()
    }
}

/// An IMAP connection.
pub struct Connection<S> {
    pub(super) stream: FramedStream<S>,
    pub(super) tags: TagGenerator,
    pub(super) capabilities: Vec<Capability>,
    pub(super) state: ConnectionState,
    pub(super) idle: IdleState,
    pub(super) idle_tag: Option<String>,
    pub(super) pushed: PushQueue,
    pub(super) options: ConnectionOptions,
    pub(super) greeting: String,
    pub(super) poisoned: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an established stream and reads the server greeting.
    ///
    /// An `OK` greeting leaves the connection not authenticated, `PREAUTH`
    /// makes it authenticated and `BYE` fails with [`Error::Bye`].
    pub async fn from_stream(stream: S, options: ConnectionOptions) -> Result<Self> {
        let mut connection = Self {
            stream: FramedStream::new(stream),
            tags: TagGenerator::new(options.tag_prefix),
            capabilities: Vec::new(),
            state: ConnectionState::NotAuthenticated,
            idle: IdleState::Idle,
            idle_tag: None,
            pushed: PushQueue::default(),
            options,
            greeting: String::new(),
            poisoned: false,
        };

        let Response::Untagged(greeting) = connection.read_next().await? else {
            return Err(Error::Protocol(
                "greeting is not an untagged response".to_string(),
            ));
        };
        let text = greeting.text();
        match greeting.status() {
            Some(Status::Ok) => {}
            Some(Status::PreAuth) => connection.set_state(ConnectionState::Authenticated),
            Some(Status::Bye) => return Err(Error::Bye(text)),
            _ => {
                return Err(Error::Protocol(format!(
                    "unexpected greeting: {} {text}",
                    greeting.keyword
                )));
            }
        }
        if let Some(capabilities) = greeting.capabilities() {
            connection.learn_capabilities(capabilities);
        }
        debug!(greeting = %text, "Connected");
        connection.greeting = text;
        Ok(connection)
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current IDLE sub-state.
    #[must_use]
    pub const fn idle_state(&self) -> IdleState {
        self.idle
    }

    /// Text of the server greeting.
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Protocol options in effect.
    #[must_use]
    pub const fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Returns true once a transport failure made the connection unusable.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Gets a reference to the underlying stream.
    #[must_use]
    pub const fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Consumes the connection and returns the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Capabilities learned so far, without asking the server.
    #[must_use]
    pub fn cached_capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Returns true if the server advertised `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Runs a command and waits for its tagged completion.
    ///
    /// Fails with [`Error::InvalidState`] if the command is unknown, not
    /// allowed in the current state, or issued while IDLE is active, and with
    /// [`Error::CommandRejected`] if the server answers NO or BAD. A
    /// transport failure poisons the connection.
    pub async fn run_command(&mut self, name: &str, args: &[Argument]) -> Result<CommandResponse> {
        self.ensure_ready()?;
        check_command(name, self.state)?;

        let result = self.execute(name, args).await;
        let response = self.guard(result)?;
        self.apply_completion(name, &response);

        if response.is_ok() {
            Ok(response)
        } else {
            Err(Error::CommandRejected {
                command: name.to_string(),
                status: response.status,
                text: response.text,
            })
        }
    }

    /// Runs a message-id command, as `UID name` when UIDs are in use.
    pub async fn uid_command(&mut self, name: &str, args: &[Argument]) -> Result<CommandResponse> {
        if self.options.use_uid {
            self.run_command(&format!("UID {name}"), args).await
        } else {
            self.run_command(name, args).await
        }
    }

    /// Asks the server for its capabilities and caches them.
    pub async fn capability(&mut self) -> Result<Vec<Capability>> {
        self.run_command("CAPABILITY", &[]).await?;
        Ok(self.capabilities.clone())
    }

    /// Fails with [`CapabilityError`] unless the server supports
    /// `capability`.
    ///
    /// Capabilities are fetched first if none are known.
    pub async fn require_capability(&mut self, capability: &Capability) -> Result<()> {
        if self.capabilities.is_empty() {
            self.capability().await?;
        }
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(CapabilityError {
                capability: capability.to_string(),
            }
            .into())
        }
    }

    /// Sends NOOP, returning whatever untagged data the server flushed.
    pub async fn noop(&mut self) -> Result<Vec<UntaggedResponse>> {
        Ok(self.run_command("NOOP", &[]).await?.untagged)
    }

    /// Authenticates with a user name and password.
    ///
    /// Returns the server's response text.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        let args = [Argument::value(username), Argument::value(password)];
        Ok(self.run_command("LOGIN", &args).await?.text)
    }

    /// Logs out, returning the server's BYE text.
    pub async fn logout(&mut self) -> Result<String> {
        match self.run_command("LOGOUT", &[]).await {
            Ok(response) => Ok(response
                .untagged_with("BYE")
                .next()
                .map_or_else(|| response.text.clone(), UntaggedResponse::text)),
            // Some servers close the connection right after BYE.
            Err(Error::Bye(text)) => {
                self.set_state(ConnectionState::Logout);
                Ok(text)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches `items` for `messages`.
    ///
    /// Records are keyed by UID when UIDs are in use, otherwise by sequence
    /// number. `modifiers` such as `CHANGEDSINCE 5` are sent as a
    /// parenthesised list after the items. No command is sent for an empty
    /// message list.
    pub async fn fetch(
        &mut self,
        messages: &[u64],
        items: &[&str],
        modifiers: &[&str],
    ) -> Result<BTreeMap<u64, FetchRecord>> {
        if messages.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut args = vec![
            Argument::raw(join_message_ids(messages)),
            Argument::raw(format!("({})", items.join(" "))),
        ];
        if !modifiers.is_empty() {
            args.push(Argument::raw(format!("({})", modifiers.join(" "))));
        }

        let response = self.uid_command("FETCH", &args).await?;
        let chunks: Vec<Chunk> = response
            .untagged_with("FETCH")
            .flat_map(UntaggedResponse::fetch_data)
            .collect();
        parse_fetch_response(
            &chunks,
            FetchOptions {
                normalise_times: self.options.normalise_times,
                uid_is_key: self.options.use_uid,
            },
        )
    }

    /// Searches the selected mailbox.
    ///
    /// Empty criteria search `ALL`. With a `charset` the criteria are
    /// preceded by `CHARSET name`.
    pub async fn search(
        &mut self,
        criteria: &[Argument],
        charset: Option<&str>,
    ) -> Result<SearchIds> {
        let mut args = Vec::with_capacity(criteria.len() + 2);
        if let Some(charset) = charset {
            args.push(Argument::raw("CHARSET"));
            args.push(Argument::value(charset));
        }
        if criteria.is_empty() {
            args.push(Argument::raw("ALL"));
        } else {
            args.extend_from_slice(criteria);
        }

        let response = self.uid_command("SEARCH", &args).await?;
        parse_message_list(&response.data_of("SEARCH"))
    }

    /// Appends a message to `mailbox`.
    ///
    /// The message is always sent as a literal. Returns the server's response
    /// text, which carries the `[APPENDUID ...]` code on UIDPLUS servers.
    pub async fn append<'a>(
        &mut self,
        mailbox: impl Into<MailboxName<'a>>,
        message: &[u8],
        flags: &[Flag],
        time: Option<&DateTime<FixedOffset>>,
    ) -> Result<String> {
        let mut args = vec![Argument::mailbox(mailbox)];
        if !flags.is_empty() {
            let flags: Vec<&str> = flags.iter().map(Flag::as_str).collect();
            args.push(Argument::raw(format!("({})", flags.join(" "))));
        }
        if let Some(time) = time {
            args.push(Argument::internal_date(time));
        }
        args.push(Argument::literal(message));
        Ok(self.run_command("APPEND", &args).await?.text)
    }

    pub(super) fn ensure_ready(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::InvalidState(
                "connection is unusable after a transport failure".to_string(),
            ));
        }
        if self.idle != IdleState::Idle {
            return Err(Error::InvalidState(
                "no command may be issued while IDLE is active".to_string(),
            ));
        }
        Ok(())
    }

    /// Marks the connection unusable if `result` is a transport failure.
    pub(super) fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_transport()
            && !self.poisoned
        {
            warn!(error = %e, "Connection poisoned");
            self.poisoned = true;
        }
        result
    }

    async fn execute(&mut self, name: &str, args: &[Argument]) -> Result<CommandResponse> {
        let tag = self.tags.next_tag();
        let literal_plus = self.has_capability(&Capability::LiteralPlus);
        let command = EncodedCommand::encode(&tag, name, args, literal_plus);

        debug!(tag = %tag, command = %name, "Sending command");
        if !is_sensitive(name)
            && let Some(first) = command.segments().first()
        {
            trace!(line = %String::from_utf8_lossy(&first.text).trim_end(), "C:");
        }

        let limit = self.options.io_timeout;
        let mut untagged = Vec::new();
        for segment in command.into_segments() {
            bounded(limit, self.stream.write_all(&segment.text)).await?;
            let Some(literal) = segment.literal else {
                continue;
            };
            if literal.is_synchronizing() {
                debug!(tag = %tag, len = literal.len(), "Awaiting continuation");
                if let Some(rejected) = self.await_continuation(&tag, &mut untagged).await? {
                    return Ok(rejected);
                }
            }
            bounded(limit, self.stream.write_all(literal.data())).await?;
        }

        self.read_completion(&tag, untagged).await
    }

    /// Reads until the server asks for more data.
    ///
    /// Returns the completion if the server rejects the command instead.
    pub(super) async fn await_continuation(
        &mut self,
        tag: &str,
        untagged: &mut Vec<UntaggedResponse>,
    ) -> Result<Option<CommandResponse>> {
        loop {
            match self.read_next().await? {
                Response::Continuation(_) => return Ok(None),
                Response::Untagged(response) => untagged.push(response),
                Response::Tagged(tagged) if tagged.tag == tag && !tagged.status.is_ok() => {
                    return Ok(Some(CommandResponse::new(
                        tagged,
                        std::mem::take(untagged),
                    )));
                }
                Response::Tagged(tagged) => {
                    return Err(Error::Protocol(format!(
                        "expected continuation, got {} {}",
                        tagged.tag, tagged.status
                    )));
                }
            }
        }
    }

    /// Reads until the tagged completion of `tag`.
    pub(super) async fn read_completion(
        &mut self,
        tag: &str,
        mut untagged: Vec<UntaggedResponse>,
    ) -> Result<CommandResponse> {
        loop {
            let response = match self.read_next().await {
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if let Some(bye) = untagged.iter().find(|r| r.is("BYE")) {
                        return Err(Error::Bye(bye.text()));
                    }
                    return Err(Error::Io(e));
                }
                other => other?,
            };
            match response {
                Response::Tagged(tagged) if tagged.tag == tag => {
                    return Ok(CommandResponse::new(tagged, untagged));
                }
                Response::Tagged(tagged) => {
                    return Err(Error::Protocol(format!(
                        "unexpected tagged response {} while waiting for {tag}",
                        tagged.tag
                    )));
                }
                Response::Untagged(response) => untagged.push(response),
                Response::Continuation(text) => {
                    return Err(Error::Protocol(format!("unexpected continuation: {text}")));
                }
            }
        }
    }

    async fn read_next(&mut self) -> Result<Response> {
        let chunks = bounded(self.options.io_timeout, self.stream.read_response()).await?;
        Response::classify(chunks)
    }

    fn apply_completion(&mut self, name: &str, response: &CommandResponse) {
        let mut learned = None;
        for untagged in &response.untagged {
            if let Some(capabilities) = untagged.capabilities() {
                learned = Some(capabilities);
            }
        }
        if let Some(capabilities) = capability_code(&response.text) {
            learned = Some(capabilities);
        }

        let word = name.split(' ').next().unwrap_or(name).to_ascii_uppercase();
        let ok = response.is_ok();
        match word.as_str() {
            "LOGOUT" => self.set_state(ConnectionState::Logout),
            "LOGIN" | "AUTHENTICATE" if ok => {
                // Servers may advertise more once authenticated.
                self.capabilities.clear();
                self.set_state(ConnectionState::Authenticated);
            }
            "STARTTLS" if ok => self.capabilities.clear(),
            "SELECT" | "EXAMINE" if ok => self.set_state(ConnectionState::Selected),
            // A failed SELECT still closes the mailbox that was open.
            "SELECT" | "EXAMINE" if self.state == ConnectionState::Selected => {
                self.set_state(ConnectionState::Authenticated);
            }
            "CLOSE" | "UNSELECT" if ok => self.set_state(ConnectionState::Authenticated),
            _ => {}
        }

        if let Some(capabilities) = learned {
            self.learn_capabilities(capabilities);
        }
    }

    pub(super) fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
        }
    }

    fn learn_capabilities(&mut self, capabilities: Vec<Capability>) {
        debug!(count = capabilities.len(), "Capabilities updated");
        self.capabilities = capabilities;
    }
}

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_COMMANDS
        .iter()
        .any(|c| name.eq_ignore_ascii_case(c))
}

/// Runs `fut` under the I/O timeout.
pub(super) async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
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
    use chrono::TimeZone;
    use tokio_test::io::Builder;

    use super::*;
    use crate::parser::FetchValue;

    async fn connect(mock: tokio_test::io::Mock) -> Connection<tokio_test::io::Mock> {
        Connection::from_stream(mock, ConnectionOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_greeting_with_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 IDLE LITERAL+] Server ready\r\n")
            .build();
        let connection = connect(mock).await;

        assert_eq!(connection.state(), ConnectionState::NotAuthenticated);
        assert!(connection.has_capability(&Capability::Idle));
        assert!(connection.has_capability(&Capability::LiteralPlus));
        assert_eq!(
            connection.greeting(),
            "[CAPABILITY IMAP4rev1 IDLE LITERAL+] Server ready"
        );
    }

    #[tokio::test]
    async fn test_preauth_greeting() {
        let mock = Builder::new().read(b"* PREAUTH welcome back\r\n").build();
        let connection = connect(mock).await;
        assert_eq!(connection.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_bye_greeting() {
        let mock = Builder::new().read(b"* BYE too busy\r\n").build();
        let err = Connection::from_stream(mock, ConnectionOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Bye(ref text) if text == "too busy"));
    }

    #[tokio::test]
    async fn test_login_changes_state() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN alice \"secret pass\"\r\n")
            .read(b"A0000 OK [CAPABILITY IMAP4rev1 MOVE] Logged in\r\n")
            .build();
        let mut connection = connect(mock).await;

        let text = connection.login("alice", "secret pass").await.unwrap();
        assert_eq!(text, "[CAPABILITY IMAP4rev1 MOVE] Logged in");
        assert_eq!(connection.state(), ConnectionState::Authenticated);
        assert!(connection.has_capability(&Capability::Move));
    }

    #[tokio::test]
    async fn test_command_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN bob wrong\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let mut connection = connect(mock).await;

        let err = connection.login("bob", "wrong").await.unwrap_err();
        match err {
            Error::CommandRejected {
                command,
                status,
                text,
            } => {
                assert_eq!(command, "LOGIN");
                assert_eq!(status, Status::No);
                assert_eq!(text, "[AUTHENTICATIONFAILED] Invalid credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(connection.state(), ConnectionState::NotAuthenticated);
        assert!(!connection.is_poisoned());
    }

    #[tokio::test]
    async fn test_state_check_happens_before_sending() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut connection = connect(mock).await;

        let err = connection.run_command("FETCH", &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        let err = connection.run_command("FROBNICATE", &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_synchronizing_literal_handshake() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0000 APPEND INBOX {5}\r\n")
            .read(b"+ go ahead\r\n")
            .write(b"hello")
            .write(b"\r\n")
            .read(b"A0000 OK [APPENDUID 1 7] done\r\n")
            .build();
        let mut connection = connect(mock).await;

        let text = connection
            .append("INBOX", b"hello", &[], None)
            .await
            .unwrap();
        assert_eq!(text, "[APPENDUID 1 7] done");
    }

    #[tokio::test]
    async fn test_literal_rejected_before_payload() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0000 APPEND INBOX {5}\r\n")
            .read(b"A0000 NO [TOOBIG] message too large\r\n")
            .build();
        let mut connection = connect(mock).await;

        let err = connection
            .append("INBOX", b"hello", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandRejected { status: Status::No, .. }));
    }

    #[tokio::test]
    async fn test_missing_continuation_is_protocol_error() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0000 APPEND INBOX {5}\r\n")
            .read(b"B0001 OK something else\r\n")
            .build();
        let mut connection = connect(mock).await;

        let err = connection
            .append("INBOX", b"hello", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_each_literal_waits_for_its_continuation() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
            .write(b"A0000 LOGIN {7}\r\n")
            .read(b"+ go\r\n")
            .write("j\u{fc}rgen".as_bytes())
            .write(b" {5}\r\n")
            .read(b"+ go\r\n")
            .write("p\u{e4}ss".as_bytes())
            .write(b"\r\n")
            .read(b"A0000 OK in\r\n")
            .build();
        let mut connection = connect(mock).await;

        let text = connection.login("j\u{fc}rgen", "p\u{e4}ss").await.unwrap();
        assert_eq!(text, "in");
        assert_eq!(connection.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_second_literal_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN {7}\r\n")
            .read(b"+ go\r\n")
            .write("j\u{fc}rgen".as_bytes())
            .write(b" {5}\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] unknown user\r\n")
            .write(b"A0001 NOOP\r\n")
            .read(b"A0001 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        let err = connection
            .login("j\u{fc}rgen", "p\u{e4}ss")
            .await
            .unwrap_err();
        match err {
            Error::CommandRejected { status, text, .. } => {
                assert_eq!(status, Status::No);
                assert_eq!(text, "[AUTHENTICATIONFAILED] unknown user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(connection.state(), ConnectionState::NotAuthenticated);
        assert!(!connection.is_poisoned());
        connection.noop().await.unwrap();
    }

    #[tokio::test]
    async fn test_literal_plus_skips_handshake() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1 LITERAL+] ready\r\n")
            .write(b"A0000 APPEND INBOX (\\Seen) {5+}\r\n")
            .write(b"hello")
            .write(b"\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection
            .append("INBOX", b"hello", &[Flag::Seen], None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_with_internal_date() {
        let time = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 9, 30, 0)
            .unwrap();
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1 LITERAL+] ready\r\n")
            .write(b"A0000 APPEND Drafts \"05-Mar-2024 09:30:00 +0100\" {2+}\r\n")
            .write(b"hi")
            .write(b"\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection
            .append("Drafts", b"hi", &[], Some(&time))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_select_and_fetch_by_uid() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0000 SELECT INBOX\r\n")
            .read(b"* 2 EXISTS\r\nA0000 OK [READ-WRITE] selected\r\n")
            .write(b"A0001 UID FETCH 42 (FLAGS UID)\r\n")
            .read(b"* 1 FETCH (FLAGS (\\Seen) UID 42)\r\nA0001 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        let response = connection
            .run_command("SELECT", &[Argument::mailbox("INBOX")])
            .await
            .unwrap();
        assert_eq!(response.untagged_with("EXISTS").count(), 1);
        assert_eq!(connection.state(), ConnectionState::Selected);

        let records = connection.fetch(&[42], &["FLAGS", "UID"], &[]).await.unwrap();
        let record = &records[&42];
        assert_eq!(record.seq(), Some(1));
        assert_eq!(record.flags(), Some(vec![Flag::Seen]));
        assert!(matches!(record.get("UID"), Some(FetchValue::Atom(_))));
    }

    #[tokio::test]
    async fn test_failed_select_leaves_selected_state() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0000 SELECT INBOX\r\n")
            .read(b"A0000 OK selected\r\n")
            .write(b"A0001 SELECT Missing\r\n")
            .read(b"A0001 NO no such mailbox\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection
            .run_command("SELECT", &[Argument::mailbox("INBOX")])
            .await
            .unwrap();
        assert!(
            connection
                .run_command("SELECT", &[Argument::mailbox("Missing")])
                .await
                .is_err()
        );
        assert_eq!(connection.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_search_with_modseq() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0000 SELECT INBOX\r\n")
            .read(b"A0000 OK selected\r\n")
            .write(b"A0001 SEARCH MODSEQ 100\r\n")
            .read(b"* SEARCH 1 2 3 (MODSEQ 917162)\r\nA0001 OK done\r\n")
            .build();
        let mut connection = Connection::from_stream(
            mock,
            ConnectionOptions {
                use_uid: false,
                ..ConnectionOptions::default()
            },
        )
        .await
        .unwrap();

        connection
            .run_command("SELECT", &[Argument::mailbox("INBOX")])
            .await
            .unwrap();
        let ids = connection
            .search(&[Argument::raw("MODSEQ"), Argument::from(100u64)], None)
            .await
            .unwrap();
        assert_eq!(ids.ids, vec![1, 2, 3]);
        assert_eq!(ids.modseq, Some(917162));
    }

    #[tokio::test]
    async fn test_capability_learns_from_untagged() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN\r\nA0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        let capabilities = connection.capability().await.unwrap();
        assert_eq!(
            capabilities,
            vec![
                Capability::Imap4Rev1,
                Capability::StartTls,
                Capability::Auth("PLAIN".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_require_capability() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
            .build();
        let mut connection = connect(mock).await;

        assert!(
            connection
                .require_capability(&Capability::Imap4Rev1)
                .await
                .is_ok()
        );
        let err = connection
            .require_capability(&Capability::Move)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capability(ref e) if e.capability == "MOVE"));
    }

    #[tokio::test]
    async fn test_transport_failure_poisons() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 NOOP\r\n")
            .read(b"* 3 EXI")
            .build();
        let mut connection = connect(mock).await;

        let err = connection.noop().await.unwrap_err();
        assert!(err.is_transport());
        assert!(connection.is_poisoned());
        assert!(matches!(
            connection.noop().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_poisons() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 NOOP\r\n")
            .wait(Duration::from_secs(120))
            .build();
        let mut connection = connect(mock).await;

        let err = connection.noop().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(connection.is_poisoned());
    }

    #[tokio::test]
    async fn test_logout() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGOUT\r\n")
            .read(b"* BYE see you\r\nA0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        assert_eq!(connection.logout().await.unwrap(), "see you");
        assert_eq!(connection.state(), ConnectionState::Logout);
    }

    #[tokio::test]
    async fn test_logout_when_server_hangs_up() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGOUT\r\n")
            .read(b"* BYE see you\r\n")
            .build();
        let mut connection = connect(mock).await;

        assert_eq!(connection.logout().await.unwrap(), "see you");
        assert_eq!(connection.state(), ConnectionState::Logout);
    }

    #[test]
    fn test_sensitive_commands() {
        assert!(is_sensitive("login"));
        assert!(is_sensitive("AUTHENTICATE"));
        assert!(!is_sensitive("SELECT"));
    }
}
