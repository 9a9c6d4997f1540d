//! IMAP IDLE command support (RFC 2177).
//!
//! IDLE allows the client to receive real-time notifications from the server
//! about mailbox changes without polling. While idling the connection
//! accepts no other command; [`Connection::idle_check`] collects pushed
//! responses and [`Connection::idle_done`] returns to command mode.

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::client::{CommandResponse, Connection, bounded};
use crate::command::{EncodedCommand, check_command};
use crate::parser::{Chunk, IdleEvent, Response, UntaggedResponse};
use crate::types::{Capability, IdleState, Status};
use crate::{Error, Result};

/// Server pushes received during IDLE and not yet handed to the caller,
/// oldest first.
#[derive(Default)]
pub(super) struct PushQueue {
    /// Events decoded but not yet delivered.
    events: Vec<IdleEvent>,
    /// Responses not yet decoded.
    responses: VecDeque<Pushed>,
    /// A decoding failure to report before anything queued after it.
    failure: Option<Error>,
}

enum Pushed {
    Untagged(UntaggedResponse),
    Raw(Vec<Chunk>),
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Enters IDLE.
    ///
    /// Requires the IDLE capability. Returns once the server accepted the
    /// command with a continuation.
    pub async fn idle(&mut self) -> Result<()> {
        self.ensure_ready()?;
        check_command("IDLE", self.state)?;
        self.require_capability(&Capability::Idle).await?;

        let tag = self.tags.next_tag();
        let result = self.start_idle(&tag).await;
        if let Some(rejected) = self.guard(result)? {
            return Err(Error::CommandRejected {
                command: "IDLE".to_string(),
                status: rejected.status,
                text: rejected.text,
            });
        }

        self.idle = IdleState::Idling;
        self.idle_tag = Some(tag);
        debug!("Entered IDLE");
        Ok(())
    }

    /// Collects the responses the server pushed while idling.
    ///
    /// Waits up to `timeout` for the first complete response; `None` waits
    /// indefinitely and a zero timeout only looks at what has already
    /// arrived. A timeout is not an error, the result is just empty. A
    /// partial response stays buffered for the next check.
    ///
    /// A pushed response that cannot be decoded fails the check it comes
    /// first in. If events precede it they are returned instead and the
    /// failure is reported by the next check, which then carries on with
    /// the responses after it.
    pub async fn idle_check(&mut self, timeout: Option<Duration>) -> Result<Vec<IdleEvent>> {
        self.ensure_idling()?;

        self.queue_buffered()?;
        let events = self.drain_pushed()?;
        if !events.is_empty() {
            return Ok(events);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let result = self.stream.wait_readable(remaining).await;
            let readable = self.guard(result)?;
            self.queue_buffered()?;
            let events = self.drain_pushed()?;

            let expired = remaining.is_some_and(|r| r.is_zero());
            if !events.is_empty() || !readable || expired {
                return Ok(events);
            }
        }
    }

    /// Leaves IDLE.
    ///
    /// Sends `DONE` and blocks, under the I/O timeout, until the tagged
    /// completion. Returns the completion text and every response that
    /// arrived since the last check, oldest first.
    ///
    /// `DONE` is always sent. If a pushed response then fails to decode,
    /// IDLE has still ended and the events that could not be returned stay
    /// queued for the next IDLE. Any other failure poisons the connection.
    pub async fn idle_done(&mut self) -> Result<(String, Vec<IdleEvent>)> {
        self.ensure_idling()?;
        let tag = self
            .idle_tag
            .take()
            .ok_or_else(|| Error::InvalidState("IDLE has no outstanding tag".to_string()))?;

        self.idle = IdleState::Ending;
        let result = self.finish_idle(&tag).await;
        self.idle = IdleState::Idle;
        let (status, text) = match result {
            Ok(completion) => completion,
            Err(e) => {
                // Where the server stands in the exchange is unknown.
                warn!(error = %e, "IDLE did not end cleanly");
                self.poisoned = true;
                return Err(e);
            }
        };
        debug!("Left IDLE");

        if !status.is_ok() {
            return Err(Error::CommandRejected {
                command: "IDLE".to_string(),
                status,
                text,
            });
        }

        let events = self.drain_pushed()?;
        if let Some(failure) = self.pushed.failure.take() {
            self.pushed.events = events;
            return Err(failure);
        }
        Ok((text, events))
    }

    async fn start_idle(&mut self, tag: &str) -> Result<Option<CommandResponse>> {
        let command = EncodedCommand::encode(tag, "IDLE", &[], false);
        debug!(tag = %tag, command = "IDLE", "Sending command");
        bounded(self.options.io_timeout, self.stream.write_all(&command.to_bytes())).await?;

        let mut untagged = Vec::new();
        let rejected = self.await_continuation(tag, &mut untagged).await?;
        self.queue_untagged(untagged);
        Ok(rejected)
    }

    /// Writes `DONE` and reads the completion, queueing what came with it.
    ///
    /// Responses already buffered are read by the completion loop, after
    /// the queued ones.
    async fn finish_idle(&mut self, tag: &str) -> Result<(Status, String)> {
        bounded(self.options.io_timeout, self.stream.write_all(b"DONE\r\n")).await?;
        let response = self.read_completion(tag, Vec::new()).await?;
        self.queue_untagged(response.untagged);
        Ok((response.status, response.text))
    }

    fn ensure_idling(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::InvalidState(
                "connection is unusable after a transport failure".to_string(),
            ));
        }
        if self.idle != IdleState::Idling {
            return Err(Error::InvalidState("IDLE is not active".to_string()));
        }
        Ok(())
    }

    fn queue_untagged(&mut self, untagged: Vec<UntaggedResponse>) {
        self.pushed
            .responses
            .extend(untagged.into_iter().map(Pushed::Untagged));
    }

    /// Moves every complete buffered response into the queue, undecoded.
    fn queue_buffered(&mut self) -> Result<()> {
        let buffered = self.stream.take_buffered()?;
        self.pushed
            .responses
            .extend(buffered.into_iter().map(Pushed::Raw));
        Ok(())
    }

    /// Decodes queued responses in order, stopping at the first failure.
    ///
    /// The failure is returned if nothing was decoded before it, otherwise
    /// it is kept for the next call.
    fn drain_pushed(&mut self) -> Result<Vec<IdleEvent>> {
        if let Some(failure) = self.pushed.failure.take() {
            return Err(failure);
        }
        let mut events = std::mem::take(&mut self.pushed.events);
        while let Some(pushed) = self.pushed.responses.pop_front() {
            let decoded = match pushed {
                Pushed::Untagged(untagged) => self.idle_event(untagged),
                Pushed::Raw(chunks) => self.pushed_event(chunks),
            };
            match decoded {
                Ok(event) => events.push(event),
                Err(e) if events.is_empty() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Undecodable response during IDLE");
                    self.pushed.failure = Some(e);
                    break;
                }
            }
        }
        Ok(events)
    }

    fn pushed_event(&self, chunks: Vec<Chunk>) -> Result<IdleEvent> {
        match Response::classify(chunks)? {
            Response::Untagged(untagged) => self.idle_event(untagged),
            Response::Tagged(tagged) => Err(Error::Protocol(format!(
                "unexpected tagged response {} during IDLE",
                tagged.tag
            ))),
            Response::Continuation(text) => Err(Error::Protocol(format!(
                "unexpected continuation during IDLE: {text}"
            ))),
        }
    }

    fn idle_event(&self, untagged: UntaggedResponse) -> Result<IdleEvent> {
        if untagged.is("BYE") {
            warn!(text = %untagged.text(), "Server sent BYE during IDLE");
        }
        IdleEvent::from_untagged(untagged, self.options.normalise_times)
    }
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
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::types::Flag;

    const GREETING: &[u8] = b"* PREAUTH [CAPABILITY IMAP4rev1 IDLE] ready\r\n";

    async fn connect(mock: Mock) -> Connection<Mock> {
        Connection::from_stream(mock, ConnectionOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_round_trip() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 4 EXISTS\r\n* 2 FETCH (FLAGS (\\Seen))\r\n")
            .write(b"DONE\r\n")
            .read(b"* 3 EXPUNGE\r\nA0000 OK IDLE terminated\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        assert_eq!(connection.idle_state(), IdleState::Idling);

        let events = connection.idle_check(None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], IdleEvent::Exists(4));
        match &events[1] {
            IdleEvent::Fetch { seq, record } => {
                assert_eq!(*seq, 2);
                assert_eq!(record.flags(), Some(vec![Flag::Seen]));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let (text, events) = connection.idle_done().await.unwrap();
        assert_eq!(text, "IDLE terminated");
        assert_eq!(events, vec![IdleEvent::Expunge(3)]);
        assert_eq!(connection.idle_state(), IdleState::Idle);
    }

    #[tokio::test]
    async fn test_commands_rejected_while_idling() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        assert!(matches!(
            connection.noop().await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            connection.idle().await,
            Err(Error::InvalidState(_))
        ));
        connection.idle_done().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_timeout_returns_immediately() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let events = connection
            .idle_check(Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(events.is_empty());
        connection.idle_done().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_times_out_then_sees_later_event() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .wait(Duration::from_secs(20))
            .read(b"* 1 RECENT\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let events = connection
            .idle_check(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(events.is_empty());

        let events = connection
            .idle_check(Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(events, vec![IdleEvent::Recent(1)]);
        connection.idle_done().await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_rest() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 9 EXI")
            .read(b"STS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let events = connection.idle_check(None).await.unwrap();
        assert_eq!(events, vec![IdleEvent::Exists(9)]);
        connection.idle_done().await.unwrap();
    }

    #[tokio::test]
    async fn test_done_prepends_unchecked_events() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n* 5 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"* 6 EXISTS\r\nA0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let (_, events) = connection.idle_done().await.unwrap();
        assert_eq!(events, vec![IdleEvent::Exists(5), IdleEvent::Exists(6)]);
    }

    #[tokio::test]
    async fn test_malformed_push_does_not_hide_later_events() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 1 FETCH (FLAGS)\r\n* 5 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let err = connection.idle_check(None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!connection.is_poisoned());

        let events = connection
            .idle_check(Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(events, vec![IdleEvent::Exists(5)]);

        let (text, events) = connection.idle_done().await.unwrap();
        assert_eq!(text, "done");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_push_reported_after_earlier_events() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 4 EXISTS\r\n* 1 FETCH (FLAGS)\r\n* 5 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let events = connection.idle_check(None).await.unwrap();
        assert_eq!(events, vec![IdleEvent::Exists(4)]);

        assert!(matches!(
            connection.idle_check(Some(Duration::ZERO)).await,
            Err(Error::Protocol(_))
        ));
        let events = connection
            .idle_check(Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(events, vec![IdleEvent::Exists(5)]);
        connection.idle_done().await.unwrap();
    }

    #[tokio::test]
    async fn test_done_is_sent_before_pushed_responses_are_decoded() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n* 1 FETCH (FLAGS)\r\n")
            .write(b"DONE\r\n")
            .read(b"* 2 EXISTS\r\nA0000 OK done\r\n")
            .write(b"A0001 NOOP\r\n")
            .read(b"A0001 OK noop\r\n")
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK done\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let err = connection.idle_done().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(connection.idle_state(), IdleState::Idle);
        assert!(!connection.is_poisoned());

        // The server left IDLE too, so commands work again.
        connection.noop().await.unwrap();

        connection.idle().await.unwrap();
        let events = connection
            .idle_check(Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(events, vec![IdleEvent::Exists(2)]);
        connection.idle_done().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_lost_while_ending_idle_poisons() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let err = connection.idle_done().await.unwrap_err();
        assert!(err.is_transport());
        assert!(connection.is_poisoned());
        assert_eq!(connection.idle_state(), IdleState::Idle);
        assert!(matches!(
            connection.noop().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_bye_during_idle_is_reported() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* BYE shutting down\r\n")
            .build();
        let mut connection = connect(mock).await;

        connection.idle().await.unwrap();
        let events = connection.idle_check(None).await.unwrap();
        assert_eq!(
            events,
            vec![IdleEvent::Status {
                status: Status::Bye,
                text: "shutting down".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_idle_requires_capability() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] ready\r\n")
            .build();
        let mut connection = connect(mock).await;

        let err = connection.idle().await.unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
        assert_eq!(connection.idle_state(), IdleState::Idle);
    }

    #[tokio::test]
    async fn test_idle_rejected() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 IDLE\r\n")
            .read(b"A0000 BAD not now\r\n")
            .build();
        let mut connection = connect(mock).await;

        let err = connection.idle().await.unwrap_err();
        assert!(matches!(err, Error::CommandRejected { status: Status::Bad, .. }));
        assert_eq!(connection.idle_state(), IdleState::Idle);
    }

    #[tokio::test]
    async fn test_check_outside_idle() {
        let mock = Builder::new().read(GREETING).build();
        let mut connection = connect(mock).await;

        assert!(matches!(
            connection.idle_check(Some(Duration::ZERO)).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            connection.idle_done().await,
            Err(Error::InvalidState(_))
        ));
    }
}
