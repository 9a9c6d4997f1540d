//! Integration tests for the IMAP connection.
//!
//! These tests use a mock stream to simulate IMAP server responses
//! without requiring a real server connection.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use imapflow::{
    Argument, Atom, Chunk, Connection, ConnectionOptions, ConnectionState, Error, Flag, IdleEvent,
    Status, parse_response, utf7,
};

/// Mock stream that plays back a server script and records what the client
/// sent.
///
/// Each read delivers at most one script part, so a part stands for what
/// the server sends in reply to one command.
struct MockStream {
    /// Server output, one entry per read.
    responses: VecDeque<Vec<u8>>,
    /// Captured commands sent by the client.
    sent: Vec<u8>,
}

impl MockStream {
    fn new(parts: &[&[u8]]) -> Self {
        Self {
            responses: parts.iter().map(|part| part.to_vec()).collect(),
            sent: Vec::new(),
        }
    }

    fn sent_data(&self) -> &[u8] {
        &self.sent
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let Some(part) = self.responses.front_mut() else {
            return Poll::Ready(Ok(()));
        };

        let to_read = part.len().min(buf.remaining());
        buf.put_slice(&part[..to_read]);
        part.drain(..to_read);
        if part.is_empty() {
            self.responses.pop_front();
        }

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn connect(script: &[&[u8]]) -> Connection<MockStream> {
    Connection::from_stream(MockStream::new(script), ConnectionOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_session() {
    let script: &[&[u8]] = &[
        b"* OK [CAPABILITY IMAP4rev1 IDLE] Service Ready\r\n",
        b"A0000 OK [CAPABILITY IMAP4rev1 IDLE UIDPLUS] Logged in\r\n",
        b"* 3 EXISTS\r\n\
          * FLAGS (\\Seen \\Answered)\r\n\
          A0001 OK [READ-WRITE] SELECT completed\r\n",
        b"* SEARCH 10 12\r\nA0002 OK SEARCH completed\r\n",
        b"* 1 FETCH (UID 10 FLAGS (\\Seen) ENVELOPE (\"Mon, 7 Feb 1994 21:52:25 -0800\" \
          \"Hello\" ((\"Fred\" NIL \"fred\" \"example.com\")) NIL NIL NIL NIL NIL NIL \
          \"<id@example.com>\") BODY[] {5}\r\nhello)\r\n\
          * 2 FETCH (UID 12 FLAGS ())\r\n\
          A0003 OK FETCH completed\r\n",
        b"* BYE logging out\r\nA0004 OK LOGOUT completed\r\n",
    ];
    let mut connection = connect(script).await;

    connection.login("fred", "hunter2").await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Authenticated);

    let selected = connection
        .run_command("SELECT", &[Argument::mailbox("INBOX")])
        .await
        .unwrap();
    assert_eq!(selected.untagged_with("EXISTS").next().unwrap().number, Some(3));
    assert_eq!(connection.state(), ConnectionState::Selected);

    let found = connection
        .search(&[Argument::raw("UNSEEN")], None)
        .await
        .unwrap();
    assert_eq!(found.ids, vec![10, 12]);
    assert_eq!(found.modseq, None);

    let records = connection
        .fetch(&found.ids, &["UID", "FLAGS", "ENVELOPE", "BODY[]"], &[])
        .await
        .unwrap();
    assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![10, 12]);

    let first = &records[&10];
    assert_eq!(first.seq(), Some(1));
    assert_eq!(first.flags(), Some(vec![Flag::Seen]));
    let envelope = first.envelope().unwrap();
    assert_eq!(envelope.subject.as_deref(), Some(&b"Hello"[..]));
    assert_eq!(
        envelope.from.as_ref().unwrap()[0].email().as_deref(),
        Some("fred@example.com")
    );
    assert!(envelope.date.is_some());
    assert_eq!(
        first.section("BODY[]").unwrap().data.as_deref(),
        Some(&b"hello"[..])
    );
    assert_eq!(records[&12].flags(), Some(vec![]));

    assert_eq!(connection.logout().await.unwrap(), "logging out");
    assert_eq!(connection.state(), ConnectionState::Logout);

    let sent = String::from_utf8(connection.get_ref().sent_data().to_vec()).unwrap();
    assert_eq!(
        sent,
        "A0000 LOGIN fred hunter2\r\n\
         A0001 SELECT INBOX\r\n\
         A0002 UID SEARCH UNSEEN\r\n\
         A0003 UID FETCH 10,12 (UID FLAGS ENVELOPE BODY[])\r\n\
         A0004 LOGOUT\r\n"
    );
}

#[tokio::test]
async fn test_append_unicode_mailbox_with_literal() {
    let script: &[&[u8]] = &[
        b"* PREAUTH ready\r\n",
        b"+ Ready for literal data\r\n",
        b"A0000 OK [APPENDUID 38505 3955] APPEND completed\r\n",
    ];
    let mut connection = connect(script).await;

    let text = connection
        .append("Entwürfe", b"Subject: hi\r\n\r\nbody", &[Flag::Draft], None)
        .await
        .unwrap();
    assert_eq!(text, "[APPENDUID 38505 3955] APPEND completed");

    let sent = connection.into_inner().sent;
    assert_eq!(
        sent,
        b"A0000 APPEND Entw&APw-rfe (\\Draft) {19}\r\nSubject: hi\r\n\r\nbody\r\n".to_vec()
    );
}

#[tokio::test]
async fn test_idle_with_buffered_events() {
    let script: &[&[u8]] = &[
        b"* PREAUTH [CAPABILITY IMAP4rev1 IDLE] ready\r\n",
        b"A0000 OK SELECT completed\r\n",
        b"+ idling\r\n* 4 EXISTS\r\n* 1 RECENT\r\n",
        b"A0001 OK IDLE terminated\r\n",
    ];
    let mut connection = connect(script).await;

    connection
        .run_command("SELECT", &[Argument::mailbox("INBOX")])
        .await
        .unwrap();
    connection.idle().await.unwrap();

    let events = connection
        .idle_check(Some(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(events, vec![IdleEvent::Exists(4), IdleEvent::Recent(1)]);

    let (text, rest) = connection.idle_done().await.unwrap();
    assert_eq!(text, "IDLE terminated");
    assert!(rest.is_empty());

    let sent = String::from_utf8(connection.get_ref().sent_data().to_vec()).unwrap();
    assert_eq!(sent, "A0000 SELECT INBOX\r\nA0001 IDLE\r\nDONE\r\n");
}

#[tokio::test]
async fn test_rejected_command_keeps_connection_usable() {
    let script: &[&[u8]] = &[
        b"* OK ready\r\n",
        b"A0000 BAD unknown argument\r\n",
        b"A0001 OK NOOP completed\r\n",
    ];
    let mut connection = connect(script).await;

    let err = connection
        .run_command("CAPABILITY", &[Argument::raw("X")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::CommandRejected {
            status: Status::Bad,
            ..
        }
    ));
    assert!(connection.noop().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connection_closed_mid_command() {
    let mut connection = connect(&[&b"* OK ready\r\n"[..]]).await;

    let err = connection.noop().await.unwrap_err();
    assert!(err.is_transport());
    assert!(connection.is_poisoned());
}

#[test]
fn test_parse_response_public_api() {
    let chunks = [
        Chunk::with_literal("1 FETCH (RFC822 {11}", "Hello World"),
        Chunk::line(")"),
    ];
    assert_eq!(
        parse_response(&chunks).unwrap(),
        vec![
            Atom::Number(1),
            Atom::Text(b"FETCH".to_vec()),
            Atom::List(vec![
                Atom::Text(b"RFC822".to_vec()),
                Atom::Text(b"Hello World".to_vec()),
            ]),
        ]
    );
}

#[test]
fn test_utf7_public_api() {
    assert_eq!(utf7::encode("Sent"), b"Sent");
    assert_eq!(utf7::encode("Foo & Bar"), b"Foo &- Bar");
    assert_eq!(utf7::decode(b"Entw&APw-rfe").unwrap(), "Entwürfe");
}
