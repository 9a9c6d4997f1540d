//! Framed I/O for the IMAP wire format.
//!
//! Server output is a sequence of CRLF-terminated lines, each of which may
//! announce a `{N}` literal that follows the line. A response is complete
//! once a line without a literal marker has been read. Reading and framing
//! are kept apart: bytes accumulate in one buffer, and complete responses
//! are cut out of it without touching the socket.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::parser::Chunk;
use crate::{Error, Result};

/// Default buffer growth per read.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Buffered IMAP stream that yields whole responses as chunks.
pub struct FramedStream<S> {
    stream: S,
    buffer: BytesMut,
    framer: Framer,
    /// A complete response framed by a readiness check.
    ready: Option<Vec<Chunk>>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            framer: Framer::default(),
            ready: None,
        }
    }

    /// Removes one complete response from the buffer, if there is one.
    ///
    /// Never reads from the stream.
    pub fn try_parse_response(&mut self) -> Result<Option<Vec<Chunk>>> {
        if let Some(chunks) = self.ready.take() {
            return Ok(Some(chunks));
        }
        let Some(chunks) = self.framer.next_response(&mut self.buffer)? else {
            return Ok(None);
        };
        if let Some(first) = chunks.first() {
            trace!(line = %String::from_utf8_lossy(&first.line), "S:");
        }
        Ok(Some(chunks))
    }

    /// Reads a complete response, waiting for as many reads as it needs.
    pub async fn read_response(&mut self) -> Result<Vec<Chunk>> {
        loop {
            if let Some(chunks) = self.try_parse_response()? {
                return Ok(chunks);
            }
            self.fill().await?;
        }
    }

    /// Waits until the stream has something to deliver.
    ///
    /// Returns true at once if a complete response is already buffered,
    /// otherwise true once new bytes arrive and false if `timeout` elapses
    /// first. `None` waits indefinitely; a zero timeout polls the stream
    /// exactly once. Bytes read before a timeout stay in the buffer.
    pub async fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.ready.is_none() {
            self.ready = self.try_parse_response()?;
        }
        if self.ready.is_some() {
            return Ok(true);
        }
        match timeout {
            None => self.fill().await.map(|()| true),
            Some(limit) => match tokio::time::timeout(limit, self.fill()).await {
                Ok(filled) => filled.map(|()| true),
                Err(_) => Ok(false),
            },
        }
    }

    /// Removes every complete response from the buffer.
    ///
    /// A trailing partial response stays buffered for the next read.
    pub fn take_buffered(&mut self) -> Result<Vec<Vec<Chunk>>> {
        let mut responses = Vec::new();
        while let Some(chunks) = self.try_parse_response()? {
            responses.push(chunks);
        }
        Ok(responses)
    }

    /// Returns true if unread bytes are buffered.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty() || !self.framer.partial.is_empty() || self.ready.is_some()
    }

    /// Writes `data` and flushes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Gets a reference to the underlying stream.
    pub const fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Gets a mutable reference to the underlying stream.
    pub const fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Any buffered data is lost; check [`Self::has_buffered`] first.
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn fill(&mut self) -> Result<()> {
        self.buffer.reserve(DEFAULT_BUFFER_SIZE);
        // read_buf is cancel safe, so a timed-out wait loses no bytes.
        let n = self.stream.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }
        Ok(())
    }
}

/// Cuts responses off the front of a read buffer as their bytes arrive.
///
/// Lines and literals are split out of the buffer once complete, so each
/// byte is copied once and searched for CRLF once.
#[derive(Debug, Default)]
struct Framer {
    /// Chunks of the response being assembled.
    partial: Vec<Chunk>,
    /// Bytes at the front of the buffer already searched for CRLF.
    scanned: usize,
}

impl Framer {
    /// Returns the next complete response, or `None` if more bytes are
    /// needed.
    fn next_response(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Chunk>>> {
        loop {
            let Some(end) = find_crlf(buf, self.scanned) else {
                if buf.len() > MAX_LINE_LENGTH {
                    return Err(Error::Protocol("line too long".to_string()));
                }
                // The last byte may be a CR whose LF has not arrived yet.
                self.scanned = buf.len().saturating_sub(1);
                return Ok(None);
            };
            if end > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }

            let literal_len = parse_literal_length(&buf[..end]);
            if let Some(len) = literal_len {
                if len > MAX_LITERAL_SIZE {
                    return Err(Error::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                if buf.len() - (end + 2) < len {
                    self.scanned = end;
                    return Ok(None);
                }
            }

            let line = buf.split_to(end + 2);
            let line = &line[..end];
            self.scanned = 0;
            match literal_len {
                Some(len) => {
                    let literal = buf.split_to(len);
                    self.partial.push(Chunk::with_literal(line, &literal[..]));
                }
                None => {
                    self.partial.push(Chunk::line(line));
                    return Ok(Some(std::mem::take(&mut self.partial)));
                }
            }
        }
    }
}

/// Finds the position of CRLF in `buf`, searching from `from`.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| pos + from)
}

/// Parses a literal length from the end of a line, CRLF already removed.
///
/// Literals are in the format `{123}` or `{123+}`.
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let digits = &inner[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
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
    use tokio_test::io::Builder;

    fn frame(framer: &mut Framer, buf: &mut BytesMut) -> Option<Vec<Chunk>> {
        framer.next_response(buf).unwrap()
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n", 0), Some(5));
        assert_eq!(find_crlf(b"\r\n", 0), Some(0));
        assert_eq!(find_crlf(b"no crlf", 0), None);
        assert_eq!(find_crlf(b"a\rb\r\n", 0), Some(3));
        assert_eq!(find_crlf(b"a\r\nb\r\n", 2), Some(4));
        assert_eq!(find_crlf(b"ab", 5), None);
    }

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"* 1 FETCH (BODY[] {123}"), Some(123));
        assert_eq!(parse_literal_length(b"{0}"), Some(0));
        assert_eq!(parse_literal_length(b"A1 APPEND {5+}"), Some(5));
        assert_eq!(parse_literal_length(b"* OK done"), None);
        assert_eq!(parse_literal_length(b"* OK {abc}"), None);
        assert_eq!(parse_literal_length(b"* OK {}"), None);
        assert_eq!(parse_literal_length(b"* OK {12} trailing"), None);
    }

    #[test]
    fn test_framer_needs_more() {
        let mut framer = Framer::default();
        let mut buf = BytesMut::from(&b"* OK partial"[..]);
        assert!(frame(&mut framer, &mut buf).is_none());
        assert_eq!(framer.scanned, buf.len() - 1);

        let mut framer = Framer::default();
        let mut buf = BytesMut::from(&b"* 1 FETCH (BODY[] {5}\r\nab"[..]);
        assert!(frame(&mut framer, &mut buf).is_none());

        let mut framer = Framer::default();
        let mut buf = BytesMut::from(&b"* 1 FETCH (BODY[] {5}\r\nabcde"[..]);
        assert!(frame(&mut framer, &mut buf).is_none());
        // The literal is cut out; only the closing line is still missing.
        assert_eq!(framer.partial.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_framer_literal_response() {
        let mut framer = Framer::default();
        let mut buf = BytesMut::from(&b"* 1 FETCH (BODY[] {5}\r\nab\r\nc)\r\nA1 OK\r\n"[..]);
        assert_eq!(
            frame(&mut framer, &mut buf).unwrap(),
            vec![
                Chunk::with_literal(&b"* 1 FETCH (BODY[] {5}"[..], &b"ab\r\nc"[..]),
                Chunk::line(&b")"[..]),
            ]
        );
        assert_eq!(&buf[..], b"A1 OK\r\n");
        assert_eq!(
            frame(&mut framer, &mut buf).unwrap(),
            vec![Chunk::line(&b"A1 OK"[..])]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_framer_resumes_where_it_stopped() {
        let mut framer = Framer::default();
        let mut buf = BytesMut::from(&b"* 1 FETCH (BODY[] {11}\r\nHello"[..]);
        assert!(frame(&mut framer, &mut buf).is_none());
        assert_eq!(framer.scanned, 22);

        buf.extend_from_slice(b" World)\r");
        assert!(frame(&mut framer, &mut buf).is_none());
        assert_eq!(framer.partial.len(), 1);
        assert_eq!(framer.scanned, 1);
        assert_eq!(&buf[..], b")\r");

        buf.extend_from_slice(b"\n");
        assert_eq!(
            frame(&mut framer, &mut buf).unwrap(),
            vec![
                Chunk::with_literal(&b"* 1 FETCH (BODY[] {11}"[..], &b"Hello World"[..]),
                Chunk::line(&b")"[..]),
            ]
        );
        assert!(framer.partial.is_empty());
    }

    #[test]
    fn test_line_too_long() {
        let mut buf = BytesMut::from(&vec![b'a'; MAX_LINE_LENGTH + 1][..]);
        assert!(matches!(
            Framer::default().next_response(&mut buf),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_literal_too_large() {
        let line = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mut buf = BytesMut::from(line.as_bytes());
        assert!(matches!(
            Framer::default().next_response(&mut buf),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_simple_response() {
        let mock = Builder::new().read(b"* OK IMAP4rev1 ready\r\n").build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, vec![Chunk::line(&b"* OK IMAP4rev1 ready"[..])]);
    }

    #[tokio::test]
    async fn test_read_literal_split_across_reads() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[] {11}\r\n")
            .read(b"Hello")
            .read(b" World)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(
            response,
            vec![
                Chunk::with_literal(&b"* 1 FETCH (BODY[] {11}"[..], &b"Hello World"[..]),
                Chunk::line(&b")"[..]),
            ]
        );
    }

    #[tokio::test]
    async fn test_two_responses_in_one_read() {
        let mock = Builder::new().read(b"* 3 EXISTS\r\nA1 OK done\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(
            framed.read_response().await.unwrap(),
            vec![Chunk::line(&b"* 3 EXISTS"[..])]
        );
        assert!(framed.has_buffered());
        assert_eq!(
            framed.read_response().await.unwrap(),
            vec![Chunk::line(&b"A1 OK done"[..])]
        );
        assert!(!framed.has_buffered());
    }

    #[tokio::test]
    async fn test_eof_is_io_error() {
        let mock = Builder::new().read(b"* OK incompl").build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_take_buffered_keeps_partial() {
        let mock = Builder::new()
            .read(b"* 1 EXISTS\r\n* 2 EXPUNGE\r\n* 3 REC")
            .build();
        let mut framed = FramedStream::new(mock);

        assert!(framed.wait_readable(None).await.unwrap());
        let responses = framed.take_buffered().unwrap();
        assert_eq!(
            responses,
            vec![
                vec![Chunk::line(&b"* 1 EXISTS"[..])],
                vec![Chunk::line(&b"* 2 EXPUNGE"[..])],
            ]
        );
        assert!(framed.has_buffered());
        assert!(framed.take_buffered().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_readable_times_out() {
        let mock = Builder::new()
            .wait(Duration::from_secs(10))
            .read(b"* 4 EXISTS\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        assert!(
            !framed
                .wait_readable(Some(Duration::from_secs(1)))
                .await
                .unwrap()
        );
        assert!(
            framed
                .wait_readable(Some(Duration::from_secs(30)))
                .await
                .unwrap()
        );
        assert_eq!(
            framed.take_buffered().unwrap(),
            vec![vec![Chunk::line(&b"* 4 EXISTS"[..])]]
        );
    }

    #[tokio::test]
    async fn test_wait_readable_with_buffered_response() {
        let mock = Builder::new().read(b"* 1 EXISTS\r\n* 2 EXISTS\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed.read_response().await.unwrap();
        assert!(framed.wait_readable(Some(Duration::ZERO)).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_all() {
        let mock = Builder::new().write(b"A0001 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed.write_all(b"A0001 NOOP\r\n").await.unwrap();
    }
}
