//! # imapflow
//!
//! The wire-protocol core of an IMAP4 client: a response lexer and parser,
//! FETCH interpretation, command framing with literal handling, the
//! modified UTF-7 mailbox codec and the IDLE state machine.
//!
//! ## Features
//!
//! - **Literal-aware lexing**: responses arrive as chunks of text, each
//!   optionally followed by the literal it announced; literals are spliced
//!   back into the token stream where their `{N}` marker sat
//! - **Typed FETCH records**: ENVELOPE, BODYSTRUCTURE, INTERNALDATE, UID and
//!   sections decoded into structured values, keyed by UID or sequence number
//! - **Command framing**: arguments become atoms, quoted strings or literals;
//!   synchronizing literals wait for the server's continuation, LITERAL+
//!   servers get `{N+}`
//! - **IDLE with timeouts**: poll for pushed responses without blocking the
//!   caller's event loop
//! - **TLS via rustls**: Secure connections without OpenSSL dependency
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use imapflow::{Argument, Config, Security, connect};
//!
//! #[tokio::main]
//! async fn main() -> imapflow::Result<()> {
//!     let config = Config::builder("imap.example.com")
//!         .security(Security::Implicit)
//!         .build();
//!     let mut connection = connect(&config).await?;
//!
//!     connection.login("user@example.com", "password").await?;
//!     connection
//!         .run_command("SELECT", &[Argument::mailbox("INBOX")])
//!         .await?;
//!
//!     let unseen = connection.search(&[Argument::raw("UNSEEN")], None).await?;
//!     let records = connection
//!         .fetch(&unseen.ids, &["FLAGS", "ENVELOPE"], &[])
//!         .await?;
//!     for (uid, record) in &records {
//!         let subject = record.envelope().and_then(|e| e.subject.clone());
//!         println!("{uid}: {subject:?}");
//!     }
//!
//!     connection.idle().await?;
//!     let events = connection.idle_check(Some(Duration::from_secs(30))).await?;
//!     let (_, more) = connection.idle_done().await?;
//!     println!("{} events", events.len() + more.len());
//!
//!     connection.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! Every command is checked against the state the connection is in before
//! anything is sent:
//!
//! ```text
//! NotAuthenticated ── LOGIN / AUTHENTICATE ──→ Authenticated
//! Authenticated    ── SELECT / EXAMINE ──────→ Selected
//! Selected         ── CLOSE / UNSELECT ──────→ Authenticated
//! any              ── LOGOUT ────────────────→ Logout
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Argument model, command framing and the command table
//! - [`connection`]: Configuration, streams and the command/response loop
//! - [`datetime`]: INTERNALDATE and RFC 2822 date handling
//! - [`parser`]: Sans-I/O lexer, response parser and FETCH interpreter
//! - [`types`]: Capabilities, flags and protocol states
//! - [`utf7`]: Modified UTF-7 mailbox names

#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
pub mod datetime;
mod error;
pub mod parser;
pub mod types;
pub mod utf7;

pub use command::{Argument, EncodedCommand, PendingLiteral, TagGenerator};
pub use connection::{
    CommandResponse, Config, ConfigBuilder, Connection, ConnectionOptions, FramedStream,
    ImapStream, Security, connect,
};
pub use error::{CapabilityError, Error, Result};
pub use parser::{
    Atom, Chunk, Envelope, FetchRecord, FetchValue, IdleEvent, Response, SearchIds, Token,
    parse_fetch_response, parse_message_list, parse_response,
};
pub use types::{Capability, ConnectionState, Flag, IdleState, Status};
pub use utf7::MailboxName;
