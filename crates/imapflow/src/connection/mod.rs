//! IMAP connection management.
//!
//! This module provides connection handling for IMAP servers, including:
//! - Configuration (host, port, security mode, protocol options)
//! - TLS/plaintext stream abstraction
//! - Framed I/O for the IMAP wire format
//! - The command/response loop over any async stream
//! - IDLE support for real-time notifications

mod client;
mod config;
mod framed;
mod idle;
mod stream;

pub use client::{CommandResponse, Connection};
pub use config::{Config, ConfigBuilder, ConnectionOptions, Security};
pub use framed::FramedStream;
pub use stream::{ImapStream, connect, create_tls_connector};
