//! IMAP protocol parser.
//!
//! This module provides a sans-I/O parser for IMAP server responses. It
//! works on [`Chunk`]s, the lines of one response together with the
//! literals they announced, as produced by the transport.
//!
//! # Architecture
//!
//! - **Lexer**: Tokenizes chunks into parens, brackets, atoms, quoted strings
//!   and literals
//! - **Response Parser**: Builds a tree of [`Atom`]s from tokens
//! - **Fetch Interpreter**: Decodes FETCH fields into [`FetchRecord`]s
//!
//! # Example
//!
//! ```
//! use imapflow::parser::{Atom, Chunk, parse_response};
//!
//! let chunks = [
//!     Chunk::with_literal("1 (RFC822 {11}", "Hello World"),
//!     Chunk::line(")"),
//! ];
//! let atoms = parse_response(&chunks).unwrap();
//!
//! assert_eq!(atoms[0], Atom::Number(1));
//! assert_eq!(
//!     atoms[1],
//!     Atom::List(vec![
//!         Atom::Text(b"RFC822".to_vec()),
//!         Atom::Text(b"Hello World".to_vec()),
//!     ])
//! );
//! ```

pub mod lexer;
pub mod response;

pub use lexer::{Chunk, Lexeme, Lexer, Token, tokenize};
pub use response::{
    Address, Atom, BodyData, BodySection, Envelope, FetchOptions, FetchRecord, FetchValue,
    IdleEvent, Response, SearchIds, TaggedResponse, UntaggedResponse, parse_fetch_response,
    parse_message_list, parse_response,
};

pub(crate) use response::capability_code;
