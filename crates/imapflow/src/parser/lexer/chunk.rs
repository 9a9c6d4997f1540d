//! Response chunks as read off the wire.

/// One line of a server response, with the literal it announced.
///
/// The line has its CRLF stripped. When it ends with a `{N}` marker, the
/// `N` bytes that followed on the wire are carried in `literal`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    /// Line text without the trailing CRLF.
    pub line: Vec<u8>,
    /// Literal payload announced at the end of `line`.
    pub literal: Option<Vec<u8>>,
}

impl Chunk {
    /// Creates a chunk without a literal.
    #[must_use]
    pub fn line(line: impl Into<Vec<u8>>) -> Self {
        Self {
            line: line.into(),
            literal: None,
        }
    }

    /// Creates a chunk whose line announces `literal`.
    #[must_use]
    pub fn with_literal(line: impl Into<Vec<u8>>, literal: impl Into<Vec<u8>>) -> Self {
        Self {
            line: line.into(),
            literal: Some(literal.into()),
        }
    }

    /// Number of bytes the chunk accounts for in position reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.line.len() + self.literal.as_ref().map_or(0, Vec::len)
    }

    /// Returns true if the chunk has neither text nor literal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
