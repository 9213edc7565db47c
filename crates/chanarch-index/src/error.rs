//! Error types for index decoding and traversal

use thiserror::Error;

/// Coarse classification of an [`IndexError`]
///
/// Callers that translate failures into user guidance ("archive unreadable,
/// use backup") match on the kind rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fewer bytes available than a field requires
    Truncated,
    /// Offset or instant outside representable bounds
    OutOfRange,
    /// Structurally invalid node
    CorruptNode,
    /// Fanout of zero or above the configured limit
    InvalidFanout,
    /// Query interval with `start > end`
    InvalidQuery,
    /// Node offsets form a loop
    CycleDetected,
    /// Traversal aborted by the caller
    Cancelled,
    /// Index header is not a supported archive index
    InvalidHeader,
    /// Channel name not present in the index directory
    ChannelNotFound,
    /// External sample block decoder failed
    SampleBlock,
    /// Underlying storage failure
    Io,
}

/// Index-specific error type
#[derive(Debug, Error)]
pub enum IndexError {
    /// A read needed more bytes than remain in the source
    #[error("truncated: need {needed} bytes at offset {offset:#x}, only {available} available")]
    Truncated {
        /// Position of the failed read
        offset: u64,
        /// Bytes the field requires
        needed: usize,
        /// Bytes left in the source from `offset`
        available: u64,
    },

    /// An offset points past the end of the source
    #[error("offset {offset:#x} is past the end of the source ({len} bytes)")]
    OffsetOutOfRange {
        /// Requested offset
        offset: u64,
        /// Source length
        len: u64,
    },

    /// An instant cannot be represented in the archive time encoding
    #[error("time out of range: {0}")]
    TimeOutOfRange(String),

    /// A node could not be decoded or violates a structural rule
    #[error("corrupt node at {offset:#x}: {reason}")]
    CorruptNode {
        /// Node offset
        offset: u64,
        /// What is wrong with it
        reason: String,
    },

    /// Fanout is zero or exceeds the configured maximum
    #[error("invalid fanout: {0}")]
    InvalidFanout(u32),

    /// Query start lies after query end
    #[error("invalid query: start {start} is after end {end}")]
    InvalidQuery {
        /// Formatted query start
        start: String,
        /// Formatted query end
        end: String,
    },

    /// A node offset was reached twice during one traversal
    #[error("cycle detected: node {offset:#x} revisited after {visited} node visits")]
    CycleDetected {
        /// Offset that was seen before
        offset: u64,
        /// Nodes visited before the revisit
        visited: usize,
    },

    /// The caller's cancel flag was raised
    #[error("traversal cancelled after {visited} node visits")]
    Cancelled {
        /// Nodes visited before cancellation
        visited: usize,
    },

    /// Index file does not start with the expected magic
    #[error("bad magic {0:02x?}: not a channel archive index")]
    BadMagic([u8; 4]),

    /// Index header version is not supported
    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    /// Time resolution in the header cannot be used
    #[error("invalid time resolution: {0} ticks per second")]
    InvalidTimeResolution(u32),

    /// Header could not be parsed
    #[error("malformed index header: {0}")]
    MalformedHeader(String),

    /// Channel not listed in the index
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Sample block decoder failure at a data offset
    #[error("failed to decode sample block at {offset:#x}: {source}")]
    SampleBlock {
        /// Data block offset handed to the decoder
        offset: u64,
        /// Decoder error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error from the backing source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Classify this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Truncated { .. } => ErrorKind::Truncated,
            Self::OffsetOutOfRange { .. } | Self::TimeOutOfRange(_) => ErrorKind::OutOfRange,
            Self::CorruptNode { .. } => ErrorKind::CorruptNode,
            Self::InvalidFanout(_) => ErrorKind::InvalidFanout,
            Self::InvalidQuery { .. } => ErrorKind::InvalidQuery,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::BadMagic(_)
            | Self::UnsupportedVersion(_)
            | Self::InvalidTimeResolution(_)
            | Self::MalformedHeader(_) => ErrorKind::InvalidHeader,
            Self::ChannelNotFound(_) => ErrorKind::ChannelNotFound,
            Self::SampleBlock { .. } => ErrorKind::SampleBlock,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptNode {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<binrw::Error> for IndexError {
    fn from(err: binrw::Error) -> Self {
        // Header validation reports through binrw's custom error slot
        match err.custom_err::<Self>() {
            Some(Self::BadMagic(magic)) => return Self::BadMagic(*magic),
            Some(Self::UnsupportedVersion(v)) => return Self::UnsupportedVersion(*v),
            Some(Self::MalformedHeader(msg)) => return Self::MalformedHeader(msg.clone()),
            _ => {}
        }
        match err {
            binrw::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Self::MalformedHeader(format!("truncated header: {e}"))
            }
            binrw::Error::Io(e) => Self::Io(e),
            other => Self::MalformedHeader(other.to_string()),
        }
    }
}

/// Result type for index operations
pub type Result<T> = std::result::Result<T, IndexError>;
