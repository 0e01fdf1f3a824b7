use std::io;
use thiserror::Error;

/// Every failure the NAR codec, reader and writer can report.
#[derive(Error, Debug)]
pub enum NarError {
    /// Header decoded fine but carries the wrong discriminator.
    #[error("invalid magic number: expected {expected:#018x}, received {received:#018x}")]
    InvalidMagicNumber { expected: u64, received: u64 },

    /// Fewer bytes than a fixed-size header were available.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    /// The stream cannot be a valid archive at `offset`.
    #[error("corrupt archive at offset {offset}: {reason}")]
    CorruptArchive { offset: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A content source ended before producing the declared `length_2`.
    #[error("content source produced {produced} of {declared} declared bytes")]
    ShortContent { declared: u64, produced: u64 },

    #[error("unsupported compression type {0}")]
    UnsupportedCompressionType(u64),

    /// The caller consumed more bytes than the current item spans.
    #[error("reader consumed {consumed} bytes of an item spanning {span}")]
    LogicError { consumed: u64, span: u64 },
}

impl NarError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        NarError::CorruptArchive { offset, reason: reason.into() }
    }

    /// Listing and extraction may move on to the next item after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NarError::UnsupportedCompressionType(_))
    }

    /// Flatten into an `io::Error` for `Read`/`Write` adapters.
    pub fn into_io(self) -> io::Error {
        match self {
            NarError::Io(e) => e,
            other           => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Process exit code used by the command-line tool.
    pub fn exit_code(&self) -> u8 {
        match self {
            NarError::Io(_)                         => 2,
            NarError::InvalidMagicNumber { .. }
            | NarError::ShortRead { .. }
            | NarError::CorruptArchive { .. }       => 3,
            NarError::ShortContent { .. }           => 4,
            NarError::UnsupportedCompressionType(_) => 5,
            NarError::LogicError { .. }             => 70,
        }
    }
}

pub type NarResult<T> = Result<T, NarError>;
