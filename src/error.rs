//! Error types for bamcore

use crate::io::bam::error::DecodeError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bamcore operations
pub type Result<T> = std::result::Result<T, BamError>;

/// Error types that can occur in bamcore
#[derive(Debug, Error)]
pub enum BamError {
    /// Input file does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Bad magic bytes or malformed BAM header
    #[error("Invalid BAM header: {0}")]
    InvalidHeader(String),

    /// BGZF block could not be decompressed
    #[error("Corrupt BGZF block at offset {offset}: {reason}")]
    CorruptBlock {
        /// Compressed file offset of the block
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Structural failure while decoding or encoding a record
    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] DecodeError),

    /// Malformed BAI index
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    /// Operation on a reader that has been closed
    #[error("Operation on closed handle")]
    ClosedHandle,

    /// Region query without a loaded index
    #[error("No index loaded; load or build one before querying regions")]
    MissingIndex,

    /// Reference name absent from the header
    #[error("Reference '{0}' not found in header")]
    UnknownReference(String),

    /// Invalid range or region
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl BamError {
    pub(crate) fn corrupt_block(offset: u64, reason: impl Into<String>) -> Self {
        BamError::CorruptBlock {
            offset,
            reason: reason.into(),
        }
    }
}

// A BamError that travelled through `std::io::Read` comes back out typed.
impl From<io::Error> for BamError {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<BamError>()) {
            let kind = err.kind();
            return match err.into_inner().map(|inner| inner.downcast::<BamError>()) {
                Some(Ok(bam)) => *bam,
                Some(Err(other)) => BamError::Io(io::Error::new(kind, other)),
                None => BamError::Io(io::Error::from(kind)),
            };
        }
        BamError::Io(err)
    }
}

impl From<BamError> for io::Error {
    fn from(err: BamError) -> Self {
        match err {
            BamError::Io(io_err) => io_err,
            BamError::FileNotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
