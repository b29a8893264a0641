//! Crate-level error type.
//!
//! Each decoder has its own error enum. [`Error`] wraps them for callers that
//! handle both formats, and [`ErrorKind`] sorts every failure into one of
//! three classes.

use thiserror::Error;

use crate::formats::pe::PeError;
use crate::formats::zip::ZipError;
use crate::io::error::IoError;

/// Broad failure class shared by all decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The byte source failed.
    Io,
    /// The bytes do not form a valid structure.
    Format,
    /// A configured cap was hit; the input may be fine.
    LimitExceeded,
}

/// Main error type for binmeta operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error("PE: {0}")]
    Pe(#[from] PeError),

    #[error("ZIP: {0}")]
    Zip(#[from] ZipError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(e) => e.kind(),
            Error::Pe(e) => e.kind(),
            Error::Zip(e) => e.kind(),
        }
    }
}

/// Result type alias for binmeta operations
pub type Result<T> = std::result::Result<T, Error>;
