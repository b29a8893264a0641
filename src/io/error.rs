//! Custom error types for the I/O module.

use crate::error::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("File size of {found} bytes exceeds the maximum allowed size of {limit} bytes.")]
    FileTooLarge { limit: u64, found: u64 },

    #[error(
        "A read operation would exceed the total read limit of {limit} bytes. (already read: {current})"
    )]
    ReadLimitExceeded { limit: u64, current: u64 },

    #[error("Unexpected end of data at offset {offset:#x}: wanted {wanted} bytes, got {got}")]
    UnexpectedEof { offset: u64, wanted: usize, got: usize },

    #[error("An underlying I/O error occurred: {0}")]
    StdIo(#[from] std::io::Error),
}

impl IoError {
    /// A short read is an I/O failure; bounds failures inside bytes already
    /// read are reported by the format decoders instead.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileTooLarge { .. } | Self::ReadLimitExceeded { .. } => {
                ErrorKind::LimitExceeded
            }
            Self::UnexpectedEof { .. } => ErrorKind::Io,
            Self::StdIo(e) => match e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<IoError>())
            {
                Some(inner) => inner.kind(),
                None => ErrorKind::Io,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, IoError>;
