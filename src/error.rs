//! Error type shared by the honeypot components

use thiserror::Error;

/// Result type alias for honeypot operations
pub type Result<T> = std::result::Result<T, HoneypotError>;

/// Internal failures. None of them is allowed to reach a peer; the
/// responder degrades to a minimal reply and logs them instead.
#[derive(Debug, Error)]
pub enum HoneypotError {
    #[error("DICOM object error: {0}")]
    Dicom(String),

    #[error("record is missing {0}")]
    MissingAttribute(&'static str),

    #[error("duplicate record id {0}")]
    DuplicateRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HoneypotError {
    pub fn dicom(err: impl std::fmt::Display) -> Self {
        Self::Dicom(err.to_string())
    }
}
