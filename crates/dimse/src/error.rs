//! Error types for DIMSE operations

use thiserror::Error;

/// Result type alias for DIMSE operations
pub type Result<T> = std::result::Result<T, DimseError>;

/// Error types that can occur while serving an association
#[derive(Error, Debug)]
pub enum DimseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("DICOM parsing error: {0}")]
    DicomParsing(String),

    #[error("DICOM encoding error: {0}")]
    DicomEncoding(String),

    #[error("DICOM UL error: {0}")]
    DicomUl(String),

    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Unknown presentation context: {0}")]
    UnknownPresentationContext(u8),

    #[error("Malformed command set: {0}")]
    MalformedCommand(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DimseError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new parsing error
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::DicomParsing(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::DicomEncoding(msg.into())
    }

    /// Create a new upper layer error
    pub fn ul(msg: impl Into<String>) -> Self {
        Self::DicomUl(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error only concerns the current message, so the
    /// association can keep going after a failure response.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DimseError::DicomParsing(_)
                | DimseError::UnsupportedTransferSyntax(_)
                | DimseError::UnknownPresentationContext(_)
                | DimseError::MalformedCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(DimseError::parsing("bad dataset").is_recoverable());
        assert!(DimseError::UnknownPresentationContext(3).is_recoverable());
        assert!(!DimseError::ul("peer aborted").is_recoverable());
        assert!(!DimseError::Network(std::io::Error::other("reset")).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = DimseError::MalformedCommand("missing CommandField".into());
        assert_eq!(err.to_string(), "Malformed command set: missing CommandField");
    }
}
