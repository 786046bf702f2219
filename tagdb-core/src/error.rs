//! Error types for tagdb

use thiserror::Error;

/// Result type alias for tagdb operations
pub type Result<T> = std::result::Result<T, TagDbError>;

/// tagdb error types
#[derive(Error, Debug)]
pub enum TagDbError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed tag string or tag expression
    #[error("Parse error: {0}")]
    Parse(String),

    /// Encoded block payload could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Durable store transaction failed
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// WAL recovery error
    #[error("WAL recovery error: {0}")]
    WalRecovery(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TagDbError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, TagDbError::Io(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TagDbError::Corruption(_) | TagDbError::ChecksumMismatch { .. }
        )
    }

    /// Check if error was caused by caller input
    pub fn is_parse(&self) -> bool {
        matches!(self, TagDbError::Parse(_))
    }
}

impl From<bincode::Error> for TagDbError {
    fn from(err: bincode::Error) -> Self {
        TagDbError::InvalidFormat(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TagDbError::Corruption("truncated".into()).is_corruption());
        assert!(TagDbError::ChecksumMismatch { expected: 1, actual: 2 }.is_corruption());
        assert!(TagDbError::Io(std::io::Error::other("reset")).is_retryable());
        assert!(!TagDbError::Parse("bad".into()).is_retryable());
        assert!(TagDbError::Parse("bad".into()).is_parse());
    }
}
