//! Error types for BriarDB.

use thiserror::Error;

/// Result type alias using BriarError.
pub type Result<T> = std::result::Result<T, BriarError>;

/// Errors that can occur in BriarDB operations.
#[derive(Debug, Error)]
pub enum BriarError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Buffer pool errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u64, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page still pinned: {page_id}")]
    PagePinned { page_id: u64 },

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let briar_err: BriarError = io_err.into();
        assert!(matches!(briar_err, BriarError::Io(_)));
        assert!(briar_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = BriarError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_page_corrupted_display() {
        let err = BriarError::PageCorrupted {
            page_id: 100,
            reason: "bad page type".to_string(),
        };
        assert_eq!(err.to_string(), "Page corrupted: 100, reason: bad page type");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = BriarError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_page_pinned_display() {
        let err = BriarError::PagePinned { page_id: 9 };
        assert_eq!(err.to_string(), "Page still pinned: 9");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = BriarError::InvalidParameter {
            name: "leaf_max_size".to_string(),
            value: "1".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: leaf_max_size = 1");
    }

    #[test]
    fn test_internal_error_display() {
        let err = BriarError::Internal("assertion failed".to_string());
        assert_eq!(err.to_string(), "Internal error: assertion failed");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(BriarError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BriarError>();
    }
}
