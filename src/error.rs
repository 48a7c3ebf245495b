//! Error types for Chatkeep
//!
//! This module defines all error types used throughout the snapshot
//! pipeline, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Chatkeep operations
///
/// Benign outcomes (no resolvable chat, empty chat, duplicate snapshot) are
/// not errors; they are reported through
/// [`CaptureOutcome::Skipped`](crate::capture::CaptureOutcome::Skipped).
#[derive(Error, Debug)]
pub enum ChatkeepError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot storage errors (connection, transaction, or codec failure)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Every copy strategy failed for a payload
    #[error("Copy failed: {0}")]
    CopyFailed(String),

    /// The offload worker crashed or its channel closed
    #[error("Copy offload fault: {0}")]
    OffloadFault(String),

    /// The offload worker did not answer a request in time
    #[error("Copy offload timed out: request={id}, after {timeout_ms}ms")]
    OffloadTimeout {
        /// Correlation id of the abandoned request
        id: u64,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// A chat key string could not be parsed
    #[error("Invalid chat key: {0}")]
    InvalidChatKey(String),

    /// No snapshot stored under the requested key
    #[error("Snapshot not found: {chat_key}@{timestamp}")]
    SnapshotNotFound {
        /// Chat key of the missing snapshot
        chat_key: String,
        /// Timestamp of the missing snapshot
        timestamp: i64,
    },

    /// Restore could not select or verify the target session
    #[error("Restore target mismatch: {0}")]
    RestoreMismatch(String),

    /// Restore failed while writing content into the new session
    #[error("Restore injection failed: {0}")]
    RestoreInjection(String),

    /// A capture or restore already holds the single-flight flag
    #[error("Another backup operation is in progress")]
    Busy,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Chatkeep operations
///
/// Uses `anyhow::Error` so call sites can attach context; classify failures
/// with `err.downcast_ref::<ChatkeepError>()`.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ChatkeepError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_storage_error_display() {
        let error = ChatkeepError::Storage("database connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Storage error: database connection failed"
        );
    }

    #[test]
    fn test_offload_timeout_display() {
        let error = ChatkeepError::OffloadTimeout {
            id: 7,
            timeout_ms: 250,
        };
        let s = error.to_string();
        assert!(s.contains("request=7"));
        assert!(s.contains("250ms"));
    }

    #[test]
    fn test_snapshot_not_found_display() {
        let error = ChatkeepError::SnapshotNotFound {
            chat_key: "character:0:main".to_string(),
            timestamp: 42,
        };
        assert_eq!(
            error.to_string(),
            "Snapshot not found: character:0:main@42"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ChatkeepError = io_error.into();
        assert!(matches!(error, ChatkeepError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ChatkeepError = json_error.into();
        assert!(matches!(error, ChatkeepError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: ChatkeepError = yaml_error.into();
        assert!(matches!(error, ChatkeepError::Yaml(_)));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let result: Result<()> = Err(ChatkeepError::CopyFailed("both".to_string()).into());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatkeepError>(),
            Some(ChatkeepError::CopyFailed(_))
        ));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatkeepError>();
    }
}
