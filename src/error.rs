//! Error types for threadstore

use thiserror::Error;

/// Result type alias for threadstore operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Main error type for threadstore
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Search on '{collection}' failed: {source}")]
    Search {
        collection: String,
        #[source]
        source: Box<HistoryError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HistoryError {
    /// Wrap a failure raised while searching one collection
    pub fn search(collection: impl Into<String>, source: HistoryError) -> Self {
        HistoryError::Search {
            collection: collection.into(),
            source: Box::new(source),
        }
    }

    /// Check if error is retryable.
    ///
    /// Nothing in the crate retries on its own; callers decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            HistoryError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            HistoryError::Storage(_) | HistoryError::Io(_) => true,
            HistoryError::Search { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error means the addressed document does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HistoryError::NotFound(_) | HistoryError::ConversationNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_error_keeps_cause() {
        let err = HistoryError::search("messages", HistoryError::Storage("offline".into()));
        assert!(err.to_string().contains("messages"));
        assert!(err.to_string().contains("offline"));
        assert!(err.is_retryable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(HistoryError::ConversationNotFound("abc".into()).is_not_found());
        assert!(HistoryError::NotFound("msg_1".into()).is_not_found());
        assert!(!HistoryError::Conflict("dup".into()).is_not_found());
        assert!(!HistoryError::InvalidInput("bad".into()).is_retryable());
    }
}
