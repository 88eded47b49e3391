//! Error types for update stores.

/// Errors that can occur while reading or writing an update log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No log exists for this document. Call `create` first.
    #[error("no update log for document {0:?}")]
    DocumentNotFound(String),

    /// A log file exists but cannot be parsed.
    #[error("update log for {id:?} is corrupt: {reason}")]
    Corrupt {
        /// Document whose log is damaged.
        id: String,
        /// What the parser tripped over.
        reason: String,
    },

    /// A stored update was rejected by the CRDT engine.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// Underlying filesystem failure.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}
