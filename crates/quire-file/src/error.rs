//! Error types for the file layer.

/// Errors that can occur while loading or saving a document's file.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// The file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The file index has no path for this id.
    #[error("no path indexed for file id {0:?}")]
    UnknownFileId(String),

    /// The path is absolute or escapes the content root.
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// The file changed on disk since it was last read. The caller must
    /// reconcile before writing.
    #[error("file changed on disk since it was last read")]
    OutOfBandChanges,

    /// The requested content format is not supported.
    #[error("unsupported format {0:?}")]
    UnsupportedFormat(String),

    /// A file that must be UTF-8 is not.
    #[error("file {0} is not valid utf-8")]
    NotUtf8(String),

    /// Underlying filesystem failure.
    #[error("file i/o error: {0}")]
    Io(#[from] std::io::Error),
}
