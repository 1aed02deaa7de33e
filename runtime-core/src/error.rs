//! Error types for runtime-core

use thiserror::Error;

/// Result type alias for runtime-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime-core
#[derive(Debug, Error)]
pub enum Error {
    /// Null or malformed input to a send/return call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Property bag inconsistent with the declared schema
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Numeric property read with a non-representable target type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Call on an env handle whose extension has deinited
    #[error("The env handle is closed: {0}")]
    EnvClosed(String),

    /// Outstanding command expired in the path table sweep
    #[error("Path timeout.")]
    PathTimeout,

    /// Incoming message addressed an unknown graph id
    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    /// Remote app could not be reached
    #[error("Failed to connect to {0}")]
    ConnectionFailed(String),

    /// Destination extension does not exist in the graph
    #[error("Extension invalid: {0}")]
    ExtensionInvalid(String),

    /// Graph definition parsing or validation error
    #[error("Invalid graph: {0}")]
    Graph(String),

    /// Wire encode/decode failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Numeric error taxonomy carried on error results (`code` property).
///
/// The originating extension's result handler inspects this to distinguish
/// routing failures from user-level errors; intermediate hops see the error
/// as a normal backward result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorKind {
    InvalidArgument = 1,
    SchemaViolation = 2,
    TypeMismatch = 3,
    EnvClosed = 4,
    PathTimeout = 5,
    GraphNotFound = 6,
    ConnectionFailed = 7,
    ExtensionInvalid = 8,
    Graph = 9,
    Codec = 10,
    Io = 11,
    Json = 12,
}

impl Error {
    /// The taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::SchemaViolation(_) => ErrorKind::SchemaViolation,
            Error::TypeMismatch(_) => ErrorKind::TypeMismatch,
            Error::EnvClosed(_) => ErrorKind::EnvClosed,
            Error::PathTimeout => ErrorKind::PathTimeout,
            Error::GraphNotFound(_) => ErrorKind::GraphNotFound,
            Error::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Error::ExtensionInvalid(_) => ErrorKind::ExtensionInvalid,
            Error::Graph(_) => ErrorKind::Graph,
            Error::Codec(_) => ErrorKind::Codec,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }
}

impl ErrorKind {
    /// Wire representation.
    pub fn code(self) -> i32 {
        self as i32
    }
}
