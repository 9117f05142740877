use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Error kinds surfaced by the coordination store.
///
/// Benign races (`NotFound` on a concurrent delete, `KeyExists` on a
/// concurrent create) carry their own variants so that callers can match on
/// them instead of string-inspecting a catch-all error.
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

impl From<etcd_client::Error> for CoordinationError {
    fn from(err: etcd_client::Error) -> Self {
        CoordinationError::Backend(err.to_string())
    }
}
