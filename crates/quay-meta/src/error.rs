//! Error types for the record stores.

/// Errors returned by [`RecordStore`](crate::RecordStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. creating a temporary database directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// The backend refused the write.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}
