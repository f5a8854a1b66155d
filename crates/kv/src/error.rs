//! Error types for the key-value boundary.

use snafu::Snafu;

/// Result type for key-value operations.
pub type Result<T, E = KvError> = std::result::Result<T, E>;

/// Errors surfaced by the transactional key-value engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KvError {
    /// An insert hit an existing key.
    #[snafu(display("duplicate key value, violates key constraint"))]
    DuplicateKey,

    /// The key does not exist.
    #[snafu(display("key not found"))]
    KeyNotFound,

    /// The transaction exceeded the engine's maximum duration (5 seconds
    /// for the production engine). Streaming readers recover from this by
    /// restarting from the last emitted key.
    #[snafu(display("transaction exceeded the maximum allowed duration"))]
    TransactionMaxDurationReached,

    /// Two transactions raced on the same keys; the loser may retry.
    #[snafu(display("transaction not committed due to conflict with another transaction"))]
    ConflictingTransaction,

    /// A stored value failed to decode.
    #[snafu(display("data corruption: {message}"))]
    Corruption {
        /// Description of the corrupt state.
        message: String,
    },

    /// Payload (de)serialization failed.
    #[snafu(display("serialization error: {message}"))]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Unexpected engine failure.
    #[snafu(display("internal kv error: {message}"))]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl From<KvError> for lodestone_types::ApiError {
    fn from(err: KvError) -> Self {
        use lodestone_types::ApiError;
        match err {
            KvError::DuplicateKey => ApiError::already_exists(err.to_string()),
            KvError::KeyNotFound => ApiError::not_found(err.to_string()),
            KvError::ConflictingTransaction => ApiError::aborted(err.to_string()),
            KvError::TransactionMaxDurationReached => ApiError::aborted(err.to_string()),
            KvError::Corruption { .. }
            | KvError::Serialization { .. }
            | KvError::Internal { .. } => ApiError::internal(err.to_string()),
        }
    }
}
