//! Error types for the search boundary.

use snafu::Snafu;

/// Result type for search operations.
pub type Result<T, E = SearchError> = std::result::Result<T, E>;

/// Errors surfaced by the search store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SearchError {
    /// The index or document does not exist.
    #[snafu(display("search entity not found: {name}"))]
    NotFound {
        /// Index or document name.
        name: String,
    },

    /// The index or document already exists.
    #[snafu(display("search entity already exists: {name}"))]
    DuplicateEntity {
        /// Index or document name.
        name: String,
    },

    /// The query or payload was rejected by the store.
    #[snafu(display("search request rejected: {message}"))]
    BadRequest {
        /// Description of the rejection.
        message: String,
    },

    /// Unexpected store failure.
    #[snafu(display("search store error: {message}"))]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl SearchError {
    /// True when the error is a missing index/document, which several
    /// paths tolerate (deletes of already-gone documents, drops of
    /// already-gone indexes).
    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::NotFound { .. })
    }

    /// True when the error is a duplicate-create, tolerated when DDL
    /// re-runs against an index that already exists.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SearchError::DuplicateEntity { .. })
    }
}

impl From<SearchError> for lodestone_types::ApiError {
    fn from(err: SearchError) -> Self {
        use lodestone_types::ApiError;
        match err {
            SearchError::NotFound { .. } => ApiError::not_found(err.to_string()),
            SearchError::DuplicateEntity { .. } => ApiError::already_exists(err.to_string()),
            SearchError::BadRequest { .. } => ApiError::invalid_argument(err.to_string()),
            SearchError::Internal { .. } => ApiError::internal(err.to_string()),
        }
    }
}
