//! User-facing error taxonomy.
//!
//! Every component raises its own error type and converts into
//! [`ApiError`] at the service boundary. The taxonomy mirrors the wire
//! status codes: `NotFound`, `AlreadyExists`, `InvalidArgument`,
//! `Unauthenticated`, `PermissionDenied`, `Aborted` (retryable
//! contention), `Internal`, `Unknown`.

use snafu::Snafu;

/// Result alias for operations surfacing user-facing errors.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wire-level status code of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    Aborted,
    Internal,
    Unknown,
}

impl ErrorCode {
    /// Canonical string form used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

/// Top-level user-facing error.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ApiError {
    /// The referenced entity does not exist.
    #[snafu(display("{message}"))]
    NotFound {
        /// Error description.
        message: String,
    },

    /// The entity being created already exists.
    #[snafu(display("{message}"))]
    AlreadyExists {
        /// Error description.
        message: String,
    },

    /// The request payload is malformed or violates the schema.
    #[snafu(display("{message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },

    /// The caller could not be authenticated.
    #[snafu(display("{message}"))]
    Unauthenticated {
        /// Error description.
        message: String,
    },

    /// The caller is not allowed to perform the operation.
    #[snafu(display("{message}"))]
    PermissionDenied {
        /// Error description.
        message: String,
    },

    /// Retryable contention, reserved for concurrent DDL and transaction
    /// conflicts.
    #[snafu(display("{message}"))]
    Aborted {
        /// Error description.
        message: String,
    },

    /// Invariant violation.
    #[snafu(display("{message}"))]
    Internal {
        /// Error description.
        message: String,
    },

    /// Unclassified failure.
    #[snafu(display("{message}"))]
    Unknown {
        /// Error description.
        message: String,
    },
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound { message: message.into() }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        ApiError::AlreadyExists { message: message.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ApiError::InvalidArgument { message: message.into() }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        ApiError::Unauthenticated { message: message.into() }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        ApiError::PermissionDenied { message: message.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        ApiError::Aborted { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal { message: message.into() }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        ApiError::Unknown { message: message.into() }
    }

    /// The wire status code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::NotFound { .. } => ErrorCode::NotFound,
            ApiError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            ApiError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            ApiError::Unauthenticated { .. } => ErrorCode::Unauthenticated,
            ApiError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            ApiError::Aborted { .. } => ErrorCode::Aborted,
            ApiError::Internal { .. } => ErrorCode::Internal,
            ApiError::Unknown { .. } => ErrorCode::Unknown,
        }
    }
}

/// Errors raised by the metadata layer before they are translated into the
/// user taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum MetadataError {
    #[snafu(display("project doesn't exist '{project}'"))]
    ProjectNotFound { project: String },

    #[snafu(display("database doesn't exist '{database}'"))]
    DatabaseNotFound { database: String },

    #[snafu(display("database branch doesn't exist '{branch}'"))]
    BranchNotFound { branch: String },

    #[snafu(display("database branch already exists '{branch}'"))]
    BranchExists { branch: String },

    #[snafu(display("'main' database cannot be deleted"))]
    CannotDeleteMainBranch,

    #[snafu(display("search index doesn't exist '{index}'"))]
    SearchIndexNotFound { index: String },

    #[snafu(display("cache doesn't exist '{cache}'"))]
    CacheNotFound { cache: String },

    #[snafu(display("cache already exists '{cache}'"))]
    CacheExists { cache: String },
}

/// Translates metadata errors to the user taxonomy.
impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        let message = err.to_string();
        match err {
            MetadataError::ProjectNotFound { .. }
            | MetadataError::DatabaseNotFound { .. }
            | MetadataError::BranchNotFound { .. }
            | MetadataError::SearchIndexNotFound { .. }
            | MetadataError::CacheNotFound { .. } => ApiError::NotFound { message },
            MetadataError::BranchExists { .. } | MetadataError::CacheExists { .. } => {
                ApiError::AlreadyExists { message }
            }
            MetadataError::CannotDeleteMainBranch => ApiError::InvalidArgument { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::not_found("collection doesn't exist 'users'");
        assert_eq!(err.to_string(), "collection doesn't exist 'users'");
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_metadata_error_mapping() {
        let err: ApiError = MetadataError::BranchNotFound { branch: "dev".into() }.into();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err: ApiError = MetadataError::CannotDeleteMainBranch.into();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(err.to_string(), "'main' database cannot be deleted");

        let err: ApiError = MetadataError::BranchExists { branch: "dev".into() }.into();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }
}
