//! Core types, errors, and configuration for Lodestone.
//!
//! This crate provides the foundational types used throughout the server:
//! - Identifier newtypes (NamespaceId, DatabaseId, CollectionId, IndexId)
//! - Database name / branch parsing
//! - Row payload envelope ([`TableData`]) and timestamps
//! - The user-facing error taxonomy ([`ApiError`])
//! - The typed configuration tree

pub mod config;
pub mod error;
pub mod key_part;
pub mod record;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ApiError, ApiResult, ErrorCode, MetadataError};
pub use key_part::KeyPart;
pub use record::{TableData, Timestamp};
pub use types::*;
