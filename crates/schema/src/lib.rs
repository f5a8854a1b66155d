//! Collection schema model for Lodestone.
//!
//! This crate provides:
//! - The field model parsed from collection schema JSON ([`Field`],
//!   [`FieldType`], [`QueryableField`])
//! - The schema factory ([`Factory`]) and the fully formed collection
//!   ([`DefaultCollection`]) with document validation and on-read row
//!   upgrade
//! - Payload mutators applied before validation (defaults, string→int64)
//! - Backward-compatibility rules for schema updates
//! - Schema inference for imports
//! - Search-index schemas (implicit and explicit) and delta computation

mod collection;
mod compat;
mod factory;
mod field;
mod infer;
mod mutator;
pub mod reserved;
mod search_index;

pub use collection::{DefaultCollection, SchemaVersion};
pub use compat::{apply_schema_rules, apply_search_index_schema_rules};
pub use factory::{Factory, Index, IndexField};
pub use field::{Field, FieldType, QueryableField};
pub use infer::infer_schema;
pub use mutator::{PayloadMutator, StoredDefault};
pub use search_index::{
    build_search_factory, search_delta_fields, ImplicitSearchIndex, SearchField, SearchIndex,
    SearchIndexFactory, SearchSource, StoreSchema,
};
