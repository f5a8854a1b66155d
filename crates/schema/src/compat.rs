//! Backward-compatibility rules for schema updates.
//!
//! Applied before a new schema version is persisted for an existing
//! collection or search index. Additive changes pass; destructive ones
//! (field removal, type changes, narrowing constraints, newly required
//! fields) are rejected unless the deployment allows incompatible
//! updates. The primary key can never change.

use lodestone_types::{ApiError, ApiResult};

use crate::factory::{Factory, IndexField};
use crate::field::Field;
use crate::search_index::{SearchIndex, SearchIndexFactory};

/// Validates a collection schema update against the currently active
/// schema.
pub fn apply_schema_rules(
    existing_fields: &[Field],
    existing_pk: &[IndexField],
    incoming: &Factory,
    allow_incompatible: bool,
) -> ApiResult<()> {
    if existing_pk != incoming.primary_key.fields.as_slice() {
        return Err(ApiError::invalid_argument(
            "primary key is immutable and cannot be changed",
        ));
    }
    apply_field_rules(existing_fields, &incoming.fields, allow_incompatible)
}

/// Validates an explicit search-index schema update.
pub fn apply_search_index_schema_rules(
    existing: &SearchIndex,
    incoming: &SearchIndexFactory,
    allow_incompatible: bool,
) -> ApiResult<()> {
    apply_field_rules(&field_list(existing), &incoming.fields, allow_incompatible)
}

fn field_list(index: &SearchIndex) -> Vec<Field> {
    // the factory fields were rebuilt from the stored schema at reload
    crate::search_index::build_search_factory(&index.name, &index.schema)
        .map(|f| f.fields)
        .unwrap_or_default()
}

fn apply_field_rules(
    existing: &[Field],
    incoming: &[Field],
    allow_incompatible: bool,
) -> ApiResult<()> {
    if allow_incompatible {
        return Ok(());
    }

    for field in existing {
        let Some(updated) = incoming.iter().find(|f| f.name == field.name) else {
            return Err(ApiError::invalid_argument(format!(
                "removing a field is a backward incompatible change. Missing field: '{}'",
                field.name
            )));
        };

        if updated.data_type != field.data_type {
            return Err(ApiError::invalid_argument(format!(
                "data type mismatch for field '{}'",
                field.name
            )));
        }

        if let (Some(old_max), Some(new_max)) = (field.max_length, updated.max_length) {
            if new_max < old_max {
                return Err(ApiError::invalid_argument(format!(
                    "reducing the max length of field '{}' is a backward incompatible change",
                    field.name
                )));
            }
        }
        if updated.required && !field.required {
            return Err(ApiError::invalid_argument(format!(
                "marking the existing field '{}' as required is a backward incompatible change",
                field.name
            )));
        }

        // recurse into typed objects
        apply_field_rules(&field.fields, &updated.fields, allow_incompatible)?;
    }

    Ok(())
}
