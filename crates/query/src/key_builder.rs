//! Primary-key tuple extraction from filters.
//!
//! The key builder succeeds only when the filter strictly binds the full
//! primary key through equality: an `And` (or shorthand conjunction) of
//! `$eq`/`$in` selectors over exactly the key fields, or a top-level `$or`
//! of such conjunctions. Anything looser fails, which callers treat as
//! "fall back to a scan".

use std::collections::HashMap;

use lodestone_schema::{FieldType, IndexField};
use lodestone_types::{ApiError, ApiResult, KeyPart};
use serde_json::Value;

use crate::filter::{ComparisonOp, Filter};

pub struct KeyBuilder;

impl KeyBuilder {
    /// Builds the set of primary-key tuples that strictly satisfy the
    /// filter list (a top-level conjunction).
    pub fn build(filters: &[Filter], pk: &[IndexField]) -> ApiResult<Vec<Vec<KeyPart>>> {
        if filters.is_empty() {
            return Err(ApiError::invalid_argument(
                "filters doesn't contain primary key fields",
            ));
        }

        // a lone top-level $or unions the tuples of its branches
        if filters.len() == 1 {
            if let Filter::Or(branches) = &filters[0] {
                let mut tuples = Vec::new();
                for branch in branches {
                    tuples.extend(Self::build(std::slice::from_ref(branch), pk)?);
                }
                return Ok(tuples);
            }
        }

        let mut bindings: HashMap<&str, Vec<&Value>> = HashMap::new();
        for filter in filters {
            collect_bindings(filter, pk, &mut bindings)?;
        }

        // every key field must be bound, in order
        let mut tuples: Vec<Vec<KeyPart>> = vec![Vec::with_capacity(pk.len())];
        for field in pk {
            let values = bindings.remove(field.name.as_str()).ok_or_else(|| {
                ApiError::invalid_argument(format!(
                    "filters doesn't contains primary key fields, missing: '{}'",
                    field.name
                ))
            })?;
            let mut expanded = Vec::with_capacity(tuples.len() * values.len());
            for tuple in &tuples {
                for value in &values {
                    let mut next = tuple.clone();
                    next.push(key_part_of(field, value)?);
                    expanded.push(next);
                }
            }
            tuples = expanded;
        }

        Ok(tuples)
    }
}

fn collect_bindings<'a>(
    filter: &'a Filter,
    pk: &[IndexField],
    bindings: &mut HashMap<&'a str, Vec<&'a Value>>,
) -> ApiResult<()> {
    match filter {
        Filter::Selector(selector) => {
            if !pk.iter().any(|f| f.name == selector.field.name) {
                return Err(ApiError::invalid_argument(format!(
                    "field '{}' is not part of the primary key",
                    selector.field.name
                )));
            }
            let values: Vec<&Value> = match selector.op {
                ComparisonOp::Eq => vec![&selector.value],
                ComparisonOp::In => selector
                    .value
                    .as_array()
                    .map(|v| v.iter().collect())
                    .unwrap_or_default(),
                _ => {
                    return Err(ApiError::invalid_argument(
                        "only equality filters can build keys",
                    ))
                }
            };
            if values.is_empty() {
                return Err(ApiError::invalid_argument(
                    "only equality filters can build keys",
                ));
            }
            if bindings.insert(selector.field.name.as_str(), values).is_some() {
                return Err(ApiError::invalid_argument(format!(
                    "reusing the same field '{}' in the filter",
                    selector.field.name
                )));
            }
            Ok(())
        }
        Filter::And(children) => {
            for child in children {
                collect_bindings(child, pk, bindings)?;
            }
            Ok(())
        }
        Filter::Or(_) => Err(ApiError::invalid_argument(
            "nested $or cannot strictly bind the primary key",
        )),
    }
}

fn key_part_of(field: &IndexField, value: &Value) -> ApiResult<KeyPart> {
    let mismatch = || {
        ApiError::invalid_argument(format!(
            "unsupported value for primary key field '{}'",
            field.name
        ))
    };
    match field.data_type {
        FieldType::Integer => value.as_i64().map(KeyPart::Integer).ok_or_else(mismatch),
        FieldType::String | FieldType::Uuid | FieldType::DateTime => value
            .as_str()
            .map(|s| KeyPart::String(s.to_owned()))
            .ok_or_else(mismatch),
        FieldType::Bytes => value
            .as_str()
            .map(|s| KeyPart::Bytes(s.as_bytes().to_vec()))
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use lodestone_schema::Factory;

    use super::*;
    use crate::filter::FilterFactory;

    const SCHEMA: &str = r#"{
        "title": "orders",
        "properties": {
            "k1": {"type": "string"},
            "k2": {"type": "integer"},
            "note": {"type": "string"}
        },
        "primary_key": ["k1", "k2"]
    }"#;

    fn parse(raw: &[u8]) -> (Vec<Filter>, Vec<IndexField>) {
        let schema = Factory::build("orders", SCHEMA.as_bytes()).expect("schema");
        let filters = FilterFactory::new(schema.queryable_fields())
            .factorize(raw)
            .expect("filter");
        (filters, schema.primary_key.fields)
    }

    #[test]
    fn test_full_bind() {
        let (filters, pk) = parse(br#"{"k1": "a", "k2": 1}"#);
        let tuples = KeyBuilder::build(&filters, &pk).expect("bind");
        assert_eq!(tuples, vec![vec![KeyPart::from("a"), KeyPart::from(1)]]);
    }

    #[test]
    fn test_partial_bind_fails() {
        let (filters, pk) = parse(br#"{"k1": "a"}"#);
        let err = KeyBuilder::build(&filters, &pk).expect_err("partial");
        assert!(err.to_string().contains("missing: 'k2'"));
    }

    #[test]
    fn test_non_pk_field_fails() {
        let (filters, pk) = parse(br#"{"k1": "a", "k2": 1, "note": "x"}"#);
        let err = KeyBuilder::build(&filters, &pk).expect_err("non-pk");
        assert!(err.to_string().contains("not part of the primary key"));
    }

    #[test]
    fn test_range_op_fails() {
        let (filters, pk) = parse(br#"{"k1": "a", "k2": {"$gt": 1}}"#);
        let err = KeyBuilder::build(&filters, &pk).expect_err("range");
        assert!(err.to_string().contains("only equality"));
    }

    #[test]
    fn test_in_expands() {
        let (filters, pk) = parse(br#"{"k1": "a", "k2": {"$in": [1, 2]}}"#);
        let tuples = KeyBuilder::build(&filters, &pk).expect("bind");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], vec![KeyPart::from("a"), KeyPart::from(1)]);
        assert_eq!(tuples[1], vec![KeyPart::from("a"), KeyPart::from(2)]);
    }

    #[test]
    fn test_top_level_or_unions() {
        let (filters, pk) =
            parse(br#"{"$or": [{"k1": "a", "k2": 1}, {"k1": "b", "k2": 2}]}"#);
        let tuples = KeyBuilder::build(&filters, &pk).expect("bind");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[1], vec![KeyPart::from("b"), KeyPart::from(2)]);
    }

    #[test]
    fn test_or_branch_missing_field_fails() {
        let (filters, pk) = parse(br#"{"$or": [{"k1": "a", "k2": 1}, {"k1": "b"}]}"#);
        assert!(KeyBuilder::build(&filters, &pk).is_err());
    }

    #[test]
    fn test_type_mismatch_fails() {
        let (filters, pk) = parse(br#"{"k1": "a", "k2": "not-a-number"}"#);
        let err = KeyBuilder::build(&filters, &pk).expect_err("type");
        assert!(err.to_string().contains("unsupported value"));
    }
}
