//! Sort orderings.
//!
//! Request fragment: an ordered array of single-field entries, either the
//! shorthand `[{"price": "$desc"}]` or the long form
//! `[{"price": {"$order": "$desc", "$missing_first": true}}]`.

use lodestone_types::{ApiError, ApiResult};
use serde_json::Value;

/// One parsed sort instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub name: String,
    pub ascending: bool,
    pub missing_first: bool,
}

/// Parses the sort fragment. Returns `None` when absent or empty.
pub fn parse_sort(raw: &[u8]) -> ApiResult<Option<Vec<SortKey>>> {
    if raw.is_empty() || raw == b"null" {
        return Ok(None);
    }
    let root: Value = serde_json::from_slice(raw)
        .map_err(|e| ApiError::invalid_argument(format!("sort is not valid JSON: {e}")))?;
    let entries = root
        .as_array()
        .ok_or_else(|| ApiError::invalid_argument("sort must be a JSON array"))?;
    if entries.is_empty() {
        return Ok(None);
    }

    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        let obj = entry
            .as_object()
            .ok_or_else(|| ApiError::invalid_argument("sort entries must be objects"))?;
        if obj.len() != 1 {
            return Err(ApiError::invalid_argument(
                "sort entries must name exactly one field",
            ));
        }
        let (name, spec) = obj.iter().next().expect("len checked");
        keys.push(parse_entry(name, spec)?);
    }
    Ok(Some(keys))
}

fn parse_entry(name: &str, spec: &Value) -> ApiResult<SortKey> {
    match spec {
        Value::String(order) => Ok(SortKey {
            name: name.to_owned(),
            ascending: parse_order(order)?,
            missing_first: false,
        }),
        Value::Object(spec) => {
            let order = spec
                .get("$order")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::invalid_argument("sort entry needs an $order"))?;
            Ok(SortKey {
                name: name.to_owned(),
                ascending: parse_order(order)?,
                missing_first: spec
                    .get("$missing_first")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        _ => Err(ApiError::invalid_argument(format!(
            "unsupported sort specification for field '{name}'"
        ))),
    }
}

fn parse_order(order: &str) -> ApiResult<bool> {
    match order {
        "$asc" => Ok(true),
        "$desc" => Ok(false),
        other => Err(ApiError::invalid_argument(format!(
            "sort order can only be `$asc` or `$desc`, found `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shorthand() {
        let keys = parse_sort(br#"[{"price": "$desc"}, {"name": "$asc"}]"#)
            .expect("parse")
            .expect("present");
        assert_eq!(keys.len(), 2);
        assert!(!keys[0].ascending);
        assert!(keys[1].ascending);
        assert_eq!(keys[0].name, "price");
    }

    #[test]
    fn test_parse_long_form() {
        let keys = parse_sort(br#"[{"price": {"$order": "$asc", "$missing_first": true}}]"#)
            .expect("parse")
            .expect("present");
        assert!(keys[0].ascending);
        assert!(keys[0].missing_first);
    }

    #[test]
    fn test_empty_is_none() {
        assert!(parse_sort(b"").expect("parse").is_none());
        assert!(parse_sort(b"[]").expect("parse").is_none());
    }

    #[test]
    fn test_bad_order_rejected() {
        let err = parse_sort(br#"[{"price": "$down"}]"#).expect_err("bad order");
        assert!(err.to_string().contains("$asc"));
    }

    #[test]
    fn test_multi_field_entry_rejected() {
        let err =
            parse_sort(br#"[{"a": "$asc", "b": "$desc"}]"#).expect_err("two fields");
        assert!(err.to_string().contains("exactly one field"));
    }
}
