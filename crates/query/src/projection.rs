//! Read-field projection.
//!
//! Request fragment: `{"name": true, "meta.internal": false}`. Inclusion
//! and exclusion cannot be mixed; inclusion wins when both appear.

use lodestone_types::{ApiError, ApiResult};
use serde_json::{Map, Value};

/// Field selection applied to every emitted document.
#[derive(Debug, Clone, Default)]
pub struct FieldProjection {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FieldProjection {
    /// Parses the `fields` fragment of a read request. Returns `None`
    /// when absent, meaning "emit everything".
    pub fn build(raw: &[u8]) -> ApiResult<Option<Self>> {
        if raw.is_empty() || raw == b"{}" || raw == b"null" {
            return Ok(None);
        }
        let root: Value = serde_json::from_slice(raw)
            .map_err(|e| ApiError::invalid_argument(format!("fields is not valid JSON: {e}")))?;
        let root = root
            .as_object()
            .ok_or_else(|| ApiError::invalid_argument("fields must be a JSON object"))?;

        let mut projection = FieldProjection::default();
        for (name, flag) in root {
            let included = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64() != Some(0),
                _ => {
                    return Err(ApiError::invalid_argument(format!(
                        "unsupported selection for field '{name}'"
                    )))
                }
            };
            if included {
                projection.include.push(name.clone());
            } else {
                projection.exclude.push(name.clone());
            }
        }
        Ok(Some(projection))
    }

    /// Builds an include-only or exclude-only projection from a name
    /// list.
    pub fn from_names(names: &[String], include: bool) -> Self {
        if include {
            Self { include: names.to_vec(), exclude: Vec::new() }
        } else {
            Self { include: Vec::new(), exclude: names.to_vec() }
        }
    }

    /// Applies the projection to a serialized document.
    pub fn apply(&self, raw: &[u8]) -> ApiResult<Vec<u8>> {
        let mut doc: Map<String, Value> = serde_json::from_slice(raw)
            .map_err(|e| ApiError::internal(format!("stored row is not valid JSON: {e}")))?;
        self.apply_doc(&mut doc);
        serde_json::to_vec(&doc).map_err(|e| ApiError::internal(e.to_string()))
    }

    /// Applies the projection to a decoded document.
    pub fn apply_doc(&self, doc: &mut Map<String, Value>) {
        if !self.include.is_empty() {
            let keep: Vec<&str> = self
                .include
                .iter()
                .map(|p| p.split('.').next().unwrap_or(p))
                .collect();
            doc.retain(|name, _| keep.contains(&name.as_str()));
            for path in &self.include {
                if path.contains('.') {
                    prune_to_path(doc, path);
                }
            }
            return;
        }
        for path in &self.exclude {
            remove_path(doc, path);
        }
    }
}

fn remove_path(doc: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

fn prune_to_path(doc: &mut Map<String, Value>, path: &str) {
    if let Some((head, rest)) = path.split_once('.') {
        if let Some(Value::Object(child)) = doc.get_mut(head) {
            child.retain(|name, _| name == rest.split('.').next().unwrap_or(rest));
            prune_to_path(child, rest);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn apply(raw_projection: &[u8], doc: Value) -> Value {
        let projection = FieldProjection::build(raw_projection)
            .expect("parse")
            .expect("present");
        let raw = serde_json::to_vec(&doc).expect("serialize");
        serde_json::from_slice(&projection.apply(&raw).expect("apply")).expect("deserialize")
    }

    #[test]
    fn test_include_only() {
        let out = apply(br#"{"a": true}"#, json!({"a": 1, "b": 2}));
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn test_exclude_only() {
        let out = apply(br#"{"b": false}"#, json!({"a": 1, "b": 2}));
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn test_nested_exclusion() {
        let out = apply(
            br#"{"meta.secret": false}"#,
            json!({"a": 1, "meta": {"secret": "x", "keep": 2}}),
        );
        assert_eq!(out, json!({"a": 1, "meta": {"keep": 2}}));
    }

    #[test]
    fn test_nested_inclusion() {
        let out = apply(
            br#"{"meta.keep": true}"#,
            json!({"a": 1, "meta": {"secret": "x", "keep": 2}}),
        );
        assert_eq!(out, json!({"meta": {"keep": 2}}));
    }

    #[test]
    fn test_absent_means_everything() {
        assert!(FieldProjection::build(b"").expect("parse").is_none());
        assert!(FieldProjection::build(b"{}").expect("parse").is_none());
    }
}
