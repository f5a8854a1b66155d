//! Update field operators.
//!
//! Request fragment: `{"$set": {…}, "$unset": ["a"], "$increment":
//! {"n": 5}}`. `$set` payloads are validated against the collection
//! schema by the runner before the merge; the merge itself is a deep JSON
//! merge that reports whether any primary-key field changed.

use lodestone_types::{ApiError, ApiResult};
use serde_json::{Map, Value};

/// Parsed update operators of one request.
#[derive(Debug, Clone, Default)]
pub struct FieldOperators {
    set: Map<String, Value>,
    unset: Vec<String>,
    increment: Map<String, Value>,
}

impl FieldOperators {
    /// Parses the `fields` fragment of an update request.
    pub fn build(raw: &[u8]) -> ApiResult<Self> {
        if raw.is_empty() {
            return Err(ApiError::invalid_argument("empty fields in update request"));
        }
        let root: Value = serde_json::from_slice(raw).map_err(|e| {
            ApiError::invalid_argument(format!("fields is not valid JSON: {e}"))
        })?;
        let root = root
            .as_object()
            .ok_or_else(|| ApiError::invalid_argument("fields must be a JSON object"))?;

        let mut operators = FieldOperators::default();
        for (op, operand) in root {
            match op.as_str() {
                "$set" => {
                    operators.set = operand
                        .as_object()
                        .cloned()
                        .ok_or_else(|| ApiError::invalid_argument("$set needs an object"))?;
                }
                "$unset" => {
                    operators.unset = match operand {
                        Value::Array(names) => names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect(),
                        Value::Object(names) => names.keys().cloned().collect(),
                        _ => {
                            return Err(ApiError::invalid_argument(
                                "$unset needs an array of field names",
                            ))
                        }
                    };
                }
                "$increment" => {
                    operators.increment = operand.as_object().cloned().ok_or_else(|| {
                        ApiError::invalid_argument("$increment needs an object")
                    })?;
                }
                other => {
                    return Err(ApiError::invalid_argument(format!(
                        "unsupported update operator '{other}'"
                    )))
                }
            }
        }
        if operators.set.is_empty()
            && operators.unset.is_empty()
            && operators.increment.is_empty()
        {
            return Err(ApiError::invalid_argument("empty fields in update request"));
        }
        Ok(operators)
    }

    /// The `$set` payload, exposed so the runner can validate and mutate
    /// it against the schema before merging.
    pub fn set_payload(&self) -> ApiResult<Vec<u8>> {
        serde_json::to_vec(&self.set).map_err(|e| ApiError::internal(e.to_string()))
    }

    /// Replaces the `$set` payload after mutation.
    pub fn replace_set_payload(&mut self, raw: &[u8]) -> ApiResult<()> {
        self.set = serde_json::from_slice(raw)
            .map_err(|e| ApiError::internal(format!("mutated $set payload invalid: {e}")))?;
        Ok(())
    }

    pub fn has_set(&self) -> bool {
        !self.set.is_empty()
    }

    /// Applies the operators to an existing document and reports whether
    /// any of `pk_fields` changed, in which case the row must be re-keyed.
    pub fn merge_into(
        &self,
        existing: &mut Map<String, Value>,
        pk_fields: &[String],
    ) -> ApiResult<bool> {
        let before: Vec<Option<Value>> =
            pk_fields.iter().map(|f| existing.get(f).cloned()).collect();

        deep_merge(existing, &self.set);
        for name in &self.unset {
            remove_path(existing, name);
        }
        for (name, delta) in &self.increment {
            apply_increment(existing, name, delta)?;
        }

        let mutated = pk_fields
            .iter()
            .zip(before)
            .any(|(field, old)| existing.get(field).cloned() != old);
        Ok(mutated)
    }
}

fn deep_merge(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
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

fn apply_increment(doc: &mut Map<String, Value>, path: &str, delta: &Value) -> ApiResult<()> {
    let delta = delta.as_i64().ok_or_else(|| {
        ApiError::invalid_argument(format!("$increment for '{path}' needs an integer"))
    })?;
    let current = doc.get(path).cloned().unwrap_or(Value::from(0));
    let current = current.as_i64().ok_or_else(|| {
        ApiError::invalid_argument(format!(
            "$increment only works on integer field, `{path}` is not an integer"
        ))
    })?;
    doc.insert(path.to_owned(), Value::from(current + delta));
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn test_set_deep_merge() {
        let operators =
            FieldOperators::build(br#"{"$set": {"a": 1, "nested": {"x": 2}}}"#).expect("parse");
        let mut existing = doc(json!({"k": "a", "nested": {"x": 1, "y": 9}}));
        let mutated = operators.merge_into(&mut existing, &["k".to_owned()]).expect("merge");
        assert!(!mutated);
        assert_eq!(existing["a"], json!(1));
        // nested merge keeps the sibling
        assert_eq!(existing["nested"], json!({"x": 2, "y": 9}));
    }

    #[test]
    fn test_pk_mutation_detected() {
        let operators = FieldOperators::build(br#"{"$set": {"k": "b"}}"#).expect("parse");
        let mut existing = doc(json!({"k": "a"}));
        let mutated = operators.merge_into(&mut existing, &["k".to_owned()]).expect("merge");
        assert!(mutated);
    }

    #[test]
    fn test_unset() {
        let operators = FieldOperators::build(br#"{"$unset": ["note"]}"#).expect("parse");
        let mut existing = doc(json!({"k": "a", "note": "x"}));
        operators.merge_into(&mut existing, &[]).expect("merge");
        assert!(!existing.contains_key("note"));
    }

    #[test]
    fn test_unset_nested_path() {
        let operators = FieldOperators::build(br#"{"$unset": ["meta.note"]}"#).expect("parse");
        let mut existing = doc(json!({"meta": {"note": "x", "keep": 1}}));
        operators.merge_into(&mut existing, &[]).expect("merge");
        assert_eq!(existing["meta"], json!({"keep": 1}));
    }

    #[test]
    fn test_increment() {
        let operators = FieldOperators::build(br#"{"$increment": {"n": 5}}"#).expect("parse");
        let mut existing = doc(json!({"n": 37}));
        operators.merge_into(&mut existing, &[]).expect("merge");
        assert_eq!(existing["n"], json!(42));
    }

    #[test]
    fn test_increment_non_integer_rejected() {
        let operators = FieldOperators::build(br#"{"$increment": {"n": 5}}"#).expect("parse");
        let mut existing = doc(json!({"n": "nope"}));
        let err = operators.merge_into(&mut existing, &[]).expect_err("not numeric");
        assert!(err.to_string().contains("not an integer"));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = FieldOperators::build(br#"{"$push": {"a": 1}}"#).expect_err("unknown");
        assert!(err.to_string().contains("unsupported update operator"));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(FieldOperators::build(b"").is_err());
        assert!(FieldOperators::build(b"{}").is_err());
    }
}
