//! Filter AST.
//!
//! A filter is a sum of `Selector`, `And`, and `Or` nodes parsed from the
//! request JSON:
//!
//! ```json
//! {"f1": 10}
//! {"f1": {"$gt": 10}}
//! {"$or": [{"f1": 1}, {"f2": 3}]}
//! {"$and": [{"f1": 1}, {"$or": [{"f2": 2}, {"f2": 3}]}]}
//! ```
//!
//! Every node can match documents, report whether the search index can
//! serve it, and render itself into the search store's filter syntax.

use lodestone_schema::QueryableField;
use lodestone_types::{ApiError, ApiResult};
use serde_json::{Map, Value};

/// Comparison operators supported in selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Regex,
}

impl ComparisonOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "$eq" => Some(ComparisonOp::Eq),
            "$ne" | "$not_eq" => Some(ComparisonOp::Ne),
            "$gt" => Some(ComparisonOp::Gt),
            "$gte" => Some(ComparisonOp::Gte),
            "$lt" => Some(ComparisonOp::Lt),
            "$lte" => Some(ComparisonOp::Lte),
            "$in" => Some(ComparisonOp::In),
            "$regex" => Some(ComparisonOp::Regex),
            _ => None,
        }
    }
}

/// A single field comparison.
#[derive(Debug, Clone)]
pub struct Selector {
    pub field: QueryableField,
    pub op: ComparisonOp,
    pub value: Value,
    matcher: Option<regex::Regex>,
}

impl Selector {
    fn new(field: QueryableField, op: ComparisonOp, value: Value) -> ApiResult<Self> {
        let matcher = if op == ComparisonOp::Regex {
            let pattern = value.as_str().ok_or_else(|| {
                ApiError::invalid_argument("$regex needs a string pattern")
            })?;
            Some(regex::Regex::new(pattern).map_err(|e| {
                ApiError::invalid_argument(format!("invalid regex pattern: {e}"))
            })?)
        } else {
            None
        };
        Ok(Self { field, op, value, matcher })
    }

    fn matches_doc(&self, doc: &Map<String, Value>) -> bool {
        let Some(actual) = lookup_path(doc, &self.field.name) else {
            return false;
        };
        match self.op {
            ComparisonOp::Eq => values_equal(actual, &self.value),
            ComparisonOp::Ne => !values_equal(actual, &self.value),
            ComparisonOp::Gt => compare_order(actual, &self.value)
                .is_some_and(|o| o == std::cmp::Ordering::Greater),
            ComparisonOp::Gte => compare_order(actual, &self.value)
                .is_some_and(|o| o != std::cmp::Ordering::Less),
            ComparisonOp::Lt => compare_order(actual, &self.value)
                .is_some_and(|o| o == std::cmp::Ordering::Less),
            ComparisonOp::Lte => compare_order(actual, &self.value)
                .is_some_and(|o| o != std::cmp::Ordering::Greater),
            ComparisonOp::In => self
                .value
                .as_array()
                .is_some_and(|candidates| candidates.iter().any(|c| values_equal(actual, c))),
            ComparisonOp::Regex => match (&self.matcher, actual.as_str()) {
                (Some(matcher), Some(raw)) => matcher.is_match(raw),
                _ => false,
            },
        }
    }

    fn is_indexed(&self) -> bool {
        // regex cannot be pushed down to the search store
        self.field.indexed && self.op != ComparisonOp::Regex
    }

    fn to_search_filter(&self) -> String {
        let name = &self.field.name;
        match self.op {
            ComparisonOp::Eq => format!("{name}:={}", render(&self.value)),
            ComparisonOp::Ne => format!("{name}:!={}", render(&self.value)),
            ComparisonOp::Gt => format!("{name}:>{}", render(&self.value)),
            ComparisonOp::Gte => format!("{name}:>={}", render(&self.value)),
            ComparisonOp::Lt => format!("{name}:<{}", render(&self.value)),
            ComparisonOp::Lte => format!("{name}:<={}", render(&self.value)),
            ComparisonOp::In => {
                let rendered: Vec<String> = self
                    .value
                    .as_array()
                    .map(|values| values.iter().map(render).collect())
                    .unwrap_or_default();
                format!("{name}:=[{}]", rendered.join(","))
            }
            ComparisonOp::Regex => String::new(),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A filter node.
#[derive(Debug, Clone)]
pub enum Filter {
    Selector(Selector),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// True if the decoded document satisfies this filter.
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        match self {
            Filter::Selector(s) => s.matches_doc(doc),
            Filter::And(children) => children.iter().all(|f| f.matches(doc)),
            Filter::Or(children) => children.iter().any(|f| f.matches(doc)),
        }
    }

    /// True if every touched field is indexed, so the search store can
    /// serve this filter.
    pub fn is_indexed(&self) -> bool {
        match self {
            Filter::Selector(s) => s.is_indexed(),
            Filter::And(children) | Filter::Or(children) => {
                children.iter().all(Filter::is_indexed)
            }
        }
    }

    /// Renders into the search store's syntax: a disjunction list of
    /// conjunction strings. `Or` expands the list; `And` distributes over
    /// nested `Or`s.
    pub fn to_search_filter(&self) -> Vec<String> {
        match self {
            Filter::Selector(s) => vec![s.to_search_filter()],
            Filter::Or(children) => {
                children.iter().flat_map(Filter::to_search_filter).collect()
            }
            Filter::And(children) => {
                let (selectors, logical): (Vec<&Filter>, Vec<&Filter>) = children
                    .iter()
                    .partition(|f| matches!(f, Filter::Selector(_)));

                let conjunction = selectors
                    .iter()
                    .flat_map(|f| f.to_search_filter())
                    .collect::<Vec<_>>()
                    .join("&&");

                if logical.is_empty() {
                    return vec![conjunction];
                }
                let flattened = flatten_and(&conjunction, &logical);
                if flattened.is_empty() {
                    vec![conjunction]
                } else {
                    flattened
                }
            }
        }
    }

    /// Every selector in the tree, depth first.
    pub fn selectors(&self) -> Vec<&Selector> {
        match self {
            Filter::Selector(s) => vec![s],
            Filter::And(children) | Filter::Or(children) => {
                children.iter().flat_map(Filter::selectors).collect()
            }
        }
    }
}

fn flatten_and(so_far: &str, filters: &[&Filter]) -> Vec<String> {
    let mut combinations = Vec::new();
    for expansion in filters[0].to_search_filter() {
        let combined = if so_far.is_empty() {
            expansion
        } else {
            format!("{so_far}&&{expansion}")
        };
        if filters.len() > 1 {
            combinations.extend(flatten_and(&combined, &filters[1..]));
        } else {
            combinations.push(combined);
        }
    }
    combinations
}

/// Conjunction of the top-level filters of one request.
#[derive(Debug, Clone, Default)]
pub struct WrappedFilter {
    filter: Option<Filter>,
}

impl WrappedFilter {
    /// True for the match-everything filter (`{}` or absent).
    pub fn none(&self) -> bool {
        self.filter.is_none()
    }

    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        match &self.filter {
            Some(filter) => filter.matches(doc),
            None => true,
        }
    }

    pub fn is_indexed(&self) -> bool {
        match &self.filter {
            Some(filter) => filter.is_indexed(),
            None => false,
        }
    }

    pub fn to_search_filter(&self) -> Vec<String> {
        match &self.filter {
            Some(filter) => filter.to_search_filter(),
            None => Vec::new(),
        }
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }
}

/// True when the raw filter fragment matches everything.
pub fn none(raw: &[u8]) -> bool {
    raw.is_empty() || raw == b"{}"
}

/// Parses request filter JSON against a collection's queryable fields.
pub struct FilterFactory {
    fields: Vec<QueryableField>,
}

impl FilterFactory {
    pub fn new(fields: Vec<QueryableField>) -> Self {
        Self { fields }
    }

    /// Parses the fragment into the top-level conjunction list.
    pub fn factorize(&self, raw: &[u8]) -> ApiResult<Vec<Filter>> {
        if none(raw) {
            return Ok(Vec::new());
        }
        let root: Value = serde_json::from_slice(raw)
            .map_err(|e| ApiError::invalid_argument(format!("filter is not valid JSON: {e}")))?;
        let root = root
            .as_object()
            .ok_or_else(|| ApiError::invalid_argument("filter must be a JSON object"))?;
        self.parse_object(root)
    }

    /// Parses the fragment into a single wrapped conjunction.
    pub fn wrapped(&self, raw: &[u8]) -> ApiResult<WrappedFilter> {
        let mut filters = self.factorize(raw)?;
        let filter = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::And(filters)),
        };
        Ok(WrappedFilter { filter })
    }

    fn parse_object(&self, obj: &Map<String, Value>) -> ApiResult<Vec<Filter>> {
        let mut filters = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            match key.as_str() {
                "$and" => filters.push(Filter::And(self.parse_logical(value, "$and")?)),
                "$or" => filters.push(Filter::Or(self.parse_logical(value, "$or")?)),
                field => filters.push(self.parse_selector(field, value)?),
            }
        }
        Ok(filters)
    }

    fn parse_logical(&self, value: &Value, op: &str) -> ApiResult<Vec<Filter>> {
        let children = value.as_array().ok_or_else(|| {
            ApiError::invalid_argument(format!("{op} needs an array of filters"))
        })?;
        let mut parsed = Vec::with_capacity(children.len());
        for child in children {
            let obj = child.as_object().ok_or_else(|| {
                ApiError::invalid_argument(format!("{op} entries must be objects"))
            })?;
            let mut inner = self.parse_object(obj)?;
            match inner.len() {
                0 => {}
                1 => parsed.push(inner.remove(0)),
                _ => parsed.push(Filter::And(inner)),
            }
        }
        if parsed.len() < 2 {
            return Err(ApiError::invalid_argument(format!(
                "{op} filter needs minimum 2 filters"
            )));
        }
        Ok(parsed)
    }

    fn parse_selector(&self, field_name: &str, value: &Value) -> ApiResult<Filter> {
        let field = self
            .fields
            .iter()
            .find(|f| f.name == field_name)
            .ok_or_else(|| {
                ApiError::invalid_argument(format!("`{field_name}` is not a schema field"))
            })?
            .clone();

        // `{field: {"$op": v}}` vs shorthand `{field: v}`
        if let Some(obj) = value.as_object() {
            if obj.keys().any(|k| k.starts_with('$')) {
                let mut comparisons = Vec::with_capacity(obj.len());
                for (op_name, operand) in obj {
                    let op = ComparisonOp::parse(op_name).ok_or_else(|| {
                        ApiError::invalid_argument(format!(
                            "unsupported operator '{op_name}'"
                        ))
                    })?;
                    comparisons.push(Filter::Selector(Selector::new(
                        field.clone(),
                        op,
                        operand.clone(),
                    )?));
                }
                return Ok(match comparisons.len() {
                    1 => comparisons.remove(0),
                    _ => Filter::And(comparisons),
                });
            }
        }

        Ok(Filter::Selector(Selector::new(field, ComparisonOp::Eq, value.clone())?))
    }
}

fn lookup_path<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (number_of(a), number_of(b)) {
        return x == y;
    }
    a == b
}

fn compare_order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (number_of(a), number_of(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    value.as_number().and_then(|n| n.as_f64())
}

#[cfg(test)]
mod tests {
    use lodestone_schema::Factory;
    use serde_json::json;

    use super::*;

    const SCHEMA: &str = r#"{
        "title": "orders",
        "properties": {
            "k1": {"type": "string"},
            "k2": {"type": "integer"},
            "note": {"type": "string"},
            "address": {"type": "object", "properties": {"city": {"type": "string"}}}
        },
        "primary_key": ["k1", "k2"]
    }"#;

    fn factory() -> FilterFactory {
        let schema = Factory::build("orders", SCHEMA.as_bytes()).expect("schema");
        FilterFactory::new(schema.queryable_fields())
    }

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn test_shorthand_eq() {
        let filter = factory().wrapped(br#"{"k1": "a", "k2": 1}"#).expect("parse");
        assert!(filter.matches(&doc(json!({"k1": "a", "k2": 1}))));
        assert!(!filter.matches(&doc(json!({"k1": "a", "k2": 2}))));
    }

    #[test]
    fn test_comparison_ops() {
        let filter = factory().wrapped(br#"{"k2": {"$gt": 5, "$lte": 10}}"#).expect("parse");
        assert!(filter.matches(&doc(json!({"k2": 7}))));
        assert!(filter.matches(&doc(json!({"k2": 10}))));
        assert!(!filter.matches(&doc(json!({"k2": 5}))));
        assert!(!filter.matches(&doc(json!({"k2": 11}))));
    }

    #[test]
    fn test_or_filter() {
        let filter = factory()
            .wrapped(br#"{"$or": [{"k1": "a"}, {"k1": "b"}]}"#)
            .expect("parse");
        assert!(filter.matches(&doc(json!({"k1": "b"}))));
        assert!(!filter.matches(&doc(json!({"k1": "c"}))));
    }

    #[test]
    fn test_nested_logical() {
        let filter = factory()
            .wrapped(br#"{"$and": [{"k1": "a"}, {"$or": [{"k2": 1}, {"k2": 2}]}]}"#)
            .expect("parse");
        assert!(filter.matches(&doc(json!({"k1": "a", "k2": 2}))));
        assert!(!filter.matches(&doc(json!({"k1": "b", "k2": 2}))));
    }

    #[test]
    fn test_in_and_regex() {
        let filter = factory()
            .wrapped(br#"{"k1": {"$in": ["a", "b"]}}"#)
            .expect("parse");
        assert!(filter.matches(&doc(json!({"k1": "b"}))));
        assert!(!filter.matches(&doc(json!({"k1": "c"}))));

        let filter = factory()
            .wrapped(br#"{"note": {"$regex": "^ship"}}"#)
            .expect("parse");
        assert!(filter.matches(&doc(json!({"note": "shipped"}))));
        assert!(!filter.matches(&doc(json!({"note": "pending"}))));
        // regex cannot be served by the search index
        assert!(!filter.is_indexed());
    }

    #[test]
    fn test_nested_field_path() {
        let filter = factory()
            .wrapped(br#"{"address.city": "berlin"}"#)
            .expect("parse");
        assert!(filter.matches(&doc(json!({"address": {"city": "berlin"}}))));
        assert!(!filter.matches(&doc(json!({"address": {"city": "munich"}}))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = factory().wrapped(br#"{"bogus": 1}"#).expect_err("unknown");
        assert!(err.to_string().contains("not a schema field"));
    }

    #[test]
    fn test_logical_needs_two() {
        let err = factory()
            .wrapped(br#"{"$or": [{"k1": "a"}]}"#)
            .expect_err("single child");
        assert!(err.to_string().contains("minimum 2 filters"));
    }

    #[test]
    fn test_none_detection() {
        assert!(none(b""));
        assert!(none(b"{}"));
        let filter = factory().wrapped(b"{}").expect("parse");
        assert!(filter.none());
        assert!(filter.matches(&doc(json!({"k1": "anything"}))));
    }

    #[test]
    fn test_search_filter_rendering() {
        let filter = factory()
            .wrapped(br#"{"k1": "a", "k2": {"$gt": 5}}"#)
            .expect("parse");
        assert_eq!(filter.to_search_filter(), vec!["k1:=a&&k2:>5".to_owned()]);
    }

    #[test]
    fn test_search_filter_or_expansion() {
        let filter = factory()
            .wrapped(br#"{"$and": [{"k1": "a"}, {"$or": [{"k2": 1}, {"k2": 2}]}]}"#)
            .expect("parse");
        assert_eq!(
            filter.to_search_filter(),
            vec!["k1:=a&&k2:=1".to_owned(), "k1:=a&&k2:=2".to_owned()]
        );
    }

    #[test]
    fn test_search_filter_in_rendering() {
        let filter = factory()
            .wrapped(br#"{"k1": {"$in": ["a", "b"]}}"#)
            .expect("parse");
        assert_eq!(filter.to_search_filter(), vec!["k1:=[a,b]".to_owned()]);
    }
}
