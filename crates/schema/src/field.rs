//! Field model parsed from collection schema JSON.

use serde_json::Value;

use crate::reserved::OBJ_FLATTEN_DELIMITER;

/// Concrete type of a schema field, combining the JSON schema `type` and
/// `format` keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Number,
    String,
    Bytes,
    Uuid,
    DateTime,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// Parses the `type`/`format` pair of a property definition.
    pub fn parse(ty: &str, format: Option<&str>) -> Option<Self> {
        match (ty, format) {
            ("integer", _) => Some(FieldType::Integer),
            ("number", _) => Some(FieldType::Number),
            ("string", Some("byte")) => Some(FieldType::Bytes),
            ("string", Some("uuid")) => Some(FieldType::Uuid),
            ("string", Some("date-time")) => Some(FieldType::DateTime),
            ("string", _) => Some(FieldType::String),
            ("boolean", _) => Some(FieldType::Boolean),
            ("array", _) => Some(FieldType::Array),
            ("object", _) => Some(FieldType::Object),
            _ => None,
        }
    }

    /// The `type` keyword this field type serializes back to.
    pub fn type_keyword(self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String | FieldType::Bytes | FieldType::Uuid | FieldType::DateTime => {
                "string"
            }
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// The `format` keyword, when one applies.
    pub fn format_keyword(self) -> Option<&'static str> {
        match self {
            FieldType::Bytes => Some("byte"),
            FieldType::Uuid => Some("uuid"),
            FieldType::DateTime => Some("date-time"),
            _ => None,
        }
    }

    /// True for types usable as a primary-key part.
    pub fn primary_key_capable(self) -> bool {
        matches!(
            self,
            FieldType::Integer
                | FieldType::String
                | FieldType::Bytes
                | FieldType::Uuid
                | FieldType::DateTime
        )
    }

    /// True for scalar types the search store indexes natively.
    pub fn scalar(self) -> bool {
        !matches!(self, FieldType::Array | FieldType::Object)
    }
}

/// A single parsed schema field. Object fields carry their children;
/// array fields carry their item type.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub data_type: FieldType,
    pub max_length: Option<u32>,
    pub required: bool,
    /// Literal default filled into missing fields on insert.
    pub default: Option<Value>,
    /// Fill with the row creation time on insert.
    pub created_at_tag: bool,
    /// Fill with the mutation time on every write.
    pub updated_at_tag: bool,
    /// Generate a value for missing primary-key parts.
    pub auto_generate: bool,
    pub sortable: bool,
    pub faceted: bool,
    /// Children of an object field.
    pub fields: Vec<Field>,
    /// Item type of an array field.
    pub items: Option<FieldType>,
}

impl Field {
    /// True if this field carries a default applied on insert.
    pub fn has_insert_default(&self) -> bool {
        self.default.is_some() || self.created_at_tag || self.updated_at_tag
    }
}

/// A field addressable in filters, sorts, facets, and the search index.
/// Nested object leaves appear with dot-delimited names.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryableField {
    /// Full dot-delimited path.
    pub name: String,
    /// Leaf name within its parent.
    pub field_name: String,
    pub data_type: FieldType,
    /// Search store type this field maps to.
    pub search_type: &'static str,
    pub indexed: bool,
    pub faceted: bool,
    pub sortable: bool,
    /// Item type when `data_type` is array.
    pub items: Option<FieldType>,
}

impl QueryableField {
    /// Whether the stored value must be transformed before indexing:
    /// date-times become unix nanos (with a shadow string), non-string
    /// arrays and free-form objects are JSON-stringified.
    pub fn should_pack(&self) -> bool {
        match self.data_type {
            FieldType::DateTime => true,
            FieldType::Array => self.search_type != "string[]",
            FieldType::Object => true,
            _ => false,
        }
    }
}

fn search_type_of(field: &Field) -> &'static str {
    match field.data_type {
        FieldType::Integer => "int64",
        FieldType::Number => "float",
        FieldType::Boolean => "bool",
        FieldType::String | FieldType::Bytes | FieldType::Uuid => "string",
        FieldType::DateTime => "int64",
        FieldType::Array => match field.items {
            Some(FieldType::String) | Some(FieldType::Uuid) => "string[]",
            _ => "string",
        },
        // free-form objects are stringified; typed objects are flattened
        // into their leaves and never reach here
        FieldType::Object => "string",
    }
}

/// Builds the queryable-field list for a schema: top-level scalar fields
/// plus flattened object leaves.
pub fn build_queryable_fields(fields: &[Field]) -> Vec<QueryableField> {
    let mut out = Vec::new();
    for field in fields {
        push_queryable(field, "", &mut out);
    }
    out
}

fn push_queryable(field: &Field, parent: &str, out: &mut Vec<QueryableField>) {
    let name = if parent.is_empty() {
        field.name.clone()
    } else {
        format!("{parent}{OBJ_FLATTEN_DELIMITER}{}", field.name)
    };

    if field.data_type == FieldType::Object && !field.fields.is_empty() {
        for child in &field.fields {
            push_queryable(child, &name, out);
        }
        return;
    }

    out.push(QueryableField {
        field_name: field.name.clone(),
        search_type: search_type_of(field),
        indexed: field.data_type.scalar(),
        faceted: field.faceted,
        sortable: field.sortable,
        data_type: field.data_type,
        items: field.items,
        name,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, data_type: FieldType) -> Field {
        Field {
            name: name.to_owned(),
            data_type,
            max_length: None,
            required: false,
            default: None,
            created_at_tag: false,
            updated_at_tag: false,
            auto_generate: false,
            sortable: false,
            faceted: false,
            fields: Vec::new(),
            items: None,
        }
    }

    #[test]
    fn test_field_type_parse() {
        assert_eq!(FieldType::parse("string", Some("uuid")), Some(FieldType::Uuid));
        assert_eq!(FieldType::parse("string", Some("date-time")), Some(FieldType::DateTime));
        assert_eq!(FieldType::parse("string", None), Some(FieldType::String));
        assert_eq!(FieldType::parse("integer", None), Some(FieldType::Integer));
        assert_eq!(FieldType::parse("interval", None), None);
    }

    #[test]
    fn test_nested_object_flattening() {
        let mut address = field("address", FieldType::Object);
        address.fields = vec![field("city", FieldType::String), field("zip", FieldType::Integer)];
        let fields = vec![field("name", FieldType::String), address];

        let queryable = build_queryable_fields(&fields);
        let names: Vec<&str> = queryable.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "address.city", "address.zip"]);
        assert_eq!(queryable[1].field_name, "city");
        assert_eq!(queryable[2].search_type, "int64");
    }

    #[test]
    fn test_pack_decisions() {
        let date = field("placed_at", FieldType::DateTime);
        let queryable = build_queryable_fields(&[date]);
        assert!(queryable[0].should_pack());

        let mut tags = field("tags", FieldType::Array);
        tags.items = Some(FieldType::String);
        let queryable = build_queryable_fields(&[tags]);
        assert_eq!(queryable[0].search_type, "string[]");
        assert!(!queryable[0].should_pack());

        let mut scores = field("scores", FieldType::Array);
        scores.items = Some(FieldType::Integer);
        let queryable = build_queryable_fields(&[scores]);
        assert!(queryable[0].should_pack());
    }
}
