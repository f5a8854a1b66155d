//! Reserved subspace names.
//!
//! Dictionary, schema, namespace-metadata, and cluster records live in
//! disjoint key prefixes enumerated here, all outside the `data` prefix
//! of user rows. Tests construct registries with their own names to stay
//! isolated.

/// Names of the reserved metadata subspaces.
#[derive(Debug, Clone)]
pub struct NameRegistry {
    pub reserved_sb: String,
    pub encoding_sb: String,
    pub schema_sb: String,
    pub search_schema_sb: String,
    pub namespace_sb: String,
    pub version_sb: String,
    pub counter_sb: String,
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self {
            reserved_sb: "reserved".to_owned(),
            encoding_sb: "encoding".to_owned(),
            schema_sb: "schema".to_owned(),
            search_schema_sb: "search_schema".to_owned(),
            namespace_sb: "namespace_meta".to_owned(),
            version_sb: "version".to_owned(),
            counter_sb: "table_counter".to_owned(),
        }
    }
}

impl NameRegistry {
    pub fn reserved_subspace(&self) -> Vec<u8> {
        self.reserved_sb.as_bytes().to_vec()
    }

    pub fn encoding_subspace(&self) -> Vec<u8> {
        self.encoding_sb.as_bytes().to_vec()
    }

    pub fn schema_subspace(&self) -> Vec<u8> {
        self.schema_sb.as_bytes().to_vec()
    }

    pub fn search_schema_subspace(&self) -> Vec<u8> {
        self.search_schema_sb.as_bytes().to_vec()
    }

    pub fn namespace_subspace(&self) -> Vec<u8> {
        self.namespace_sb.as_bytes().to_vec()
    }

    pub fn version_subspace(&self) -> Vec<u8> {
        self.version_sb.as_bytes().to_vec()
    }

    pub fn counter_subspace(&self) -> Vec<u8> {
        self.counter_sb.as_bytes().to_vec()
    }
}
