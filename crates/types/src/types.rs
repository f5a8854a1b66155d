//! Identifier types and naming for Lodestone.
//!
//! Every key persisted in the transactional store is prefixed by the
//! dictionary-encoded ids defined here. Ids are dense 32-bit values
//! allocated by the metadata dictionary and never reused.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The namespace every deployment starts with when no finer isolation is
/// configured.
pub const DEFAULT_NAMESPACE_NAME: &str = "default_namespace";

/// Id assigned to [`DEFAULT_NAMESPACE_NAME`].
pub const DEFAULT_NAMESPACE_ID: u32 = 1;

/// Name of the main branch of every database.
pub const MAIN_BRANCH: &str = "main";

/// Separator between the project name and the branch name in the
/// internally persisted database name.
pub const BRANCH_SEPARATOR: &str = "_$branch$_";

/// Generates a newtype wrapper around `u32` for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<u32>`/`Into<u32>` conversions
/// - `Display` with a semantic prefix (e.g., `ns:123`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> u32 {
                self.0
            }

            /// Returns true if this is the invalid (zero) id.
            #[inline]
            pub const fn is_invalid(self) -> bool {
                self.0 == 0
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a namespace (tenant-level isolation).
    ///
    /// The namespace id is the first dictionary-encoded component of every
    /// persisted key.
    NamespaceId, "ns"
);

define_id!(
    /// Unique identifier for a database (a project's main database or one
    /// of its branches).
    DatabaseId, "db"
);

define_id!(
    /// Unique identifier for a collection within a database.
    CollectionId, "coll"
);

define_id!(
    /// Unique identifier for an index within a collection. The primary key
    /// index is conceptually always id 1.
    IndexId, "idx"
);

/// The invalid id returned by dictionary lookups for dropped or missing
/// names. Valid ids are always non-zero.
pub const INVALID_ID: u32 = 0;

/// Metadata persisted for a reserved namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMetadata {
    /// Unique namespace id.
    pub id: u32,
    /// Unique lookup name.
    pub str_id: String,
    /// Human-facing display name.
    pub name: String,
}

impl NamespaceMetadata {
    pub fn new(id: u32, str_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id, str_id: str_id.into(), name: name.into() }
    }
}

/// A database name split into its project part and branch part.
///
/// The main branch is persisted as the bare project name; any other branch
/// is persisted as `"{project}{BRANCH_SEPARATOR}{branch}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseName {
    project: String,
    branch: String,
}

impl DatabaseName {
    /// Parses an internally persisted database name.
    pub fn parse(name: &str) -> Self {
        match name.split_once(BRANCH_SEPARATOR) {
            Some((project, branch)) => Self {
                project: project.to_owned(),
                branch: branch.to_owned(),
            },
            None => Self {
                project: name.to_owned(),
                branch: MAIN_BRANCH.to_owned(),
            },
        }
    }

    /// Builds a database name from a project and a branch. An empty branch
    /// means the main branch.
    pub fn with_branch(project: impl Into<String>, branch: impl Into<String>) -> Self {
        let branch: String = branch.into();
        Self {
            project: project.into(),
            branch: if branch.is_empty() { MAIN_BRANCH.to_owned() } else { branch },
        }
    }

    /// The project part of the name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The branch part of the name (`"main"` for the main branch).
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// True if this names the main branch.
    pub fn is_main(&self) -> bool {
        self.branch == MAIN_BRANCH
    }

    /// The internally persisted form of this name.
    pub fn persisted(&self) -> String {
        if self.is_main() {
            self.project.clone()
        } else {
            format!("{}{}{}", self.project, BRANCH_SEPARATOR, self.branch)
        }
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.persisted())
    }
}
