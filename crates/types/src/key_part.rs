//! Typed primary-key tuple parts.
//!
//! A row's primary key is an ordered tuple of these values. The key
//! encoder maps them to an order-preserving binary form; the key builder
//! extracts them from filters.

use std::fmt;

/// One concrete value of a primary-key tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Integer(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl KeyPart {
    /// Renders the part the way responses echo primary keys.
    pub fn to_display_string(&self) -> String {
        match self {
            KeyPart::Integer(v) => v.to_string(),
            KeyPart::String(v) => v.clone(),
            KeyPart::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Integer(value)
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::String(value.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::String(value)
    }
}

impl From<Vec<u8>> for KeyPart {
    fn from(value: Vec<u8>) -> Self {
        KeyPart::Bytes(value)
    }
}
