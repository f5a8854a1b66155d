//! Reserved field names used when mirroring rows into the search store.
//!
//! User documents never carry these names; they are added while packing
//! and stripped while unpacking.

/// Document id field expected by the search store.
pub const SEARCH_ID: &str = "id";

/// Prefix of every reserved field added by the server.
pub const RESERVED_PREFIX: &str = "_lodestone_";

/// Holds the user's own `id` value while [`SEARCH_ID`] carries the
/// search key.
pub const ID_TO_SEARCH_KEY: &str = "_lodestone_id";

/// Row creation time in unix nanoseconds.
pub const CREATED_AT: &str = "_lodestone_created_at";

/// Row update time in unix nanoseconds.
pub const UPDATED_AT: &str = "_lodestone_updated_at";

/// Marker substituted for `null` elements inside string arrays, which the
/// search store cannot represent.
pub const ARR_NULL_ITEM: &str = "_lodestone_null";

/// Delimiter used when flattening nested objects into field paths.
pub const OBJ_FLATTEN_DELIMITER: &str = ".";

/// Date-time wire format accepted in documents.
pub const DATE_TIME_FORMAT: &str = "%+";

/// Shadow key preserving the original date-time string next to its packed
/// unix-nano form.
pub fn to_search_date_key(key: &str) -> String {
    format!("{RESERVED_PREFIX}date_{key}")
}
