//! Query factories for Lodestone.
//!
//! Parses the JSON fragments of a request into executable forms:
//! - [`filter`]: the filter AST (`Selector`/`And`/`Or`) with document
//!   matching, index-usability checks, and search-filter rendering
//! - [`key_builder`]: extraction of fully bound primary-key tuples from a
//!   filter
//! - [`sort`]: sort orderings
//! - [`update`]: the `$set`/`$unset`/`$increment` field operators with
//!   deep merge and primary-key-mutation detection
//! - [`projection`]: read-field selection

pub mod filter;
pub mod key_builder;
pub mod projection;
pub mod sort;
pub mod update;

pub use filter::{ComparisonOp, Filter, FilterFactory, Selector, WrappedFilter};
pub use key_builder::KeyBuilder;
pub use projection::FieldProjection;
pub use sort::{parse_sort, SortKey};
pub use update::FieldOperators;
