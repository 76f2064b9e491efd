//! # Variable Filter Expressions
//!
//! Structured path-based filtering over variable JSON values.
//!
//! A filter expression is a comma-separated list of `key[.path][index]:value`
//! clauses combined with AND semantics (there is no OR):
//!
//! - `datacenter:ORD1` — top-level key equals a string
//! - `hardware_profiles.disks[*].size:4096` — some array element matches
//! - `ports[0]:22` — exact array index
//! - `"dotted.key".inner:true` — quoted segments for special keys
//!
//! Value comparison is type-aware strict JSON equality: a quoted literal
//! always compares as a string, an unquoted literal is interpreted as int,
//! float, bool or null before falling back to string. `1` never matches a
//! stored `"1"`.
//!
//! Two evaluators share the parsed form: an in-memory matcher (total over
//! arbitrary JSON, a path/type mismatch is simply "no match") and a
//! Postgres jsonpath renderer consumed by the storage crate through
//! `jsonb_path_exists`.

pub mod jsonpath;
pub mod matcher;
pub mod parser;

pub use jsonpath::clause_jsonpath;
pub use matcher::{clause_matches, filter_matches};
pub use parser::{Clause, FilterParseError, Literal, Segment, VarsFilter};
