//! # Fleet Inventory Utilities
//!
//! Common utility functions for id generation, timestamps, and input
//! validation shared by the inventory crates.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

/// Resource names: leading alphanumeric, then alphanumerics plus `_ . -`.
/// Bounded at 255 to match the storage column contract.
static RESOURCE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,254}$").expect("valid regex"));

/// Generate UUID v4 string
///
/// # Examples
///
/// ```
/// use utils::generate_uuid;
///
/// let id = generate_uuid();
/// assert_eq!(id.len(), 36);
/// ```
#[must_use]
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as epoch seconds, the timestamp representation used by every
/// persisted row.
#[must_use]
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Validate a resource name (region, cell, device, network, label, user).
///
/// # Examples
///
/// ```
/// use utils::is_valid_resource_name;
///
/// assert!(is_valid_resource_name("compute-cell-1"));
/// assert!(!is_valid_resource_name(""));
/// assert!(!is_valid_resource_name(".hidden"));
/// ```
#[must_use]
pub fn is_valid_resource_name(name: &str) -> bool {
    RESOURCE_NAME_RE.is_match(name)
}

/// Validate a variable key. Keys are freeform apart from being non-empty,
/// bounded, and free of control characters.
#[must_use]
pub fn is_valid_variable_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 255 && !key.chars().any(char::is_control)
}
