//! # Fleet Inventory Errors
//!
//! Error taxonomy shared across the inventory crates.
//!
//! The external HTTP layer maps each variant to a status code (`NotFound` →
//! 404, `Duplicate` → 409, `BadRequest` → 400, `AdminRequired` → 401,
//! `Unknown` → 500); that mapping lives outside this workspace, only the
//! typed contract is defined here.

use thiserror::Error;

/// Inventory core errors
#[derive(Debug, Error)]
pub enum InventoryError {
    /// An id/name lookup yielded zero rows within the caller's scope.
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// A uniqueness constraint was violated on create, mapped from the
    /// store's integrity-constraint error rather than guessed pre-insert.
    #[error("Duplicate {resource}: {name}")]
    Duplicate { resource: String, name: String },

    /// Invalid marker, parent cycle, malformed filter expression, or a
    /// delete rejected by referential integrity.
    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    /// Caller lacks the required (project-)admin scope.
    #[error("Admin scope required: {reason}")]
    AdminRequired { reason: String },

    /// Any other unexpected failure from the backing store. The original
    /// message is logged in full and kept out of the variant.
    #[error("Internal error: {message}")]
    Unknown { message: String },
}

impl InventoryError {
    pub fn not_found(resource: impl std::fmt::Display, id: impl Into<String>) -> Self {
        InventoryError::NotFound {
            resource: resource.to_string(),
            id: id.into(),
        }
    }

    pub fn duplicate(resource: impl std::fmt::Display, name: impl Into<String>) -> Self {
        InventoryError::Duplicate {
            resource: resource.to_string(),
            name: name.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        InventoryError::BadRequest {
            reason: reason.into(),
        }
    }

    pub fn admin_required(reason: impl Into<String>) -> Self {
        InventoryError::AdminRequired {
            reason: reason.into(),
        }
    }

    /// Wrap an unexpected backing-store failure. The full error is logged
    /// here; callers see a generic message plus the failed operation name.
    pub fn unknown(operation: &str, source: impl std::fmt::Display) -> Self {
        tracing::error!("unexpected storage failure in {}: {}", operation, source);
        InventoryError::Unknown {
            message: format!("unexpected failure in {}", operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = InventoryError::not_found("region", "r-1");
        assert_eq!(err.to_string(), "region not found: r-1");

        let err = InventoryError::duplicate("cell", "compute-1");
        assert_eq!(err.to_string(), "Duplicate cell: compute-1");

        let err = InventoryError::bad_request("Marker does not exist");
        assert!(err.to_string().contains("Marker does not exist"));
    }

    #[test]
    fn test_unknown_hides_source_detail() {
        let err = InventoryError::unknown("device_create", "connection reset by peer");
        assert!(!err.to_string().contains("connection reset"));
        assert!(err.to_string().contains("device_create"));
    }
}
