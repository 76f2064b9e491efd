//! # Fleet Inventory Core
//!
//! Shared types and traits for the Fleet Inventory system.
//!
//! This crate provides:
//! - Type definitions for the inventory entity graph (projects, regions,
//!   cells, devices, networks, labels, users)
//! - Tenant scoping context and id newtypes
//! - Variable ownership and blame types
//! - Pagination parameter and link types
//! - The `InventoryStore` trait seam consumed by the external HTTP layer

pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use traits::{InventoryStore, VariableOwner};
pub use types::{
    Blame, DeviceKind, DeviceType, OwnerRef, PageLink, PageLinks, PageParams, Resource,
    ResourceKind, SortDir, SourceRef, TenantContext, TenantId, UserId, VariableMap,
};
