//! Core traits for the inventory system

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::types::{
    Blame, Cell, Device, Label, Network, NetworkInterface, OwnerRef, Project, Region, Resource,
    ResourceKind, SourceRef, TenantContext, User, VariableMap,
};

/// Anything that can directly own variables and therefore appear as a
/// resolution or blame source.
pub trait VariableOwner {
    fn source_ref(&self) -> SourceRef;

    fn owner_ref(&self) -> OwnerRef {
        let source = self.source_ref();
        OwnerRef::new(source.kind, source.id)
    }
}

macro_rules! impl_variable_owner {
    ($entity:ty, $kind:expr, $name_field:ident) => {
        impl VariableOwner for $entity {
            fn source_ref(&self) -> SourceRef {
                SourceRef {
                    kind: $kind,
                    id: self.id.clone(),
                    name: self.$name_field.clone(),
                }
            }
        }
    };
}

impl_variable_owner!(Project, ResourceKind::Project, name);
impl_variable_owner!(Region, ResourceKind::Region, name);
impl_variable_owner!(Cell, ResourceKind::Cell, name);
impl_variable_owner!(Device, ResourceKind::Device, name);
impl_variable_owner!(Network, ResourceKind::Network, name);
impl_variable_owner!(NetworkInterface, ResourceKind::NetworkInterface, name);
impl_variable_owner!(Label, ResourceKind::Label, name);
impl_variable_owner!(User, ResourceKind::User, username);

/// The seam between the inventory core and the external HTTP resource
/// layer: resource lookup, variable mutation, and the resolved/blame views.
/// Entity CRUD and list operations live on the concrete backend.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    type Error;

    async fn resource_get(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Resource, Self::Error>;

    /// The owner's own variables only, no inheritance.
    async fn variables_get(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
    ) -> Result<VariableMap, Self::Error>;

    /// Merge-by-key upsert; returns the owner's full mapping afterwards.
    async fn variables_upsert(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
        vars: VariableMap,
    ) -> Result<VariableMap, Self::Error>;

    /// Removes each present key; absent keys are silently ignored.
    async fn variables_delete(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
        keys: &[String],
    ) -> Result<VariableMap, Self::Error>;

    /// The merged, precedence-applied mapping visible to a host.
    async fn resolved_variables(
        &self,
        ctx: &TenantContext,
        device_id: &str,
    ) -> Result<VariableMap, Self::Error>;

    /// Per-key source attribution over the same chain as resolution.
    /// `keys = None` blames every key in the resolved view.
    async fn blame_variables(
        &self,
        ctx: &TenantContext,
        device_id: &str,
        keys: Option<&[String]>,
    ) -> Result<BTreeMap<String, Blame>, Self::Error>;
}
