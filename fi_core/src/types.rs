use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use validator::Validate;

/// A variable mapping as stored on a single owner, or produced by the
/// resolution engine. `BTreeMap` keeps iteration deterministic.
pub type VariableMap = BTreeMap<String, serde_json::Value>;

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid tenant ID"))
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid user ID"))
    }
}

/// Opaque scoping token supplied by the external auth collaborator.
///
/// The tenant id is the caller's project id. `is_root` grants cross-project
/// visibility and project lifecycle operations; `is_admin` grants user
/// mutation inside the caller's own project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_admin: bool,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            is_root: false,
            is_admin: false,
        }
    }

    pub fn admin(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            is_root: false,
            is_admin: true,
        }
    }

    pub fn root(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            is_root: true,
            is_admin: true,
        }
    }

    /// Whether project-scoped queries may skip the tenant filter.
    #[must_use]
    pub fn sees_all_projects(&self) -> bool {
        self.is_root
    }

    /// Whether the caller may mutate users within its own project.
    #[must_use]
    pub fn can_manage_users(&self) -> bool {
        self.is_root || self.is_admin
    }
}

/// Discriminator for every addressable inventory resource. The snake_case
/// rendering doubles as the `owner_kind` column value in the variables table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Region,
    Cell,
    Device,
    Network,
    NetworkInterface,
    Label,
    User,
}

/// A (kind, id) handle addressing one variable owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    pub kind: ResourceKind,
    pub id: String,
}

impl OwnerRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Identifies the scope a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
}

/// Attribution of one resolved key: the scope that set it and the raw
/// stored value at that scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Blame {
    pub source: SourceRef,
    pub value: serde_json::Value,
}

/// Tenant boundary. The project id is also the `TenantId` carried by
/// `TenantContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub project_id: TenantId,
    pub name: String,
    pub note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: String,
    pub project_id: TenantId,
    pub region_id: String,
    pub name: String,
    pub note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Plain discriminator used in filters and the `device_type` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceType {
    Host,
    NetworkDevice,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDeviceAttrs {
    pub model_name: Option<String>,
    pub os_version: Option<String>,
}

/// Tagged device variant over one shared base record. Resolution applies to
/// `Host` only; dispatch points check the discriminant instead of relying on
/// subtype tables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DeviceKind {
    #[default]
    Host,
    NetworkDevice(NetworkDeviceAttrs),
}

impl DeviceKind {
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceKind::Host => DeviceType::Host,
            DeviceKind::NetworkDevice(_) => DeviceType::NetworkDevice,
        }
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        matches!(self, DeviceKind::Host)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub project_id: TenantId,
    pub region_id: String,
    pub cell_id: Option<String>,
    pub parent_id: Option<String>,
    pub name: String,
    pub ip_address: Option<String>,
    pub active: bool,
    pub kind: DeviceKind,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Global (not project-scoped) tag entity, deduplicated by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub project_id: TenantId,
    pub region_id: String,
    pub cell_id: Option<String>,
    pub name: String,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub netmask: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub id: String,
    pub project_id: TenantId,
    pub device_id: String,
    pub name: String,
    pub interface_type: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub project_id: TenantId,
    pub username: String,
    pub is_admin: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Tagged union over every entity, returned by `resource_get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Resource {
    Project(Project),
    Region(Region),
    Cell(Cell),
    Device(Device),
    Network(Network),
    NetworkInterface(NetworkInterface),
    Label(Label),
    User(User),
}

impl Resource {
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Project(_) => ResourceKind::Project,
            Resource::Region(_) => ResourceKind::Region,
            Resource::Cell(_) => ResourceKind::Cell,
            Resource::Device(_) => ResourceKind::Device,
            Resource::Network(_) => ResourceKind::Network,
            Resource::NetworkInterface(_) => ResourceKind::NetworkInterface,
            Resource::Label(_) => ResourceKind::Label,
            Resource::User(_) => ResourceKind::User,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Resource::Project(r) => &r.id,
            Resource::Region(r) => &r.id,
            Resource::Cell(r) => &r.id,
            Resource::Device(r) => &r.id,
            Resource::Network(r) => &r.id,
            Resource::NetworkInterface(r) => &r.id,
            Resource::Label(r) => &r.id,
            Resource::User(r) => &r.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Resource::Project(r) => &r.name,
            Resource::Region(r) => &r.name,
            Resource::Cell(r) => &r.name,
            Resource::Device(r) => &r.name,
            Resource::Network(r) => &r.name,
            Resource::NetworkInterface(r) => &r.name,
            Resource::Label(r) => &r.name,
            Resource::User(r) => &r.username,
        }
    }

    #[must_use]
    pub fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(self.kind(), self.id())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    EnumString,
    Display,
    Default,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

/// Marker-based pagination request. The marker is the id of the last item
/// of the previously returned page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub limit: Option<u32>,
    pub marker: Option<String>,
    #[serde(default)]
    pub sort_dir: SortDir,
}

impl PageParams {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn after(marker: impl Into<String>, limit: u32) -> Self {
        Self {
            limit: Some(limit),
            marker: Some(marker.into()),
            sort_dir: SortDir::Asc,
        }
    }
}

/// One pagination link: the parameters reproducing a page. URL rendering
/// belongs to the external HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    pub marker: Option<String>,
    pub limit: u32,
}

/// Navigation links for one page. `prev` is always present and points to
/// the first page (no marker) when the current page is the first; `next`
/// is present iff the current page is full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageLinks {
    pub first: PageLink,
    #[serde(rename = "self")]
    pub current: PageLink,
    pub prev: PageLink,
    pub next: Option<PageLink>,
}

/// One page of results plus its navigation links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub links: PageLinks,
}

// ---------------------------------------------------------------------------
// Create / update payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreate {
    #[validate(custom(function = "validate_resource_name"))]
    pub name: String,
}

/// Project rename. Name validity is checked by the backend since the field
/// is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegionCreate {
    #[validate(custom(function = "validate_resource_name"))]
    pub name: String,
    #[validate(length(max = 255))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegionUpdate {
    #[validate(length(max = 255))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellCreate {
    pub region_id: String,
    #[validate(custom(function = "validate_resource_name"))]
    pub name: String,
    #[validate(length(max = 255))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellUpdate {
    #[validate(length(max = 255))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCreate {
    pub region_id: String,
    pub cell_id: Option<String>,
    pub parent_id: Option<String>,
    #[validate(custom(function = "validate_resource_name"))]
    pub name: String,
    pub ip_address: Option<String>,
    #[serde(default)]
    pub kind: DeviceKind,
}

/// Scalar device updates. Re-parenting goes through `device_set_parent`,
/// which is where the cycle check lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    pub cell_id: Option<String>,
    pub ip_address: Option<String>,
    pub active: Option<bool>,
    pub model_name: Option<String>,
    pub os_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCreate {
    pub region_id: String,
    pub cell_id: Option<String>,
    #[validate(custom(function = "validate_resource_name"))]
    pub name: String,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub netmask: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkUpdate {
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub netmask: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceCreate {
    pub device_id: String,
    #[validate(custom(function = "validate_resource_name"))]
    pub name: String,
    pub interface_type: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceUpdate {
    pub interface_type: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserCreate {
    #[validate(custom(function = "validate_resource_name"))]
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub is_admin: Option<bool>,
}

// ---------------------------------------------------------------------------
// List filters
// ---------------------------------------------------------------------------

/// Recognized scalar filters for device listings plus the structured `vars`
/// expression (see the `varfilter` crate for the grammar).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilters {
    pub region_id: Option<String>,
    pub cell_id: Option<String>,
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub device_type: Option<DeviceType>,
    pub label: Option<String>,
    pub vars: Option<String>,
}

impl DeviceFilters {
    /// Build filters from a raw key/value query mapping. Recognized keys
    /// populate scalar fields; unrecognized keys are routed to the variable
    /// filter path as `key:value` clauses ANDed onto any explicit `vars`
    /// expression.
    #[must_use]
    pub fn from_pairs(pairs: &BTreeMap<String, String>) -> Self {
        let mut filters = Self::default();
        let mut var_clauses: Vec<String> = Vec::new();
        for (key, value) in pairs {
            match key.as_str() {
                "region_id" => filters.region_id = Some(value.clone()),
                "cell_id" => filters.cell_id = Some(value.clone()),
                "name" => filters.name = Some(value.clone()),
                "ip_address" => filters.ip_address = Some(value.clone()),
                "device_type" => filters.device_type = value.parse().ok(),
                "label" => filters.label = Some(value.clone()),
                "vars" => var_clauses.insert(0, value.clone()),
                _ => var_clauses.push(format!("{}:{}", key, value)),
            }
        }
        if !var_clauses.is_empty() {
            filters.vars = Some(var_clauses.join(","));
        }
        filters
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegionFilters {
    pub name: Option<String>,
    pub vars: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellFilters {
    pub region_id: Option<String>,
    pub name: Option<String>,
    pub vars: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFilters {
    pub region_id: Option<String>,
    pub cell_id: Option<String>,
    pub name: Option<String>,
    pub vars: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserFilters {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelFilters {
    pub name: Option<String>,
}

pub fn validate_resource_name(name: &str) -> Result<(), validator::ValidationError> {
    if name.is_empty() {
        return Err(validator::ValidationError::new("name cannot be empty"));
    }
    if !utils::is_valid_resource_name(name) {
        return Err(validator::ValidationError::new("invalid resource name"));
    }
    Ok(())
}
