use std::collections::BTreeMap;

use async_trait::async_trait;
use errors::InventoryError;
use fi_core::traits::{InventoryStore, VariableOwner};
use fi_core::types::{
    Blame, OwnerRef, Resource, ResourceKind, TenantContext, VariableMap,
};
use resolution::{ResolvedView, VariableLayer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{AssertSqlSafe, PgPool, Postgres, Row, Transaction};

use crate::rows;

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn new(connection_url: &str) -> Result<Self, InventoryError> {
        let pool = PgPool::connect(connection_url)
            .await
            .map_err(|e| InventoryError::unknown("connect", e))?;
        Ok(Self { pool })
    }

    pub async fn from_config(postgres: &config::PostgresConfig) -> Result<Self, InventoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(postgres.pool_size)
            .acquire_timeout(std::time::Duration::from_secs(postgres.timeout_seconds))
            .connect(&postgres.connection_url())
            .await
            .map_err(|e| InventoryError::unknown("connect", e))?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn initialize_schema(&self) -> Result<(), InventoryError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS regions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE RESTRICT,
                name TEXT NOT NULL,
                note TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (project_id, name)
            )",
            "CREATE TABLE IF NOT EXISTS cells (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                region_id TEXT NOT NULL REFERENCES regions(id) ON DELETE RESTRICT,
                name TEXT NOT NULL,
                note TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (region_id, name)
            )",
            "CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                region_id TEXT NOT NULL REFERENCES regions(id) ON DELETE RESTRICT,
                cell_id TEXT REFERENCES cells(id) ON DELETE RESTRICT,
                parent_id TEXT REFERENCES devices(id) ON DELETE RESTRICT,
                device_type TEXT NOT NULL,
                name TEXT NOT NULL,
                ip_address TEXT,
                model_name TEXT,
                os_version TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (region_id, name)
            )",
            "CREATE TABLE IF NOT EXISTS labels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS device_labels (
                device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
                label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
                PRIMARY KEY (device_id, label_id)
            )",
            "CREATE TABLE IF NOT EXISTS networks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                region_id TEXT NOT NULL REFERENCES regions(id) ON DELETE RESTRICT,
                cell_id TEXT REFERENCES cells(id) ON DELETE RESTRICT,
                name TEXT NOT NULL,
                cidr TEXT,
                gateway TEXT,
                netmask TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (region_id, name)
            )",
            "CREATE TABLE IF NOT EXISTS network_interfaces (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE RESTRICT,
                name TEXT NOT NULL,
                interface_type TEXT,
                ip_address TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (device_id, name)
            )",
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE RESTRICT,
                username TEXT NOT NULL,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (project_id, username)
            )",
            "CREATE TABLE IF NOT EXISTS variables (
                owner_kind TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value JSONB NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (owner_kind, owner_id, key)
            )",
            "CREATE INDEX IF NOT EXISTS idx_regions_project ON regions(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_cells_region ON cells(region_id)",
            "CREATE INDEX IF NOT EXISTS idx_devices_region ON devices(region_id)",
            "CREATE INDEX IF NOT EXISTS idx_devices_cell ON devices(cell_id)",
            "CREATE INDEX IF NOT EXISTS idx_devices_page ON devices(created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_networks_region ON networks(region_id)",
            "CREATE INDEX IF NOT EXISTS idx_interfaces_device ON network_interfaces(device_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| InventoryError::unknown("initialize_schema", e))?;
        }

        tracing::info!("inventory schema initialized");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Variable store
    // -----------------------------------------------------------------

    /// The owner's own variables, no inheritance. Like the mutations, the
    /// access bumps the owner's `updated_at`, so it runs under the same
    /// row lock.
    pub async fn variables_get(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
    ) -> Result<VariableMap, InventoryError> {
        let mut tx = self.begin().await?;
        lock_owner(&mut tx, ctx, owner).await?;
        touch_owner(&mut tx, owner, utils::now_timestamp()).await?;
        let result = fetch_variables(&mut *tx, owner).await?;
        self.commit(tx).await?;
        Ok(result)
    }

    /// Merge-by-key upsert inside one transaction with the owner row locked,
    /// so concurrent writers to the same owner serialize instead of losing
    /// updates. Returns the owner's full mapping afterwards.
    pub async fn variables_upsert(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
        vars: VariableMap,
    ) -> Result<VariableMap, InventoryError> {
        for key in vars.keys() {
            if !utils::is_valid_variable_key(key) {
                return Err(InventoryError::bad_request(format!(
                    "invalid variable key: {key:?}"
                )));
            }
        }

        let mut tx = self.begin().await?;
        lock_owner(&mut tx, ctx, owner).await?;

        let now = utils::now_timestamp();
        for (key, value) in &vars {
            sqlx::query(
                "INSERT INTO variables (owner_kind, owner_id, key, value, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $5)
                 ON CONFLICT (owner_kind, owner_id, key)
                 DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
            )
            .bind(owner.kind.to_string())
            .bind(&owner.id)
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("variables_upsert", e))?;
        }

        touch_owner(&mut tx, owner, now).await?;
        let result = fetch_variables(&mut *tx, owner).await?;
        self.commit(tx).await?;
        Ok(result)
    }

    /// Delete the given keys; absent keys are silently ignored. Same
    /// locking discipline as upsert.
    pub async fn variables_delete(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
        keys: &[String],
    ) -> Result<VariableMap, InventoryError> {
        let mut tx = self.begin().await?;
        lock_owner(&mut tx, ctx, owner).await?;

        sqlx::query(
            "DELETE FROM variables WHERE owner_kind = $1 AND owner_id = $2 AND key = ANY($3)",
        )
        .bind(owner.kind.to_string())
        .bind(&owner.id)
        .bind(keys)
        .execute(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("variables_delete", e))?;

        touch_owner(&mut tx, owner, utils::now_timestamp()).await?;
        let result = fetch_variables(&mut *tx, owner).await?;
        self.commit(tx).await?;
        Ok(result)
    }

    // -----------------------------------------------------------------
    // Resolution and blame
    // -----------------------------------------------------------------

    /// Fetch a host's full ownership chain within one transaction snapshot
    /// and hand it to the pure resolution engine. Resolution is defined for
    /// hosts only; asking for a network device is a `BadRequest`.
    pub async fn device_resolved_view(
        &self,
        ctx: &TenantContext,
        device_id: &str,
    ) -> Result<ResolvedView, InventoryError> {
        let mut tx = self.begin().await?;

        let device_row = sqlx::query(
            "SELECT * FROM devices WHERE id = $1 AND ($2 OR project_id = $3)",
        )
        .bind(device_id)
        .bind(ctx.sees_all_projects())
        .bind(ctx.tenant_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("device_resolved_view", e))?
        .ok_or_else(|| InventoryError::not_found(ResourceKind::Device, device_id))?;

        let device = rows::row_to_device(&device_row)?;
        if !device.kind.is_host() {
            return Err(InventoryError::bad_request(
                "resolved variables are only defined for hosts",
            ));
        }

        let device_vars = fetch_variables(&mut *tx, &device.owner_ref()).await?;

        let label_rows = sqlx::query(
            "SELECT l.* FROM labels l
             JOIN device_labels dl ON dl.label_id = l.id
             WHERE dl.device_id = $1
             ORDER BY l.name",
        )
        .bind(device_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("device_resolved_view", e))?;

        let mut label_layers = Vec::with_capacity(label_rows.len());
        for row in &label_rows {
            let label = rows::row_to_label(row)?;
            let vars = fetch_variables(&mut *tx, &label.owner_ref()).await?;
            label_layers.push(VariableLayer::new(label.source_ref(), vars));
        }

        let cell_layer = match &device.cell_id {
            Some(cell_id) => {
                let row = sqlx::query("SELECT * FROM cells WHERE id = $1")
                    .bind(cell_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| InventoryError::unknown("device_resolved_view", e))?;
                let cell = rows::row_to_cell(&row)?;
                let vars = fetch_variables(&mut *tx, &cell.owner_ref()).await?;
                Some(VariableLayer::new(cell.source_ref(), vars))
            }
            None => None,
        };

        let region_row = sqlx::query("SELECT * FROM regions WHERE id = $1")
            .bind(&device.region_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_resolved_view", e))?;
        let region = rows::row_to_region(&region_row)?;
        let region_vars = fetch_variables(&mut *tx, &region.owner_ref()).await?;
        let region_layer = VariableLayer::new(region.source_ref(), region_vars);

        self.commit(tx).await?;

        let device_layer = VariableLayer::new(device.source_ref(), device_vars);
        Ok(ResolvedView::for_host(
            device_layer,
            label_layers,
            cell_layer,
            region_layer,
        ))
    }

    /// The merged, precedence-applied mapping visible to a host.
    pub async fn resolved_variables(
        &self,
        ctx: &TenantContext,
        device_id: &str,
    ) -> Result<VariableMap, InventoryError> {
        Ok(self.device_resolved_view(ctx, device_id).await?.resolved())
    }

    /// Who set each key: first source in `[device, labels sorted by name,
    /// cell, region]` whose own variables contain it, with the raw stored
    /// value. `keys = None` blames every key in the resolved view.
    pub async fn blame_variables(
        &self,
        ctx: &TenantContext,
        device_id: &str,
        keys: Option<&[String]>,
    ) -> Result<BTreeMap<String, Blame>, InventoryError> {
        Ok(self.device_resolved_view(ctx, device_id).await?.blame(keys))
    }

    // -----------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------

    pub(crate) async fn begin(&self) -> Result<Transaction<'_, Postgres>, InventoryError> {
        self.pool
            .begin()
            .await
            .map_err(|e| InventoryError::unknown("begin", e))
    }

    pub(crate) async fn commit(
        &self,
        tx: Transaction<'_, Postgres>,
    ) -> Result<(), InventoryError> {
        tx.commit()
            .await
            .map_err(|e| InventoryError::unknown("commit", e))
    }

}

/// `SELECT ... FOR UPDATE` the owner row so read-modify-write cycles on the
/// same owner serialize.
pub(crate) async fn lock_owner(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &TenantContext,
    owner: &OwnerRef,
) -> Result<(), InventoryError> {
    let table = owner_table(owner.kind);
    let sql = match owner_scope_column(owner.kind) {
        Some(column) => {
            format!("SELECT id FROM {table} WHERE id = $1 AND ($2 OR {column} = $3) FOR UPDATE")
        }
        None => format!("SELECT id FROM {table} WHERE id = $1 FOR UPDATE"),
    };

    let query = sqlx::query(AssertSqlSafe(sql)).bind(owner.id.clone());
    let query = match owner_scope_column(owner.kind) {
        Some(_) => query
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str().to_string()),
        None => query,
    };
    let row = query
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| InventoryError::unknown("lock_owner", e))?;
    row.map(|_| ())
        .ok_or_else(|| InventoryError::not_found(owner.kind, owner.id.clone()))
}

pub(crate) fn owner_table(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Project => "projects",
        ResourceKind::Region => "regions",
        ResourceKind::Cell => "cells",
        ResourceKind::Device => "devices",
        ResourceKind::Network => "networks",
        ResourceKind::NetworkInterface => "network_interfaces",
        ResourceKind::Label => "labels",
        ResourceKind::User => "users",
    }
}

/// Labels are global; projects scope on their own id; everything else
/// carries a `project_id` column.
pub(crate) fn owner_scope_column(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Label => None,
        ResourceKind::Project => Some("id"),
        _ => Some("project_id"),
    }
}

/// Bump the owner's `updated_at`, part of every variable mutation.
pub(crate) async fn touch_owner(
    tx: &mut Transaction<'_, Postgres>,
    owner: &OwnerRef,
    now: i64,
) -> Result<(), InventoryError> {
    let table = owner_table(owner.kind);
    sqlx::query(AssertSqlSafe(format!(
        "UPDATE {table} SET updated_at = $1 WHERE id = $2"
    )))
    .bind(now)
    .bind(owner.id.clone())
    .execute(&mut **tx)
    .await
    .map_err(|e| InventoryError::unknown("touch_owner", e))?;
    Ok(())
}

pub(crate) async fn fetch_variables<'e, E>(
    executor: E,
    owner: &OwnerRef,
) -> Result<VariableMap, InventoryError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT key, value FROM variables WHERE owner_kind = $1 AND owner_id = $2",
    )
    .bind(owner.kind.to_string())
    .bind(&owner.id)
    .fetch_all(executor)
    .await
    .map_err(|e| InventoryError::unknown("fetch_variables", e))?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<serde_json::Value, _>("value")))
        .collect())
}

/// Map an insert failure: unique violations become `Duplicate`, foreign-key
/// violations point at a missing parent, anything else is `Unknown`.
pub(crate) fn insert_error(
    kind: ResourceKind,
    name: &str,
    operation: &str,
    err: sqlx::Error,
) -> InventoryError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("23505") => return InventoryError::duplicate(kind, name),
            Some("23503") => {
                return InventoryError::bad_request(format!(
                    "{kind} references a missing parent resource"
                ));
            }
            _ => {}
        }
    }
    InventoryError::unknown(operation, err)
}

/// Map a delete failure: foreign-key violations mean dependent children
/// still exist and the delete is refused rather than cascaded.
pub(crate) fn delete_error(
    kind: ResourceKind,
    id: &str,
    operation: &str,
    err: sqlx::Error,
) -> InventoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23503") {
            return InventoryError::bad_request(format!(
                "{kind} {id} still has dependent resources"
            ));
        }
    }
    InventoryError::unknown(operation, err)
}

#[async_trait]
impl InventoryStore for PostgresBackend {
    type Error = InventoryError;

    async fn resource_get(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Resource, Self::Error> {
        match kind {
            ResourceKind::Project => self.project_get(ctx, id).await.map(Resource::Project),
            ResourceKind::Region => self.region_get(ctx, id).await.map(Resource::Region),
            ResourceKind::Cell => self.cell_get(ctx, id).await.map(Resource::Cell),
            ResourceKind::Device => self.device_get(ctx, id).await.map(Resource::Device),
            ResourceKind::Network => self.network_get(ctx, id).await.map(Resource::Network),
            ResourceKind::NetworkInterface => self
                .network_interface_get(ctx, id)
                .await
                .map(Resource::NetworkInterface),
            ResourceKind::Label => self.label_get(id).await.map(Resource::Label),
            ResourceKind::User => self.user_get(ctx, id).await.map(Resource::User),
        }
    }

    async fn variables_get(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
    ) -> Result<VariableMap, Self::Error> {
        self.variables_get(ctx, owner).await
    }

    async fn variables_upsert(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
        vars: VariableMap,
    ) -> Result<VariableMap, Self::Error> {
        self.variables_upsert(ctx, owner, vars).await
    }

    async fn variables_delete(
        &self,
        ctx: &TenantContext,
        owner: &OwnerRef,
        keys: &[String],
    ) -> Result<VariableMap, Self::Error> {
        self.variables_delete(ctx, owner, keys).await
    }

    async fn resolved_variables(
        &self,
        ctx: &TenantContext,
        device_id: &str,
    ) -> Result<VariableMap, Self::Error> {
        self.resolved_variables(ctx, device_id).await
    }

    async fn blame_variables(
        &self,
        ctx: &TenantContext,
        device_id: &str,
        keys: Option<&[String]>,
    ) -> Result<BTreeMap<String, Blame>, Self::Error> {
        self.blame_variables(ctx, device_id, keys).await
    }
}
