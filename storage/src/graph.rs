//! Entity-graph CRUD and filtered listings.
//!
//! Uniqueness is enforced by the database and mapped from integrity errors;
//! deletes are refused (never cascaded) while children exist; every delete
//! removes the owner's variables in the same transaction.

use errors::InventoryError;
use fi_core::types::{
    Cell, CellCreate, CellFilters, CellUpdate, Device, DeviceCreate, DeviceFilters, DeviceKind,
    DeviceUpdate, Label, LabelFilters, Network, NetworkCreate, NetworkFilters, NetworkInterface,
    NetworkInterfaceCreate, NetworkInterfaceUpdate, NetworkUpdate, Page, PageParams, Project,
    ProjectCreate, ProjectUpdate, Region, RegionCreate, RegionFilters, RegionUpdate, ResourceKind,
    TenantContext, User, UserCreate, UserFilters, UserUpdate,
};
use sqlx::{AssertSqlSafe, Row};
use validator::Validate;
use varfilter::VarsFilter;

use crate::pagination::paginate;
use crate::postgres::{
    PostgresBackend, delete_error, insert_error, owner_scope_column, owner_table,
};
use crate::query::ScopedQuery;
use crate::rows;

/// Bound on parent-chain walks; inventories are shallow trees (rack →
/// switch → host), anything deeper indicates corrupted data.
const MAX_PARENT_DEPTH: u32 = 64;

fn validated(input: &impl Validate) -> Result<(), InventoryError> {
    input
        .validate()
        .map_err(|e| InventoryError::bad_request(e.to_string()))
}

fn parse_vars(vars: Option<&str>) -> Result<Option<VarsFilter>, InventoryError> {
    vars.map(VarsFilter::parse)
        .transpose()
        .map_err(|e| InventoryError::bad_request(e.to_string()))
}

/// AND one EXISTS subquery per filter clause against the variables table,
/// matching nested paths with `jsonb_path_exists`.
fn push_vars_filter(query: &mut ScopedQuery, kind: ResourceKind, table: &str, filter: &VarsFilter) {
    for clause in filter.clauses() {
        let key_ph = query.bind(clause.key.clone());
        let path_ph = query.bind(varfilter::clause_jsonpath(clause));
        query.push(&format!(
            " AND EXISTS (SELECT 1 FROM variables v \
             WHERE v.owner_kind = '{kind}' AND v.owner_id = {table}.id \
             AND v.key = {key_ph} AND jsonb_path_exists(v.value, {path_ph}::jsonpath))"
        ));
    }
}

impl PostgresBackend {
    /// Scoped single-row fetch shared by the `*_get` operations.
    async fn fetch_scoped_row(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: &str,
    ) -> Result<sqlx::postgres::PgRow, InventoryError> {
        let table = owner_table(kind);
        let mut query = match owner_scope_column(kind) {
            Some(column) => {
                ScopedQuery::project_scoped(&format!("SELECT * FROM {table}"), column, ctx)
            }
            None => ScopedQuery::new(&format!("SELECT * FROM {table}")),
        };
        query.and_eq("id", id);
        query
            .fetch_optional(self.pool())
            .await
            .map_err(|e| InventoryError::unknown("fetch_scoped_row", e))?
            .ok_or_else(|| InventoryError::not_found(kind, id))
    }

    /// Delete a row (scoped) and its variables in one transaction. Children
    /// block the delete via FK RESTRICT, surfaced as `BadRequest`.
    async fn delete_scoped(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: &str,
    ) -> Result<(), InventoryError> {
        let table = owner_table(kind);
        let sql = match owner_scope_column(kind) {
            Some(column) => {
                format!("DELETE FROM {table} WHERE id = $1 AND ($2 OR {column} = $3)")
            }
            None => format!("DELETE FROM {table} WHERE id = $1"),
        };

        let mut tx = self.begin().await?;
        let query = sqlx::query(AssertSqlSafe(sql)).bind(id.to_string());
        let query = match owner_scope_column(kind) {
            Some(_) => query
                .bind(ctx.sees_all_projects())
                .bind(ctx.tenant_id.as_str().to_string()),
            None => query,
        };
        let result = query
            .execute(&mut *tx)
            .await
            .map_err(|e| delete_error(kind, id, "delete_scoped", e))?;
        if result.rows_affected() == 0 {
            return Err(InventoryError::not_found(kind, id));
        }

        sqlx::query("DELETE FROM variables WHERE owner_kind = $1 AND owner_id = $2")
            .bind(kind.to_string())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("delete_scoped", e))?;

        self.commit(tx).await?;
        tracing::debug!("deleted {} {}", kind, id);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------

    pub async fn project_create(
        &self,
        ctx: &TenantContext,
        input: ProjectCreate,
    ) -> Result<Project, InventoryError> {
        if !ctx.is_root {
            return Err(InventoryError::admin_required(
                "project creation requires root",
            ));
        }
        validated(&input)?;

        let now = utils::now_timestamp();
        let project = Project {
            id: utils::generate_uuid(),
            name: input.name,
            created_at: now,
            updated_at: now,
        };
        sqlx::query("INSERT INTO projects (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(project.created_at)
            .bind(project.updated_at)
            .execute(self.pool())
            .await
            .map_err(|e| insert_error(ResourceKind::Project, &project.name, "project_create", e))?;
        Ok(project)
    }

    pub async fn project_get(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<Project, InventoryError> {
        let row = self.fetch_scoped_row(ctx, ResourceKind::Project, id).await?;
        rows::row_to_project(&row)
    }

    pub async fn project_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: ProjectUpdate,
    ) -> Result<Project, InventoryError> {
        if !ctx.is_root {
            return Err(InventoryError::admin_required(
                "project rename requires root",
            ));
        }
        if let Some(name) = &input.name {
            if !utils::is_valid_resource_name(name) {
                return Err(InventoryError::bad_request(format!(
                    "invalid project name: {name:?}"
                )));
            }
        }

        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM projects WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("project_update", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Project, id))?;
        let mut project = rows::row_to_project(&row)?;

        if let Some(name) = input.name {
            project.name = name;
        }
        project.updated_at = utils::now_timestamp();

        sqlx::query("UPDATE projects SET name = $1, updated_at = $2 WHERE id = $3")
            .bind(&project.name)
            .bind(project.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("project_update", e))?;
        self.commit(tx).await?;
        Ok(project)
    }

    pub async fn project_delete(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<(), InventoryError> {
        if !ctx.is_root {
            return Err(InventoryError::admin_required(
                "project deletion requires root",
            ));
        }
        self.delete_scoped(ctx, ResourceKind::Project, id).await
    }

    pub async fn project_list(
        &self,
        ctx: &TenantContext,
        params: &PageParams,
    ) -> Result<Page<Project>, InventoryError> {
        let base = || ScopedQuery::project_scoped("SELECT * FROM projects", "id", ctx);
        paginate(self.pool(), base, params, |row| rows::row_to_project(row)).await
    }

    // -----------------------------------------------------------------
    // Regions
    // -----------------------------------------------------------------

    pub async fn region_create(
        &self,
        ctx: &TenantContext,
        input: RegionCreate,
    ) -> Result<Region, InventoryError> {
        validated(&input)?;

        let now = utils::now_timestamp();
        let region = Region {
            id: utils::generate_uuid(),
            project_id: ctx.tenant_id.clone(),
            name: input.name,
            note: input.note,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO regions (id, project_id, name, note, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&region.id)
        .bind(region.project_id.as_str())
        .bind(&region.name)
        .bind(&region.note)
        .bind(region.created_at)
        .bind(region.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_error(ResourceKind::Region, &region.name, "region_create", e))?;
        Ok(region)
    }

    pub async fn region_get(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<Region, InventoryError> {
        let row = self.fetch_scoped_row(ctx, ResourceKind::Region, id).await?;
        rows::row_to_region(&row)
    }

    pub async fn region_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: RegionUpdate,
    ) -> Result<Region, InventoryError> {
        validated(&input)?;

        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM regions WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE")
            .bind(id)
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("region_update", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Region, id))?;
        let mut region = rows::row_to_region(&row)?;

        if let Some(note) = input.note {
            region.note = Some(note);
        }
        region.updated_at = utils::now_timestamp();

        sqlx::query("UPDATE regions SET note = $1, updated_at = $2 WHERE id = $3")
            .bind(&region.note)
            .bind(region.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("region_update", e))?;
        self.commit(tx).await?;
        Ok(region)
    }

    pub async fn region_delete(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<(), InventoryError> {
        self.delete_scoped(ctx, ResourceKind::Region, id).await
    }

    pub async fn region_list(
        &self,
        ctx: &TenantContext,
        filters: &RegionFilters,
        params: &PageParams,
    ) -> Result<Page<Region>, InventoryError> {
        let vars = parse_vars(filters.vars.as_deref())?;
        let base = || {
            let mut query =
                ScopedQuery::project_scoped("SELECT * FROM regions", "project_id", ctx);
            if let Some(name) = &filters.name {
                query.and_eq("name", name.as_str());
            }
            if let Some(vars) = &vars {
                push_vars_filter(&mut query, ResourceKind::Region, "regions", vars);
            }
            query
        };
        paginate(self.pool(), base, params, |row| rows::row_to_region(row)).await
    }

    // -----------------------------------------------------------------
    // Cells
    // -----------------------------------------------------------------

    pub async fn cell_create(
        &self,
        ctx: &TenantContext,
        input: CellCreate,
    ) -> Result<Cell, InventoryError> {
        validated(&input)?;
        let region = self.region_get(ctx, &input.region_id).await?;

        let now = utils::now_timestamp();
        let cell = Cell {
            id: utils::generate_uuid(),
            project_id: region.project_id,
            region_id: region.id,
            name: input.name,
            note: input.note,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO cells (id, project_id, region_id, name, note, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&cell.id)
        .bind(cell.project_id.as_str())
        .bind(&cell.region_id)
        .bind(&cell.name)
        .bind(&cell.note)
        .bind(cell.created_at)
        .bind(cell.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_error(ResourceKind::Cell, &cell.name, "cell_create", e))?;
        Ok(cell)
    }

    pub async fn cell_get(&self, ctx: &TenantContext, id: &str) -> Result<Cell, InventoryError> {
        let row = self.fetch_scoped_row(ctx, ResourceKind::Cell, id).await?;
        rows::row_to_cell(&row)
    }

    pub async fn cell_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: CellUpdate,
    ) -> Result<Cell, InventoryError> {
        validated(&input)?;

        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM cells WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE")
            .bind(id)
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("cell_update", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Cell, id))?;
        let mut cell = rows::row_to_cell(&row)?;

        if let Some(note) = input.note {
            cell.note = Some(note);
        }
        cell.updated_at = utils::now_timestamp();

        sqlx::query("UPDATE cells SET note = $1, updated_at = $2 WHERE id = $3")
            .bind(&cell.note)
            .bind(cell.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("cell_update", e))?;
        self.commit(tx).await?;
        Ok(cell)
    }

    pub async fn cell_delete(&self, ctx: &TenantContext, id: &str) -> Result<(), InventoryError> {
        self.delete_scoped(ctx, ResourceKind::Cell, id).await
    }

    pub async fn cell_list(
        &self,
        ctx: &TenantContext,
        filters: &CellFilters,
        params: &PageParams,
    ) -> Result<Page<Cell>, InventoryError> {
        let vars = parse_vars(filters.vars.as_deref())?;
        let base = || {
            let mut query = ScopedQuery::project_scoped("SELECT * FROM cells", "project_id", ctx);
            if let Some(region_id) = &filters.region_id {
                query.and_eq("region_id", region_id.as_str());
            }
            if let Some(name) = &filters.name {
                query.and_eq("name", name.as_str());
            }
            if let Some(vars) = &vars {
                push_vars_filter(&mut query, ResourceKind::Cell, "cells", vars);
            }
            query
        };
        paginate(self.pool(), base, params, |row| rows::row_to_cell(row)).await
    }

    // -----------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------

    pub async fn device_create(
        &self,
        ctx: &TenantContext,
        input: DeviceCreate,
    ) -> Result<Device, InventoryError> {
        validated(&input)?;
        let region = self.region_get(ctx, &input.region_id).await?;

        if let Some(cell_id) = &input.cell_id {
            let cell = self.cell_get(ctx, cell_id).await?;
            if cell.region_id != region.id {
                return Err(InventoryError::bad_request(
                    "device cell must belong to the device region",
                ));
            }
        }
        if let Some(parent_id) = &input.parent_id {
            self.device_get(ctx, parent_id).await?;
        }

        let now = utils::now_timestamp();
        let device = Device {
            id: utils::generate_uuid(),
            project_id: region.project_id,
            region_id: region.id,
            cell_id: input.cell_id,
            parent_id: input.parent_id,
            name: input.name,
            ip_address: input.ip_address,
            active: true,
            kind: input.kind,
            created_at: now,
            updated_at: now,
        };
        let (model_name, os_version) = device_subtype_columns(&device.kind);

        sqlx::query(
            "INSERT INTO devices (id, project_id, region_id, cell_id, parent_id, device_type,
                                  name, ip_address, model_name, os_version, active,
                                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&device.id)
        .bind(device.project_id.as_str())
        .bind(&device.region_id)
        .bind(&device.cell_id)
        .bind(&device.parent_id)
        .bind(device.kind.device_type().to_string())
        .bind(&device.name)
        .bind(&device.ip_address)
        .bind(model_name)
        .bind(os_version)
        .bind(device.active)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_error(ResourceKind::Device, &device.name, "device_create", e))?;
        Ok(device)
    }

    pub async fn device_get(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<Device, InventoryError> {
        let row = self.fetch_scoped_row(ctx, ResourceKind::Device, id).await?;
        rows::row_to_device(&row)
    }

    pub async fn device_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: DeviceUpdate,
    ) -> Result<Device, InventoryError> {
        validated(&input)?;

        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE")
            .bind(id)
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_update", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Device, id))?;
        let mut device = rows::row_to_device(&row)?;

        if let Some(cell_id) = input.cell_id {
            let cell_row = sqlx::query("SELECT * FROM cells WHERE id = $1 AND ($2 OR project_id = $3)")
                .bind(&cell_id)
                .bind(ctx.sees_all_projects())
                .bind(ctx.tenant_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| InventoryError::unknown("device_update", e))?
                .ok_or_else(|| InventoryError::not_found(ResourceKind::Cell, cell_id.clone()))?;
            let cell = rows::row_to_cell(&cell_row)?;
            if cell.region_id != device.region_id {
                return Err(InventoryError::bad_request(
                    "device cell must belong to the device region",
                ));
            }
            device.cell_id = Some(cell.id);
        }
        if let Some(ip_address) = input.ip_address {
            device.ip_address = Some(ip_address);
        }
        if let Some(active) = input.active {
            device.active = active;
        }
        match &mut device.kind {
            DeviceKind::Host => {
                if input.model_name.is_some() || input.os_version.is_some() {
                    return Err(InventoryError::bad_request(
                        "model_name and os_version apply to network devices only",
                    ));
                }
            }
            DeviceKind::NetworkDevice(attrs) => {
                if let Some(model_name) = input.model_name {
                    attrs.model_name = Some(model_name);
                }
                if let Some(os_version) = input.os_version {
                    attrs.os_version = Some(os_version);
                }
            }
        }
        device.updated_at = utils::now_timestamp();
        let (model_name, os_version) = device_subtype_columns(&device.kind);

        sqlx::query(
            "UPDATE devices SET cell_id = $1, ip_address = $2, active = $3,
                                model_name = $4, os_version = $5, updated_at = $6
             WHERE id = $7",
        )
        .bind(&device.cell_id)
        .bind(&device.ip_address)
        .bind(device.active)
        .bind(model_name)
        .bind(os_version)
        .bind(device.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("device_update", e))?;
        self.commit(tx).await?;
        Ok(device)
    }

    /// Re-parent a device. Rejects self-parenting and any parent that is a
    /// descendant of the device, detected by walking the parent chain
    /// upward from the proposed parent before committing.
    pub async fn device_set_parent(
        &self,
        ctx: &TenantContext,
        id: &str,
        parent_id: Option<String>,
    ) -> Result<Device, InventoryError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE")
            .bind(id)
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_set_parent", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Device, id))?;
        let mut device = rows::row_to_device(&row)?;

        if let Some(parent_id) = &parent_id {
            if parent_id == id {
                return Err(InventoryError::bad_request(
                    "device cannot be its own parent",
                ));
            }

            // Walk up from the proposed parent; hitting the device itself
            // means the parent is one of its descendants.
            let mut current = Some(parent_id.clone());
            let mut depth = 0_u32;
            while let Some(ancestor_id) = current {
                if ancestor_id == id {
                    return Err(InventoryError::bad_request(
                        "parent change would create a cycle",
                    ));
                }
                let ancestor = sqlx::query(
                    "SELECT parent_id FROM devices WHERE id = $1 AND ($2 OR project_id = $3)",
                )
                .bind(&ancestor_id)
                .bind(ctx.sees_all_projects())
                .bind(ctx.tenant_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| InventoryError::unknown("device_set_parent", e))?
                .ok_or_else(|| InventoryError::not_found(ResourceKind::Device, ancestor_id))?;

                current = ancestor.get::<Option<String>, _>("parent_id");
                depth += 1;
                if depth > MAX_PARENT_DEPTH {
                    return Err(InventoryError::bad_request("parent chain too deep"));
                }
            }
        }

        device.parent_id = parent_id;
        device.updated_at = utils::now_timestamp();
        sqlx::query("UPDATE devices SET parent_id = $1, updated_at = $2 WHERE id = $3")
            .bind(&device.parent_id)
            .bind(device.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_set_parent", e))?;
        self.commit(tx).await?;
        Ok(device)
    }

    pub async fn device_delete(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<(), InventoryError> {
        self.delete_scoped(ctx, ResourceKind::Device, id).await
    }

    pub async fn device_list(
        &self,
        ctx: &TenantContext,
        filters: &DeviceFilters,
        params: &PageParams,
    ) -> Result<Page<Device>, InventoryError> {
        let vars = parse_vars(filters.vars.as_deref())?;
        let base = || {
            let mut query =
                ScopedQuery::project_scoped("SELECT * FROM devices", "project_id", ctx);
            if let Some(region_id) = &filters.region_id {
                query.and_eq("region_id", region_id.as_str());
            }
            if let Some(cell_id) = &filters.cell_id {
                query.and_eq("cell_id", cell_id.as_str());
            }
            if let Some(name) = &filters.name {
                query.and_eq("name", name.as_str());
            }
            if let Some(ip_address) = &filters.ip_address {
                query.and_eq("ip_address", ip_address.as_str());
            }
            if let Some(device_type) = &filters.device_type {
                query.and_eq("device_type", device_type.to_string());
            }
            if let Some(label) = &filters.label {
                let label_ph = query.bind(label.as_str());
                query.push(&format!(
                    " AND EXISTS (SELECT 1 FROM device_labels dl \
                     JOIN labels l ON l.id = dl.label_id \
                     WHERE dl.device_id = devices.id AND l.name = {label_ph})"
                ));
            }
            if let Some(vars) = &vars {
                push_vars_filter(&mut query, ResourceKind::Device, "devices", vars);
            }
            query
        };
        paginate(self.pool(), base, params, |row| rows::row_to_device(row)).await
    }

    // -----------------------------------------------------------------
    // Labels
    // -----------------------------------------------------------------

    /// Replace the device's label set. Labels are global, deduplicated by
    /// name, and created implicitly on first use; attaching an already
    /// attached label is a no-op. Returns the new set sorted by name.
    pub async fn device_labels_update(
        &self,
        ctx: &TenantContext,
        device_id: &str,
        names: &[String],
    ) -> Result<Vec<Label>, InventoryError> {
        let unique_names: std::collections::BTreeSet<&str> =
            names.iter().map(String::as_str).collect();
        for name in &unique_names {
            if !utils::is_valid_resource_name(name) {
                return Err(InventoryError::bad_request(format!(
                    "invalid label name: {name:?}"
                )));
            }
        }

        let mut tx = self.begin().await?;
        let device_row = sqlx::query(
            "SELECT id FROM devices WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE",
        )
        .bind(device_id)
        .bind(ctx.sees_all_projects())
        .bind(ctx.tenant_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("device_labels_update", e))?;
        if device_row.is_none() {
            return Err(InventoryError::not_found(ResourceKind::Device, device_id));
        }

        let now = utils::now_timestamp();
        let mut labels = Vec::with_capacity(unique_names.len());
        for name in unique_names {
            sqlx::query(
                "INSERT INTO labels (id, name, created_at, updated_at)
                 VALUES ($1, $2, $3, $3)
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(utils::generate_uuid())
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_labels_update", e))?;

            let row = sqlx::query("SELECT * FROM labels WHERE name = $1")
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| InventoryError::unknown("device_labels_update", e))?;
            labels.push(rows::row_to_label(&row)?);
        }

        sqlx::query("DELETE FROM device_labels WHERE device_id = $1")
            .bind(device_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_labels_update", e))?;
        for label in &labels {
            sqlx::query(
                "INSERT INTO device_labels (device_id, label_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(device_id)
            .bind(&label.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_labels_update", e))?;
        }

        sqlx::query("UPDATE devices SET updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(device_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("device_labels_update", e))?;

        self.commit(tx).await?;
        Ok(labels)
    }

    /// The device's labels in ascending name order, the order resolution
    /// traverses them.
    pub async fn device_labels_get(
        &self,
        ctx: &TenantContext,
        device_id: &str,
    ) -> Result<Vec<Label>, InventoryError> {
        self.device_get(ctx, device_id).await?;
        let label_rows = sqlx::query(
            "SELECT l.* FROM labels l
             JOIN device_labels dl ON dl.label_id = l.id
             WHERE dl.device_id = $1
             ORDER BY l.name",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| InventoryError::unknown("device_labels_get", e))?;

        label_rows.iter().map(rows::row_to_label).collect()
    }

    pub async fn label_get(&self, id: &str) -> Result<Label, InventoryError> {
        let row = sqlx::query("SELECT * FROM labels WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| InventoryError::unknown("label_get", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Label, id))?;
        rows::row_to_label(&row)
    }

    /// Labels are global, so the listing is unscoped.
    pub async fn label_list(
        &self,
        filters: &LabelFilters,
        params: &PageParams,
    ) -> Result<Page<Label>, InventoryError> {
        let base = || {
            let mut query = ScopedQuery::new("SELECT * FROM labels");
            if let Some(name) = &filters.name {
                query.and_eq("name", name.as_str());
            }
            query
        };
        paginate(self.pool(), base, params, |row| rows::row_to_label(row)).await
    }

    /// Delete a label globally: membership rows cascade, variables go in
    /// the same transaction.
    pub async fn label_delete(&self, id: &str) -> Result<(), InventoryError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query("DELETE FROM labels WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| delete_error(ResourceKind::Label, id, "label_delete", e))?;
        if result.rows_affected() == 0 {
            return Err(InventoryError::not_found(ResourceKind::Label, id));
        }
        sqlx::query("DELETE FROM variables WHERE owner_kind = $1 AND owner_id = $2")
            .bind(ResourceKind::Label.to_string())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("label_delete", e))?;
        self.commit(tx).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Networks
    // -----------------------------------------------------------------

    pub async fn network_create(
        &self,
        ctx: &TenantContext,
        input: NetworkCreate,
    ) -> Result<Network, InventoryError> {
        validated(&input)?;
        let region = self.region_get(ctx, &input.region_id).await?;
        if let Some(cell_id) = &input.cell_id {
            let cell = self.cell_get(ctx, cell_id).await?;
            if cell.region_id != region.id {
                return Err(InventoryError::bad_request(
                    "network cell must belong to the network region",
                ));
            }
        }

        let now = utils::now_timestamp();
        let network = Network {
            id: utils::generate_uuid(),
            project_id: region.project_id,
            region_id: region.id,
            cell_id: input.cell_id,
            name: input.name,
            cidr: input.cidr,
            gateway: input.gateway,
            netmask: input.netmask,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO networks (id, project_id, region_id, cell_id, name, cidr, gateway,
                                   netmask, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&network.id)
        .bind(network.project_id.as_str())
        .bind(&network.region_id)
        .bind(&network.cell_id)
        .bind(&network.name)
        .bind(&network.cidr)
        .bind(&network.gateway)
        .bind(&network.netmask)
        .bind(network.created_at)
        .bind(network.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_error(ResourceKind::Network, &network.name, "network_create", e))?;
        Ok(network)
    }

    pub async fn network_get(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<Network, InventoryError> {
        let row = self.fetch_scoped_row(ctx, ResourceKind::Network, id).await?;
        rows::row_to_network(&row)
    }

    pub async fn network_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: NetworkUpdate,
    ) -> Result<Network, InventoryError> {
        validated(&input)?;

        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM networks WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE")
            .bind(id)
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("network_update", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::Network, id))?;
        let mut network = rows::row_to_network(&row)?;

        if let Some(cidr) = input.cidr {
            network.cidr = Some(cidr);
        }
        if let Some(gateway) = input.gateway {
            network.gateway = Some(gateway);
        }
        if let Some(netmask) = input.netmask {
            network.netmask = Some(netmask);
        }
        network.updated_at = utils::now_timestamp();

        sqlx::query(
            "UPDATE networks SET cidr = $1, gateway = $2, netmask = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(&network.cidr)
        .bind(&network.gateway)
        .bind(&network.netmask)
        .bind(network.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("network_update", e))?;
        self.commit(tx).await?;
        Ok(network)
    }

    pub async fn network_delete(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<(), InventoryError> {
        self.delete_scoped(ctx, ResourceKind::Network, id).await
    }

    pub async fn network_list(
        &self,
        ctx: &TenantContext,
        filters: &NetworkFilters,
        params: &PageParams,
    ) -> Result<Page<Network>, InventoryError> {
        let vars = parse_vars(filters.vars.as_deref())?;
        let base = || {
            let mut query =
                ScopedQuery::project_scoped("SELECT * FROM networks", "project_id", ctx);
            if let Some(region_id) = &filters.region_id {
                query.and_eq("region_id", region_id.as_str());
            }
            if let Some(cell_id) = &filters.cell_id {
                query.and_eq("cell_id", cell_id.as_str());
            }
            if let Some(name) = &filters.name {
                query.and_eq("name", name.as_str());
            }
            if let Some(vars) = &vars {
                push_vars_filter(&mut query, ResourceKind::Network, "networks", vars);
            }
            query
        };
        paginate(self.pool(), base, params, |row| rows::row_to_network(row)).await
    }

    // -----------------------------------------------------------------
    // Network interfaces
    // -----------------------------------------------------------------

    pub async fn network_interface_create(
        &self,
        ctx: &TenantContext,
        input: NetworkInterfaceCreate,
    ) -> Result<NetworkInterface, InventoryError> {
        validated(&input)?;
        let device = self.device_get(ctx, &input.device_id).await?;

        let now = utils::now_timestamp();
        let interface = NetworkInterface {
            id: utils::generate_uuid(),
            project_id: device.project_id,
            device_id: device.id,
            name: input.name,
            interface_type: input.interface_type,
            ip_address: input.ip_address,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO network_interfaces (id, project_id, device_id, name, interface_type,
                                             ip_address, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&interface.id)
        .bind(interface.project_id.as_str())
        .bind(&interface.device_id)
        .bind(&interface.name)
        .bind(&interface.interface_type)
        .bind(&interface.ip_address)
        .bind(interface.created_at)
        .bind(interface.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            insert_error(
                ResourceKind::NetworkInterface,
                &interface.name,
                "network_interface_create",
                e,
            )
        })?;
        Ok(interface)
    }

    pub async fn network_interface_get(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<NetworkInterface, InventoryError> {
        let row = self
            .fetch_scoped_row(ctx, ResourceKind::NetworkInterface, id)
            .await?;
        rows::row_to_interface(&row)
    }

    pub async fn network_interface_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: NetworkInterfaceUpdate,
    ) -> Result<NetworkInterface, InventoryError> {
        validated(&input)?;

        let mut tx = self.begin().await?;
        let row = sqlx::query(
            "SELECT * FROM network_interfaces WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE",
        )
        .bind(id)
        .bind(ctx.sees_all_projects())
        .bind(ctx.tenant_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("network_interface_update", e))?
        .ok_or_else(|| InventoryError::not_found(ResourceKind::NetworkInterface, id))?;
        let mut interface = rows::row_to_interface(&row)?;

        if let Some(interface_type) = input.interface_type {
            interface.interface_type = Some(interface_type);
        }
        if let Some(ip_address) = input.ip_address {
            interface.ip_address = Some(ip_address);
        }
        interface.updated_at = utils::now_timestamp();

        sqlx::query(
            "UPDATE network_interfaces SET interface_type = $1, ip_address = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(&interface.interface_type)
        .bind(&interface.ip_address)
        .bind(interface.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| InventoryError::unknown("network_interface_update", e))?;
        self.commit(tx).await?;
        Ok(interface)
    }

    pub async fn network_interface_delete(
        &self,
        ctx: &TenantContext,
        id: &str,
    ) -> Result<(), InventoryError> {
        self.delete_scoped(ctx, ResourceKind::NetworkInterface, id)
            .await
    }

    /// A device's interfaces, name-ordered. Interface sets are small and
    /// bounded, so this listing is not paginated.
    pub async fn network_interface_list(
        &self,
        ctx: &TenantContext,
        device_id: &str,
    ) -> Result<Vec<NetworkInterface>, InventoryError> {
        self.device_get(ctx, device_id).await?;
        let rows_found = sqlx::query(
            "SELECT * FROM network_interfaces WHERE device_id = $1 ORDER BY name",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| InventoryError::unknown("network_interface_list", e))?;

        rows_found.iter().map(rows::row_to_interface).collect()
    }

    // -----------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------

    pub async fn user_create(
        &self,
        ctx: &TenantContext,
        input: UserCreate,
    ) -> Result<User, InventoryError> {
        if !ctx.can_manage_users() {
            return Err(InventoryError::admin_required(
                "user creation requires project admin",
            ));
        }
        validated(&input)?;

        let now = utils::now_timestamp();
        let user = User {
            id: utils::generate_uuid(),
            project_id: ctx.tenant_id.clone(),
            username: input.username,
            is_admin: input.is_admin,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO users (id, project_id, username, is_admin, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&user.id)
        .bind(user.project_id.as_str())
        .bind(&user.username)
        .bind(user.is_admin)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_error(ResourceKind::User, &user.username, "user_create", e))?;
        Ok(user)
    }

    pub async fn user_get(&self, ctx: &TenantContext, id: &str) -> Result<User, InventoryError> {
        let row = self.fetch_scoped_row(ctx, ResourceKind::User, id).await?;
        rows::row_to_user(&row)
    }

    pub async fn user_update(
        &self,
        ctx: &TenantContext,
        id: &str,
        input: UserUpdate,
    ) -> Result<User, InventoryError> {
        if !ctx.can_manage_users() {
            return Err(InventoryError::admin_required(
                "user update requires project admin",
            ));
        }
        validated(&input)?;

        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM users WHERE id = $1 AND ($2 OR project_id = $3) FOR UPDATE")
            .bind(id)
            .bind(ctx.sees_all_projects())
            .bind(ctx.tenant_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("user_update", e))?
            .ok_or_else(|| InventoryError::not_found(ResourceKind::User, id))?;
        let mut user = rows::row_to_user(&row)?;

        if let Some(is_admin) = input.is_admin {
            user.is_admin = is_admin;
        }
        user.updated_at = utils::now_timestamp();

        sqlx::query("UPDATE users SET is_admin = $1, updated_at = $2 WHERE id = $3")
            .bind(user.is_admin)
            .bind(user.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| InventoryError::unknown("user_update", e))?;
        self.commit(tx).await?;
        Ok(user)
    }

    pub async fn user_delete(&self, ctx: &TenantContext, id: &str) -> Result<(), InventoryError> {
        if !ctx.can_manage_users() {
            return Err(InventoryError::admin_required(
                "user deletion requires project admin",
            ));
        }
        self.delete_scoped(ctx, ResourceKind::User, id).await
    }

    pub async fn user_list(
        &self,
        ctx: &TenantContext,
        filters: &UserFilters,
        params: &PageParams,
    ) -> Result<Page<User>, InventoryError> {
        let base = || {
            let mut query = ScopedQuery::project_scoped("SELECT * FROM users", "project_id", ctx);
            if let Some(username) = &filters.username {
                query.and_eq("username", username.as_str());
            }
            query
        };
        paginate(self.pool(), base, params, |row| rows::row_to_user(row)).await
    }
}

fn device_subtype_columns(kind: &DeviceKind) -> (Option<String>, Option<String>) {
    match kind {
        DeviceKind::Host => (None, None),
        DeviceKind::NetworkDevice(attrs) => {
            (attrs.model_name.clone(), attrs.os_version.clone())
        }
    }
}
