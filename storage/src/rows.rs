//! Row-to-entity decoding. Column layout is owned by
//! `PostgresBackend::initialize_schema`.

use errors::InventoryError;
use fi_core::types::{
    Cell, Device, DeviceKind, DeviceType, Label, Network, NetworkDeviceAttrs, NetworkInterface,
    Project, Region, TenantId, User,
};
use sqlx::postgres::PgRow;
use sqlx::Row;

fn project_id(row: &PgRow) -> Result<TenantId, InventoryError> {
    TenantId::new(row.get("project_id"))
        .ok_or_else(|| InventoryError::unknown("decode_row", "invalid project id column"))
}

pub(crate) fn row_to_project(row: &PgRow) -> Result<Project, InventoryError> {
    Ok(Project {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_region(row: &PgRow) -> Result<Region, InventoryError> {
    Ok(Region {
        id: row.get("id"),
        project_id: project_id(row)?,
        name: row.get("name"),
        note: row.get("note"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_cell(row: &PgRow) -> Result<Cell, InventoryError> {
    Ok(Cell {
        id: row.get("id"),
        project_id: project_id(row)?,
        region_id: row.get("region_id"),
        name: row.get("name"),
        note: row.get("note"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_device(row: &PgRow) -> Result<Device, InventoryError> {
    let device_type: String = row.get("device_type");
    let kind = match device_type.parse::<DeviceType>() {
        Ok(DeviceType::Host) => DeviceKind::Host,
        Ok(DeviceType::NetworkDevice) => DeviceKind::NetworkDevice(NetworkDeviceAttrs {
            model_name: row.get("model_name"),
            os_version: row.get("os_version"),
        }),
        Err(_) => {
            return Err(InventoryError::unknown(
                "decode_device",
                format!("unknown device type {device_type}"),
            ));
        }
    };

    Ok(Device {
        id: row.get("id"),
        project_id: project_id(row)?,
        region_id: row.get("region_id"),
        cell_id: row.get("cell_id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        ip_address: row.get("ip_address"),
        active: row.get("active"),
        kind,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_label(row: &PgRow) -> Result<Label, InventoryError> {
    Ok(Label {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_network(row: &PgRow) -> Result<Network, InventoryError> {
    Ok(Network {
        id: row.get("id"),
        project_id: project_id(row)?,
        region_id: row.get("region_id"),
        cell_id: row.get("cell_id"),
        name: row.get("name"),
        cidr: row.get("cidr"),
        gateway: row.get("gateway"),
        netmask: row.get("netmask"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_interface(row: &PgRow) -> Result<NetworkInterface, InventoryError> {
    Ok(NetworkInterface {
        id: row.get("id"),
        project_id: project_id(row)?,
        device_id: row.get("device_id"),
        name: row.get("name"),
        interface_type: row.get("interface_type"),
        ip_address: row.get("ip_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_user(row: &PgRow) -> Result<User, InventoryError> {
    Ok(User {
        id: row.get("id"),
        project_id: project_id(row)?,
        username: row.get("username"),
        is_admin: row.get("is_admin"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
