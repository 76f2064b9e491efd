//! Integration tests for the variable store and the resolved/blame views.

use errors::InventoryError;
use fi_core::types::{
    CellCreate, DeviceCreate, DeviceKind, NetworkDeviceAttrs, OwnerRef, Project, ProjectCreate,
    RegionCreate, ResourceKind, TenantContext, TenantId, UserId, VariableMap,
};
use serde_json::json;
use storage::PostgresBackend;
use testing::{postgres, unique_id};

async fn backend() -> Option<PostgresBackend> {
    let fixture = postgres().await?;
    let backend = PostgresBackend::new(fixture.url()).await.ok()?;
    backend.initialize_schema().await.ok()?;
    Some(backend)
}

fn root_ctx() -> TenantContext {
    TenantContext::root(
        TenantId::new("bootstrap".to_string()).unwrap(),
        UserId::new("root".to_string()).unwrap(),
    )
}

async fn project_ctx(backend: &PostgresBackend) -> (Project, TenantContext) {
    let project = backend
        .project_create(
            &root_ctx(),
            ProjectCreate {
                name: unique_id("proj"),
            },
        )
        .await
        .unwrap();
    let ctx = TenantContext::new(
        TenantId::new(project.id.clone()).unwrap(),
        UserId::new("u-1".to_string()).unwrap(),
    );
    (project, ctx)
}

fn vars(pairs: &[(&str, serde_json::Value)]) -> VariableMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_upsert_merges_and_preserves_existing_keys() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let owner = OwnerRef::new(ResourceKind::Region, region.id.clone());

    backend
        .variables_upsert(&ctx, &owner, vars(&[("a", json!(1))]))
        .await
        .unwrap();
    let merged = backend
        .variables_upsert(&ctx, &owner, vars(&[("b", json!(2))]))
        .await
        .unwrap();
    assert_eq!(merged, vars(&[("a", json!(1)), ("b", json!(2))]));

    // Overwriting an existing key keeps the others.
    let overwritten = backend
        .variables_upsert(&ctx, &owner, vars(&[("a", json!("new"))]))
        .await
        .unwrap();
    assert_eq!(overwritten, vars(&[("a", json!("new")), ("b", json!(2))]));

    // A no-op upsert changes nothing.
    let unchanged = backend
        .variables_upsert(&ctx, &owner, VariableMap::new())
        .await
        .unwrap();
    assert_eq!(unchanged, overwritten);
    assert_eq!(backend.variables_get(&ctx, &owner).await.unwrap(), unchanged);

    // Variable mutations bump the owner's updated_at.
    let after = backend.region_get(&ctx, &region.id).await.unwrap();
    assert!(after.updated_at >= region.updated_at);
}

#[tokio::test]
async fn test_delete_tolerates_missing_keys() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let owner = OwnerRef::new(ResourceKind::Region, region.id);

    backend
        .variables_upsert(&ctx, &owner, vars(&[("keep", json!(true))]))
        .await
        .unwrap();

    let result = backend
        .variables_delete(&ctx, &owner, &["nonexistent".to_string()])
        .await
        .unwrap();
    assert_eq!(result, vars(&[("keep", json!(true))]));

    let result = backend
        .variables_delete(
            &ctx,
            &owner,
            &["keep".to_string(), "also-missing".to_string()],
        )
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_variable_ops_on_missing_owner_are_not_found() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let owner = OwnerRef::new(ResourceKind::Region, "no-such-region");

    let get = backend.variables_get(&ctx, &owner).await;
    assert!(matches!(get, Err(InventoryError::NotFound { .. })));

    let upsert = backend
        .variables_upsert(&ctx, &owner, vars(&[("a", json!(1))]))
        .await;
    assert!(matches!(upsert, Err(InventoryError::NotFound { .. })));

    let delete = backend
        .variables_delete(&ctx, &owner, &["a".to_string()])
        .await;
    assert!(matches!(delete, Err(InventoryError::NotFound { .. })));
}

/// Region {foo, bar, bax}, cell {bar}, host {foo, baz}: the host's own
/// value wins, then the cell's, then the region fills in the rest.
#[tokio::test]
async fn test_resolution_precedence_through_storage() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let cell = backend
        .cell_create(
            &ctx,
            CellCreate {
                region_id: region.id.clone(),
                name: unique_id("cell"),
                note: None,
            },
        )
        .await
        .unwrap();
    let host = backend
        .device_create(
            &ctx,
            DeviceCreate {
                region_id: region.id.clone(),
                cell_id: Some(cell.id.clone()),
                parent_id: None,
                name: unique_id("host"),
                ip_address: Some("10.0.0.2".to_string()),
                kind: DeviceKind::Host,
            },
        )
        .await
        .unwrap();

    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Region, region.id.clone()),
            vars(&[("foo", json!("R1")), ("bar", json!("R2")), ("bax", json!("R3"))]),
        )
        .await
        .unwrap();
    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Cell, cell.id.clone()),
            vars(&[("bar", json!("C2"))]),
        )
        .await
        .unwrap();
    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Device, host.id.clone()),
            vars(&[("foo", json!("H1")), ("baz", json!("H3"))]),
        )
        .await
        .unwrap();

    let resolved = backend.resolved_variables(&ctx, &host.id).await.unwrap();
    assert_eq!(
        resolved,
        vars(&[
            ("foo", json!("H1")),
            ("bar", json!("C2")),
            ("baz", json!("H3")),
            ("bax", json!("R3")),
        ])
    );

    let blame = backend
        .blame_variables(&ctx, &host.id, Some(&["foo".to_string(), "bar".to_string()]))
        .await
        .unwrap();
    assert_eq!(blame["foo"].source.kind, ResourceKind::Device);
    assert_eq!(blame["foo"].source.id, host.id);
    assert_eq!(blame["foo"].value, json!("H1"));
    assert_eq!(blame["bar"].source.kind, ResourceKind::Cell);
    assert_eq!(blame["bar"].source.id, cell.id);
    assert_eq!(blame["bar"].value, json!("C2"));

    // Blaming every key includes the region-only one.
    let all = backend.blame_variables(&ctx, &host.id, None).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all["bax"].source.kind, ResourceKind::Region);
}

#[tokio::test]
async fn test_no_cell_fallback_through_storage() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let host = backend
        .device_create(
            &ctx,
            DeviceCreate {
                region_id: region.id.clone(),
                cell_id: None,
                parent_id: None,
                name: unique_id("host"),
                ip_address: None,
                kind: DeviceKind::Host,
            },
        )
        .await
        .unwrap();

    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Region, region.id),
            vars(&[("foo", json!("R1"))]),
        )
        .await
        .unwrap();
    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Device, host.id.clone()),
            vars(&[("bar", json!("bar2"))]),
        )
        .await
        .unwrap();

    let resolved = backend.resolved_variables(&ctx, &host.id).await.unwrap();
    assert_eq!(resolved, vars(&[("foo", json!("R1")), ("bar", json!("bar2"))]));
}

#[tokio::test]
async fn test_label_variables_override_in_name_order() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let host = backend
        .device_create(
            &ctx,
            DeviceCreate {
                region_id: region.id.clone(),
                cell_id: None,
                parent_id: None,
                name: unique_id("host"),
                ip_address: None,
                kind: DeviceKind::Host,
            },
        )
        .await
        .unwrap();

    // Two labels attached in reverse name order; the earlier name wins.
    let serial = unique_id("a-label");
    let late = unique_id("z-label");
    let labels = backend
        .device_labels_update(&ctx, &host.id, &[late.clone(), serial.clone()])
        .await
        .unwrap();
    let first = labels.iter().find(|l| l.name == serial).unwrap();
    let second = labels.iter().find(|l| l.name == late).unwrap();

    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Label, first.id.clone()),
            vars(&[("tier", json!("gold"))]),
        )
        .await
        .unwrap();
    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Label, second.id.clone()),
            vars(&[("tier", json!("silver")), ("shared", json!(true))]),
        )
        .await
        .unwrap();

    let resolved = backend.resolved_variables(&ctx, &host.id).await.unwrap();
    assert_eq!(resolved["tier"], json!("gold"));
    assert_eq!(resolved["shared"], json!(true));

    // Host's own value still beats both labels.
    backend
        .variables_upsert(
            &ctx,
            &OwnerRef::new(ResourceKind::Device, host.id.clone()),
            vars(&[("tier", json!("own"))]),
        )
        .await
        .unwrap();
    let resolved = backend.resolved_variables(&ctx, &host.id).await.unwrap();
    assert_eq!(resolved["tier"], json!("own"));
}

#[tokio::test]
async fn test_resolution_is_host_only() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let switch = backend
        .device_create(
            &ctx,
            DeviceCreate {
                region_id: region.id,
                cell_id: None,
                parent_id: None,
                name: unique_id("switch"),
                ip_address: None,
                kind: DeviceKind::NetworkDevice(NetworkDeviceAttrs {
                    model_name: Some("qfx5100".to_string()),
                    os_version: None,
                }),
            },
        )
        .await
        .unwrap();

    let result = backend.resolved_variables(&ctx, &switch.id).await;
    assert!(matches!(result, Err(InventoryError::BadRequest { .. })));
}

#[tokio::test]
async fn test_variables_respect_tenant_scope() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx_a) = project_ctx(&backend).await;
    let (_, ctx_b) = project_ctx(&backend).await;
    let region = backend
        .region_create(
            &ctx_a,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    let owner = OwnerRef::new(ResourceKind::Region, region.id);

    backend
        .variables_upsert(&ctx_a, &owner, vars(&[("a", json!(1))]))
        .await
        .unwrap();

    let hidden = backend.variables_get(&ctx_b, &owner).await;
    assert!(matches!(hidden, Err(InventoryError::NotFound { .. })));
    let hidden = backend
        .variables_upsert(&ctx_b, &owner, vars(&[("a", json!(2))]))
        .await;
    assert!(matches!(hidden, Err(InventoryError::NotFound { .. })));
}
