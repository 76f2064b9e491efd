//! Integration tests for marker pagination: total order, link walking,
//! marker validation, and limit clamping.

use std::collections::BTreeSet;

use errors::InventoryError;
use fi_core::types::{
    DeviceCreate, DeviceFilters, DeviceKind, PageParams, Project, ProjectCreate, RegionCreate,
    SortDir, TenantContext, TenantId, UserId,
};
use storage::{MAX_PAGE_LIMIT, MIN_PAGE_LIMIT, PostgresBackend};
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

/// Seed one region with `count` hosts; returns the region id.
async fn seed_devices(backend: &PostgresBackend, ctx: &TenantContext, count: usize) -> String {
    let region = backend
        .region_create(
            ctx,
            RegionCreate {
                name: unique_id("region"),
                note: None,
            },
        )
        .await
        .unwrap();
    for _ in 0..count {
        backend
            .device_create(
                ctx,
                DeviceCreate {
                    region_id: region.id.clone(),
                    cell_id: None,
                    parent_id: None,
                    name: unique_id("dev"),
                    ip_address: None,
                    kind: DeviceKind::Host,
                },
            )
            .await
            .unwrap();
    }
    region.id
}

#[tokio::test]
async fn test_next_links_visit_every_device_exactly_once() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region_id = seed_devices(&backend, &ctx, 75).await;
    let filters = DeviceFilters {
        region_id: Some(region_id),
        ..DeviceFilters::default()
    };

    let mut seen: Vec<String> = Vec::new();
    let mut params = PageParams::with_limit(30);
    let mut page_sizes = Vec::new();
    loop {
        let page = backend.device_list(&ctx, &filters, &params).await.unwrap();
        page_sizes.push(page.items.len());
        seen.extend(page.items.iter().map(|d| d.id.clone()));
        match &page.links.next {
            Some(next) => {
                assert_eq!(next.marker.as_deref(), seen.last().map(String::as_str));
                params = PageParams {
                    limit: Some(next.limit),
                    marker: next.marker.clone(),
                    sort_dir: SortDir::Asc,
                };
            }
            None => break,
        }
    }

    assert_eq!(page_sizes, vec![30, 30, 15]);
    assert_eq!(seen.len(), 75);
    let unique: BTreeSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), 75, "every device exactly once");

    // The same walk yields the same ordering.
    let again = backend
        .device_list(&ctx, &filters, &PageParams::with_limit(30))
        .await
        .unwrap();
    let first_page: Vec<String> = again.items.iter().map(|d| d.id.clone()).collect();
    assert_eq!(&seen[..30], &first_page[..]);
}

#[tokio::test]
async fn test_descending_walk_is_the_reverse_of_ascending() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region_id = seed_devices(&backend, &ctx, 25).await;
    let filters = DeviceFilters {
        region_id: Some(region_id),
        ..DeviceFilters::default()
    };

    let mut ascending: Vec<String> = Vec::new();
    let mut params = PageParams::with_limit(10);
    loop {
        let page = backend.device_list(&ctx, &filters, &params).await.unwrap();
        ascending.extend(page.items.iter().map(|d| d.id.clone()));
        match &page.links.next {
            Some(next) => {
                params = PageParams {
                    limit: Some(next.limit),
                    marker: next.marker.clone(),
                    sort_dir: SortDir::Asc,
                };
            }
            None => break,
        }
    }

    let mut descending: Vec<String> = Vec::new();
    let mut params = PageParams {
        limit: Some(10),
        marker: None,
        sort_dir: SortDir::Desc,
    };
    loop {
        let page = backend.device_list(&ctx, &filters, &params).await.unwrap();
        descending.extend(page.items.iter().map(|d| d.id.clone()));
        match &page.links.next {
            Some(next) => {
                params = PageParams {
                    limit: Some(next.limit),
                    marker: next.marker.clone(),
                    sort_dir: SortDir::Desc,
                };
            }
            None => break,
        }
    }

    let mut reversed = ascending.clone();
    reversed.reverse();
    assert_eq!(descending, reversed);
}

#[tokio::test]
async fn test_unknown_marker_is_a_bad_request() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region_id = seed_devices(&backend, &ctx, 12).await;
    let filters = DeviceFilters {
        region_id: Some(region_id.clone()),
        ..DeviceFilters::default()
    };

    let result = backend
        .device_list(
            &ctx,
            &filters,
            &PageParams::after("no-such-device", 10),
        )
        .await;
    match result {
        Err(InventoryError::BadRequest { reason }) => {
            assert!(reason.contains("Marker does not exist"));
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }

    // A marker outside the filtered scope is just as invalid: a device in
    // another region does not resolve under this region's filter.
    let other_region = seed_devices(&backend, &ctx, 10).await;
    let foreign = backend
        .device_list(
            &ctx,
            &DeviceFilters {
                region_id: Some(other_region),
                ..DeviceFilters::default()
            },
            &PageParams::with_limit(10),
        )
        .await
        .unwrap();
    let foreign_marker = foreign.items[0].id.clone();
    let result = backend
        .device_list(&ctx, &filters, &PageParams::after(foreign_marker, 10))
        .await;
    assert!(matches!(result, Err(InventoryError::BadRequest { .. })));
}

#[tokio::test]
async fn test_limit_is_clamped_not_rejected() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region_id = seed_devices(&backend, &ctx, 120).await;
    let filters = DeviceFilters {
        region_id: Some(region_id),
        ..DeviceFilters::default()
    };

    // Below the floor: clamped up.
    let page = backend
        .device_list(&ctx, &filters, &PageParams::with_limit(1))
        .await
        .unwrap();
    assert_eq!(page.items.len() as u32, MIN_PAGE_LIMIT);
    assert_eq!(page.links.current.limit, MIN_PAGE_LIMIT);

    // Above the ceiling: clamped down, not an error.
    let page = backend
        .device_list(&ctx, &filters, &PageParams::with_limit(5000))
        .await
        .unwrap();
    assert_eq!(page.items.len() as u32, MAX_PAGE_LIMIT);
    assert_eq!(page.links.current.limit, MAX_PAGE_LIMIT);

    // Unspecified: the default.
    let page = backend
        .device_list(&ctx, &filters, &PageParams::default())
        .await
        .unwrap();
    assert_eq!(page.items.len() as u32, storage::DEFAULT_PAGE_LIMIT);
}

#[tokio::test]
async fn test_prev_link_walks_backwards() {
    let Some(backend) = backend().await else {
        eprintln!("Skipping Postgres test: Docker not available");
        return;
    };
    let (_, ctx) = project_ctx(&backend).await;
    let region_id = seed_devices(&backend, &ctx, 70).await;
    let filters = DeviceFilters {
        region_id: Some(region_id),
        ..DeviceFilters::default()
    };

    let page1 = backend
        .device_list(&ctx, &filters, &PageParams::with_limit(20))
        .await
        .unwrap();
    // First page: prev points at the first page, without a marker.
    assert_eq!(page1.links.prev.marker, None);

    let marker2 = page1.links.next.as_ref().unwrap().marker.clone().unwrap();
    let page2 = backend
        .device_list(&ctx, &filters, &PageParams::after(marker2, 20))
        .await
        .unwrap();
    // Second page: the previous page is the first page.
    assert_eq!(page2.links.prev.marker, None);

    let marker3 = page2.links.next.as_ref().unwrap().marker.clone().unwrap();
    let page3 = backend
        .device_list(&ctx, &filters, &PageParams::after(marker3, 20))
        .await
        .unwrap();
    // Third page: following prev reproduces the second page.
    let prev = &page3.links.prev;
    assert_eq!(prev.marker.as_deref(), Some(page1.items[19].id.as_str()));
    let back = backend
        .device_list(
            &ctx,
            &filters,
            &PageParams {
                limit: Some(prev.limit),
                marker: prev.marker.clone(),
                sort_dir: SortDir::Asc,
            },
        )
        .await
        .unwrap();
    let expected: Vec<&str> = page2.items.iter().map(|d| d.id.as_str()).collect();
    let walked: Vec<&str> = back.items.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(walked, expected);

    // The last, partial page has no next link.
    let marker4 = page3.links.next.as_ref().unwrap().marker.clone().unwrap();
    let page4 = backend
        .device_list(&ctx, &filters, &PageParams::after(marker4, 20))
        .await
        .unwrap();
    assert_eq!(page4.items.len(), 10);
    assert!(page4.links.next.is_none());
}
