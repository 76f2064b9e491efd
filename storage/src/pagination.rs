//! Marker-based pagination over a stable `(created_at, id)` total order.
//!
//! The marker is the id of the last item of the previous page and must
//! resolve within the filtered scope; an unknown marker is a `BadRequest`.
//! The page query seeks past the marker row instead of offsetting, so
//! repeated listings with the same filters walk every row exactly once.

use errors::InventoryError;
use fi_core::types::{Page, PageLink, PageLinks, PageParams, SortDir};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::query::{BindValue, ScopedQuery};

pub const MIN_PAGE_LIMIT: u32 = 10;
pub const DEFAULT_PAGE_LIMIT: u32 = 30;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Clamp a requested limit into `[MIN_PAGE_LIMIT, MAX_PAGE_LIMIT]`.
/// Out-of-range requests degrade gracefully instead of erroring.
#[must_use]
pub fn clamp_limit(requested: Option<u32>) -> u32 {
    requested.map_or(DEFAULT_PAGE_LIMIT, |limit| {
        limit.clamp(MIN_PAGE_LIMIT, MAX_PAGE_LIMIT)
    })
}

/// Run one paginated listing. `base` rebuilds the filtered query (the same
/// filters every time) because the marker lookup, the page itself, and the
/// prev-link probe each need a fresh statement.
pub(crate) async fn paginate<T>(
    pool: &PgPool,
    base: impl Fn() -> ScopedQuery,
    params: &PageParams,
    map_row: impl Fn(&PgRow) -> Result<T, InventoryError>,
) -> Result<Page<T>, InventoryError> {
    let limit = clamp_limit(params.limit);
    let dir = params.sort_dir;

    // Resolve the marker inside the filtered scope.
    let marker_pos = match &params.marker {
        Some(marker) => {
            let mut query = base();
            query.and_eq("id", marker.as_str());
            let row = query
                .fetch_optional(pool)
                .await
                .map_err(|e| InventoryError::unknown("paginate_marker", e))?
                .ok_or_else(|| InventoryError::bad_request("Marker does not exist"))?;
            Some((
                row.get::<i64, _>("created_at"),
                row.get::<String, _>("id"),
            ))
        }
        None => None,
    };

    // The page itself: seek past the marker, order, limit.
    let mut query = base();
    if let Some((created_at, id)) = &marker_pos {
        let created_ph = query.bind(BindValue::Int(*created_at));
        let id_ph = query.bind(BindValue::Text(id.clone()));
        query.push(&format!(
            " AND (created_at, id) {} ({created_ph}, {id_ph})",
            seek_operator(dir)
        ));
    }
    push_order_and_limit(&mut query, dir, limit);

    let rows = query
        .fetch_all(pool)
        .await
        .map_err(|e| InventoryError::unknown("paginate_page", e))?;

    let next = match rows.last() {
        Some(last) if rows.len() as u32 == limit => Some(PageLink {
            marker: Some(last.get("id")),
            limit,
        }),
        _ => None,
    };

    // The prev marker comes from re-running the limited query in the
    // reverse direction from the current marker. Fewer than `limit`
    // preceding rows means the previous page is the first page.
    let prev_marker = match &marker_pos {
        None => None,
        Some((created_at, id)) => {
            let mut query = base();
            let created_ph = query.bind(BindValue::Int(*created_at));
            let id_ph = query.bind(BindValue::Text(id.clone()));
            query.push(&format!(
                " AND (created_at, id) {} ({created_ph}, {id_ph})",
                seek_operator(dir.reversed())
            ));
            push_order_and_limit(&mut query, dir.reversed(), limit);

            let preceding = query
                .fetch_all(pool)
                .await
                .map_err(|e| InventoryError::unknown("paginate_prev", e))?;
            if preceding.len() as u32 == limit {
                preceding.last().map(|row| row.get::<String, _>("id"))
            } else {
                None
            }
        }
    };

    let items = rows
        .iter()
        .map(|row| map_row(row))
        .collect::<Result<Vec<_>, _>>()?;

    let links = PageLinks {
        first: PageLink {
            marker: None,
            limit,
        },
        current: PageLink {
            marker: params.marker.clone(),
            limit,
        },
        prev: PageLink {
            marker: prev_marker,
            limit,
        },
        next,
    };

    Ok(Page { items, links })
}

fn push_order_and_limit(query: &mut ScopedQuery, dir: SortDir, limit: u32) {
    let order = order_keyword(dir);
    query.push(&format!(" ORDER BY created_at {order}, id {order}"));
    let limit_ph = query.bind(BindValue::Int(i64::from(limit)));
    query.push(&format!(" LIMIT {limit_ph}"));
}

fn seek_operator(dir: SortDir) -> &'static str {
    match dir {
        SortDir::Asc => ">",
        SortDir::Desc => "<",
    }
}

fn order_keyword(dir: SortDir) -> &'static str {
    match dir {
        SortDir::Asc => "ASC",
        SortDir::Desc => "DESC",
    }
}
