//! Cloud sync resources.

use chrono::{Duration, Utc};
use serde::Serialize;

use embertrack_core::cloud::{CloudSyncWorker, COMMUNITY_MIN_CONTRIBUTORS};

use crate::http::{error, not_found, ok, store_error, HttpResponse};
use crate::AppState;

pub fn status(state: &AppState) -> HttpResponse {
    ok(&CloudSyncWorker::status(
        &state.store,
        state.cloud.configured(),
    ))
}

#[derive(Serialize)]
struct EnabledResponse {
    enabled: bool,
}

/// Flip the sync toggle. Disabling stops the loops' work but keeps every
/// cached price.
pub fn set_enabled(state: &AppState, enabled: bool) -> HttpResponse {
    if enabled && !state.cloud.configured() {
        return error(
            hyper::StatusCode::BAD_REQUEST,
            "cloud_unconfigured",
            "cloud remote is not configured",
        );
    }
    match state
        .store
        .set_setting("cloud_sync_enabled", if enabled { "true" } else { "false" })
    {
        Ok(()) => ok(&EnabledResponse { enabled }),
        Err(e) => store_error(e),
    }
}

#[derive(Serialize)]
struct SyncResponse {
    triggered: bool,
}

pub async fn sync_now(state: &AppState) -> HttpResponse {
    let triggered = state.cloud.sync_now().await;
    ok(&SyncResponse { triggered })
}

#[derive(Serialize)]
struct CloudPriceView {
    type_id: i64,
    median_fe: f64,
    p10_fe: f64,
    p90_fe: f64,
    contributor_count: i64,
    /// Community indicator: aggregation only counts with enough
    /// contributors behind it.
    community_backed: bool,
    updated_at: chrono::DateTime<Utc>,
}

pub fn price(state: &AppState, type_id: i64) -> HttpResponse {
    let (_, season) = state.scope();
    match state.store.get_cloud_price(season, type_id) {
        Ok(Some(p)) => ok(&CloudPriceView {
            type_id: p.type_id,
            median_fe: p.median_fe,
            p10_fe: p.p10_fe,
            p90_fe: p.p90_fe,
            contributor_count: p.contributor_count,
            community_backed: p.contributor_count >= COMMUNITY_MIN_CONTRIBUTORS,
            updated_at: p.updated_at,
        }),
        Ok(None) => not_found(),
        Err(e) => store_error(e),
    }
}

/// Per-item sparkline data. Single-contributor buckets are included here;
/// the threshold only gates the community indicator.
pub fn history(state: &AppState, type_id: i64) -> HttpResponse {
    let since = Utc::now() - Duration::hours(72);
    match state.store.history_for(type_id, since) {
        Ok(rows) => ok(&serde_json::json!({
            "type_id": type_id,
            "buckets": rows,
        })),
        Err(e) => store_error(e),
    }
}
