//! Whitelisted settings access.

use hyper::body::Incoming;
use hyper::{Request, StatusCode};
use serde::{Deserialize, Serialize};

use crate::http::{error, ok, read_json, store_error, HttpResponse};
use crate::AppState;

/// Settings readable and writable through the boundary.
const ALLOWED: &[&str] = &[
    "trade_tax_enabled",
    "map_costs_enabled",
    "realtime_tracking_enabled",
    "hidden_items_exclude_worth",
    "cloud_sync_enabled",
    "cloud_uplink_period_secs",
    "cloud_downlink_period_secs",
    "log_directory",
    "ui_theme",
    "ui_runs_page_size",
];

/// Readable but never writable.
const READ_ONLY: &[&str] = &[
    "cloud_device_id",
    "cloud_last_price_sync",
    "cloud_last_history_sync",
];

#[derive(Serialize)]
struct SettingResponse<'a> {
    key: &'a str,
    value: Option<String>,
}

#[derive(Deserialize)]
struct SettingUpdate {
    value: String,
}

pub fn get(state: &AppState, key: &str) -> HttpResponse {
    if !ALLOWED.contains(&key) && !READ_ONLY.contains(&key) {
        return error(StatusCode::FORBIDDEN, "forbidden", "setting not accessible");
    }
    match state.store.get_setting(key) {
        Ok(value) => ok(&SettingResponse { key, value }),
        Err(e) => store_error(e),
    }
}

pub async fn put(state: &AppState, key: &str, req: Request<Incoming>) -> HttpResponse {
    if !ALLOWED.contains(&key) {
        return error(StatusCode::FORBIDDEN, "forbidden", "setting not modifiable");
    }
    let body: SettingUpdate = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match state.store.set_setting(key, &body.value) {
        Ok(()) => ok(&SettingResponse {
            key,
            value: Some(body.value),
        }),
        Err(e) => store_error(e),
    }
}
