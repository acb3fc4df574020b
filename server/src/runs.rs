//! Run resources.

use chrono::Utc;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;

use embertrack::event_models::EventContext;
use embertrack_core::report::{self, RunView};
use embertrack_core::valuation;

use crate::http::{bad_request, error, not_found, ok, query_i64, store_error, HttpResponse};
use crate::AppState;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Serialize)]
struct RunListResponse {
    runs: Vec<RunView>,
    total: usize,
    page: i64,
    page_size: i64,
}

pub fn list(state: &AppState, req: &Request<Incoming>) -> HttpResponse {
    let page = query_i64(req, "page").unwrap_or(1).max(1);
    let page_size = query_i64(req, "page_size").unwrap_or(20).clamp(1, MAX_PAGE_SIZE);
    let (scope, season) = state.scope();

    // Over-fetch so consolidation and hub filtering still fill the page.
    let fetch = ((page * page_size) as usize) * 5;
    let views = match report::consolidated_runs(&state.store, &scope, season, fetch, Utc::now()) {
        Ok(v) => v,
        Err(e) => return store_error(e),
    };

    let total = views.len();
    let offset = ((page - 1) * page_size) as usize;
    let runs = views
        .into_iter()
        .skip(offset)
        .take(page_size as usize)
        .collect();

    ok(&RunListResponse {
        runs,
        total,
        page,
        page_size,
    })
}

pub fn stats(state: &AppState) -> HttpResponse {
    let (scope, season) = state.scope();
    match report::run_stats(&state.store, &scope, season, Utc::now()) {
        Ok(stats) => ok(&stats),
        Err(e) => store_error(e),
    }
}

#[derive(Serialize)]
struct ActiveRunResponse {
    id: i64,
    zone_name: String,
    zone_signature: String,
    start_ts: chrono::DateTime<Utc>,
    duration_seconds: f64,
    base_gained: i64,
    total_value_fe: f64,
    loot: Vec<valuation::LootEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    net_value_fe: Option<f64>,
}

pub fn active(state: &AppState) -> HttpResponse {
    let (scope, season) = state.scope();
    let now = Utc::now();

    let run = match state.store.active_run(&scope) {
        Ok(Some(run)) if !run.is_hub => run,
        Ok(_) => return ok(&serde_json::Value::Null),
        Err(e) => return store_error(e),
    };

    let tax = state.store.trade_tax_multiplier().unwrap_or(1.0);
    let map_costs = state.store.setting_flag("map_costs_enabled").unwrap_or(false);

    let value = match valuation::value_run(&state.store, &scope, season, run.id, tax) {
        Ok(v) => v,
        Err(e) => return store_error(e),
    };
    let summary = match state.store.run_summary(run.id, EventContext::PickItems) {
        Ok(s) => s,
        Err(e) => return store_error(e),
    };
    let loot = match valuation::build_loot(&state.store, &scope, season, &summary, tax) {
        Ok(l) => l,
        Err(e) => return store_error(e),
    };
    let duration = report::run_duration_excluding_subs(&state.store, &run, now)
        .unwrap_or_else(|_| run.duration_seconds(now));

    ok(&ActiveRunResponse {
        id: run.id,
        zone_name: embertrack_core::data::zones::display_name(&run.zone_signature, run.level_id),
        zone_signature: run.zone_signature.clone(),
        start_ts: run.start_ts,
        duration_seconds: (duration * 10.0).round() / 10.0,
        base_gained: value.base_gained,
        total_value_fe: value.gross_fe,
        loot,
        net_value_fe: map_costs.then(|| value.net_fe(true)),
    })
}

pub fn get(state: &AppState, run_id: i64) -> HttpResponse {
    let (scope, season) = state.scope();
    let run = match state.store.get_run(run_id) {
        Ok(Some(run)) => run,
        Ok(None) => return not_found(),
        Err(e) => return store_error(e),
    };
    // Single lookup bypasses consolidation: present the row as-is.
    let tax = state.store.trade_tax_multiplier().unwrap_or(1.0);
    let value = match valuation::value_run(&state.store, &scope, season, run.id, tax) {
        Ok(v) => v,
        Err(e) => return store_error(e),
    };
    let summary = match state.store.run_summary(run.id, EventContext::PickItems) {
        Ok(s) => s,
        Err(e) => return store_error(e),
    };
    let loot = match valuation::build_loot(&state.store, &scope, season, &summary, tax) {
        Ok(l) => l,
        Err(e) => return store_error(e),
    };
    let duration = report::run_duration_excluding_subs(&state.store, &run, Utc::now())
        .unwrap_or_default();

    ok(&serde_json::json!({
        "id": run.id,
        "zone_name": embertrack_core::data::zones::display_name(&run.zone_signature, run.level_id),
        "zone_signature": run.zone_signature,
        "start_ts": run.start_ts,
        "end_ts": run.end_ts,
        "duration_seconds": duration,
        "is_hub": run.is_hub,
        "is_sub_zone": run.is_sub_zone,
        "parent_run_id": run.parent_run_id,
        "base_gained": value.base_gained,
        "total_value_fe": value.gross_fe,
        "map_cost_fe": value.map_cost_fe,
        "map_cost_has_unpriced": value.cost_has_unpriced,
        "loot": loot,
    }))
}

pub fn report(state: &AppState) -> HttpResponse {
    let (scope, season) = state.scope();
    match report::loot_report(&state.store, &scope, season, Utc::now()) {
        Ok(report) => ok(&report),
        Err(e) => store_error(e),
    }
}

pub fn report_csv(state: &AppState) -> HttpResponse {
    let (scope, season) = state.scope();
    let report = match report::loot_report(&state.store, &scope, season, Utc::now()) {
        Ok(r) => r,
        Err(e) => return store_error(e),
    };
    let csv = report::report_to_csv(&report);
    let filename = format!("embertrack-report-{}.csv", Utc::now().format("%Y-%m-%d"));
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/csv")
        .header(
            "content-disposition",
            format!("attachment; filename=\"{filename}\""),
        )
        .body(http_body_util::Full::new(bytes::Bytes::from(csv)))
        .unwrap_or_default()
}

#[derive(Serialize)]
struct PauseResponse {
    paused: bool,
}

/// Toggle the realtime-tracking pause, keeping the paused-time ledger.
pub fn toggle_pause(state: &AppState) -> HttpResponse {
    let store = &state.store;
    if !store.setting_flag("realtime_tracking_enabled").unwrap_or(false) {
        return bad_request("realtime tracking is not enabled");
    }

    let now = Utc::now();
    let currently_paused = store.setting_flag("realtime_paused").unwrap_or(false);
    let result = if currently_paused {
        // Unpause: fold the elapsed pause into the ledger.
        let mut total: f64 = store
            .get_setting("realtime_total_paused_seconds")
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        if let Ok(Some(start)) = store.get_setting("realtime_pause_start") {
            if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&start) {
                total += (now - ts.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0;
            }
        }
        store
            .set_setting("realtime_total_paused_seconds", &total.to_string())
            .and_then(|_| store.set_setting("realtime_paused", "false"))
            .and_then(|_| store.set_setting("realtime_pause_start", ""))
            .map(|_| false)
    } else {
        store
            .set_setting("realtime_paused", "true")
            .and_then(|_| store.set_setting("realtime_pause_start", &now.to_rfc3339()))
            .map(|_| true)
    };

    match result {
        Ok(paused) => ok(&PauseResponse { paused }),
        Err(e) => store_error(e),
    }
}

#[derive(Serialize)]
struct ResetResponse {
    success: bool,
    runs_deleted: usize,
}

pub async fn reset(state: &AppState) -> HttpResponse {
    match state.collector.reset().await {
        Ok(runs_deleted) => {
            // Reset also clears the pause ledger.
            let _ = state.store.set_setting("realtime_paused", "false");
            let _ = state
                .store
                .set_setting("realtime_total_paused_seconds", "0");
            let _ = state.store.set_setting("realtime_pause_start", "");
            ok(&ResetResponse {
                success: true,
                runs_deleted,
            })
        }
        Err(e) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
    waiting_for_player: bool,
    log_path_missing: bool,
    player_scope: Option<String>,
}

pub fn service_status(state: &AppState) -> HttpResponse {
    use std::sync::atomic::Ordering;
    let status = &state.collector.status;
    ok(&StatusResponse {
        running: status.running.load(Ordering::SeqCst),
        waiting_for_player: status.waiting_for_player.load(Ordering::SeqCst),
        log_path_missing: status.log_missing.load(Ordering::SeqCst),
        player_scope: state.collector.scope().map(|s| s.key),
    })
}
