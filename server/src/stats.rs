//! Time-series statistics.

use chrono::Utc;
use hyper::body::Incoming;
use hyper::Request;

use embertrack_core::report;

use crate::http::{ok, query_i64, store_error, HttpResponse};
use crate::AppState;

/// Hourly buckets of pickup value and the cumulative curve.
pub fn history(state: &AppState, req: &Request<Incoming>) -> HttpResponse {
    let hours = query_i64(req, "hours").unwrap_or(24).clamp(1, 24 * 14);
    let (scope, season) = state.scope();
    match report::value_history(&state.store, &scope, season, hours, Utc::now()) {
        Ok(points) => ok(&serde_json::json!({
            "hours": hours,
            "points": points,
        })),
        Err(e) => store_error(e),
    }
}
