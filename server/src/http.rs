//! Request routing and response shaping.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;

use crate::AppState;

pub type HttpResponse = Response<Full<Bytes>>;

/// Structured failure body with a stable machine-readable code.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}

pub fn ok<T: Serialize>(value: &T) -> HttpResponse {
    json(StatusCode::OK, value)
}

pub fn error(status: StatusCode, code: &str, message: impl Into<String>) -> HttpResponse {
    json(
        status,
        &ErrorBody {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        },
    )
}

pub fn not_found() -> HttpResponse {
    error(StatusCode::NOT_FOUND, "not_found", "resource not found")
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

pub fn store_error(e: embertrack_core::StoreError) -> HttpResponse {
    tracing::warn!("[SERVER] store error: {e}");
    error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "store_error",
        e.to_string(),
    )
}

/// Extract one query parameter from a request URI.
pub fn query_param(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.uri().query().and_then(|q| {
        q.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    })
}

pub fn query_i64(req: &Request<Incoming>, name: &str) -> Option<i64> {
    query_param(req, name).and_then(|v| v.parse().ok())
}

/// Read and deserialize a JSON request body (capped at 1 MiB).
pub async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, HttpResponse> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| bad_request(format!("body read failed: {e}")))?
        .to_bytes();
    if body.len() > 1024 * 1024 {
        return Err(bad_request("body too large"));
    }
    serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid json: {e}")))
}

/// Route one request. Never returns Err: failures become structured
/// responses so an ingest or store problem cannot tear the boundary down.
pub async fn route(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<HttpResponse, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!("[SERVER] {method} {path}");

    let response = match (method, path.as_str()) {
        // Runs
        (Method::GET, "/api/runs") => crate::runs::list(&state, &req),
        (Method::GET, "/api/runs/stats") => crate::runs::stats(&state),
        (Method::GET, "/api/runs/active") => crate::runs::active(&state),
        (Method::GET, "/api/runs/report") => crate::runs::report(&state),
        (Method::GET, "/api/runs/report/csv") => crate::runs::report_csv(&state),
        (Method::POST, "/api/runs/pause") => crate::runs::toggle_pause(&state),
        (Method::POST, "/api/runs/reset") => crate::runs::reset(&state).await,
        (Method::GET, p) if p.starts_with("/api/runs/") => {
            match p.trim_start_matches("/api/runs/").parse::<i64>() {
                Ok(id) => crate::runs::get(&state, id),
                Err(_) => bad_request("run id must be an integer"),
            }
        }

        // Inventory
        (Method::GET, "/api/inventory") => crate::inventory::get(&state, &req),
        (Method::GET, "/api/inventory/hidden") => crate::inventory::hidden(&state),
        (Method::PUT, "/api/inventory/hidden") => {
            return Ok(crate::inventory::set_hidden(&state, req).await)
        }

        // Prices
        (Method::GET, "/api/prices") => crate::prices::list(&state),
        (Method::GET, "/api/prices/export") => crate::prices::export(&state),
        (Method::POST, "/api/prices/migrate") => {
            return Ok(crate::prices::migrate(&state, req).await)
        }
        (Method::GET, p) if p.starts_with("/api/prices/") => {
            match p.trim_start_matches("/api/prices/").parse::<i64>() {
                Ok(id) => crate::prices::get(&state, id),
                Err(_) => bad_request("type id must be an integer"),
            }
        }
        (Method::PUT, p) if p.starts_with("/api/prices/") => {
            match p.trim_start_matches("/api/prices/").parse::<i64>() {
                Ok(id) => return Ok(crate::prices::put(&state, id, req).await),
                Err(_) => bad_request("type id must be an integer"),
            }
        }

        // Stats
        (Method::GET, "/api/stats/history") => crate::stats::history(&state, &req),

        // Cloud
        (Method::GET, "/api/cloud/status") => crate::cloud::status(&state),
        (Method::POST, "/api/cloud/enable") => crate::cloud::set_enabled(&state, true),
        (Method::POST, "/api/cloud/disable") => crate::cloud::set_enabled(&state, false),
        (Method::POST, "/api/cloud/sync") => crate::cloud::sync_now(&state).await,
        (Method::GET, p) if p.starts_with("/api/cloud/prices/") => {
            match p.trim_start_matches("/api/cloud/prices/").parse::<i64>() {
                Ok(id) => crate::cloud::price(&state, id),
                Err(_) => bad_request("type id must be an integer"),
            }
        }
        (Method::GET, p) if p.starts_with("/api/cloud/history/") => {
            match p.trim_start_matches("/api/cloud/history/").parse::<i64>() {
                Ok(id) => crate::cloud::history(&state, id),
                Err(_) => bad_request("type id must be an integer"),
            }
        }

        // Settings
        (Method::GET, p) if p.starts_with("/api/settings/") => {
            crate::settings::get(&state, p.trim_start_matches("/api/settings/"))
        }
        (Method::PUT, p) if p.starts_with("/api/settings/") => {
            let key = p.trim_start_matches("/api/settings/").to_string();
            return Ok(crate::settings::put(&state, &key, req).await);
        }

        // Icons
        (Method::GET, p) if p.starts_with("/api/icons/") => {
            match p.trim_start_matches("/api/icons/").parse::<i64>() {
                Ok(id) => return Ok(crate::icons::get(&state, id).await),
                Err(_) => bad_request("type id must be an integer"),
            }
        }

        // Status
        (Method::GET, "/api/status") => crate::runs::service_status(&state),

        _ => not_found(),
    };

    Ok(response)
}
