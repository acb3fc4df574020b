//! Icon proxy with an on-disk cache.
//!
//! Item icons live on a CDN whose headers break direct browser loads, so
//! the tracker fetches them server-side once and serves from disk after.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use crate::http::{not_found, HttpResponse};
use crate::AppState;

const CACHE_CONTROL: &str = "public, max-age=86400";

pub async fn get(state: &AppState, type_id: i64) -> HttpResponse {
    let cache_path = state.icon_cache_dir.join(format!("{type_id}.png"));

    if let Ok(bytes) = tokio::fs::read(&cache_path).await {
        return image_response(bytes);
    }

    let icon_url = match state.store.get_item(type_id) {
        Ok(Some(item)) => match item.icon_url {
            Some(url) if !url.is_empty() => url,
            _ => return not_found(),
        },
        _ => return not_found(),
    };

    let bytes = match fetch_icon(state, &icon_url).await {
        Some(bytes) => bytes,
        None => return not_found(),
    };

    if let Err(e) = tokio::fs::create_dir_all(&state.icon_cache_dir).await {
        tracing::debug!("[ICONS] cache dir unavailable: {e}");
    } else if let Err(e) = tokio::fs::write(&cache_path, &bytes).await {
        tracing::debug!("[ICONS] cache write failed: {e}");
    }

    image_response(bytes)
}

async fn fetch_icon(state: &AppState, url: &str) -> Option<Vec<u8>> {
    let response = state.http.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.bytes().await.ok().map(|b| b.to_vec())
}

fn image_response(bytes: Vec<u8>) -> HttpResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "image/png")
        .header("cache-control", CACHE_CONTROL)
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_default()
}
