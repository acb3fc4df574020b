//! Price resources.

use chrono::Utc;
use hyper::body::Incoming;
use hyper::Request;
use serde::{Deserialize, Serialize};

use embertrack_core::data::BASE_CURRENCY_ID;
use embertrack_core::store::{Price, PriceSource};

use crate::http::{bad_request, not_found, ok, read_json, store_error, HttpResponse};
use crate::AppState;

#[derive(Serialize)]
struct PriceView {
    type_id: i64,
    name: String,
    value_fe: f64,
    source: PriceSource,
    updated_at: chrono::DateTime<Utc>,
}

fn view(state: &AppState, price: Price) -> PriceView {
    let name = state
        .store
        .item_name(price.type_id)
        .unwrap_or_else(|_| format!("Unknown {}", price.type_id));
    PriceView {
        type_id: price.type_id,
        name,
        value_fe: price.value_fe,
        source: price.source,
        updated_at: price.updated_at,
    }
}

#[derive(Serialize)]
struct PriceListResponse {
    prices: Vec<PriceView>,
    total: usize,
}

pub fn list(state: &AppState) -> HttpResponse {
    let (scope, _) = state.scope();
    match state.store.all_prices(&scope) {
        Ok(prices) => {
            let mut prices: Vec<PriceView> =
                prices.into_iter().map(|p| view(state, p)).collect();
            prices.sort_by(|a, b| a.name.cmp(&b.name));
            let total = prices.len();
            ok(&PriceListResponse { prices, total })
        }
        Err(e) => store_error(e),
    }
}

pub fn get(state: &AppState, type_id: i64) -> HttpResponse {
    let (scope, _) = state.scope();
    match state.store.get_price(&scope, type_id) {
        Ok(Some(price)) => ok(&view(state, price)),
        Ok(None) => not_found(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct PriceUpdateRequest {
    value_fe: f64,
    #[serde(default)]
    source: Option<String>,
}

pub async fn put(state: &AppState, type_id: i64, req: Request<Incoming>) -> HttpResponse {
    if type_id == BASE_CURRENCY_ID {
        return bad_request("the base currency price is fixed at 1");
    }
    let body: PriceUpdateRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if !body.value_fe.is_finite() || body.value_fe < 0.0 {
        return bad_request("value_fe must be a non-negative number");
    }

    let (scope, season) = state.scope();
    let price = Price {
        type_id,
        value_fe: body.value_fe,
        source: match body.source.as_deref() {
            Some("exchange") => PriceSource::Exchange,
            _ => PriceSource::Manual,
        },
        updated_at: Utc::now(),
    };
    match state.store.upsert_price(&scope, season, &price) {
        Ok(()) => ok(&view(state, price)),
        Err(e) => store_error(e),
    }
}

/// Full price table dump for backup or sharing.
pub fn export(state: &AppState) -> HttpResponse {
    let (scope, season) = state.scope();
    match state.store.all_prices(&scope) {
        Ok(prices) => ok(&serde_json::json!({
            "player_scope": scope,
            "season_id": season,
            "exported_at": Utc::now(),
            "prices": prices,
        })),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct MigrateRequest {
    from_scope: String,
}

#[derive(Serialize)]
struct MigrateResponse {
    copied: usize,
}

/// Copy an earlier season's prices into the current scope; newer local
/// rows are kept.
pub async fn migrate(state: &AppState, req: Request<Incoming>) -> HttpResponse {
    let body: MigrateRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let (scope, season) = state.scope();
    if body.from_scope == scope {
        return bad_request("source scope equals the current scope");
    }
    match state
        .store
        .migrate_season_prices(&body.from_scope, &scope, season)
    {
        Ok(copied) => ok(&MigrateResponse { copied }),
        Err(e) => store_error(e),
    }
}
