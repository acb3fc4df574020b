//! Inventory resources.

use hyper::body::Incoming;
use hyper::Request;
use serde::{Deserialize, Serialize};

use embertrack_core::data::BASE_CURRENCY_ID;
use embertrack_core::valuation;

use crate::http::{ok, query_param, read_json, store_error, HttpResponse};
use crate::AppState;

#[derive(Serialize)]
struct InventoryResponse {
    items: Vec<valuation::LootEntry>,
    total_base: i64,
    net_worth_fe: f64,
}

pub fn get(state: &AppState, req: &Request<Incoming>) -> HttpResponse {
    let (scope, season) = state.scope();
    let sort_by = query_param(req, "sort_by").unwrap_or_else(|| "value".into());
    let descending = query_param(req, "sort_order").as_deref() != Some("asc");
    let include_hidden = query_param(req, "include_hidden").as_deref() == Some("true");

    let totals = match state.store.inventory_totals(&scope) {
        Ok(t) => t,
        Err(e) => return store_error(e),
    };
    let hidden = match state.store.hidden_items(&scope) {
        Ok(h) => h,
        Err(e) => return store_error(e),
    };
    let exclude_hidden_worth = state
        .store
        .setting_flag("hidden_items_exclude_worth")
        .unwrap_or(false);
    let tax = state.store.trade_tax_multiplier().unwrap_or(1.0);

    let mut items = match valuation::build_loot(&state.store, &scope, season, &totals, tax) {
        Ok(entries) => entries,
        Err(e) => return store_error(e),
    };

    let total_base = totals
        .iter()
        .find(|(t, _)| *t == BASE_CURRENCY_ID)
        .map(|(_, n)| *n)
        .unwrap_or(0);
    let net_worth: f64 = items
        .iter()
        .filter(|e| !(exclude_hidden_worth && hidden.contains(&e.type_id)))
        .filter_map(|e| e.total_value_fe)
        .sum();

    if !include_hidden {
        items.retain(|e| !hidden.contains(&e.type_id));
    }

    // Base currency pins to the top in every ordering.
    match sort_by.as_str() {
        "quantity" => items.sort_by_key(|e| {
            (
                e.type_id != BASE_CURRENCY_ID,
                if descending { -e.quantity } else { e.quantity },
            )
        }),
        "name" => {
            items.sort_by(|a, b| {
                (a.type_id != BASE_CURRENCY_ID, a.name.to_lowercase())
                    .cmp(&(b.type_id != BASE_CURRENCY_ID, b.name.to_lowercase()))
            });
            if descending {
                let base_first = items
                    .iter()
                    .position(|e| e.type_id != BASE_CURRENCY_ID)
                    .unwrap_or(0);
                items[base_first..].reverse();
            }
        }
        _ => items.sort_by(|a, b| {
            let key = |e: &valuation::LootEntry| {
                (
                    e.type_id != BASE_CURRENCY_ID,
                    e.total_value_fe.is_none(),
                    e.total_value_fe.unwrap_or(0.0),
                )
            };
            let (ab, an, av) = key(a);
            let (bb, bn, bv) = key(b);
            ab.cmp(&bb).then(an.cmp(&bn)).then_with(|| {
                if descending {
                    bv.total_cmp(&av)
                } else {
                    av.total_cmp(&bv)
                }
            })
        }),
    }

    ok(&InventoryResponse {
        items,
        total_base,
        net_worth_fe: (net_worth * 100.0).round() / 100.0,
    })
}

#[derive(Serialize)]
struct HiddenResponse {
    hidden_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct HiddenRequest {
    hidden_ids: Vec<i64>,
}

pub fn hidden(state: &AppState) -> HttpResponse {
    let (scope, _) = state.scope();
    match state.store.hidden_items(&scope) {
        Ok(set) => {
            let mut hidden_ids: Vec<i64> = set.into_iter().collect();
            hidden_ids.sort_unstable();
            ok(&HiddenResponse { hidden_ids })
        }
        Err(e) => store_error(e),
    }
}

pub async fn set_hidden(state: &AppState, req: Request<Incoming>) -> HttpResponse {
    let body: HiddenRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let (scope, _) = state.scope();
    if let Err(e) = state.store.set_hidden_items(&scope, &body.hidden_ids) {
        return store_error(e);
    }
    hidden(state)
}
