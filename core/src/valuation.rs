//! Effective prices and run values.
//!
//! Two price sources feed valuation: locally learned/manual prices and the
//! community cloud cache. Whichever was updated later wins (a tie goes to
//! the cloud). The base currency is always worth exactly 1 and is never
//! taxed.

use chrono::{DateTime, Utc};
use embertrack::event_models::EventContext;
use serde::Serialize;

use crate::data::BASE_CURRENCY_ID;
use crate::error::StoreError;
use crate::store::{PriceSource, Store};

/// Where an effective price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    BaseCurrency,
    Local,
    Cloud,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectivePrice {
    pub value_fe: f64,
    pub origin: PriceOrigin,
    pub updated_at: DateTime<Utc>,
    pub source: Option<PriceSource>,
}

/// Resolve the effective unit price for an item, before any tax.
pub fn effective_price(
    store: &Store,
    scope: &str,
    season_id: i64,
    type_id: i64,
) -> Result<Option<EffectivePrice>, StoreError> {
    if type_id == BASE_CURRENCY_ID {
        return Ok(Some(EffectivePrice {
            value_fe: 1.0,
            origin: PriceOrigin::BaseCurrency,
            updated_at: Utc::now(),
            source: None,
        }));
    }

    let local = store.get_price(scope, type_id)?;
    let cloud = store.get_cloud_price(season_id, type_id)?;

    Ok(match (local, cloud) {
        (Some(l), Some(c)) => {
            // Later update wins; tie goes to the cloud.
            if l.updated_at > c.updated_at {
                Some(EffectivePrice {
                    value_fe: l.value_fe,
                    origin: PriceOrigin::Local,
                    updated_at: l.updated_at,
                    source: Some(l.source),
                })
            } else {
                Some(EffectivePrice {
                    value_fe: c.median_fe,
                    origin: PriceOrigin::Cloud,
                    updated_at: c.updated_at,
                    source: None,
                })
            }
        }
        (Some(l), None) => Some(EffectivePrice {
            value_fe: l.value_fe,
            origin: PriceOrigin::Local,
            updated_at: l.updated_at,
            source: Some(l.source),
        }),
        (None, Some(c)) => Some(EffectivePrice {
            value_fe: c.median_fe,
            origin: PriceOrigin::Cloud,
            updated_at: c.updated_at,
            source: None,
        }),
        (None, None) => None,
    })
}

/// Valuation of a single run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunValuation {
    /// Base currency picked up directly.
    pub base_gained: i64,
    /// Value of everything picked up, tax applied where enabled.
    pub gross_fe: f64,
    /// Value consumed opening the map, never taxed.
    pub map_cost_fe: f64,
    /// A consumed item had no price; the cost figure understates.
    pub cost_has_unpriced: bool,
}

impl RunValuation {
    pub fn net_fe(&self, map_costs_enabled: bool) -> f64 {
        if map_costs_enabled {
            self.gross_fe - self.map_cost_fe
        } else {
            self.gross_fe
        }
    }
}

/// Value a run's pickups and map costs. `tax_multiplier` is the trade-tax
/// factor for non-base items (1.0 when the toggle is off).
pub fn value_run(
    store: &Store,
    scope: &str,
    season_id: i64,
    run_id: i64,
    tax_multiplier: f64,
) -> Result<RunValuation, StoreError> {
    let mut value = RunValuation::default();

    for (type_id, quantity) in store.run_summary(run_id, EventContext::PickItems)? {
        if type_id == BASE_CURRENCY_ID {
            value.base_gained += quantity;
            value.gross_fe += quantity as f64;
            continue;
        }
        if let Some(price) = effective_price(store, scope, season_id, type_id)? {
            // Sign preserved: losses stay negative in the gross figure.
            value.gross_fe += price.value_fe * quantity as f64 * tax_multiplier;
        }
    }

    for (type_id, quantity) in store.run_summary(run_id, EventContext::MapOpen)? {
        let consumed = quantity.unsigned_abs() as f64;
        if type_id == BASE_CURRENCY_ID {
            value.map_cost_fe += consumed;
            continue;
        }
        match effective_price(store, scope, season_id, type_id)? {
            // Map costs are valued at the untaxed price: the tax models a
            // future sale, and consumed items are never sold.
            Some(price) => value.map_cost_fe += price.value_fe * consumed,
            None => value.cost_has_unpriced = true,
        }
    }

    Ok(value)
}

/// One row of a loot listing (run detail, report, inventory).
#[derive(Debug, Clone, Serialize)]
pub struct LootEntry {
    pub type_id: i64,
    pub name: String,
    pub quantity: i64,
    pub icon_url: Option<String>,
    pub price_fe: Option<f64>,
    pub total_value_fe: Option<f64>,
}

/// Build priced loot rows from an aggregated (type_id, quantity) summary,
/// ordered by |quantity| descending.
pub fn build_loot(
    store: &Store,
    scope: &str,
    season_id: i64,
    summary: &[(i64, i64)],
    tax_multiplier: f64,
) -> Result<Vec<LootEntry>, StoreError> {
    let mut entries = Vec::with_capacity(summary.len());
    for (type_id, quantity) in summary {
        if *quantity == 0 {
            continue;
        }
        let item = store.get_item(*type_id)?;
        let (price_fe, total) = if *type_id == BASE_CURRENCY_ID {
            (Some(1.0), Some(*quantity as f64))
        } else {
            match effective_price(store, scope, season_id, *type_id)? {
                Some(p) => (
                    Some(p.value_fe),
                    Some(p.value_fe * *quantity as f64 * tax_multiplier),
                ),
                None => (None, None),
            }
        };
        entries.push(LootEntry {
            type_id: *type_id,
            name: item
                .as_ref()
                .and_then(|i| i.name_en.clone())
                .unwrap_or_else(|| format!("Unknown {type_id}")),
            quantity: *quantity,
            icon_url: item.and_then(|i| i.icon_url),
            price_fe,
            total_value_fe: total.map(|t| (t * 100.0).round() / 100.0),
        });
    }
    entries.sort_by_key(|e| std::cmp::Reverse(e.quantity.abs()));
    Ok(entries)
}

#[cfg(test)]
#[path = "valuation_tests.rs"]
mod valuation_tests;
