//! Tests for price precedence, tax, and run valuation.

use chrono::{DateTime, TimeZone, Utc};
use embertrack::event_models::{EventContext, SlotKey};

use super::*;
use crate::store::deltas::NewDelta;
use crate::store::runs::NewRun;
use crate::store::{CloudPrice, Price, Store};

const SCOPE: &str = "10_Kaelyn";
const SEASON: i64 = 10;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn local_price(store: &Store, type_id: i64, value: f64, t: i64, source: PriceSource) {
    store
        .upsert_price(
            SCOPE,
            SEASON,
            &Price {
                type_id,
                value_fe: value,
                source,
                updated_at: at(t),
            },
        )
        .unwrap();
}

fn cloud_price(store: &Store, type_id: i64, median: f64, t: i64) {
    store
        .upsert_cloud_price(
            SEASON,
            &CloudPrice {
                type_id,
                median_fe: median,
                p10_fe: median * 0.8,
                p90_fe: median * 1.3,
                contributor_count: 5,
                updated_at: at(t),
            },
        )
        .unwrap();
}

fn open_run(store: &Store) -> i64 {
    store
        .insert_run(&NewRun {
            player_scope: SCOPE.into(),
            zone_signature: "/Game/Art/Maps/02KD/KD_RongHuoHeXin100/P".into(),
            level_uid: Some(1),
            level_type: Some(3),
            level_id: Some(4606),
            start_ts: at(0),
            is_hub: false,
            is_sub_zone: false,
            parent_run_id: None,
        })
        .unwrap()
}

fn add_delta(store: &Store, run_id: i64, type_id: i64, delta: i64, context: EventContext, t: i64) {
    store
        .insert_delta(&NewDelta {
            player_scope: SCOPE.into(),
            run_id: Some(run_id),
            slot: SlotKey::new(102, 0),
            type_id,
            delta,
            context,
            proto_name: None,
            timestamp: at(t),
        })
        .unwrap();
}

#[test]
fn test_base_currency_is_always_one() {
    let store = Store::open_in_memory().unwrap();
    let price = effective_price(&store, SCOPE, SEASON, crate::data::BASE_CURRENCY_ID)
        .unwrap()
        .unwrap();
    assert_eq!(price.value_fe, 1.0);
    assert_eq!(price.origin, PriceOrigin::BaseCurrency);
}

#[test]
fn test_later_update_wins_cloud_over_local() {
    let store = Store::open_in_memory().unwrap();
    local_price(&store, 100210, 0.50, 100, PriceSource::Exchange);
    cloud_price(&store, 100210, 0.70, 200);

    let price = effective_price(&store, SCOPE, SEASON, 100210).unwrap().unwrap();
    assert_eq!(price.origin, PriceOrigin::Cloud);
    assert!((price.value_fe - 0.70).abs() < 1e-9);

    // A fresher exchange search flips it back to local.
    local_price(&store, 100210, 0.55, 300, PriceSource::Exchange);
    let price = effective_price(&store, SCOPE, SEASON, 100210).unwrap().unwrap();
    assert_eq!(price.origin, PriceOrigin::Local);
    assert!((price.value_fe - 0.55).abs() < 1e-9);
}

#[test]
fn test_timestamp_tie_goes_to_cloud() {
    let store = Store::open_in_memory().unwrap();
    local_price(&store, 100210, 0.50, 100, PriceSource::Manual);
    cloud_price(&store, 100210, 0.70, 100);
    let price = effective_price(&store, SCOPE, SEASON, 100210).unwrap().unwrap();
    assert_eq!(price.origin, PriceOrigin::Cloud);
}

#[test]
fn test_unpriced_item_resolves_to_none() {
    let store = Store::open_in_memory().unwrap();
    assert!(effective_price(&store, SCOPE, SEASON, 424242)
        .unwrap()
        .is_none());
}

#[test]
fn test_run_gross_matches_delta_sum() {
    let store = Store::open_in_memory().unwrap();
    let run_id = open_run(&store);
    local_price(&store, 100210, 0.50, 10, PriceSource::Exchange);

    add_delta(&store, run_id, crate::data::BASE_CURRENCY_ID, 31, EventContext::PickItems, 1);
    add_delta(&store, run_id, 100210, 4, EventContext::PickItems, 2);
    // Unpriced pickup counts as zero.
    add_delta(&store, run_id, 999999, 2, EventContext::PickItems, 3);
    // Non-pickup context never enters gross.
    add_delta(&store, run_id, 100210, 50, EventContext::Recycle, 4);

    let value = value_run(&store, SCOPE, SEASON, run_id, 1.0).unwrap();
    assert_eq!(value.base_gained, 31);
    assert!((value.gross_fe - (31.0 + 2.0)).abs() < 1e-9);
}

#[test]
fn test_trade_tax_applies_to_items_not_base_currency() {
    let store = Store::open_in_memory().unwrap();
    let run_id = open_run(&store);
    local_price(&store, 100210, 1.0, 10, PriceSource::Exchange);

    add_delta(&store, run_id, crate::data::BASE_CURRENCY_ID, 8, EventContext::PickItems, 1);
    add_delta(&store, run_id, 100210, 8, EventContext::PickItems, 2);

    let value = value_run(&store, SCOPE, SEASON, run_id, 0.875).unwrap();
    // 8 FE untaxed + 8 * 1.0 * 0.875
    assert!((value.gross_fe - 15.0).abs() < 1e-9);
}

#[test]
fn test_map_cost_is_untaxed_and_flags_unpriced() {
    let store = Store::open_in_memory().unwrap();
    let run_id = open_run(&store);
    local_price(&store, 300100, 2.0, 10, PriceSource::Manual);

    add_delta(&store, run_id, 300100, -3, EventContext::MapOpen, 1);
    add_delta(&store, run_id, 300200, -1, EventContext::MapOpen, 2);

    let value = value_run(&store, SCOPE, SEASON, run_id, 0.875).unwrap();
    assert!((value.map_cost_fe - 6.0).abs() < 1e-9);
    assert!(value.cost_has_unpriced);
    assert!((value.net_fe(true) - (0.0 - 6.0)).abs() < 1e-9);
    assert!((value.net_fe(false) - 0.0).abs() < 1e-9);
}

#[test]
fn test_loot_entries_preserve_loss_sign() {
    let store = Store::open_in_memory().unwrap();
    local_price(&store, 100210, 0.5, 10, PriceSource::Exchange);
    let entries = build_loot(&store, SCOPE, SEASON, &[(100210, -4)], 1.0).unwrap();
    assert_eq!(entries[0].quantity, -4);
    assert!((entries[0].total_value_fe.unwrap() - (-2.0)).abs() < 1e-9);
}

#[test]
fn test_manual_price_survives_stale_cloud_downlink() {
    let store = Store::open_in_memory().unwrap();
    local_price(&store, 100210, 3.0, 500, PriceSource::Manual);
    // Downlink carries an older aggregate: local stays effective.
    cloud_price(&store, 100210, 1.0, 400);
    let price = effective_price(&store, SCOPE, SEASON, 100210).unwrap().unwrap();
    assert_eq!(price.origin, PriceOrigin::Local);
    assert!((price.value_fe - 3.0).abs() < 1e-9);
}
