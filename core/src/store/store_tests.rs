//! Store behavior tests against in-memory and on-disk databases.

use chrono::{DateTime, TimeZone, Utc};
use embertrack::event_models::{EventContext, SlotKey};

use super::deltas::NewDelta;
use super::runs::NewRun;
use super::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn new_run(scope: &str, t: i64) -> NewRun {
    NewRun {
        player_scope: scope.to_string(),
        zone_signature: "/Game/Art/Maps/02KD/KD_RongHuoHeXin100/P".into(),
        level_uid: Some(1),
        level_type: Some(3),
        level_id: Some(4606),
        start_ts: at(t),
        is_hub: false,
        is_sub_zone: false,
        parent_run_id: None,
    }
}

#[test]
fn test_active_run_is_unique_per_scope() {
    let store = Store::open_in_memory().unwrap();
    let a = store.insert_run(&new_run("s1", 0)).unwrap();
    store.update_run_end(a, at(10)).unwrap();
    let b = store.insert_run(&new_run("s1", 20)).unwrap();
    let _other_scope = store.insert_run(&new_run("s2", 5)).unwrap();

    let active = store.active_run("s1").unwrap().unwrap();
    assert_eq!(active.id, b);
    assert!(active.end_ts.is_none());
}

#[test]
fn test_close_open_runs_flushes_scope() {
    let store = Store::open_in_memory().unwrap();
    store.insert_run(&new_run("s1", 0)).unwrap();
    store.insert_run(&new_run("s2", 0)).unwrap();

    let closed = store.close_open_runs("s1", at(30)).unwrap();
    assert_eq!(closed, 1);
    assert!(store.active_run("s1").unwrap().is_none());
    assert!(store.active_run("s2").unwrap().is_some());
}

#[test]
fn test_run_summary_groups_and_filters_context() {
    let store = Store::open_in_memory().unwrap();
    let run = store.insert_run(&new_run("s1", 0)).unwrap();
    for (type_id, delta, context) in [
        (100, 5, EventContext::PickItems),
        (100, 3, EventContext::PickItems),
        (200, -2, EventContext::MapOpen),
        (100, 50, EventContext::Recycle),
    ] {
        store
            .insert_delta(&NewDelta {
                player_scope: "s1".into(),
                run_id: Some(run),
                slot: SlotKey::new(102, 0),
                type_id,
                delta,
                context,
                proto_name: None,
                timestamp: at(1),
            })
            .unwrap();
    }

    let picks = store.run_summary(run, EventContext::PickItems).unwrap();
    assert_eq!(picks, vec![(100, 8)]);
    let costs = store.run_summary(run, EventContext::MapOpen).unwrap();
    assert_eq!(costs, vec![(200, -2)]);
}

#[test]
fn test_slot_state_upsert_and_clear() {
    let store = Store::open_in_memory().unwrap();
    let key = SlotKey::new(102, 3);
    store.upsert_slot("s1", key, 100300, 42, at(0)).unwrap();
    store.upsert_slot("s1", key, 100300, 50, at(1)).unwrap();

    let slot = store.get_slot("s1", key).unwrap().unwrap();
    assert_eq!(slot.num, 50);

    store.clear_slot("s1", key).unwrap();
    assert!(store.get_slot("s1", key).unwrap().is_none());
}

#[test]
fn test_outbox_never_accepts_base_currency() {
    let store = Store::open_in_memory().unwrap();
    store
        .outbox_enqueue(crate::data::BASE_CURRENCY_ID, 1.0, at(0))
        .unwrap();
    store.outbox_enqueue(100210, 0.5, at(0)).unwrap();
    assert_eq!(store.outbox_len().unwrap(), 1);
}

#[test]
fn test_outbox_fifo_and_attempt_bookkeeping() {
    let store = Store::open_in_memory().unwrap();
    store.outbox_enqueue(1, 0.1, at(0)).unwrap();
    store.outbox_enqueue(2, 0.2, at(1)).unwrap();

    let batch = store.outbox_batch(10).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].type_id, 1);

    store
        .outbox_mark_attempt(batch[0].id, at(5), "503: unavailable")
        .unwrap();
    let batch = store.outbox_batch(10).unwrap();
    assert_eq!(batch[0].attempts, 1);
    assert_eq!(batch[0].last_error.as_deref(), Some("503: unavailable"));

    store.outbox_delete(batch[0].id).unwrap();
    assert_eq!(store.outbox_len().unwrap(), 1);
}

#[test]
fn test_price_rows_never_store_base_currency() {
    let store = Store::open_in_memory().unwrap();
    store
        .upsert_price(
            "s1",
            10,
            &Price {
                type_id: crate::data::BASE_CURRENCY_ID,
                value_fe: 2.0,
                source: PriceSource::Manual,
                updated_at: at(0),
            },
        )
        .unwrap();
    assert!(store
        .get_price("s1", crate::data::BASE_CURRENCY_ID)
        .unwrap()
        .is_none());
}

#[test]
fn test_migrate_season_prices_keeps_existing_rows() {
    let store = Store::open_in_memory().unwrap();
    for (type_id, value) in [(1, 0.1), (2, 0.2)] {
        store
            .upsert_price(
                "9_Kaelyn",
                9,
                &Price {
                    type_id,
                    value_fe: value,
                    source: PriceSource::Exchange,
                    updated_at: at(0),
                },
            )
            .unwrap();
    }
    // The new season already has its own idea of item 1.
    store
        .upsert_price(
            "10_Kaelyn",
            10,
            &Price {
                type_id: 1,
                value_fe: 0.9,
                source: PriceSource::Manual,
                updated_at: at(100),
            },
        )
        .unwrap();

    let copied = store
        .migrate_season_prices("9_Kaelyn", "10_Kaelyn", 10)
        .unwrap();
    assert_eq!(copied, 1);
    let kept = store.get_price("10_Kaelyn", 1).unwrap().unwrap();
    assert!((kept.value_fe - 0.9).abs() < 1e-9);
    let migrated = store.get_price("10_Kaelyn", 2).unwrap().unwrap();
    assert!((migrated.value_fe - 0.2).abs() < 1e-9);
}

#[test]
fn test_log_position_roundtrip() {
    let store = Store::open_in_memory().unwrap();
    assert!(store.get_log_position().unwrap().is_none());
    store
        .save_log_position(std::path::Path::new("/tmp/game.log"), 1234, 9999)
        .unwrap();
    let (path, pos, size) = store.get_log_position().unwrap().unwrap();
    assert_eq!(path, std::path::PathBuf::from("/tmp/game.log"));
    assert_eq!(pos, 1234);
    assert_eq!(size, 9999);
}

#[test]
fn test_legacy_probe_copies_once() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = dir.path().join("legacy").join("tracker.db");
    let canonical = dir.path().join("canonical").join("tracker.db");

    {
        let old = Store::open(&legacy).unwrap();
        old.set_setting("trade_tax_enabled", "true").unwrap();
    }

    let migrated = Store::open_with_legacy_probe(&canonical, Some(&legacy)).unwrap();
    assert!(migrated.setting_flag("trade_tax_enabled").unwrap());
    drop(migrated);

    // Second open keeps the canonical file rather than re-copying.
    {
        let store = Store::open(&canonical).unwrap();
        store.set_setting("trade_tax_enabled", "false").unwrap();
    }
    let reopened = Store::open_with_legacy_probe(&canonical, Some(&legacy)).unwrap();
    assert!(!reopened.setting_flag("trade_tax_enabled").unwrap());
}

#[test]
fn test_hidden_items_replace_semantics() {
    let store = Store::open_in_memory().unwrap();
    store.set_hidden_items("s1", &[1, 2, 3]).unwrap();
    store.set_hidden_items("s1", &[2, 4]).unwrap();
    let hidden = store.hidden_items("s1").unwrap();
    assert_eq!(hidden.len(), 2);
    assert!(hidden.contains(&2) && hidden.contains(&4));
}

#[test]
fn test_item_name_unknown_fallback() {
    let store = Store::open_in_memory().unwrap();
    assert_eq!(store.item_name(31337).unwrap(), "Unknown 31337");
}
