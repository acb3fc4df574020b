//! End-to-end pipeline tests: log lines in, store rows out.

use chrono::{DateTime, TimeZone, Utc};
use embertrack::event_models::EventContext;

use super::*;
use crate::store::Item;

const HUB: &str =
    "SceneLevelMgr@ OpenMainWorld END! InMainLevelPath = /Game/Art/Maps/01SD/XZ_YuJinZhiXiBiNanSuo200/P";
const MAP_A: &str =
    "SceneLevelMgr@ OpenMainWorld END! InMainLevelPath = /Game/Art/Maps/02KD/KD_RongHuoHeXin100/P";
const SUB: &str =
    "SceneLevelMgr@ OpenMainWorld END! InMainLevelPath = /Game/Art/Maps/SuMingTaLuo/SuMingTaLuo_P";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

async fn collector_with_store() -> (Collector, CollectorHandle, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let dir = std::env::temp_dir().join(format!("embertrack-test-{}", uuid::Uuid::new_v4()));
    let (collector, handle) = Collector::initialize(Arc::clone(&store), dir.join("absent.log"))
        .await
        .unwrap();
    (collector, handle, store)
}

fn identify(collector: &mut Collector, t: i64) {
    collector
        .process_line("GameLog: Display: [Game] RoleMgr@ SeasonId = 10", at(t))
        .unwrap();
    collector
        .process_line("GameLog: Display: [Game] RoleMgr@ RoleName = Kaelyn", at(t))
        .unwrap();
}

fn bag_modify(page: i64, slot: i64, type_id: i64, num: i64) -> String {
    format!(
        "GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = {page} SlotId = {slot} ConfigBaseId = {type_id} Num = {num}"
    )
}

#[tokio::test]
async fn test_pickup_inside_run_is_attributed() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);

    // Seed prior state so the modify produces a +31.
    c.process_line(&bag_modify(102, 0, 100300, 640), at(1)).unwrap();
    c.process_line(MAP_A, at(10)).unwrap();
    c.process_line(
        "GameLog: Display: [Game] ItemChange@ ProtoName=PickItems start",
        at(11),
    )
    .unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 671), at(12)).unwrap();
    c.process_line(
        "GameLog: Display: [Game] ItemChange@ ProtoName=PickItems end",
        at(13),
    )
    .unwrap();

    let scope = "10_Kaelyn";
    let run = store.active_run(scope).unwrap().unwrap();
    let deltas = store.deltas_for_run(run.id).unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].delta, 31);
    assert_eq!(deltas[0].type_id, 100300);
    assert_eq!(deltas[0].context_tag(), EventContext::PickItems);

    let value = crate::valuation::value_run(&store, scope, 10, run.id, 1.0).unwrap();
    assert_eq!(value.base_gained, 31);
    assert!((value.gross_fe - 31.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_waiting_for_player_drops_events() {
    let (mut c, handle, store) = collector_with_store().await;
    assert!(handle
        .status
        .waiting_for_player
        .load(std::sync::atomic::Ordering::SeqCst));

    c.process_line(&bag_modify(102, 0, 100300, 640), at(1)).unwrap();
    c.process_line(MAP_A, at(2)).unwrap();

    identify(&mut c, 3);
    assert_eq!(store.all_slots("10_Kaelyn").unwrap().len(), 0);
    assert!(store.active_run("10_Kaelyn").unwrap().is_none());
}

#[tokio::test]
async fn test_hub_deltas_have_no_run() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);
    c.process_line(HUB, at(1)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 10), at(2)).unwrap();

    let deltas = store.deltas_for_scope("10_Kaelyn").unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].run_id, None);
}

#[tokio::test]
async fn test_sub_zone_splice_end_to_end() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);
    let scope = "10_Kaelyn";

    c.process_line(HUB, at(0)).unwrap();
    c.process_line(MAP_A, at(10)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 100), at(20)).unwrap();
    c.process_line(SUB, at(30)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 150), at(40)).unwrap();
    c.process_line(MAP_A, at(50)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 175), at(60)).unwrap();
    c.process_line(HUB, at(70)).unwrap();

    let runs = store.recent_runs(scope, 50).unwrap();
    let outer: Vec<_> = runs
        .iter()
        .filter(|r| !r.is_hub && !r.is_sub_zone)
        .collect();
    let subs: Vec<_> = runs.iter().filter(|r| r.is_sub_zone).collect();
    assert_eq!(outer.len(), 1, "splice must not split the outer run");
    assert_eq!(subs.len(), 1);

    let outer = outer[0];
    let sub = subs[0];
    assert_eq!(sub.parent_run_id, Some(outer.id));
    assert_eq!(outer.start_ts, at(10));
    assert_eq!(outer.end_ts, Some(at(70)));
    assert_eq!(sub.end_ts, Some(at(50)));

    // Pre- and post-excursion loot lands on the outer run; excursion loot
    // on the sub run.
    let outer_total: i64 = store
        .deltas_for_run(outer.id)
        .unwrap()
        .iter()
        .map(|d| d.delta)
        .sum();
    let sub_total: i64 = store
        .deltas_for_run(sub.id)
        .unwrap()
        .iter()
        .map(|d| d.delta)
        .sum();
    assert_eq!(outer_total, 100 - 0 + 25);
    assert_eq!(sub_total, 50);

    // Presentation duration of the outer run excludes the excursion.
    let secs = crate::report::run_duration_excluding_subs(&store, outer, at(70)).unwrap();
    assert!((secs - 40.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_gear_page_dropped_without_allowlist() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);
    c.process_line(&bag_modify(100, 3, 777, 1), at(1)).unwrap();
    assert!(store.all_slots("10_Kaelyn").unwrap().is_empty());
    assert!(store.deltas_for_scope("10_Kaelyn").unwrap().is_empty());
}

#[tokio::test]
async fn test_gear_allowlist_passes_through() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .upsert_item(&Item {
            type_id: 888,
            name_en: Some("Sealed Destiny".into()),
            name_cn: None,
            category_cn: Some("命运".into()),
            icon_url: None,
        })
        .unwrap();
    let dir = std::env::temp_dir().join(format!("embertrack-test-{}", uuid::Uuid::new_v4()));
    let (mut c, _handle) = Collector::initialize(Arc::clone(&store), dir.join("absent.log"))
        .await
        .unwrap();
    identify(&mut c, 0);

    c.process_line(&bag_modify(100, 3, 888, 2), at(1)).unwrap();
    let slots = store.all_slots("10_Kaelyn").unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].type_id, 888);
}

#[tokio::test]
async fn test_scope_change_does_not_cross_contaminate() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);

    c.process_line(MAP_A, at(1)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 50), at(2)).unwrap();
    let first_run = store.active_run("10_Kaelyn").unwrap().unwrap();

    // Character switch.
    c.process_line("GameLog: Display: [Game] RoleMgr@ RoleName = Vesper", at(10))
        .unwrap();

    // Old scope's run was flushed at change time.
    let closed = store.get_run(first_run.id).unwrap().unwrap();
    assert_eq!(closed.end_ts, Some(at(10)));
    assert!(store.active_run("10_Kaelyn").unwrap().is_none());

    // New scope starts empty; same slot produces a fresh full-quantity delta.
    c.process_line(MAP_A, at(11)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 60), at(12)).unwrap();
    let deltas = store.deltas_for_scope("10_Vesper").unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].delta, 60);

    // The first scope's slot state is untouched.
    let old_slots = store.all_slots("10_Kaelyn").unwrap();
    assert_eq!(old_slots.len(), 1);
    assert_eq!(old_slots[0].num, 50);
}

#[tokio::test]
async fn test_exchange_learning_reaches_store_and_outbox() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);
    let scope = "10_Kaelyn";

    c.process_line("----Socket SendMessage STT----XchgSearchPrice----SynId = 5", at(1))
        .unwrap();
    c.process_line("  +refer [100210]", at(1)).unwrap();
    c.process_line("----Socket SendMessage End----", at(1)).unwrap();
    c.process_line("----Socket RecvMessage STT----XchgSearchPrice----SynId = 5", at(2))
        .unwrap();
    c.process_line("  +prices+0+currency [100300]", at(2)).unwrap();
    for (i, p) in [0.10, 0.12, 0.15, 0.20, 1.50].iter().enumerate() {
        c.process_line(&format!("  +unitPrices+{i} [{p}]"), at(2)).unwrap();
    }
    c.process_line("----Socket RecvMessage End----", at(2)).unwrap();

    let price = store.get_price(scope, 100210).unwrap().unwrap();
    assert!((price.value_fe - 0.108).abs() < 1e-9);
    assert_eq!(price.source, PriceSource::Exchange);

    let outbox = store.outbox_batch(10).unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].type_id, 100210);
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let lines: Vec<String> = vec![
        HUB.to_string(),
        MAP_A.to_string(),
        "GameLog: Display: [Game] ItemChange@ ProtoName=PickItems start".into(),
        bag_modify(102, 0, 100300, 10),
        bag_modify(103, 1, 111, 4),
        "GameLog: Display: [Game] ItemChange@ ProtoName=PickItems end".into(),
        bag_modify(103, 1, 222, 2),
        HUB.to_string(),
    ];

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let (mut c, _handle, store) = collector_with_store().await;
        identify(&mut c, 0);
        for (i, line) in lines.iter().enumerate() {
            c.process_line(line, at(i as i64 + 1)).unwrap();
        }
        let slots: Vec<_> = store
            .all_slots("10_Kaelyn")
            .unwrap()
            .iter()
            .map(|s| (s.page_id, s.slot_id, s.type_id, s.num))
            .collect();
        let deltas: Vec<_> = store
            .deltas_for_scope("10_Kaelyn")
            .unwrap()
            .iter()
            .map(|d| (d.type_id, d.delta, d.context.clone(), d.run_id.is_some()))
            .collect();
        let runs = store.recent_runs("10_Kaelyn", 50).unwrap().len();
        snapshots.push((slots, deltas, runs));
    }
    assert_eq!(snapshots[0], snapshots[1]);
}

#[tokio::test]
async fn test_reset_preserves_everything_but_runs() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);
    let scope = "10_Kaelyn";

    c.process_line(MAP_A, at(1)).unwrap();
    c.process_line(&bag_modify(102, 0, 100300, 10), at(2)).unwrap();
    store
        .upsert_price(
            scope,
            10,
            &Price {
                type_id: 100210,
                value_fe: 0.5,
                source: PriceSource::Manual,
                updated_at: at(3),
            },
        )
        .unwrap();
    store.set_setting("map_costs_enabled", "true").unwrap();

    let deleted = c.reset().unwrap();
    assert!(deleted > 0);

    assert!(store.recent_runs(scope, 10).unwrap().is_empty());
    assert!(store.deltas_for_scope(scope).unwrap().is_empty());
    // Slot state, prices, and settings survive.
    assert_eq!(store.all_slots(scope).unwrap().len(), 1);
    assert!(store.get_price(scope, 100210).unwrap().is_some());
    assert!(store.setting_flag("map_costs_enabled").unwrap());
}

#[tokio::test]
async fn test_state_inconsistent_swap_is_authoritative() {
    let (mut c, _handle, store) = collector_with_store().await;
    identify(&mut c, 0);

    // Swap in a slot never observed before: single positive delta, state
    // taken at face value.
    c.process_line(&bag_modify(103, 5, 444, 7), at(1)).unwrap();
    let slots = store.all_slots("10_Kaelyn").unwrap();
    assert_eq!(slots[0].type_id, 444);
    assert_eq!(slots[0].num, 7);
    let deltas = store.deltas_for_scope("10_Kaelyn").unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].delta, 7);
}
