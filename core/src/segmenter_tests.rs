//! Tests for run segmentation, including the sub-zone splice.

use chrono::{DateTime, TimeZone, Utc};

use super::*;

const HUB: &str = "/Game/Art/Maps/01SD/XZ_YuJinZhiXiBiNanSuo200/XZ_YuJinZhiXiBiNanSuo200_P";
const MAP_A: &str = "/Game/Art/Maps/02KD/KD_RongHuoHeXin100/KD_RongHuoHeXin100_P";
const MAP_B: &str = "/Game/Art/Maps/03YL/YL_BeiFengLinDi100/YL_BeiFengLinDi100_P";
const SUB: &str = "/Game/Art/Maps/SuMingTaLuo/SuMingTaLuo_P";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Drive a transition through a fake store that hands out sequential ids.
struct Harness {
    segmenter: RunSegmenter,
    next_id: i64,
    closed: Vec<(i64, DateTime<Utc>)>,
    opened: Vec<(i64, NewRun)>,
}

impl Harness {
    fn new() -> Self {
        Self {
            segmenter: RunSegmenter::new(),
            next_id: 1,
            closed: Vec::new(),
            opened: Vec::new(),
        }
    }

    fn enter(&mut self, path: &str, t: i64) -> Transition {
        let transition = self.segmenter.handle_level_open(path, at(t));
        self.closed.extend(transition.close.iter().copied());
        if let Some(open) = &transition.open {
            let id = self.next_id;
            self.next_id += 1;
            self.opened.push((id, open.clone()));
            self.segmenter.confirm_open(id);
        }
        transition
    }

    fn opened_run(&self, id: i64) -> &NewRun {
        &self.opened.iter().find(|(i, _)| *i == id).unwrap().1
    }
}

#[test]
fn test_map_entry_from_idle_opens_run() {
    let mut h = Harness::new();
    h.enter(MAP_A, 0);
    assert_eq!(h.segmenter.attribution(), Some(1));
    assert!(!h.opened_run(1).is_hub);
    assert!(h.closed.is_empty());
}

#[test]
fn test_hub_entry_closes_active_run() {
    let mut h = Harness::new();
    h.enter(MAP_A, 0);
    h.enter(HUB, 60);
    assert_eq!(h.closed, vec![(1, at(60))]);
    // The hub run is open for zone reporting but never accrues loot.
    assert!(h.opened_run(2).is_hub);
    assert_eq!(h.segmenter.attribution(), None);
}

#[test]
fn test_sub_zone_splice_preserves_outer_run() {
    let mut h = Harness::new();
    h.enter(HUB, 0);
    h.enter(MAP_A, 10); // run 2 = outer
    h.enter(SUB, 100); // run 3 = sub
    assert_eq!(h.segmenter.attribution(), Some(3));
    let sub = h.opened_run(3);
    assert!(sub.is_sub_zone);
    assert_eq!(sub.parent_run_id, Some(2));

    // Back to the outer zone: the sub closes, the outer resumes, no new run.
    let splice = h.enter(MAP_A, 200);
    assert_eq!(splice.close, vec![(3, at(200))]);
    assert!(splice.open.is_none());
    assert_eq!(splice.resumed_outer, Some(2));
    assert_eq!(h.segmenter.attribution(), Some(2));

    // Hub entry finally closes the outer run, startTs preserved throughout.
    h.enter(HUB, 300);
    assert!(h.closed.contains(&(2, at(300))));
    assert_eq!(h.opened_run(2).start_ts, at(10));
}

#[test]
fn test_sub_zone_alone_is_standalone_run() {
    let mut h = Harness::new();
    h.enter(SUB, 0);
    let run = h.opened_run(1);
    assert!(run.is_sub_zone);
    assert_eq!(run.parent_run_id, None);
    assert_eq!(h.segmenter.attribution(), Some(1));
}

#[test]
fn test_reentering_same_zone_starts_fresh_run() {
    let mut h = Harness::new();
    h.enter(MAP_A, 0);
    h.enter(MAP_A, 120);
    assert_eq!(h.closed, vec![(1, at(120))]);
    assert_eq!(h.segmenter.attribution(), Some(2));
}

#[test]
fn test_abandoning_sub_zone_for_new_map_closes_both() {
    let mut h = Harness::new();
    h.enter(MAP_A, 0); // run 1
    h.enter(SUB, 50); // run 2
    h.enter(MAP_B, 100); // run 3, different zone than the outer
    assert_eq!(h.closed, vec![(2, at(100)), (1, at(100))]);
    assert_eq!(h.segmenter.attribution(), Some(3));
}

#[test]
fn test_at_most_one_open_attribution() {
    let mut h = Harness::new();
    for (path, t) in [(HUB, 0), (MAP_A, 1), (SUB, 2), (MAP_A, 3), (HUB, 4)] {
        h.enter(path, t);
        // Every opened run either got closed or is the single current one.
        let open_count = h
            .opened
            .iter()
            .filter(|(id, _)| !h.closed.iter().any(|(cid, _)| cid == id))
            .count();
        assert!(open_count <= 2, "outer + sub at most");
    }
}

#[test]
fn test_force_close_empties_state() {
    let mut h = Harness::new();
    h.enter(MAP_A, 0);
    h.enter(SUB, 10);
    let closed = h.segmenter.force_close(at(20));
    assert_eq!(closed.len(), 2);
    assert!(h.segmenter.is_idle());
    assert_eq!(h.segmenter.attribution(), None);
}

#[test]
fn test_load_active_restores_sub_zone_state() {
    let outer = Run {
        id: 7,
        player_scope: "s1".into(),
        zone_signature: MAP_A.into(),
        level_uid: Some(1),
        level_type: Some(3),
        level_id: Some(4606),
        start_ts: at(0),
        end_ts: None,
        is_hub: false,
        is_sub_zone: false,
        parent_run_id: None,
    };
    let sub = Run {
        id: 8,
        player_scope: "s1".into(),
        zone_signature: SUB.into(),
        level_uid: Some(2),
        level_type: Some(19),
        level_id: Some(9),
        start_ts: at(5),
        end_ts: None,
        is_hub: false,
        is_sub_zone: true,
        parent_run_id: Some(7),
    };

    let mut segmenter = RunSegmenter::new();
    segmenter.load_active(&sub, Some(&outer));
    assert_eq!(segmenter.attribution(), Some(8));

    // Returning to the outer signature splices even across a restart.
    let transition = segmenter.handle_level_open(MAP_A, at(50));
    assert_eq!(transition.resumed_outer, Some(7));
}
