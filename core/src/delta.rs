//! Delta computation.
//!
//! Bag lines carry absolute stack totals; the engine folds them over the
//! previous slot map and emits signed changes. It holds the only in-memory
//! copy of slot state, so the ingest loop must stay single-threaded.

use std::collections::HashMap;

use embertrack::event_models::SlotKey;

/// One signed quantity change produced by a bag event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDelta {
    pub slot: SlotKey,
    pub type_id: i64,
    pub delta: i64,
}

/// The slot's state after an event: occupied or vacated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Occupied { type_id: i64, num: i64 },
    Empty,
    /// Event did not change stored state (e.g. no-op modify).
    Unchanged,
}

#[derive(Debug, Default)]
pub struct DeltaEngine {
    slots: HashMap<SlotKey, (i64, i64)>,
}

impl DeltaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted slot state (startup, scope change).
    pub fn load(&mut self, states: impl IntoIterator<Item = (SlotKey, i64, i64)>) {
        self.slots.clear();
        for (slot, type_id, num) in states {
            self.slots.insert(slot, (type_id, num));
        }
    }

    pub fn slot(&self, slot: SlotKey) -> Option<(i64, i64)> {
        self.slots.get(&slot).copied()
    }

    pub fn slots(&self) -> impl Iterator<Item = (SlotKey, i64, i64)> + '_ {
        self.slots.iter().map(|(k, (t, n))| (*k, *t, *n))
    }

    /// Inventory snapshot row: update state, never a delta.
    pub fn apply_init(&mut self, slot: SlotKey, type_id: i64, num: i64) -> SlotOutcome {
        self.slots.insert(slot, (type_id, num));
        SlotOutcome::Occupied { type_id, num }
    }

    /// Live modify: delta against the previous total, two deltas on a
    /// type swap. An anomalous negative total is an authoritative reset
    /// with no synthetic delta.
    pub fn apply_modify(
        &mut self,
        slot: SlotKey,
        type_id: i64,
        num: i64,
    ) -> (Vec<SlotDelta>, SlotOutcome) {
        if num < 0 {
            self.slots.insert(slot, (type_id, num));
            return (Vec::new(), SlotOutcome::Occupied { type_id, num });
        }

        let outcome = SlotOutcome::Occupied { type_id, num };
        match self.slots.insert(slot, (type_id, num)) {
            None => (
                vec![SlotDelta {
                    slot,
                    type_id,
                    delta: num,
                }],
                outcome,
            ),
            Some((prev_type, prev_num)) if prev_type == type_id => {
                let delta = num - prev_num;
                if delta == 0 {
                    (Vec::new(), SlotOutcome::Unchanged)
                } else {
                    (
                        vec![SlotDelta {
                            slot,
                            type_id,
                            delta,
                        }],
                        outcome,
                    )
                }
            }
            Some((prev_type, prev_num)) => (
                vec![
                    SlotDelta {
                        slot,
                        type_id: prev_type,
                        delta: -prev_num,
                    },
                    SlotDelta {
                        slot,
                        type_id,
                        delta: num,
                    },
                ],
                outcome,
            ),
        }
    }

    /// Slot vacated; the line has no TypeId so the prior state resolves it.
    pub fn apply_remove(&mut self, slot: SlotKey) -> (Vec<SlotDelta>, SlotOutcome) {
        match self.slots.remove(&slot) {
            Some((type_id, num)) if num != 0 => (
                vec![SlotDelta {
                    slot,
                    type_id,
                    delta: -num,
                }],
                SlotOutcome::Empty,
            ),
            Some(_) => (Vec::new(), SlotOutcome::Empty),
            None => (Vec::new(), SlotOutcome::Unchanged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(page: i64, idx: i64) -> SlotKey {
        SlotKey::new(page, idx)
    }

    #[test]
    fn test_pickup_delta_against_prior_total() {
        let mut engine = DeltaEngine::new();
        engine.load([(slot(102, 0), 100300, 640)]);

        let (deltas, outcome) = engine.apply_modify(slot(102, 0), 100300, 671);
        assert_eq!(
            deltas,
            vec![SlotDelta {
                slot: slot(102, 0),
                type_id: 100300,
                delta: 31,
            }]
        );
        assert_eq!(
            outcome,
            SlotOutcome::Occupied {
                type_id: 100300,
                num: 671
            }
        );
    }

    #[test]
    fn test_first_observation_is_full_positive_delta() {
        let mut engine = DeltaEngine::new();
        let (deltas, _) = engine.apply_modify(slot(103, 1), 210041, 5);
        assert_eq!(deltas[0].delta, 5);
    }

    #[test]
    fn test_stack_swap_emits_remove_then_add() {
        let mut engine = DeltaEngine::new();
        engine.load([(slot(103, 5), 111, 10)]);

        let (deltas, _) = engine.apply_modify(slot(103, 5), 222, 3);
        assert_eq!(deltas.len(), 2);
        assert_eq!((deltas[0].type_id, deltas[0].delta), (111, -10));
        assert_eq!((deltas[1].type_id, deltas[1].delta), (222, 3));
        assert_eq!(engine.slot(slot(103, 5)), Some((222, 3)));
    }

    #[test]
    fn test_removal_resolves_prior_type() {
        let mut engine = DeltaEngine::new();
        engine.load([(slot(103, 39), 333, 1)]);

        let (deltas, outcome) = engine.apply_remove(slot(103, 39));
        assert_eq!(
            deltas,
            vec![SlotDelta {
                slot: slot(103, 39),
                type_id: 333,
                delta: -1,
            }]
        );
        assert_eq!(outcome, SlotOutcome::Empty);
        assert_eq!(engine.slot(slot(103, 39)), None);
    }

    #[test]
    fn test_remove_of_empty_slot_is_noop() {
        let mut engine = DeltaEngine::new();
        let (deltas, outcome) = engine.apply_remove(slot(103, 0));
        assert!(deltas.is_empty());
        assert_eq!(outcome, SlotOutcome::Unchanged);
    }

    #[test]
    fn test_unchanged_total_emits_nothing() {
        let mut engine = DeltaEngine::new();
        engine.load([(slot(102, 2), 100300, 50)]);
        let (deltas, outcome) = engine.apply_modify(slot(102, 2), 100300, 50);
        assert!(deltas.is_empty());
        assert_eq!(outcome, SlotOutcome::Unchanged);
    }

    #[test]
    fn test_init_updates_state_without_delta() {
        let mut engine = DeltaEngine::new();
        engine.load([(slot(102, 0), 100300, 640)]);
        let outcome = engine.apply_init(slot(102, 0), 100300, 700);
        assert_eq!(
            outcome,
            SlotOutcome::Occupied {
                type_id: 100300,
                num: 700
            }
        );
        // The next modify deltas against the snapshot value.
        let (deltas, _) = engine.apply_modify(slot(102, 0), 100300, 705);
        assert_eq!(deltas[0].delta, 5);
    }

    #[test]
    fn test_negative_total_is_authoritative_reset() {
        let mut engine = DeltaEngine::new();
        engine.load([(slot(102, 0), 100300, 10)]);
        let (deltas, _) = engine.apply_modify(slot(102, 0), 100300, -3);
        assert!(deltas.is_empty());
        assert_eq!(engine.slot(slot(102, 0)), Some((100300, -3)));
    }

    #[test]
    fn test_state_equals_fold_of_events() {
        // Folding the same prefix twice from empty must land on identical
        // state and identical delta sequences.
        let events: Vec<(SlotKey, i64, i64)> = vec![
            (slot(102, 0), 100300, 10),
            (slot(102, 0), 100300, 25),
            (slot(103, 1), 111, 2),
            (slot(103, 1), 222, 4),
            (slot(102, 0), 100300, 5),
        ];

        let run = |events: &[(SlotKey, i64, i64)]| {
            let mut engine = DeltaEngine::new();
            let mut all = Vec::new();
            for (s, t, n) in events {
                let (d, _) = engine.apply_modify(*s, *t, *n);
                all.extend(d);
            }
            let mut state: Vec<_> = engine.slots().collect();
            state.sort_by_key(|(k, _, _)| (k.page_id, k.slot_id));
            (all, state)
        };

        assert_eq!(run(&events), run(&events));
    }
}
