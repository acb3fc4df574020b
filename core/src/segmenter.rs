//! Run segmentation.
//!
//! Level transitions drive a three-state machine: `Idle`, `InMap`, and
//! `InSubZone`. Recognized sub-zones (arcana contest, nightmare, trial
//! variants) open a child run without closing the outer one; returning to
//! the outer zone closes the child and resumes attribution to the outer
//! run — the splice. Hub zones close everything and exist only transiently
//! for zone-name reporting.
//!
//! The segmenter never talks to the store. It emits a [`Transition`] and the
//! collector persists it, confirming inserted run ids back via
//! [`RunSegmenter::confirm_open`].

use chrono::{DateTime, Utc};

use crate::data::zones;
use crate::store::runs::NewRun;
use crate::store::Run;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    InHub {
        run_id: i64,
    },
    InMap {
        run_id: i64,
        zone_signature: String,
    },
    InSubZone {
        outer_run_id: i64,
        outer_signature: String,
        sub_run_id: i64,
    },
}

/// What kind of run a pending open will become once the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOpen {
    Hub { zone_signature: String },
    Map { zone_signature: String },
    SubZone {
        zone_signature: String,
        outer: Option<(i64, String)>,
    },
}

/// Persistence effects of one level transition, in order: close, then open.
#[derive(Debug, Default)]
pub struct Transition {
    /// Runs to close, oldest attribution last (sub before outer).
    pub close: Vec<(i64, DateTime<Utc>)>,
    /// Run to insert; the collector must call `confirm_open` with its id.
    pub open: Option<NewRun>,
    /// Splice: attribution resumed to this already-open outer run.
    pub resumed_outer: Option<i64>,
}

#[derive(Debug)]
pub struct RunSegmenter {
    state: State,
    pending: Option<PendingOpen>,
    /// Most recently opened run, awaiting its LevelUid/Type/Id triplet.
    awaiting_level_info: Option<i64>,
}

impl Default for RunSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSegmenter {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            pending: None,
            awaiting_level_info: None,
        }
    }

    /// Restore from the persisted open run (and its parent, when the open
    /// run is a sub-zone child).
    pub fn load_active(&mut self, active: &Run, parent: Option<&Run>) {
        self.state = if active.is_hub {
            State::InHub { run_id: active.id }
        } else if active.is_sub_zone {
            match parent {
                Some(outer) => State::InSubZone {
                    outer_run_id: outer.id,
                    outer_signature: outer.zone_signature.clone(),
                    sub_run_id: active.id,
                },
                // Standalone sub-zone run behaves like a map.
                None => State::InMap {
                    run_id: active.id,
                    zone_signature: active.zone_signature.clone(),
                },
            }
        } else {
            State::InMap {
                run_id: active.id,
                zone_signature: active.zone_signature.clone(),
            }
        };
    }

    /// The run deltas attribute to right now. Hub runs never accrue loot.
    pub fn attribution(&self) -> Option<i64> {
        match &self.state {
            State::InMap { run_id, .. } => Some(*run_id),
            State::InSubZone { sub_run_id, .. } => Some(*sub_run_id),
            State::Idle | State::InHub { .. } => None,
        }
    }

    /// The open run whose LevelUid/Type/Id triplet has not arrived yet.
    pub fn take_awaiting_level_info(&mut self) -> Option<i64> {
        self.awaiting_level_info.take()
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Process one `OpenMainWorld` path transition.
    pub fn handle_level_open(&mut self, path: &str, ts: DateTime<Utc>) -> Transition {
        let signature = path.trim().to_string();
        let is_hub = zones::is_hub_path(&signature);
        let is_sub = !is_hub && zones::is_sub_zone_path(&signature);

        let mut transition = Transition::default();

        if is_hub {
            self.close_all(&mut transition, ts);
            self.queue_open(
                &mut transition,
                PendingOpen::Hub {
                    zone_signature: signature,
                },
                ts,
            );
            return transition;
        }

        if is_sub {
            match &self.state {
                State::InMap {
                    run_id,
                    zone_signature,
                } => {
                    // Excursion: the outer run stays open.
                    let outer = (*run_id, zone_signature.clone());
                    self.queue_open(
                        &mut transition,
                        PendingOpen::SubZone {
                            zone_signature: signature,
                            outer: Some(outer),
                        },
                        ts,
                    );
                }
                State::InSubZone {
                    outer_run_id,
                    outer_signature,
                    sub_run_id,
                } => {
                    // Sub-zone to sub-zone: close the child, keep the outer.
                    transition.close.push((*sub_run_id, ts));
                    let outer = (*outer_run_id, outer_signature.clone());
                    self.queue_open(
                        &mut transition,
                        PendingOpen::SubZone {
                            zone_signature: signature,
                            outer: Some(outer),
                        },
                        ts,
                    );
                }
                State::Idle | State::InHub { .. } => {
                    // Entered alone: tracked as its own run.
                    self.close_all(&mut transition, ts);
                    self.queue_open(
                        &mut transition,
                        PendingOpen::SubZone {
                            zone_signature: signature,
                            outer: None,
                        },
                        ts,
                    );
                }
            }
            return transition;
        }

        // Ordinary map zone.
        match &self.state {
            State::InSubZone {
                outer_run_id,
                outer_signature,
                sub_run_id,
            } if *outer_signature == signature => {
                // The splice: back to the outer zone, no new run. The
                // re-entry's id triplet belongs to no fresh run either.
                let (outer_run_id, sub_run_id) = (*outer_run_id, *sub_run_id);
                let outer_signature = outer_signature.clone();
                transition.close.push((sub_run_id, ts));
                transition.resumed_outer = Some(outer_run_id);
                self.state = State::InMap {
                    run_id: outer_run_id,
                    zone_signature: outer_signature,
                };
                self.awaiting_level_info = None;
                transition
            }
            _ => {
                // Covers Idle, hub exit, re-entering the same zone (a fresh
                // map instance), and abandoning a sub-zone for elsewhere.
                self.close_all(&mut transition, ts);
                self.queue_open(
                    &mut transition,
                    PendingOpen::Map {
                        zone_signature: signature,
                    },
                    ts,
                );
                transition
            }
        }
    }

    /// The collector inserted the pending run; adopt its id.
    pub fn confirm_open(&mut self, run_id: i64) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.awaiting_level_info = Some(run_id);
        self.state = match pending {
            PendingOpen::Hub { .. } => State::InHub { run_id },
            PendingOpen::Map { zone_signature } => State::InMap {
                run_id,
                zone_signature,
            },
            PendingOpen::SubZone {
                outer: Some((outer_run_id, outer_signature)),
                ..
            } => State::InSubZone {
                outer_run_id,
                outer_signature,
                sub_run_id: run_id,
            },
            // A standalone sub-zone behaves like a map of its own.
            PendingOpen::SubZone {
                zone_signature,
                outer: None,
            } => State::InMap {
                run_id,
                zone_signature,
            },
        };
    }

    /// Close every open run (shutdown, scope change). Returns close ops.
    pub fn force_close(&mut self, ts: DateTime<Utc>) -> Vec<(i64, DateTime<Utc>)> {
        let mut transition = Transition::default();
        self.close_all(&mut transition, ts);
        self.state = State::Idle;
        self.pending = None;
        self.awaiting_level_info = None;
        transition.close
    }

    fn close_all(&mut self, transition: &mut Transition, ts: DateTime<Utc>) {
        match &self.state {
            State::Idle => {}
            State::InHub { run_id } | State::InMap { run_id, .. } => {
                transition.close.push((*run_id, ts));
            }
            State::InSubZone {
                outer_run_id,
                sub_run_id,
                ..
            } => {
                transition.close.push((*sub_run_id, ts));
                transition.close.push((*outer_run_id, ts));
            }
        }
        self.state = State::Idle;
    }

    fn queue_open(&mut self, transition: &mut Transition, pending: PendingOpen, ts: DateTime<Utc>) {
        let (zone_signature, is_hub, is_sub_zone, parent_run_id) = match &pending {
            PendingOpen::Hub { zone_signature } => (zone_signature.clone(), true, false, None),
            PendingOpen::Map { zone_signature } => (zone_signature.clone(), false, false, None),
            PendingOpen::SubZone {
                zone_signature,
                outer,
            } => (
                zone_signature.clone(),
                false,
                true,
                outer.as_ref().map(|(id, _)| *id),
            ),
        };
        transition.open = Some(NewRun {
            // Scope is stamped by the collector; the segmenter is scope-blind.
            player_scope: String::new(),
            zone_signature,
            level_uid: None,
            level_type: None,
            level_id: None,
            start_ts: ts,
            is_hub,
            is_sub_zone,
            parent_run_id,
        });
        self.pending = Some(pending);
    }
}

#[cfg(test)]
#[path = "segmenter_tests.rs"]
mod segmenter_tests;
