//! The live ingest pipeline: tailer → parsers → delta engine → segmenter →
//! store, all on one task so the delta engine's previous-value invariant
//! holds without interior locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use embertrack::event_models::{
    EventContext, ExchangeFragment, LogEvent, PlayerFieldKey, PriceLearned, SlotKey,
};
use embertrack::exchange::ExchangeParser;
use embertrack::parser::parse_line;
use embertrack::reader::{self, LogTailer, TailPoll, COLD_SCAN_BYTES, POLL_INTERVAL_MS};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::data::{GearAllowlist, BASE_CURRENCY_ID};
use crate::delta::{DeltaEngine, SlotOutcome};
use crate::error::StoreError;
use crate::player::{PlayerContext, PlayerScope};
use crate::segmenter::RunSegmenter;
use crate::store::deltas::NewDelta;
use crate::store::{Price, PriceSource, Store};

/// Change notifications for the boundary layer and the cloud worker.
#[derive(Debug, Clone)]
pub enum CollectorEvent {
    DeltaRecorded {
        run_id: Option<i64>,
        type_id: i64,
        delta: i64,
    },
    RunStarted(i64),
    RunEnded(i64),
    PriceLearned {
        type_id: i64,
        value_fe: f64,
    },
    ScopeChanged {
        scope: String,
        season_id: i64,
    },
}

/// Commands served between polls.
pub enum CollectorCommand {
    /// Destroy runs and deltas for the active scope, fast-forwarding the
    /// log position so old events are not replayed.
    Reset {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
}

/// Shared, lock-free status for the boundary's `/status` resource.
#[derive(Debug, Default)]
pub struct CollectorStatus {
    pub running: AtomicBool,
    pub waiting_for_player: AtomicBool,
    pub log_missing: AtomicBool,
}

/// Cheap handle for the boundary layer.
#[derive(Clone)]
pub struct CollectorHandle {
    pub status: Arc<CollectorStatus>,
    pub commands: mpsc::Sender<CollectorCommand>,
    events: broadcast::Sender<CollectorEvent>,
    scope: Arc<std::sync::RwLock<Option<PlayerScope>>>,
}

impl CollectorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<CollectorEvent> {
        self.events.subscribe()
    }

    /// The active partition key, if a player has been identified.
    pub fn scope(&self) -> Option<PlayerScope> {
        self.scope.read().ok().and_then(|s| s.clone())
    }

    pub async fn reset(&self) -> Result<usize, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CollectorCommand::Reset { reply })
            .await
            .map_err(|_| StoreError::Poisoned)?;
        rx.await.map_err(|_| StoreError::Poisoned)?
    }
}

pub struct Collector {
    store: Arc<Store>,
    tailer: LogTailer,
    exchange: ExchangeParser,
    engine: DeltaEngine,
    segmenter: RunSegmenter,
    player: PlayerContext,
    allowlist: GearAllowlist,

    /// Context bracket currently open in the log.
    context: EventContext,
    proto_name: Option<String>,

    status: Arc<CollectorStatus>,
    events: broadcast::Sender<CollectorEvent>,
    shared_scope: Arc<std::sync::RwLock<Option<PlayerScope>>>,
    commands_rx: mpsc::Receiver<CollectorCommand>,
}

impl Collector {
    /// Build the collector: resolve the gear allowlist, pre-seed the player
    /// scope with a bounded backward scan, and restore tailer position and
    /// per-scope state. Runs before the write path goes live, so the scope
    /// is settled first.
    pub async fn initialize(
        store: Arc<Store>,
        log_path: std::path::PathBuf,
    ) -> Result<(Self, CollectorHandle), StoreError> {
        let allowlist = GearAllowlist::new(store.gear_allowlist_ids()?);

        let mut player = PlayerContext::new();
        match reader::scan_tail_lines(&log_path, COLD_SCAN_BYTES).await {
            Ok(lines) => {
                for line in &lines {
                    if let Some(LogEvent::PlayerField { key, value }) = parse_line(line) {
                        player.observe(key, &value);
                    }
                }
                if let Some(scope) = player.scope() {
                    tracing::info!("[COLLECTOR] pre-seeded scope {}", scope.key);
                }
            }
            Err(e) => {
                tracing::debug!("[COLLECTOR] cold-start scan skipped: {e}");
            }
        }

        // Resume from the persisted offset when it belongs to this file;
        // otherwise tail from live EOF (the backward scan covered context).
        let tailer = match store.get_log_position()? {
            Some((path, position, file_size)) if path == log_path => {
                LogTailer::with_position(log_path, position, file_size)
            }
            _ => {
                let mut t = LogTailer::new(log_path);
                if let Err(e) = t.resume_from_eof().await {
                    tracing::debug!("[COLLECTOR] no log yet: {e}");
                }
                t
            }
        };
        // Persist the starting position immediately so a crash before the
        // first batch does not replay history.
        store.save_log_position(tailer.path(), tailer.offset(), tailer.file_size())?;

        let mut engine = DeltaEngine::new();
        let mut segmenter = RunSegmenter::new();
        if let Some(scope) = player.scope() {
            load_scope_state(&store, &scope.key, &mut engine, &mut segmenter)?;
        }

        let status = Arc::new(CollectorStatus::default());
        status
            .waiting_for_player
            .store(player.scope().is_none(), Ordering::SeqCst);

        let (events, _) = broadcast::channel(256);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let shared_scope = Arc::new(std::sync::RwLock::new(player.scope().cloned()));

        let handle = CollectorHandle {
            status: Arc::clone(&status),
            commands: commands_tx,
            events: events.clone(),
            scope: Arc::clone(&shared_scope),
        };

        Ok((
            Self {
                store,
                tailer,
                exchange: ExchangeParser::new(BASE_CURRENCY_ID),
                engine,
                segmenter,
                player,
                allowlist,
                context: EventContext::Other,
                proto_name: None,
                status,
                events,
                shared_scope,
                commands_rx,
            },
            handle,
        ))
    }

    /// Drive the pipeline until shutdown. Ingest errors are absorbed and
    /// logged; they never tear down the boundary.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.status.running.store(true, Ordering::SeqCst);
        tracing::info!("[COLLECTOR] tailing {}", self.tailer.path().display());

        let mut commands = {
            let (_tx, rx) = mpsc::channel(1);
            std::mem::replace(&mut self.commands_rx, rx)
        };

        loop {
            while let Ok(command) = commands.try_recv() {
                self.handle_command(command);
            }
            if *shutdown.borrow() {
                break;
            }

            let idle_ms = match self.tailer.poll().await {
                TailPoll::Lines(lines) => {
                    self.status.log_missing.store(false, Ordering::SeqCst);
                    let now = Utc::now();
                    for line in &lines {
                        if let Err(e) = self.process_line(line, now) {
                            tracing::warn!("[COLLECTOR] line absorbed: {e}");
                        }
                    }
                    // Offset moves only once the batch is fully acknowledged.
                    self.save_position();
                    continue;
                }
                TailPoll::Idle => {
                    self.status.log_missing.store(false, Ordering::SeqCst);
                    POLL_INTERVAL_MS
                }
                TailPoll::Missing => {
                    self.status.log_missing.store(true, Ordering::SeqCst);
                    POLL_INTERVAL_MS * 5
                }
            };

            tokio::select! {
                _ = shutdown.changed() => {}
                command = commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command);
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(idle_ms)) => {}
            }
        }

        self.flush_on_shutdown();
        self.status.running.store(false, Ordering::SeqCst);
        tracing::info!("[COLLECTOR] stopped");
    }

    /// Process one log line through every parser. Serialized by design.
    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let Some(event) = parse_line(line) else {
            return Ok(()); // parse-skip
        };

        match event {
            LogEvent::Exchange(fragment) => self.handle_exchange(&fragment, now),
            LogEvent::PlayerField { key, value } => self.handle_player_field(key, &value, now),
            LogEvent::ContextBegin { proto_name } => {
                self.context = EventContext::from_proto_name(&proto_name);
                self.proto_name = Some(proto_name);
                Ok(())
            }
            LogEvent::ContextEnd { .. } => {
                self.context = EventContext::Other;
                self.proto_name = None;
                Ok(())
            }
            LogEvent::LevelOpen { path } => self.handle_level_open(&path, now),
            LogEvent::LevelEnter {
                level_uid,
                level_type,
                level_id,
            } => self.handle_level_enter(level_uid, level_type, level_id),
            LogEvent::BagModify { slot, type_id, num } => {
                self.handle_bag_modify(slot, type_id, num, now)
            }
            LogEvent::BagInit { slot, type_id, num } => {
                self.handle_bag_init(slot, type_id, num, now)
            }
            LogEvent::BagRemove { slot } => self.handle_bag_remove(slot, now),
        }
    }

    fn scope_key(&self) -> Option<(String, i64)> {
        self.player
            .scope()
            .map(|s| (s.key.clone(), s.season_id))
    }

    fn handle_bag_modify(
        &mut self,
        slot: SlotKey,
        type_id: i64,
        num: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some((scope, _)) = self.scope_key() else {
            return Ok(()); // waiting for player
        };
        if self.allowlist.is_excluded(slot.page_id, Some(type_id)) {
            return Ok(());
        }
        let (deltas, outcome) = self.engine.apply_modify(slot, type_id, num);
        self.persist_bag_outcome(&scope, slot, deltas, outcome, now)
    }

    fn handle_bag_init(
        &mut self,
        slot: SlotKey,
        type_id: i64,
        num: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some((scope, _)) = self.scope_key() else {
            return Ok(());
        };
        if self.allowlist.is_excluded(slot.page_id, Some(type_id)) {
            return Ok(());
        }
        // Snapshot row: state only, never a delta.
        let outcome = self.engine.apply_init(slot, type_id, num);
        self.persist_bag_outcome(&scope, slot, Vec::new(), outcome, now)
    }

    fn handle_bag_remove(&mut self, slot: SlotKey, now: DateTime<Utc>) -> Result<(), StoreError> {
        let Some((scope, _)) = self.scope_key() else {
            return Ok(());
        };
        let prior_type = self.engine.slot(slot).map(|(t, _)| t);
        if self.allowlist.is_excluded(slot.page_id, prior_type) {
            return Ok(());
        }
        let (deltas, outcome) = self.engine.apply_remove(slot);
        self.persist_bag_outcome(&scope, slot, deltas, outcome, now)
    }

    fn persist_bag_outcome(
        &mut self,
        scope: &str,
        slot: SlotKey,
        deltas: Vec<crate::delta::SlotDelta>,
        outcome: SlotOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match outcome {
            SlotOutcome::Occupied { type_id, num } => {
                self.store.upsert_slot(scope, slot, type_id, num, now)?;
            }
            SlotOutcome::Empty => {
                self.store.clear_slot(scope, slot)?;
            }
            SlotOutcome::Unchanged => {}
        }

        let run_id = self.segmenter.attribution();
        for delta in deltas {
            self.store.insert_delta(&NewDelta {
                player_scope: scope.to_string(),
                run_id,
                slot: delta.slot,
                type_id: delta.type_id,
                delta: delta.delta,
                context: self.context,
                proto_name: self.proto_name.clone(),
                timestamp: now,
            })?;
            let _ = self.events.send(CollectorEvent::DeltaRecorded {
                run_id,
                type_id: delta.type_id,
                delta: delta.delta,
            });
        }
        Ok(())
    }

    fn handle_level_open(&mut self, path: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let Some((scope, _)) = self.scope_key() else {
            return Ok(());
        };

        let transition = self.segmenter.handle_level_open(path, now);
        for (run_id, end_ts) in &transition.close {
            self.store.update_run_end(*run_id, *end_ts)?;
            let _ = self.events.send(CollectorEvent::RunEnded(*run_id));
        }
        if let Some(mut open) = transition.open {
            open.player_scope = scope;
            let run_id = self.store.insert_run(&open)?;
            self.segmenter.confirm_open(run_id);
            tracing::debug!("[COLLECTOR] run {run_id} opened in {}", open.zone_signature);
            let _ = self.events.send(CollectorEvent::RunStarted(run_id));
        }
        Ok(())
    }

    fn handle_level_enter(
        &mut self,
        level_uid: i64,
        level_type: i64,
        level_id: i64,
    ) -> Result<(), StoreError> {
        // The id triplet follows its OpenMainWorld line; attach it to the
        // run that is still waiting for one.
        if let Some(run_id) = self.segmenter.take_awaiting_level_info() {
            self.store
                .update_run_level_info(run_id, level_uid, level_type, level_id)?;
            if crate::data::zones::is_sub_zone_meta(Some(level_type), Some(level_id)) {
                self.store.mark_run_sub_zone(run_id)?;
            }
        }
        Ok(())
    }

    fn handle_player_field(
        &mut self,
        key: PlayerFieldKey,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let previous = self.player.scope().cloned();
        let Some(new_scope) = self.player.observe(key, value) else {
            return Ok(());
        };

        tracing::info!("[COLLECTOR] scope change -> {}", new_scope.key);

        // Atomic hand-off: flush the old scope's open runs at change time,
        // load the new scope's slot state, and reset segmentation. Anything
        // staged in the old exchange window is dropped with it.
        if let Some(old) = previous {
            for (run_id, end_ts) in self.segmenter.force_close(now) {
                self.store.update_run_end(run_id, end_ts)?;
                let _ = self.events.send(CollectorEvent::RunEnded(run_id));
            }
            self.store.close_open_runs(&old.key, now)?;
        }

        load_scope_state(
            &self.store,
            &new_scope.key,
            &mut self.engine,
            &mut self.segmenter,
        )?;
        self.exchange = ExchangeParser::new(BASE_CURRENCY_ID);
        self.context = EventContext::Other;
        self.proto_name = None;

        self.status.waiting_for_player.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared_scope.write() {
            *slot = Some(new_scope.clone());
        }
        let _ = self.events.send(CollectorEvent::ScopeChanged {
            scope: new_scope.key,
            season_id: new_scope.season_id,
        });
        Ok(())
    }

    fn handle_exchange(
        &mut self,
        fragment: &ExchangeFragment,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(learned) = self.exchange.handle_fragment(fragment, now) else {
            return Ok(());
        };
        let Some((scope, season_id)) = self.scope_key() else {
            return Ok(());
        };
        self.record_learned_price(&scope, season_id, &learned)
    }

    fn record_learned_price(
        &mut self,
        scope: &str,
        season_id: i64,
        learned: &PriceLearned,
    ) -> Result<(), StoreError> {
        tracing::info!(
            "[COLLECTOR] learned price for {}: {:.4} FE over {} listings",
            learned.type_id,
            learned.reference_price,
            learned.listing_count
        );
        self.store.upsert_price(
            scope,
            season_id,
            &Price {
                type_id: learned.type_id,
                value_fe: learned.reference_price,
                source: PriceSource::Exchange,
                updated_at: learned.learned_at,
            },
        )?;
        // Only exchange-learned prices feed the community pool.
        self.store
            .outbox_enqueue(learned.type_id, learned.reference_price, learned.learned_at)?;
        let _ = self.events.send(CollectorEvent::PriceLearned {
            type_id: learned.type_id,
            value_fe: learned.reference_price,
        });
        Ok(())
    }

    fn handle_command(&mut self, command: CollectorCommand) {
        match command {
            CollectorCommand::Reset { reply } => {
                let result = self.reset();
                let _ = reply.send(result);
            }
        }
    }

    fn reset(&mut self) -> Result<usize, StoreError> {
        let Some((scope, _)) = self.scope_key() else {
            return Ok(0);
        };
        let deleted = self.store.reset_runs(&scope)?;
        self.segmenter = RunSegmenter::new();
        // Fast-forward so old events are not re-attributed after a restart.
        self.save_position();
        tracing::info!("[COLLECTOR] reset cleared {deleted} runs for {scope}");
        Ok(deleted)
    }

    fn save_position(&self) {
        if let Err(e) = self.store.save_log_position(
            self.tailer.path(),
            self.tailer.offset(),
            self.tailer.file_size(),
        ) {
            tracing::warn!("[COLLECTOR] failed to save log position: {e}");
        }
    }

    fn flush_on_shutdown(&mut self) {
        let now = Utc::now();
        for (run_id, end_ts) in self.segmenter.force_close(now) {
            if let Err(e) = self.store.update_run_end(run_id, end_ts) {
                tracing::warn!("[COLLECTOR] failed to close run {run_id}: {e}");
            }
        }
        self.save_position();
    }
}

/// Load per-scope state: slot map into the delta engine, open run into the
/// segmenter.
fn load_scope_state(
    store: &Store,
    scope: &str,
    engine: &mut DeltaEngine,
    segmenter: &mut RunSegmenter,
) -> Result<(), StoreError> {
    engine.load(
        store
            .all_slots(scope)?
            .into_iter()
            .map(|s| (s.key(), s.type_id, s.num)),
    );
    *segmenter = RunSegmenter::new();
    if let Some(active) = store.active_run(scope)? {
        let parent = match active.parent_run_id {
            Some(pid) => store.get_run(pid)?,
            None => None,
        };
        segmenter.load_active(&active, parent.as_ref());
    }
    Ok(())
}

#[cfg(test)]
#[path = "collector_tests.rs"]
mod collector_tests;
