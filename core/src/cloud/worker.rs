//! Background synchronization: uplink drains the outbox, downlink refreshes
//! the community price cache. Both loops are cooperative tasks that stop
//! within one polling interval of a shutdown or disable.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};

use super::client::{CloudClient, PriceSubmission};
use crate::collector::{CollectorEvent, CollectorHandle};
use crate::config::CloudConfig;
use crate::error::CloudError;
use crate::store::{CloudPrice, OutboxEntry, PriceHistoryRow, Store};

/// Default loop periods, tunable through settings.
pub const UPLINK_PERIOD_SECS: u64 = 60;
pub const DOWNLINK_PERIOD_SECS: u64 = 300;

/// Backoff ceiling for failed submissions.
pub const BACKOFF_CAP_SECS: i64 = 3600;

/// Hours of price history pulled per downlink.
pub const HISTORY_WINDOW_HOURS: i64 = 72;

/// Community prices need this many contributors before the indicator shows.
pub const COMMUNITY_MIN_CONTRIBUTORS: i64 = 3;

const UPLINK_BATCH: usize = 100;

/// Exponential backoff for a submission that has failed `attempts` times.
pub fn backoff_secs(attempts: i64) -> i64 {
    let shift = attempts.clamp(0, 12) as u32;
    (1i64 << shift).min(BACKOFF_CAP_SECS)
}

/// Whether an outbox entry is due for another attempt.
pub fn entry_due(entry: &OutboxEntry, now: DateTime<Utc>) -> bool {
    match entry.last_attempt_ts {
        None => true,
        Some(last) => now >= last + Duration::seconds(backoff_secs(entry.attempts)),
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CloudStatus {
    pub configured: bool,
    pub enabled: bool,
    pub outbox_len: i64,
    pub cached_prices: i64,
    pub last_price_sync: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Clone)]
pub struct CloudHandle {
    uplink_sync: mpsc::Sender<()>,
    downlink_sync: mpsc::Sender<()>,
    configured: bool,
}

impl CloudHandle {
    /// Trigger an immediate uplink+downlink cycle.
    pub async fn sync_now(&self) -> bool {
        if !self.configured {
            return false;
        }
        let uplink = self.uplink_sync.send(()).await.is_ok();
        let downlink = self.downlink_sync.send(()).await.is_ok();
        uplink && downlink
    }

    pub fn configured(&self) -> bool {
        self.configured
    }
}

pub struct CloudSyncWorker {
    store: Arc<Store>,
    client: CloudClient,
    collector: CollectorHandle,
}

impl CloudSyncWorker {
    /// Spawn the uplink and downlink loops. Without remote configuration
    /// the handle reports unconfigured and no tasks start.
    pub fn spawn(
        store: Arc<Store>,
        config: Option<&CloudConfig>,
        collector: CollectorHandle,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CloudHandle, CloudError> {
        let (uplink_tx, uplink_rx) = mpsc::channel(4);
        let (downlink_tx, downlink_rx) = mpsc::channel(4);
        let Some(config) = config else {
            return Ok(CloudHandle {
                uplink_sync: uplink_tx,
                downlink_sync: downlink_tx,
                configured: false,
            });
        };

        let worker = Arc::new(Self {
            store,
            client: CloudClient::new(config)?,
            collector,
        });

        tokio::spawn(Arc::clone(&worker).uplink_loop(shutdown.clone(), uplink_rx));
        tokio::spawn(worker.downlink_loop(shutdown, downlink_rx));

        Ok(CloudHandle {
            uplink_sync: uplink_tx,
            downlink_sync: downlink_tx,
            configured: true,
        })
    }

    pub fn status(store: &Store, configured: bool) -> CloudStatus {
        let season = store
            .get_setting("cloud_season_id")
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        CloudStatus {
            configured,
            enabled: store.setting_flag("cloud_sync_enabled").unwrap_or(false),
            outbox_len: store.outbox_len().unwrap_or(0),
            cached_prices: store.cloud_price_count(season).unwrap_or(0),
            last_price_sync: store.get_setting("cloud_last_price_sync").ok().flatten(),
            device_id: store.get_setting("cloud_device_id").ok().flatten(),
        }
    }

    fn enabled(&self) -> bool {
        self.store
            .setting_flag("cloud_sync_enabled")
            .unwrap_or(false)
    }

    fn period(&self, key: &str, default_secs: u64) -> std::time::Duration {
        let secs = self
            .store
            .get_setting(key)
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_secs);
        std::time::Duration::from_secs(secs.max(5))
    }

    async fn uplink_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut sync_now: mpsc::Receiver<()>,
    ) {
        tracing::info!("[CLOUD] uplink loop started");
        loop {
            let period = self.period("cloud_uplink_period_secs", UPLINK_PERIOD_SECS);
            let mut forced = false;
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Some(()) = sync_now.recv() => {
                    forced = true;
                }
                _ = tokio::time::sleep(period) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if !self.enabled() && !forced {
                continue;
            }
            if let Err(e) = self.uplink_cycle().await {
                tracing::warn!("[CLOUD] uplink cycle failed: {e}");
            }
        }
        tracing::info!("[CLOUD] uplink loop stopped");
    }

    /// Drain due outbox entries in FIFO order. Retryable failures keep the
    /// entry and back off; anything else drops it with the error recorded.
    async fn uplink_cycle(&self) -> Result<(), CloudError> {
        let device_id = self.store.device_uuid()?;
        let season_id = self
            .collector
            .scope()
            .map(|s| s.season_id)
            .unwrap_or_default();
        let now = Utc::now();

        for entry in self.store.outbox_batch(UPLINK_BATCH)? {
            if !entry_due(&entry, now) {
                continue;
            }
            let submission = PriceSubmission {
                device_id: &device_id,
                type_id: entry.type_id,
                value_fe: entry.value_fe,
                captured_ts: entry.captured_ts,
                season_id,
            };
            match self.client.submit_price(&submission).await {
                Ok(()) => {
                    self.store.outbox_delete(entry.id)?;
                    tracing::debug!("[CLOUD] submitted price for {}", entry.type_id);
                }
                Err(e) if e.is_retryable() => {
                    self.store
                        .outbox_mark_attempt(entry.id, Utc::now(), &e.to_string())?;
                    if matches!(e, CloudError::RateLimited) {
                        // The remote caps submissions per device; yield the
                        // rest of the batch to the next cycle.
                        tracing::info!("[CLOUD] rate limited, deferring outbox drain");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "[CLOUD] dropping rejected submission for {}: {e}",
                        entry.type_id
                    );
                    self.store
                        .outbox_mark_attempt(entry.id, Utc::now(), &e.to_string())?;
                    self.store.outbox_delete(entry.id)?;
                }
            }
        }
        Ok(())
    }

    async fn downlink_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut sync_now: mpsc::Receiver<()>,
    ) {
        tracing::info!("[CLOUD] downlink loop started");
        let mut events = self.collector.subscribe();
        loop {
            let period = self.period("cloud_downlink_period_secs", DOWNLINK_PERIOD_SECS);
            let mut forced = false;
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Some(()) = sync_now.recv() => {
                    forced = true;
                }
                event = events.recv() => {
                    // A scope change may move us to a new season partition;
                    // refresh promptly.
                    match event {
                        Ok(CollectorEvent::ScopeChanged { .. }) => forced = true,
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            // Collector gone; fall back to timer pacing.
                            tokio::time::sleep(period).await;
                            continue;
                        }
                        Err(_) => continue,
                    }
                }
                _ = tokio::time::sleep(period) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if !self.enabled() && !forced {
                continue;
            }
            if let Err(e) = self.downlink_cycle().await {
                tracing::warn!("[CLOUD] downlink cycle failed: {e}");
            }
        }
        tracing::info!("[CLOUD] downlink loop stopped");
    }

    /// Refresh the aggregated price cache for the current season, then pull
    /// bounded history for items currently in the inventory.
    async fn downlink_cycle(&self) -> Result<(), CloudError> {
        let Some(scope) = self.collector.scope() else {
            return Ok(());
        };
        let season_id = scope.season_id;

        let rows = self.client.fetch_season_prices(season_id).await?;
        let count = rows.len();
        for row in rows {
            self.store.upsert_cloud_price(
                season_id,
                &CloudPrice {
                    type_id: row.type_id,
                    median_fe: row.median_fe,
                    p10_fe: row.p10_fe,
                    p90_fe: row.p90_fe,
                    contributor_count: row.contributor_count,
                    updated_at: row.updated_at,
                },
            )?;
        }
        self.store
            .set_setting("cloud_season_id", &season_id.to_string())?;
        self.store
            .set_setting("cloud_last_price_sync", &Utc::now().to_rfc3339())?;
        tracing::info!("[CLOUD] cached {count} aggregated prices for season {season_id}");

        // History is bandwidth-bounded: only items we actually hold.
        let inventory_ids: Vec<i64> = self
            .store
            .inventory_totals(&scope.key)?
            .into_iter()
            .map(|(type_id, _)| type_id)
            .collect();
        let since = Utc::now() - Duration::hours(HISTORY_WINDOW_HOURS);
        let history = self.client.fetch_price_history(&inventory_ids, since).await?;
        if !history.is_empty() {
            let rows: Vec<PriceHistoryRow> = history
                .into_iter()
                .map(|dto| PriceHistoryRow {
                    type_id: dto.type_id,
                    hour_bucket: dto.hour_bucket,
                    median_fe: dto.median_fe,
                    p10_fe: dto.p10_fe,
                    p90_fe: dto.p90_fe,
                    submission_count: dto.submission_count,
                    device_count: dto.device_count,
                })
                .collect();
            self.store.upsert_history_rows(&rows)?;
            self.store
                .set_setting("cloud_last_history_sync", &Utc::now().to_rfc3339())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(attempts: i64, last_secs_ago: Option<i64>) -> OutboxEntry {
        let now = Utc::now();
        OutboxEntry {
            id: 1,
            type_id: 100210,
            value_fe: 0.5,
            captured_ts: now,
            attempts,
            last_attempt_ts: last_secs_ago.map(|s| now - Duration::seconds(s)),
            last_error: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_secs(0), 1);
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(5), 32);
        assert_eq!(backoff_secs(12), 3600);
        assert_eq!(backoff_secs(40), 3600);
    }

    #[test]
    fn test_entry_due_respects_backoff() {
        let now = Utc::now();
        assert!(entry_due(&entry(0, None), now));
        // 3 attempts → 8 s backoff
        assert!(!entry_due(&entry(3, Some(4)), now));
        assert!(entry_due(&entry(3, Some(9)), now));
    }
}
