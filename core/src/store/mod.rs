//! Durable state: slot map, runs, deltas, items, prices, cloud queues,
//! and settings, all in one embedded SQLite file.
//!
//! A single process-wide mutex serializes writes; WAL mode keeps readers
//! unblocked. Every persistent record type lives here next to its table.

pub mod deltas;
pub mod items;
pub mod outbox;
pub mod prices;
pub mod runs;
pub mod schema;
pub mod settings;
pub mod slots;

#[cfg(test)]
mod store_tests;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use embertrack::event_models::{EventContext, SlotKey};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::StoreError;

/// Transient-busy retry policy for write attempts.
const BUSY_RETRY_ATTEMPTS: u32 = 5;
const BUSY_RETRY_BASE_MS: u64 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Persistent records
// ─────────────────────────────────────────────────────────────────────────────

/// One tracked map excursion.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub player_scope: String,
    pub zone_signature: String,
    pub level_uid: Option<i64>,
    pub level_type: Option<i64>,
    pub level_id: Option<i64>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub is_hub: bool,
    pub is_sub_zone: bool,
    pub parent_run_id: Option<i64>,
}

impl Run {
    /// Raw span of this run; sub-run exclusion happens in reporting.
    pub fn duration_seconds(&self, now: DateTime<Utc>) -> f64 {
        let end = self.end_ts.unwrap_or(now);
        (end - self.start_ts).num_milliseconds() as f64 / 1000.0
    }
}

/// Signed change of one slot's stack, append-only.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDelta {
    pub id: i64,
    pub player_scope: String,
    pub run_id: Option<i64>,
    #[serde(flatten)]
    pub slot: SlotKeyFields,
    pub type_id: i64,
    pub delta: i64,
    pub context: String,
    pub proto_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Flattened slot key for serialization.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SlotKeyFields {
    pub page_id: i64,
    pub slot_id: i64,
}

impl From<SlotKey> for SlotKeyFields {
    fn from(k: SlotKey) -> Self {
        Self {
            page_id: k.page_id,
            slot_id: k.slot_id,
        }
    }
}

impl ItemDelta {
    pub fn context_tag(&self) -> EventContext {
        EventContext::parse(&self.context)
    }
}

/// Absolute stack total last observed for a slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotState {
    pub page_id: i64,
    pub slot_id: i64,
    pub type_id: i64,
    pub num: i64,
    pub updated_at: DateTime<Utc>,
}

impl SlotState {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.page_id, self.slot_id)
    }
}

/// Item metadata (seeded, plus anything learned from the wiki dump).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Item {
    pub type_id: i64,
    pub name_en: Option<String>,
    pub name_cn: Option<String>,
    pub category_cn: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Manual,
    Exchange,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Exchange => "exchange",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "exchange" => Self::Exchange,
            _ => Self::Manual,
        }
    }
}

/// Locally known unit price, in base currency.
#[derive(Debug, Clone, Serialize)]
pub struct Price {
    pub type_id: i64,
    pub value_fe: f64,
    pub source: PriceSource,
    pub updated_at: DateTime<Utc>,
}

/// Community-aggregated price for one item in one season.
#[derive(Debug, Clone, Serialize)]
pub struct CloudPrice {
    pub type_id: i64,
    pub median_fe: f64,
    pub p10_fe: f64,
    pub p90_fe: f64,
    pub contributor_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// One hourly bucket of community price history.
#[derive(Debug, Clone, Serialize)]
pub struct PriceHistoryRow {
    pub type_id: i64,
    pub hour_bucket: DateTime<Utc>,
    pub median_fe: f64,
    pub p10_fe: f64,
    pub p90_fe: f64,
    pub submission_count: i64,
    pub device_count: i64,
}

/// Pending cloud upload; at-least-once, FIFO within a TypeId.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub type_id: i64,
    pub value_fe: f64,
    pub captured_ts: DateTime<Utc>,
    pub attempts: i64,
    pub last_attempt_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the store and run migrations.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!("[STORE] opening {}", db_path.display());
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Open the canonical store, first copying a legacy database into place
    /// if the canonical file does not exist yet.
    pub fn open_with_legacy_probe(
        db_path: &Path,
        legacy_path: Option<&Path>,
    ) -> Result<Self, StoreError> {
        if !db_path.exists() {
            if let Some(legacy) = legacy_path.filter(|p| p.exists()) {
                tracing::info!(
                    "[STORE] migrating legacy database {} -> {}",
                    legacy.display(),
                    db_path.display()
                );
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(legacy, db_path)?;
            }
        }
        Self::open(db_path)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(500))?;
        let store = Self {
            conn: Mutex::new(conn),
            path,
        };
        store.with_conn(schema::init_schema)?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure against the connection under the store mutex.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Mutable access, for explicit transactions.
    pub fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }

    /// Write with bounded retry on transient busy errors, escalating after
    /// the attempt budget.
    pub fn with_conn_retry<T>(
        &self,
        mut f: impl FnMut(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        for attempt in 0..BUSY_RETRY_ATTEMPTS {
            match self.with_conn(&mut f) {
                Err(e) if e.is_transient() && attempt + 1 < BUSY_RETRY_ATTEMPTS => {
                    std::thread::sleep(std::time::Duration::from_millis(
                        BUSY_RETRY_BASE_MS * (attempt as u64 + 1),
                    ));
                }
                other => return other,
            }
        }
        Err(StoreError::Busy {
            attempts: BUSY_RETRY_ATTEMPTS,
        })
    }
}

/// RFC 3339 timestamp text, the store's canonical time format.
pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn ts_from_sql(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
