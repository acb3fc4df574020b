//! Item delta persistence (append-only).

use chrono::{DateTime, Utc};
use embertrack::event_models::{EventContext, SlotKey};
use rusqlite::{params, Row};

use super::{ts_from_sql, ts_to_sql, ItemDelta, Store};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct NewDelta {
    pub player_scope: String,
    pub run_id: Option<i64>,
    pub slot: SlotKey,
    pub type_id: i64,
    pub delta: i64,
    pub context: EventContext,
    pub proto_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn row_to_delta(row: &Row<'_>) -> rusqlite::Result<ItemDelta> {
    Ok(ItemDelta {
        id: row.get("id")?,
        player_scope: row.get("player_scope")?,
        run_id: row.get("run_id")?,
        slot: super::SlotKeyFields {
            page_id: row.get("page_id")?,
            slot_id: row.get("slot_id")?,
        },
        type_id: row.get("type_id")?,
        delta: row.get("delta")?,
        context: row.get("context")?,
        proto_name: row.get("proto_name")?,
        timestamp: ts_from_sql(&row.get::<_, String>("timestamp")?),
    })
}

impl Store {
    pub fn insert_delta(&self, delta: &NewDelta) -> Result<i64, StoreError> {
        debug_assert!(delta.delta != 0, "zero deltas are never recorded");
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO item_deltas
                 (player_scope, run_id, page_id, slot_id, type_id, delta, context, proto_name, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    delta.player_scope,
                    delta.run_id,
                    delta.slot.page_id,
                    delta.slot.slot_id,
                    delta.type_id,
                    delta.delta,
                    delta.context.as_str(),
                    delta.proto_name,
                    ts_to_sql(delta.timestamp),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn deltas_for_run(&self, run_id: i64) -> Result<Vec<ItemDelta>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM item_deltas WHERE run_id = ?1 ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map([run_id], row_to_delta)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn deltas_for_scope(&self, scope: &str) -> Result<Vec<ItemDelta>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM item_deltas WHERE player_scope = ?1 ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map([scope], row_to_delta)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Aggregate delta per item for one run, restricted to one context tag.
    pub fn run_summary(
        &self,
        run_id: i64,
        context: EventContext,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type_id, SUM(delta) AS total FROM item_deltas
                 WHERE run_id = ?1 AND context = ?2
                 GROUP BY type_id HAVING total != 0",
            )?;
            let rows = stmt.query_map(params![run_id, context.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Aggregate pickup loot across all attributed runs for a scope.
    pub fn cumulative_loot(&self, scope: &str) -> Result<Vec<(i64, i64)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type_id, SUM(delta) AS total FROM item_deltas
                 WHERE player_scope = ?1 AND context = 'PickItems' AND run_id IS NOT NULL
                 GROUP BY type_id HAVING total != 0",
            )?;
            let rows = stmt.query_map([scope], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Deltas newer than `since`, for time-series bucketing.
    pub fn deltas_since(
        &self,
        scope: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ItemDelta>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM item_deltas
                 WHERE player_scope = ?1 AND timestamp >= ?2
                 ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map(params![scope, ts_to_sql(since)], row_to_delta)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
