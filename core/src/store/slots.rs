//! Slot state persistence.

use chrono::{DateTime, Utc};
use embertrack::event_models::SlotKey;
use rusqlite::{params, Row};

use super::{ts_from_sql, ts_to_sql, SlotState, Store};
use crate::error::StoreError;

fn row_to_slot(row: &Row<'_>) -> rusqlite::Result<SlotState> {
    Ok(SlotState {
        page_id: row.get("page_id")?,
        slot_id: row.get("slot_id")?,
        type_id: row.get("type_id")?,
        num: row.get("num")?,
        updated_at: ts_from_sql(&row.get::<_, String>("updated_at")?),
    })
}

impl Store {
    pub fn upsert_slot(
        &self,
        scope: &str,
        slot: SlotKey,
        type_id: i64,
        num: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO slot_state
                 (player_scope, page_id, slot_id, type_id, num, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    scope,
                    slot.page_id,
                    slot.slot_id,
                    type_id,
                    num,
                    ts_to_sql(updated_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn clear_slot(&self, scope: &str, slot: SlotKey) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "DELETE FROM slot_state
                 WHERE player_scope = ?1 AND page_id = ?2 AND slot_id = ?3",
                params![scope, slot.page_id, slot.slot_id],
            )?;
            Ok(())
        })
    }

    pub fn all_slots(&self, scope: &str) -> Result<Vec<SlotState>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM slot_state WHERE player_scope = ?1 ORDER BY page_id, slot_id",
            )?;
            let rows = stmt.query_map([scope], row_to_slot)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_slot(&self, scope: &str, slot: SlotKey) -> Result<Option<SlotState>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM slot_state
                 WHERE player_scope = ?1 AND page_id = ?2 AND slot_id = ?3",
            )?;
            let mut rows = stmt.query_map(params![scope, slot.page_id, slot.slot_id], row_to_slot)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// Current inventory totals by item for a scope.
    pub fn inventory_totals(&self, scope: &str) -> Result<Vec<(i64, i64)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type_id, SUM(num) AS total FROM slot_state
                 WHERE player_scope = ?1 AND num > 0
                 GROUP BY type_id",
            )?;
            let rows = stmt.query_map([scope], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
