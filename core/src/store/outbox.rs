//! Cloud upload queue.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{ts_from_sql, ts_to_sql, OutboxEntry, Store};
use crate::data::BASE_CURRENCY_ID;
use crate::error::StoreError;

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: row.get("id")?,
        type_id: row.get("type_id")?,
        value_fe: row.get("value_fe")?,
        captured_ts: ts_from_sql(&row.get::<_, String>("captured_ts")?),
        attempts: row.get("attempts")?,
        last_attempt_ts: row
            .get::<_, Option<String>>("last_attempt_ts")?
            .map(|s| ts_from_sql(&s)),
        last_error: row.get("last_error")?,
    })
}

impl Store {
    /// Queue a learned price for upload. The base currency is never synced.
    pub fn outbox_enqueue(
        &self,
        type_id: i64,
        value_fe: f64,
        captured_ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if type_id == BASE_CURRENCY_ID {
            return Ok(());
        }
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO cloud_outbox (type_id, value_fe, captured_ts) VALUES (?1, ?2, ?3)",
                params![type_id, value_fe, ts_to_sql(captured_ts)],
            )?;
            Ok(())
        })
    }

    /// Oldest entries first; the worker applies backoff filtering.
    pub fn outbox_batch(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM cloud_outbox ORDER BY id LIMIT ?1")?;
            let rows = stmt.query_map([limit as i64], row_to_entry)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn outbox_len(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM cloud_outbox", [], |row| row.get(0))?)
        })
    }

    pub fn outbox_delete(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute("DELETE FROM cloud_outbox WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Record a failed attempt; the entry stays queued for retry.
    pub fn outbox_mark_attempt(
        &self,
        id: i64,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "UPDATE cloud_outbox
                 SET attempts = attempts + 1, last_attempt_ts = ?1, last_error = ?2
                 WHERE id = ?3",
                params![ts_to_sql(at), error, id],
            )?;
            Ok(())
        })
    }
}
