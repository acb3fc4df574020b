//! Run persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{ts_from_sql, ts_to_sql, Run, Store};
use crate::error::StoreError;

/// Fields for a run about to be inserted.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub player_scope: String,
    pub zone_signature: String,
    pub level_uid: Option<i64>,
    pub level_type: Option<i64>,
    pub level_id: Option<i64>,
    pub start_ts: DateTime<Utc>,
    pub is_hub: bool,
    pub is_sub_zone: bool,
    pub parent_run_id: Option<i64>,
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get("id")?,
        player_scope: row.get("player_scope")?,
        zone_signature: row.get("zone_signature")?,
        level_uid: row.get("level_uid")?,
        level_type: row.get("level_type")?,
        level_id: row.get("level_id")?,
        start_ts: ts_from_sql(&row.get::<_, String>("start_ts")?),
        end_ts: row
            .get::<_, Option<String>>("end_ts")?
            .map(|s| ts_from_sql(&s)),
        is_hub: row.get::<_, i64>("is_hub")? != 0,
        is_sub_zone: row.get::<_, i64>("is_sub_zone")? != 0,
        parent_run_id: row.get("parent_run_id")?,
    })
}

impl Store {
    pub fn insert_run(&self, run: &NewRun) -> Result<i64, StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO runs (player_scope, zone_signature, level_uid, level_type, level_id,
                                   start_ts, end_ts, is_hub, is_sub_zone, parent_run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8, ?9)",
                params![
                    run.player_scope,
                    run.zone_signature,
                    run.level_uid,
                    run.level_type,
                    run.level_id,
                    ts_to_sql(run.start_ts),
                    run.is_hub as i64,
                    run.is_sub_zone as i64,
                    run.parent_run_id,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_run_end(&self, run_id: i64, end_ts: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "UPDATE runs SET end_ts = ?1 WHERE id = ?2",
                params![ts_to_sql(end_ts), run_id],
            )?;
            Ok(())
        })
    }

    pub fn update_run_level_info(
        &self,
        run_id: i64,
        level_uid: i64,
        level_type: i64,
        level_id: i64,
    ) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "UPDATE runs SET level_uid = ?1, level_type = ?2, level_id = ?3 WHERE id = ?4",
                params![level_uid, level_type, level_id, run_id],
            )?;
            Ok(())
        })
    }

    pub fn mark_run_sub_zone(&self, run_id: i64) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute("UPDATE runs SET is_sub_zone = 1 WHERE id = ?1", [run_id])?;
            Ok(())
        })
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<Run>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM runs WHERE id = ?1")?;
            let mut rows = stmt.query_map([run_id], row_to_run)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// The at-most-one open run for a scope.
    pub fn active_run(&self, scope: &str) -> Result<Option<Run>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM runs WHERE player_scope = ?1 AND end_ts IS NULL
                 ORDER BY start_ts DESC LIMIT 1",
            )?;
            let mut rows = stmt.query_map([scope], row_to_run)?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn recent_runs(&self, scope: &str, limit: usize) -> Result<Vec<Run>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM runs WHERE player_scope = ?1
                 ORDER BY start_ts DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![scope, limit as i64], row_to_run)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Sub-runs spliced into an outer run.
    pub fn child_runs(&self, parent_run_id: i64) -> Result<Vec<Run>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM runs WHERE parent_run_id = ?1 ORDER BY start_ts",
            )?;
            let rows = stmt.query_map([parent_run_id], row_to_run)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Close every open run for a scope (scope change, shutdown).
    pub fn close_open_runs(&self, scope: &str, end_ts: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn_retry(|conn| {
            let n = conn.execute(
                "UPDATE runs SET end_ts = ?1 WHERE player_scope = ?2 AND end_ts IS NULL",
                params![ts_to_sql(end_ts), scope],
            )?;
            Ok(n)
        })
    }

    /// Scope of the most recent run, for offline inspection commands.
    pub fn latest_scope(&self) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT player_scope FROM runs ORDER BY start_ts DESC LIMIT 1")?;
            let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn completed_run_count(&self, scope: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM runs
                 WHERE player_scope = ?1 AND end_ts IS NOT NULL AND is_hub = 0",
                [scope],
                |row| row.get(0),
            )?)
        })
    }

    /// Destroy runs and deltas for a scope; slot state, prices, items,
    /// settings, and cloud caches are untouched.
    pub fn reset_runs(&self, scope: &str) -> Result<usize, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM item_deltas WHERE player_scope = ?1", [scope])?;
            let runs = tx.execute("DELETE FROM runs WHERE player_scope = ?1", [scope])?;
            tx.commit()?;
            Ok(runs)
        })
    }
}
