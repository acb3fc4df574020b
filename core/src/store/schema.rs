//! Schema DDL and forward-only migrations.

use rusqlite::Connection;

use crate::error::StoreError;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 3;

/// Initialize or migrate the schema.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let current = schema_version(conn)?;

    if current == 0 {
        tracing::info!("[STORE] creating schema v{SCHEMA_VERSION}");
        conn.execute_batch(BASE_SCHEMA)?;
        conn.execute_batch(CLOUD_SCHEMA)?;
        conn.execute_batch(HISTORY_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current < SCHEMA_VERSION {
        migrate(conn, current)?;
    } else if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migrations are idempotent per-step and applied in order.
fn migrate(conn: &Connection, from: i64) -> Result<(), StoreError> {
    let mut current = from;

    if current == 1 {
        tracing::info!("[STORE] migrating v1 -> v2: cloud tables");
        conn.execute_batch(CLOUD_SCHEMA)?;
        current = 2;
    }

    if current == 2 {
        tracing::info!("[STORE] migrating v2 -> v3: price history, hidden items");
        conn.execute_batch(HISTORY_SCHEMA)?;
        current = 3;
    }

    set_schema_version(conn, current)?;
    Ok(())
}

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_scope TEXT NOT NULL,
    zone_signature TEXT NOT NULL,
    level_uid INTEGER,
    level_type INTEGER,
    level_id INTEGER,
    start_ts TEXT NOT NULL,
    end_ts TEXT,
    is_hub INTEGER NOT NULL DEFAULT 0,
    is_sub_zone INTEGER NOT NULL DEFAULT 0,
    parent_run_id INTEGER REFERENCES runs(id)
);

CREATE INDEX IF NOT EXISTS idx_runs_scope_start ON runs(player_scope, start_ts);
CREATE INDEX IF NOT EXISTS idx_runs_open ON runs(player_scope) WHERE end_ts IS NULL;

CREATE TABLE IF NOT EXISTS item_deltas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_scope TEXT NOT NULL,
    run_id INTEGER REFERENCES runs(id),
    page_id INTEGER NOT NULL,
    slot_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    delta INTEGER NOT NULL,
    context TEXT NOT NULL,
    proto_name TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deltas_run ON item_deltas(run_id);
CREATE INDEX IF NOT EXISTS idx_deltas_type ON item_deltas(player_scope, type_id);

CREATE TABLE IF NOT EXISTS slot_state (
    player_scope TEXT NOT NULL,
    page_id INTEGER NOT NULL,
    slot_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    num INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (player_scope, page_id, slot_id)
);

CREATE TABLE IF NOT EXISTS items (
    type_id INTEGER PRIMARY KEY,
    name_en TEXT,
    name_cn TEXT,
    category_cn TEXT,
    icon_url TEXT
);

CREATE TABLE IF NOT EXISTS prices (
    player_scope TEXT NOT NULL,
    season_id INTEGER NOT NULL DEFAULT 0,
    type_id INTEGER NOT NULL,
    value_fe REAL NOT NULL DEFAULT 0,
    source TEXT NOT NULL DEFAULT 'manual',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (player_scope, type_id)
);

CREATE TABLE IF NOT EXISTS log_position (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    file_path TEXT NOT NULL,
    position INTEGER NOT NULL,
    file_size INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const CLOUD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cloud_prices (
    season_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    median_fe REAL NOT NULL,
    p10_fe REAL NOT NULL DEFAULT 0,
    p90_fe REAL NOT NULL DEFAULT 0,
    contributor_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (season_id, type_id)
);

CREATE TABLE IF NOT EXISTS cloud_outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type_id INTEGER NOT NULL,
    value_fe REAL NOT NULL,
    captured_ts TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_ts TEXT,
    last_error TEXT
);
"#;

const HISTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS price_history (
    type_id INTEGER NOT NULL,
    hour_bucket TEXT NOT NULL,
    median_fe REAL NOT NULL,
    p10_fe REAL NOT NULL DEFAULT 0,
    p90_fe REAL NOT NULL DEFAULT 0,
    submission_count INTEGER NOT NULL DEFAULT 0,
    device_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (type_id, hour_bucket)
);

CREATE TABLE IF NOT EXISTS hidden_items (
    player_scope TEXT NOT NULL,
    type_id INTEGER NOT NULL,
    PRIMARY KEY (player_scope, type_id)
);
"#;

#[cfg(test)]
mod tests {
    use crate::store::Store;

    #[test]
    fn test_init_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");
        drop(Store::open(&path).unwrap());
        // Reopening must not fail or re-run creation destructively.
        drop(Store::open(&path).unwrap());
    }
}
