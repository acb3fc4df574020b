//! Local, cloud, and historical price persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{ts_from_sql, ts_to_sql, CloudPrice, Price, PriceHistoryRow, PriceSource, Store};
use crate::data::BASE_CURRENCY_ID;
use crate::error::StoreError;

fn row_to_price(row: &Row<'_>) -> rusqlite::Result<Price> {
    Ok(Price {
        type_id: row.get("type_id")?,
        value_fe: row.get("value_fe")?,
        source: PriceSource::parse(&row.get::<_, String>("source")?),
        updated_at: ts_from_sql(&row.get::<_, String>("updated_at")?),
    })
}

fn row_to_cloud_price(row: &Row<'_>) -> rusqlite::Result<CloudPrice> {
    Ok(CloudPrice {
        type_id: row.get("type_id")?,
        median_fe: row.get("median_fe")?,
        p10_fe: row.get("p10_fe")?,
        p90_fe: row.get("p90_fe")?,
        contributor_count: row.get("contributor_count")?,
        updated_at: ts_from_sql(&row.get::<_, String>("updated_at")?),
    })
}

impl Store {
    /// Upsert a local price. The base currency is defined as 1 and never
    /// gets a row.
    pub fn upsert_price(
        &self,
        scope: &str,
        season_id: i64,
        price: &Price,
    ) -> Result<(), StoreError> {
        if price.type_id == BASE_CURRENCY_ID {
            return Ok(());
        }
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO prices
                 (player_scope, season_id, type_id, value_fe, source, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    scope,
                    season_id,
                    price.type_id,
                    price.value_fe,
                    price.source.as_str(),
                    ts_to_sql(price.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_price(&self, scope: &str, type_id: i64) -> Result<Option<Price>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM prices WHERE player_scope = ?1 AND type_id = ?2",
            )?;
            let mut rows = stmt.query_map(params![scope, type_id], row_to_price)?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn all_prices(&self, scope: &str) -> Result<Vec<Price>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM prices WHERE player_scope = ?1 ORDER BY type_id")?;
            let rows = stmt.query_map([scope], row_to_price)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Copy prices from another scope (an earlier season) into this one,
    /// keeping any newer local row.
    pub fn migrate_season_prices(
        &self,
        from_scope: &str,
        to_scope: &str,
        to_season: i64,
    ) -> Result<usize, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let copied = tx.execute(
                "INSERT OR IGNORE INTO prices
                   (player_scope, season_id, type_id, value_fe, source, updated_at)
                 SELECT ?1, ?2, type_id, value_fe, source, updated_at
                 FROM prices WHERE player_scope = ?3",
                params![to_scope, to_season, from_scope],
            )?;
            tx.commit()?;
            Ok(copied)
        })
    }

    // ── Cloud price cache ────────────────────────────────────────────────

    pub fn upsert_cloud_price(
        &self,
        season_id: i64,
        price: &CloudPrice,
    ) -> Result<(), StoreError> {
        if price.type_id == BASE_CURRENCY_ID {
            return Ok(());
        }
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cloud_prices
                 (season_id, type_id, median_fe, p10_fe, p90_fe, contributor_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    season_id,
                    price.type_id,
                    price.median_fe,
                    price.p10_fe,
                    price.p90_fe,
                    price.contributor_count,
                    ts_to_sql(price.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_cloud_price(
        &self,
        season_id: i64,
        type_id: i64,
    ) -> Result<Option<CloudPrice>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM cloud_prices WHERE season_id = ?1 AND type_id = ?2",
            )?;
            let mut rows = stmt.query_map(params![season_id, type_id], row_to_cloud_price)?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn cloud_price_count(&self, season_id: i64) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM cloud_prices WHERE season_id = ?1",
                [season_id],
                |row| row.get(0),
            )?)
        })
    }

    // ── Price history ────────────────────────────────────────────────────

    pub fn upsert_history_rows(&self, rows: &[PriceHistoryRow]) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO price_history
                     (type_id, hour_bucket, median_fe, p10_fe, p90_fe, submission_count, device_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for row in rows {
                    stmt.execute(params![
                        row.type_id,
                        ts_to_sql(row.hour_bucket),
                        row.median_fe,
                        row.p10_fe,
                        row.p90_fe,
                        row.submission_count,
                        row.device_count,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn history_for(
        &self,
        type_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceHistoryRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM price_history
                 WHERE type_id = ?1 AND hour_bucket >= ?2
                 ORDER BY hour_bucket",
            )?;
            let rows = stmt.query_map(params![type_id, ts_to_sql(since)], |row| {
                Ok(PriceHistoryRow {
                    type_id: row.get("type_id")?,
                    hour_bucket: ts_from_sql(&row.get::<_, String>("hour_bucket")?),
                    median_fe: row.get("median_fe")?,
                    p10_fe: row.get("p10_fe")?,
                    p90_fe: row.get("p90_fe")?,
                    submission_count: row.get("submission_count")?,
                    device_count: row.get("device_count")?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    // ── Hidden items ─────────────────────────────────────────────────────

    pub fn hidden_items(&self, scope: &str) -> Result<std::collections::HashSet<i64>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT type_id FROM hidden_items WHERE player_scope = ?1")?;
            let rows = stmt.query_map([scope], |row| row.get::<_, i64>(0))?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
    }

    pub fn set_hidden_items(&self, scope: &str, ids: &[i64]) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM hidden_items WHERE player_scope = ?1", [scope])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO hidden_items (player_scope, type_id) VALUES (?1, ?2)",
                )?;
                for id in ids {
                    stmt.execute(params![scope, id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}
