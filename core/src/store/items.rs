//! Item metadata persistence.

use std::collections::HashSet;

use rusqlite::{params, Row};

use super::{Item, Store};
use crate::data::pages::ALLOWED_GEAR_CATEGORIES;
use crate::error::StoreError;

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        type_id: row.get("type_id")?,
        name_en: row.get("name_en")?,
        name_cn: row.get("name_cn")?,
        category_cn: row.get("category_cn")?,
        icon_url: row.get("icon_url")?,
    })
}

impl Store {
    pub fn upsert_item(&self, item: &Item) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO items (type_id, name_en, name_cn, category_cn, icon_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.type_id,
                    item.name_en,
                    item.name_cn,
                    item.category_cn,
                    item.icon_url
                ],
            )?;
            Ok(())
        })
    }

    pub fn upsert_items_batch(&self, items: &[Item]) -> Result<usize, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO items (type_id, name_en, name_cn, category_cn, icon_url)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for item in items {
                    stmt.execute(params![
                        item.type_id,
                        item.name_en,
                        item.name_cn,
                        item.category_cn,
                        item.icon_url
                    ])?;
                }
            }
            tx.commit()?;
            Ok(items.len())
        })
    }

    pub fn get_item(&self, type_id: i64) -> Result<Option<Item>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM items WHERE type_id = ?1")?;
            let mut rows = stmt.query_map([type_id], row_to_item)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// Display name with the unknown-id fallback; never blocks tracking.
    pub fn item_name(&self, type_id: i64) -> Result<String, StoreError> {
        Ok(self
            .get_item(type_id)?
            .and_then(|i| i.name_en)
            .unwrap_or_else(|| format!("Unknown {type_id}")))
    }

    pub fn all_items(&self) -> Result<Vec<Item>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM items ORDER BY type_id")?;
            let rows = stmt.query_map([], row_to_item)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn item_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?)
        })
    }

    /// Resolve the gear-page allowlist from item categories.
    pub fn gear_allowlist_ids(&self) -> Result<HashSet<i64>, StoreError> {
        self.with_conn(|conn| {
            let placeholders = vec!["?"; ALLOWED_GEAR_CATEGORIES.len()].join(",");
            let sql =
                format!("SELECT type_id FROM items WHERE category_cn IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(ALLOWED_GEAR_CATEGORIES.iter().copied()),
                |row| row.get::<_, i64>(0),
            )?;
            Ok(rows.collect::<Result<HashSet<_>, _>>()?)
        })
    }
}
