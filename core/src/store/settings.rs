//! Settings and bookkeeping rows.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::params;

use super::{ts_to_sql, Store};
use crate::error::StoreError;

/// Settings key holding the anonymous device identity.
pub const DEVICE_ID_KEY: &str = "cloud_device_id";

/// Trade tax applied when valuing non-base items for sale.
pub const TRADE_TAX_MULTIPLIER: f64 = 1.0 - 1.0 / 8.0;

impl Store {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
            let mut rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, ts_to_sql(Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn setting_flag(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_setting(key)?.as_deref() == Some("true"))
    }

    /// Effective sale multiplier for non-base items: 7/8 with the trade-tax
    /// toggle on, 1.0 otherwise.
    pub fn trade_tax_multiplier(&self) -> Result<f64, StoreError> {
        Ok(if self.setting_flag("trade_tax_enabled")? {
            TRADE_TAX_MULTIPLIER
        } else {
            1.0
        })
    }

    /// Stable anonymous identity, created on first use.
    pub fn device_uuid(&self) -> Result<String, StoreError> {
        if let Some(existing) = self.get_setting(DEVICE_ID_KEY)? {
            return Ok(existing);
        }
        let fresh = uuid::Uuid::new_v4().to_string();
        self.set_setting(DEVICE_ID_KEY, &fresh)?;
        Ok(fresh)
    }

    // ── Log position ─────────────────────────────────────────────────────

    pub fn save_log_position(
        &self,
        file_path: &Path,
        position: u64,
        file_size: u64,
    ) -> Result<(), StoreError> {
        self.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO log_position (id, file_path, position, file_size, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![
                    file_path.to_string_lossy(),
                    position as i64,
                    file_size as i64,
                    ts_to_sql(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_log_position(&self) -> Result<Option<(PathBuf, u64, u64)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT file_path, position, file_size FROM log_position WHERE id = 1")?;
            let mut rows = stmt.query_map([], |row| {
                Ok((
                    PathBuf::from(row.get::<_, String>(0)?),
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?;
            Ok(rows.next().transpose()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_setting("trade_tax_enabled").unwrap(), None);
        store.set_setting("trade_tax_enabled", "true").unwrap();
        assert!(store.setting_flag("trade_tax_enabled").unwrap());
        assert!((store.trade_tax_multiplier().unwrap() - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_device_uuid_is_stable() {
        let store = Store::open_in_memory().unwrap();
        let first = store.device_uuid().unwrap();
        let second = store.device_uuid().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 36);
    }
}
