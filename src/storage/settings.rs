use super::Database;
use crate::settings::{DexSettings, TradingSettings, DEXES, TRADING};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

impl Database {
    pub fn all_settings(&self, user_id: &Uuid) -> Result<BTreeMap<String, Value>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT category, settings_json FROM settings WHERE user_id = ?1 ORDER BY category",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (category, json) = row?;
            let value = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt settings for category {}", category))?;
            out.insert(category, value);
        }
        Ok(out)
    }

    pub fn get_setting(&self, user_id: &Uuid, category: &str) -> Result<Option<Value>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT settings_json FROM settings WHERE user_id = ?1 AND category = ?2",
                params![user_id.to_string(), category],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).context("Corrupt settings row"))
            .transpose()
    }

    pub fn put_setting(&self, user_id: &Uuid, category: &str, value: &Value) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO settings (user_id, category, settings_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, category)
                 DO UPDATE SET settings_json = excluded.settings_json, updated_at = excluded.updated_at",
                params![user_id.to_string(), category, value.to_string(), Utc::now()],
            )
            .context("Failed to save settings")?;
        Ok(())
    }

    /// Trading settings, falling back to defaults when missing or unreadable
    pub fn trading_settings(&self, user_id: &Uuid) -> Result<TradingSettings> {
        Ok(match self.get_setting(user_id, TRADING)? {
            Some(value) => TradingSettings::from_value(&value).unwrap_or_else(|e| {
                warn!("Stored trading settings for {} rejected ({}), using defaults", user_id, e);
                TradingSettings::default()
            }),
            None => TradingSettings::default(),
        })
    }

    pub fn dex_settings(&self, user_id: &Uuid) -> Result<DexSettings> {
        Ok(self
            .get_setting(user_id, DEXES)?
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default())
    }
}
