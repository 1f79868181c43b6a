use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::database::{Database, DbError};

const SYNC_CONFIG_KEY: &str = "sync_config";

/// Backoff settings for server calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

/// Runtime configuration for the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    /// Quiet period after the last edit before a sync pass runs
    pub debounce_ms: u64,
    /// Delay before an opportunistic background refresh
    pub refresh_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".to_string(),
            auth_token: None,
            debounce_ms: 2000,
            refresh_delay_ms: 100,
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Apply `WORKFLOW_API_URL` / `WORKFLOW_API_TOKEN` overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("WORKFLOW_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(token) = std::env::var("WORKFLOW_API_TOKEN") {
            if !token.trim().is_empty() {
                self.auth_token = Some(token);
            }
        }
        self
    }
}

impl Database {
    /// Create the settings table
    pub fn create_settings_table(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Load the sync configuration, falling back to defaults when unset
    pub fn get_sync_config(&self) -> Result<SyncConfig, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query([SYNC_CONFIG_KEY])?;

        if let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(SyncConfig::default())
        }
    }

    /// Persist the sync configuration
    pub fn save_sync_config(&self, config: &SyncConfig) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        let raw = serde_json::to_string(config)?;

        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            rusqlite::params![SYNC_CONFIG_KEY, raw],
        )?;

        Ok(())
    }
}
