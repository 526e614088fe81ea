use super::queue::{OfflineQueueStore, SqliteSlotStorage};
use super::service::{FlushPolicy, SyncService};
use crate::config::Config;
use crate::db::{self, SharedConn};
use crate::store::{ActivityStore, HttpActivityStore, SqliteActivityStore};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SETTINGS_KEY: &str = "sync.store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub store: StoreKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub flush_policy: FlushPolicy,
}

impl SyncSettings {
    /// Remote when the environment names an API, otherwise the workspace table.
    pub fn from_config(cfg: &Config) -> Self {
        SyncSettings {
            store: if cfg.api_url.is_some() {
                StoreKind::Remote
            } else {
                StoreKind::Local
            },
            base_url: cfg.api_url.clone(),
            token: cfg.api_token.clone(),
            timeout_ms: cfg.timeout_ms,
            flush_policy: FlushPolicy::default(),
        }
    }

    pub fn load(conn: &SharedConn, cfg: &Config) -> anyhow::Result<Self> {
        let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        match db::settings_get_json(&guard, SETTINGS_KEY)? {
            Some(v) => serde_json::from_value(v).context("stored sync settings are invalid"),
            None => Ok(Self::from_config(cfg)),
        }
    }

    pub fn save(&self, conn: &SharedConn) -> anyhow::Result<()> {
        let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        db::settings_set_json(&guard, SETTINGS_KEY, &serde_json::to_value(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeoutMs must be positive"));
        }
        if self.store == StoreKind::Remote {
            let url = self.base_url.as_deref().unwrap_or("");
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("remote store needs an http(s) baseUrl"));
            }
        }
        Ok(())
    }

    /// Wires the store backend and the workspace queue slot together.
    pub fn build(&self, conn: &SharedConn) -> anyhow::Result<SyncService> {
        self.validate()?;
        let store: Box<dyn ActivityStore> = match self.store {
            StoreKind::Local => Box::new(SqliteActivityStore::new(conn.clone())),
            StoreKind::Remote => Box::new(HttpActivityStore::new(
                self.base_url.as_deref().unwrap_or_default(),
                self.token.clone(),
                Duration::from_millis(self.timeout_ms),
            )?),
        };
        let queue = OfflineQueueStore::new(Box::new(SqliteSlotStorage::new(conn.clone())));
        Ok(SyncService::new(store, queue, self.flush_policy))
    }
}
