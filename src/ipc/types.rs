use crate::config::Config;
use crate::db::SharedConn;
use crate::sync::{ConnectivityMonitor, FlushReport, Subscription, SyncService};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Current sync service; swapped when the workspace or settings change, read
/// by connectivity listeners at fire time.
pub type SyncSlot = Arc<RwLock<Option<Arc<SyncService>>>>;

pub struct MountedView {
    pub view: String,
    pub subscription: Subscription,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<SharedConn>,
    pub sync: SyncSlot,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub views: HashMap<u64, MountedView>,
    /// Reports from flushes triggered by the last connectivity change.
    pub triggered_flushes: Arc<Mutex<Vec<FlushReport>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            config,
            workspace: None,
            db: None,
            sync: Arc::new(RwLock::new(None)),
            connectivity: Arc::new(ConnectivityMonitor::new(true)),
            views: HashMap::new(),
            triggered_flushes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sync_service(&self) -> Option<Arc<SyncService>> {
        self.sync.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_sync_service(&self, svc: SyncService) {
        let mut slot = self.sync.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(svc));
    }
}
