use super::response::HandlerErr;
use super::types::AppState;
use crate::sync::SyncService;
use std::sync::Arc;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn require_sync(state: &AppState) -> Result<Arc<SyncService>, HandlerErr> {
    state
        .sync_service()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}
