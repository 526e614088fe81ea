use crate::ipc::helpers::require_sync;
use crate::ipc::response::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn queue_status(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let svc = require_sync(state)?;
    let items = svc.queue().load();
    Ok(json!({
        "pending": items.len(),
        "items": items,
        "online": state.connectivity.is_online(),
        "flushPolicy": svc.policy().as_str(),
    }))
}

fn queue_flush(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let svc = require_sync(state)?;
    let report = svc.flush()?;
    Ok(json!(report))
}

fn handle_queue_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, queue_status(state))
}

fn handle_queue_flush(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, queue_flush(state))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "queue.status" => Some(handle_queue_status(state, req)),
        "queue.flush" => Some(handle_queue_flush(state, req)),
        _ => None,
    }
}
