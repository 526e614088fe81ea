use crate::ipc::response::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sync::{FlushPolicy, StoreKind, SyncSettings};
use serde_json::json;

fn settings_json(s: &SyncSettings) -> serde_json::Value {
    // Never echo the bearer token back to the UI.
    json!({
        "store": s.store,
        "baseUrl": s.base_url,
        "hasToken": s.token.is_some(),
        "timeoutMs": s.timeout_ms,
        "flushPolicy": s.flush_policy,
    })
}

fn merge_settings(mut s: SyncSettings, params: &serde_json::Value) -> Result<SyncSettings, HandlerErr> {
    if let Some(v) = params.get("store") {
        s.store = serde_json::from_value::<StoreKind>(v.clone())
            .map_err(|_| HandlerErr::bad_params("store must be local or remote"))?;
    }
    if let Some(v) = params.get("baseUrl") {
        s.base_url = v
            .as_str()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
    }
    if let Some(v) = params.get("token") {
        s.token = v.as_str().map(str::to_string).filter(|t| !t.is_empty());
    }
    if let Some(v) = params.get("timeoutMs") {
        s.timeout_ms = v
            .as_u64()
            .ok_or_else(|| HandlerErr::bad_params("timeoutMs must be a positive integer"))?;
    }
    if let Some(v) = params.get("flushPolicy") {
        s.flush_policy = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("flushPolicy must be a string"))?
            .parse::<FlushPolicy>()
            .map_err(HandlerErr::bad_params)?;
    }
    s.validate()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    Ok(s)
}

fn sync_configure(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let current = SyncSettings::load(&conn, &state.config)
        .unwrap_or_else(|_| SyncSettings::from_config(&state.config));
    let next = merge_settings(current, params)?;
    let svc = next
        .build(&conn)
        .map_err(|e| HandlerErr::new("bad_settings", format!("{e:#}")))?;
    next.save(&conn)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    log::info!("sync store set to {}", svc.store().describe());
    state.set_sync_service(svc);
    Ok(settings_json(&next))
}

fn handle_sync_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = sync_configure(state, &req.params);
    respond(&req.id, result)
}

fn handle_sync_settings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return respond(
            &req.id,
            Err(HandlerErr::new("no_workspace", "select a workspace first")),
        );
    };
    let result = SyncSettings::load(conn, &state.config)
        .map(|s| settings_json(&s))
        .map_err(|e| HandlerErr::new("bad_settings", format!("{e:#}")));
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.configure" => Some(handle_sync_configure(state, req)),
        "sync.settings" => Some(handle_sync_settings(state, req)),
        _ => None,
    }
}
