use crate::db;
use crate::ipc::helpers::get_required_str;
use crate::ipc::response::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sync::SyncSettings;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(
        &req.id,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "online": state.connectivity.is_online(),
        })),
    )
}

fn workspace_select(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(params, "path")?);

    let conn = db::open_db(&path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    let conn = db::shared(conn);

    let settings = SyncSettings::load(&conn, &state.config)
        .map_err(|e| HandlerErr::new("bad_settings", format!("{e:#}")))?;
    let svc = settings
        .build(&conn)
        .map_err(|e| HandlerErr::new("bad_settings", format!("{e:#}")))?;
    let pending = svc.queue().len();

    log::info!(
        "workspace opened at {} (store: {}, {} pending)",
        path.to_string_lossy(),
        svc.store().describe(),
        pending
    );
    state.set_sync_service(svc);
    state.workspace = Some(path.clone());
    state.db = Some(conn);

    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "store": settings.store,
        "pending": pending,
    }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = workspace_select(state, &req.params);
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
