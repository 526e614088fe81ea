use crate::ipc::response::{respond, HandlerErr};
use crate::ipc::types::{AppState, MountedView, Request};
use crate::sync::ConnectivityEvent;
use serde_json::json;
use std::sync::Arc;

const VIEWS: [&str; 2] = ["teacher", "parent"];

fn connectivity_set(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let online = params
        .get("online")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing online"))?;

    state
        .triggered_flushes
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
    let changed = state.connectivity.set_online(online).is_some();
    let flushes: Vec<_> = state
        .triggered_flushes
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .drain(..)
        .collect();

    Ok(json!({
        "online": state.connectivity.is_online(),
        "changed": changed,
        "flushes": flushes,
    }))
}

/// Teacher views own a listener that flushes the queue when the host comes
/// back online. Parent views only follow the status badge.
fn dashboard_mount(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let view = params
        .get("view")
        .and_then(|v| v.as_str())
        .unwrap_or("teacher")
        .to_string();
    if !VIEWS.contains(&view.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown view: {}", view)));
    }

    let subscription = if view == "teacher" {
        let sync = Arc::clone(&state.sync);
        let reports = Arc::clone(&state.triggered_flushes);
        state.connectivity.subscribe(move |event| {
            if event != ConnectivityEvent::Online {
                return;
            }
            let svc = sync.read().unwrap_or_else(|e| e.into_inner()).clone();
            let Some(svc) = svc else {
                return;
            };
            match svc.flush() {
                Ok(report) => reports
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(report),
                Err(e) => log::error!("flush on reconnect failed: {}", e),
            }
        })
    } else {
        state
            .connectivity
            .subscribe(|event| log::debug!("parent view badge: {:?}", event))
    };

    let id = subscription.id();
    state.views.insert(id, MountedView { view: view.clone(), subscription });
    log::info!(
        "{} dashboard mounted (subscription {}, {} listening)",
        view,
        id,
        state.connectivity.listener_count()
    );
    Ok(json!({
        "subscriptionId": id,
        "view": view,
        "online": state.connectivity.is_online(),
    }))
}

fn dashboard_unmount(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = params
        .get("subscriptionId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing subscriptionId"))?;
    let removed = match state.views.remove(&id) {
        Some(mounted) => {
            log::info!("{} dashboard unmounted (subscription {})", mounted.view, id);
            mounted.subscription.unsubscribe();
            true
        }
        None => false,
    };
    Ok(json!({ "removed": removed }))
}

fn handle_connectivity_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, connectivity_set(state, &req.params))
}

fn handle_dashboard_mount(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = dashboard_mount(state, &req.params);
    respond(&req.id, result)
}

fn handle_dashboard_unmount(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = dashboard_unmount(state, &req.params);
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "connectivity.set" => Some(handle_connectivity_set(state, req)),
        "dashboard.mount" => Some(handle_dashboard_mount(state, req)),
        "dashboard.unmount" => Some(handle_dashboard_unmount(state, req)),
        _ => None,
    }
}
