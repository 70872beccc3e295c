use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::media::MemoryObjectStore;
use crate::remote::{MemoryRemote, RemoteStore, SyncError, ROOT_PATH};
use serde_json::json;

// Installs the loopback in-memory backend (the only built-in one; real
// deployments embed the daemon and install their own RemoteStore /
// ObjectStore). `accounts` optionally seeds credential records so a login
// can succeed against the fresh store.
fn handle_sync_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backend = req.params.get("backend").and_then(|v| v.as_str());
    if backend != Some("memory") {
        return err(
            &req.id,
            "bad_params",
            "backend must be \"memory\"",
            None,
        );
    }

    let mut remote = MemoryRemote::new();
    if let Some(accounts) = req.params.get("accounts").and_then(|v| v.as_object()) {
        for (login_id, record) in accounts {
            let path = format!("{}/accounts/{}", ROOT_PATH, login_id);
            if let Err(e) = remote.write(&path, record) {
                return err(
                    &req.id,
                    "remote_failed",
                    e.message,
                    Some(json!({ "path": e.path })),
                );
            }
        }
    }

    state.sync.configure(Box::new(remote));
    state.media.configure(Box::new(MemoryObjectStore::new()));
    ok(&req.id, json!({ "backend": "memory" }))
}

fn handle_sync_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let last_error = state
        .sync
        .last_error()
        .map(|e| json!({ "path": e.path, "message": e.message }))
        .unwrap_or(json!(null));
    ok(
        &req.id,
        json!({
            "configured": state.sync.is_configured(),
            "subscribed": state.sync.is_subscribed(),
            "pendingWrites": state.sync.pending_writes(),
            "lastError": last_error,
        }),
    )
}

// Pumps the remote subscription. Whatever the remote delivered last wins:
// it replaces the open in-memory state (the subscription is the source of
// truth for what the UI ultimately shows).
fn handle_sync_poll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let delivered = match state.sync.poll(state.cache.as_ref()) {
        Ok(v) => v,
        Err(SyncError::NotConfigured) => Vec::new(),
        Err(SyncError::Remote(e)) => {
            return err(
                &req.id,
                "remote_failed",
                e.message,
                Some(json!({ "path": e.path })),
            )
        }
    };

    let events = delivered.len();
    if let Some(latest) = delivered.into_iter().last() {
        state.state = Some(latest);
    }
    let latest_json = state
        .state
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok());
    ok(
        &req.id,
        json!({
            "events": events,
            "state": if events > 0 { latest_json.unwrap_or(json!(null)) } else { json!(null) },
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.configure" => Some(handle_sync_configure(state, req)),
        "sync.status" => Some(handle_sync_status(state, req)),
        "sync.poll" => Some(handle_sync_poll(state, req)),
        _ => None,
    }
}
