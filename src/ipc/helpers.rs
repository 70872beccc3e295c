use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::remote::SyncError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Persists the open state after a mutation: the local cache write is part
/// of the mutation (its failure is reported), the remote write is
/// fire-and-forget (its failure is recorded by the gateway and surfaced via
/// sync.status, never rolled back locally).
pub fn persist(app: &mut AppState) -> Result<(), HandlerErr> {
    let (Some(scope), Some(state)) = (app.scope.as_ref(), app.state.as_ref()) else {
        return Ok(());
    };

    if let Some(cache) = app.cache.as_ref() {
        cache.write_state(scope, state).map_err(|e| {
            HandlerErr::new("db_update_failed", format!("local cache write failed: {}", e))
        })?;
    }

    if app.sync.is_configured() && scope.has_cohort() {
        match app.sync.write(scope, state) {
            Ok(()) => {}
            // Recorded as the gateway's last error; local state stands.
            Err(SyncError::Remote(_)) | Err(SyncError::NotConfigured) => {}
        }
    }
    Ok(())
}

pub fn state_json(app: &AppState) -> serde_json::Value {
    app.state
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or(json!(null))
}

pub fn scope_json(app: &AppState) -> serde_json::Value {
    match app.scope.as_ref() {
        Some(s) => json!({ "groupId": s.group_id, "cohortYear": s.cohort_year }),
        None => json!(null),
    }
}
