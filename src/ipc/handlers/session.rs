use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::session::{self, LoginError};
use serde_json::json;

fn session_json(s: &crate::session::Session) -> serde_json::Value {
    json!({
        "loginId": s.login_id,
        "groupUid": s.group_uid,
        "displayName": s.display_name,
    })
}

fn handle_session_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let login_id = match get_required_str(&req.params, "loginId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match get_required_str(&req.params, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let Some(store) = state.sync.store_mut() else {
        return err(
            &req.id,
            "not_configured",
            "remote backend is not configured",
            None,
        );
    };

    match session::login(store, state.cache.as_ref(), &login_id, &password) {
        Ok(session) => {
            let result = session_json(&session);
            state.session = Some(session);
            ok(&req.id, json!({ "session": result }))
        }
        Err(LoginError::InvalidInput(msg)) => err(&req.id, "validation_failed", msg, None),
        Err(LoginError::UnknownAccount) => err(&req.id, "unknown_account", "no such account", None),
        Err(LoginError::WrongPassword) => {
            err(&req.id, "wrong_password", "password does not match", None)
        }
        Err(LoginError::NotConfigured) => err(
            &req.id,
            "not_configured",
            "remote backend is not configured",
            None,
        ),
        Err(LoginError::Remote(e)) => err(
            &req.id,
            "remote_failed",
            e.message,
            Some(json!({ "path": e.path })),
        ),
    }
}

fn handle_session_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match session::load_session(cache) {
        Some(session) => {
            let result = session_json(&session);
            state.session = Some(session);
            ok(&req.id, json!({ "session": result }))
        }
        None => ok(&req.id, json!({ "session": null })),
    }
}

// Logging out drops the scope identity entirely: the open state belongs to
// the group that just logged out and must not bleed into the next login.
fn handle_session_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(cache) = state.cache.as_ref() {
        session::clear_session(cache);
    }
    state.session = None;
    state.scope = None;
    state.state = None;
    state.sync.unsubscribe();
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_session_login(state, req)),
        "session.restore" => Some(handle_session_restore(state, req)),
        "session.logout" => Some(handle_session_logout(state, req)),
        _ => None,
    }
}
