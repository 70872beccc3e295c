use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, persist, scope_json, state_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Class, Member, Role};
use crate::normalize::normalize;
use crate::scope::Scope;
use serde_json::json;
use uuid::Uuid;

// Opens the partition for a grade: resolve the scope against today's date,
// drop any previous subscription, load the local cache (or seed empty),
// then bring the remote side up when one is configured. The initial poll
// after subscribing delivers the current remote value, which wins over
// whatever was cached.
fn state_open(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    if app.cache.is_none() {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    }
    let grade = get_required_str(params, "grade")?;
    let group_id = params
        .get("groupId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| app.session.as_ref().map(|s| s.group_uid.clone()));

    let today = chrono::Local::now().date_naive();
    let scope = Scope::resolve(group_id.as_deref(), &grade, today);

    // Previous scope's listener must be gone before the new one attaches.
    app.sync.unsubscribe();

    let mut state = app
        .cache
        .as_ref()
        .and_then(|c| c.read_state(&scope))
        .unwrap_or_else(|| normalize(None, &[], &scope));

    let mut subscribed = false;
    if app.sync.is_configured() && scope.has_cohort() {
        // Failures here are recorded by the gateway and reported via
        // sync.status; the scope still opens local-only.
        let _ = app.sync.ensure_remote_exists(&scope, &state);
        if app.sync.subscribe(&scope).is_ok() {
            subscribed = true;
            if let Ok(mut delivered) = app.sync.poll(app.cache.as_ref()) {
                if let Some(latest) = delivered.pop() {
                    state = latest;
                }
            }
        }
    }

    if let Some(cache) = app.cache.as_ref() {
        cache.write_state(&scope, &state).map_err(|e| {
            HandlerErr::new("db_update_failed", format!("local cache write failed: {}", e))
        })?;
    }

    app.scope = Some(scope);
    app.state = Some(state);
    Ok(json!({
        "scope": scope_json(app),
        "state": state_json(app),
        "remote": {
            "configured": app.sync.is_configured(),
            "subscribed": subscribed,
        },
    }))
}

fn classes_add(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("validation_failed", "class name must not be empty"));
    }
    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
    if state.class_name_taken(&name) {
        return Err(HandlerErr::new(
            "validation_failed",
            format!("class name already exists: {}", name),
        ));
    }
    let class_id = Uuid::new_v4().to_string();
    state.classes.push(Class {
        id: class_id.clone(),
        name: name.clone(),
    });
    persist(app)?;
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_delete(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
    if !state.remove_class(&class_id) {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    persist(app)?;
    Ok(json!({ "ok": true }))
}

fn members_add(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("validation_failed", "member name must not be empty"));
    }
    let role = Role::parse(params.get("role").and_then(|v| v.as_str()));
    let class_id = params
        .get("classId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let cohort_year = app
        .scope
        .as_ref()
        .filter(|s| s.has_cohort())
        .map(|s| s.cohort_year.clone());
    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;

    if let Some(ref cid) = class_id {
        if state.class(cid).is_none() {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
    }

    let member_id = Uuid::new_v4().to_string();
    state.people.push(Member {
        id: member_id.clone(),
        name,
        role,
        class_id,
        birth_year: match role {
            Role::Student => cohort_year,
            Role::Teacher => None,
        },
    });
    persist(app)?;
    Ok(json!({ "memberId": member_id }))
}

fn members_delete(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;

    let photo_path = state
        .profiles
        .get(&member_id)
        .and_then(|p| p.photo_path.clone());
    if !state.remove_member(&member_id) {
        return Err(HandlerErr::new("not_found", "member not found"));
    }
    // Stored photo cleanup is best-effort; an already-gone object must not
    // block the delete.
    let _ = app.media.delete_by_path(photo_path.as_deref());
    persist(app)?;
    Ok(json!({ "ok": true }))
}

fn members_assign_class(
    app: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let class_id = match params.get("classId") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_str().filter(|s| !s.is_empty()) {
            Some(s) => Some(s.to_string()),
            None => return Err(HandlerErr::new("bad_params", "classId must be string or null")),
        },
    };
    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;

    if let Some(ref cid) = class_id {
        if state.class(cid).is_none() {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
    }
    let member = state
        .people
        .iter_mut()
        .find(|m| m.id == member_id)
        .ok_or_else(|| HandlerErr::new("not_found", "member not found"))?;
    member.class_id = class_id;
    persist(app)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&mut AppState, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &mut AppState| match f(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    };
    match req.method.as_str() {
        "state.open" => Some(run(state_open, state)),
        "classes.add" => Some(run(classes_add, state)),
        "classes.delete" => Some(run(classes_delete, state)),
        "members.add" => Some(run(members_add, state)),
        "members.delete" => Some(run(members_delete, state)),
        "members.assignClass" => Some(run(members_assign_class, state)),
        _ => None,
    }
}
