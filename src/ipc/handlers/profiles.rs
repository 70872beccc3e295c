use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, persist, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::media::MediaError;
use serde_json::json;

fn patch_field(
    current: &mut Option<String>,
    patch: &serde_json::Value,
    key: &str,
) -> Result<(), HandlerErr> {
    match patch.get(key) {
        None => Ok(()),
        Some(serde_json::Value::Null) => {
            *current = None;
            Ok(())
        }
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            *current = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
            Ok(())
        }
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be string or null", key),
        )),
    }
}

fn profile_update(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let patch = params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing patch"))?
        .clone();

    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
    if state.member(&member_id).is_none() {
        return Err(HandlerErr::new("not_found", "member not found"));
    }

    let profile = state.profiles.entry(member_id.clone()).or_default();
    patch_field(&mut profile.phone, &patch, "phone")?;
    patch_field(&mut profile.guardian_phone, &patch, "guardianPhone")?;
    patch_field(&mut profile.note, &patch, "note")?;

    let result = serde_json::to_value(&*profile).unwrap_or(json!(null));
    if profile.is_empty() {
        state.profiles.remove(&member_id);
    }
    persist(app)?;
    Ok(json!({ "memberId": member_id, "profile": result }))
}

fn media_err(e: MediaError) -> HandlerErr {
    match e {
        MediaError::NotAnImage(ext) => {
            HandlerErr::new("validation_failed", format!("not an image file: .{}", ext))
        }
        MediaError::NotConfigured => {
            HandlerErr::new("not_configured", "object storage is not configured")
        }
        MediaError::Store(e) => HandlerErr {
            code: "remote_failed",
            message: e.message,
            details: Some(json!({ "path": e.path })),
        },
    }
}

// Upload, then let the new photo displace the old one: the previous object
// is deleted by its path afterwards, and that cleanup failing (object
// already gone, transient storage error) never fails the update.
fn photo_upload(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let file_path = get_required_str(params, "path")?;

    let group_id = app
        .scope
        .as_ref()
        .map(|s| s.group_id.clone())
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
    {
        let state = app
            .state
            .as_ref()
            .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
        if state.member(&member_id).is_none() {
            return Err(HandlerErr::new("not_found", "member not found"));
        }
    }

    let file_name = std::path::Path::new(&file_path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path.as_str())
        .to_string();
    let bytes = std::fs::read(&file_path).map_err(|e| {
        HandlerErr::new("file_read_failed", format!("{}: {}", file_path, e))
    })?;

    let uploaded = app
        .media
        .upload(&member_id, &file_name, &bytes, &group_id)
        .map_err(media_err)?;

    let old_path = {
        let state = app
            .state
            .as_mut()
            .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
        let profile = state.profiles.entry(member_id.clone()).or_default();
        let old = profile.photo_path.take();
        profile.photo_path = Some(uploaded.path.clone());
        profile.photo_url = Some(uploaded.url.clone());
        // A fresh upload supersedes any legacy inline fallback.
        profile.photo_data_url = None;
        old
    };
    if old_path.as_deref() != Some(uploaded.path.as_str()) {
        let _ = app.media.delete_by_path(old_path.as_deref());
    }

    persist(app)?;
    Ok(json!({ "path": uploaded.path, "url": uploaded.url }))
}

fn photo_delete(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;

    let Some(profile) = state.profiles.get_mut(&member_id) else {
        return Err(HandlerErr::new("not_found", "profile not found"));
    };
    let old_path = profile.photo_path.take();
    profile.photo_url = None;
    profile.photo_data_url = None;
    if profile.is_empty() {
        state.profiles.remove(&member_id);
    }

    let _ = app.media.delete_by_path(old_path.as_deref());
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
        "profile.update" => Some(run(profile_update, state)),
        "photo.upload" => Some(run(photo_upload, state)),
        "photo.delete" => Some(run(photo_delete, state)),
        _ => None,
    }
}
