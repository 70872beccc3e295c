use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_bool, get_required_str, persist, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::{is_week_key_for_year, week_key};
use serde_json::json;

// The week key defaults to the week containing today; an explicit key must
// at least look like one so a typo cannot scatter marks under junk keys.
fn resolve_week_key(params: &serde_json::Value) -> Result<String, HandlerErr> {
    match params.get("weekKey").and_then(|v| v.as_str()) {
        Some(k) if k.starts_with("attendance-") => Ok(k.to_string()),
        Some(k) => Err(HandlerErr::new(
            "bad_params",
            format!("malformed week key: {}", k),
        )),
        None => Ok(week_key(chrono::Local::now().date_naive())),
    }
}

fn attendance_mark(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let member_id = get_required_str(params, "memberId")?;
    let present = get_required_bool(params, "present")?;
    let week = resolve_week_key(params)?;

    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
    if state.member(&member_id).is_none() {
        return Err(HandlerErr::new("not_found", "member not found"));
    }
    state.set_mark(&week, &member_id, present);
    let (present_count, absent_count) = state.week_counts(&week);
    persist(app)?;
    Ok(json!({
        "weekKey": week,
        "presentCount": present_count,
        "absentCount": absent_count,
    }))
}

fn attendance_mark_all(
    app: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let present = get_required_bool(params, "present")?;
    let week = resolve_week_key(params)?;

    let state = app
        .state
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;
    let ids: Vec<String> = state.people.iter().map(|m| m.id.clone()).collect();
    for id in &ids {
        state.set_mark(&week, id, present);
    }
    let (present_count, absent_count) = state.week_counts(&week);
    persist(app)?;
    Ok(json!({
        "weekKey": week,
        "marked": ids.len(),
        "presentCount": present_count,
        "absentCount": absent_count,
    }))
}

fn attendance_week(app: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let week = resolve_week_key(params)?;
    let state = app
        .state
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;

    let marks = state.attendance_by_week.get(&week);
    let roster: Vec<serde_json::Value> = state
        .people
        .iter()
        .map(|m| {
            // Missing entry means "no record", which the UI renders
            // differently from an explicit absence.
            let mark = marks.and_then(|w| w.get(&m.id)).copied();
            json!({
                "memberId": m.id,
                "name": m.name,
                "role": m.role,
                "classId": m.class_id,
                "present": mark,
            })
        })
        .collect();
    let (present_count, absent_count) = state.week_counts(&week);
    Ok(json!({
        "weekKey": week,
        "roster": roster,
        "presentCount": present_count,
        "absentCount": absent_count,
    }))
}

// The annual grid: every recorded week of the year in chronological order
// (week keys sort lexicographically, and the map is ordered) with each
// member's marks and totals.
fn attendance_annual(
    app: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing year"))? as i32;
    let state = app
        .state
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_state_open", "open a grade first"))?;

    let weeks: Vec<&String> = state
        .attendance_by_week
        .keys()
        .filter(|k| is_week_key_for_year(k, year))
        .collect();

    let members: Vec<serde_json::Value> = state
        .people
        .iter()
        .map(|m| {
            let mut marks = serde_json::Map::new();
            let mut present_count = 0usize;
            for week in &weeks {
                if let Some(mark) = state.attendance_by_week[*week].get(&m.id) {
                    if *mark {
                        present_count += 1;
                    }
                    marks.insert((*week).clone(), json!(mark));
                }
            }
            json!({
                "memberId": m.id,
                "name": m.name,
                "role": m.role,
                "marks": marks,
                "presentCount": present_count,
            })
        })
        .collect();

    Ok(json!({
        "year": year,
        "weeks": weeks,
        "members": members,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&mut AppState, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &mut AppState| match f(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    };
    match req.method.as_str() {
        "attendance.mark" => Some(run(attendance_mark, state)),
        "attendance.markAll" => Some(run(attendance_mark_all, state)),
        "attendance.week" => Some(run(attendance_week, state)),
        "attendance.annual" => Some(run(attendance_annual, state)),
        _ => None,
    }
}
