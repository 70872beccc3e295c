//! Canonical state <-> nested wire representation.
//!
//! On the wire, members are split by role and students are nested under
//! their cohort year. Each grade's remote document then only carries that
//! grade's students, while teachers (who serve every grade) are stored once
//! per group. UI code never sees this shape; it exists only here and in the
//! gateways that persist it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{CanonicalState, Class, Member, Profile, Role};
use crate::normalize::normalize;
use crate::scope::Scope;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePeople {
    /// cohort year -> member id -> member
    #[serde(default)]
    pub student: BTreeMap<String, BTreeMap<String, Member>>,
    /// member id -> member
    #[serde(default)]
    pub teacher: BTreeMap<String, Member>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireState {
    #[serde(default)]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub people: WirePeople,
    #[serde(default)]
    pub attendance_by_week: BTreeMap<String, BTreeMap<String, bool>>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

pub fn encode(state: &CanonicalState, scope: &Scope) -> WireState {
    let mut wire = WireState {
        classes: state.classes.clone(),
        attendance_by_week: state.attendance_by_week.clone(),
        profiles: state.profiles.clone(),
        ..WireState::default()
    };

    for member in &state.people {
        match member.role {
            Role::Teacher => {
                wire.people
                    .teacher
                    .insert(member.id.clone(), member.clone());
            }
            Role::Student => {
                // Students belonging to another cohort are another scope's
                // data; they never enter this scope's document.
                if !scope.has_cohort() {
                    continue;
                }
                let owned = member
                    .birth_year
                    .as_deref()
                    .map(|y| y == scope.cohort_year)
                    .unwrap_or(true);
                if !owned {
                    continue;
                }
                wire.people
                    .student
                    .entry(scope.cohort_year.clone())
                    .or_default()
                    .insert(member.id.clone(), member.clone());
            }
        }
    }
    wire
}

pub fn encode_value(state: &CanonicalState, scope: &Scope) -> Value {
    serde_json::to_value(encode(state, scope)).unwrap_or(Value::Null)
}

/// Decoding is normalization of the wire JSON; there is no second parser to
/// drift from. Any malformed document degrades to an empty state instead of
/// failing.
pub fn decode(wire: &Value, scope: &Scope) -> CanonicalState {
    normalize(Some(wire), &[], scope)
}

/// The scope's per-cohort document: the full wire state minus the teacher
/// bucket, which lives at its own group-wide path.
pub fn cohort_document(state: &CanonicalState, scope: &Scope) -> Value {
    let mut wire = encode(state, scope);
    wire.people.teacher.clear();
    serde_json::to_value(wire).unwrap_or(Value::Null)
}

/// The group-wide teachers document: just the flat teacher map.
pub fn teachers_document(state: &CanonicalState, scope: &Scope) -> Value {
    let wire = encode(state, scope);
    serde_json::to_value(wire.people.teacher).unwrap_or(Value::Null)
}

/// Reassembles a full wire document from the two remote paths. Either side
/// may be absent; the other still decodes.
pub fn merge_documents(cohort: Option<&Value>, teachers: Option<&Value>) -> Value {
    let mut doc = match cohort {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    let teachers = match teachers {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(serde_json::Map::new()),
    };
    let people = doc
        .entry("people".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Value::Object(people) = people {
        people.insert("teacher".to_string(), teachers);
    }
    Value::Object(doc)
}
