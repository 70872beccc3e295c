//! Converts arbitrary persisted payloads into the canonical in-memory shape.
//!
//! The tracker's stored schema changed several times (flat member lists,
//! `classNames` string lists, Korean role labels, the nested by-cohort wire
//! shape). Instead of one defensive mega-function, each historical step is an
//! explicit migration run in order; whatever survives is canonicalized with
//! per-field defaults. `normalize` is total: it never fails, whatever the
//! input looks like, and it is idempotent on its own output.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::model::{CanonicalState, Class, Member, Profile, Role};
use crate::scope::Scope;

type Migration = fn(&mut Map<String, Value>);

/// Ordered oldest-to-newest. Every step checks the shape it fixes and is a
/// no-op on anything newer, so canonical input passes through untouched.
const MIGRATIONS: &[(&str, Migration)] = &[
    ("members-to-people", migrate_members_to_people),
    ("class-names-to-classes", migrate_class_names),
    ("nested-people-to-flat", migrate_nested_people),
];

pub fn normalize(raw: Option<&Value>, fallback: &[Member], scope: &Scope) -> CanonicalState {
    let mut doc = match raw {
        Some(Value::Object(map)) => map.clone(),
        _ => seed_document(fallback),
    };

    for (_name, step) in MIGRATIONS {
        step(&mut doc);
    }

    let classes = canonical_classes(doc.get("classes"));
    let people = canonical_people(doc.get("people"), fallback, &classes, scope);
    let attendance_by_week = canonical_attendance(doc.get("attendanceByWeek"));
    let profiles = canonical_profiles(doc.get("profiles"));

    CanonicalState {
        classes,
        people,
        attendance_by_week,
        profiles,
    }
}

/// Deterministic id for data that never had one, derived from the name so
/// repeated migrations of the same payload agree.
pub fn deterministic_class_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let hex: String = digest.iter().take(5).map(|b| format!("{:02x}", b)).collect();
    format!("class-{}", hex)
}

fn seed_document(fallback: &[Member]) -> Map<String, Value> {
    let mut doc = Map::new();
    let people: Vec<Value> = fallback
        .iter()
        .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
        .collect();
    doc.insert("people".to_string(), Value::Array(people));
    doc
}

// The earliest snapshots called the list `members`.
fn migrate_members_to_people(doc: &mut Map<String, Value>) {
    if doc.contains_key("people") {
        return;
    }
    if let Some(members) = doc.remove("members") {
        doc.insert("people".to_string(), members);
    }
}

// Before classes had identity they were a flat `classNames: string[]`.
// Synthesize one class per distinct name with a name-derived id; member
// `className` strings are resolved against these during canonicalization.
fn migrate_class_names(doc: &mut Map<String, Value>) {
    let has_classes = matches!(doc.get("classes"), Some(Value::Array(_)));
    let Some(Value::Array(names)) = doc.remove("classNames") else {
        return;
    };
    if has_classes {
        return;
    }
    let mut classes: Vec<Value> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for raw in names {
        let Some(name) = raw.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        if seen.iter().any(|n| n == name) {
            continue;
        }
        seen.push(name.to_string());
        classes.push(serde_json::json!({
            "id": deterministic_class_id(name),
            "name": name,
        }));
    }
    doc.insert("classes".to_string(), Value::Array(classes));
}

// The wire shape splits people by role, students nested under their cohort
// year. Flatten back to one list, injecting the map keys (member id, birth
// year) the nesting encoded.
fn migrate_nested_people(doc: &mut Map<String, Value>) {
    let Some(Value::Object(buckets)) = doc.get("people") else {
        return;
    };
    let buckets = buckets.clone();
    let mut flat: Vec<Value> = Vec::new();

    if let Some(Value::Object(teachers)) = buckets.get("teacher") {
        for (id, raw) in teachers {
            if let Value::Object(m) = raw {
                let mut m = m.clone();
                ensure_key(&mut m, "id", id);
                ensure_key(&mut m, "role", "teacher");
                flat.push(Value::Object(m));
            }
        }
    }
    if let Some(Value::Object(by_year)) = buckets.get("student") {
        for (year, raw_bucket) in by_year {
            let Value::Object(bucket) = raw_bucket else {
                continue;
            };
            for (id, raw) in bucket {
                if let Value::Object(m) = raw {
                    let mut m = m.clone();
                    ensure_key(&mut m, "id", id);
                    ensure_key(&mut m, "role", "student");
                    ensure_key(&mut m, "birthYear", year);
                    flat.push(Value::Object(m));
                }
            }
        }
    }
    doc.insert("people".to_string(), Value::Array(flat));
}

fn ensure_key(map: &mut Map<String, Value>, key: &str, value: &str) {
    let blank = match map.get(key) {
        None | Some(Value::Null) => true,
        Some(v) => string_of(v).map(|s| s.is_empty()).unwrap_or(true),
    };
    if blank {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn canonical_classes(raw: Option<&Value>) -> Vec<Class> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    let mut classes = Vec::new();
    for item in items {
        let Value::Object(map) = item else { continue };
        let Some(name) = map
            .get("name")
            .and_then(string_of)
            .filter(|s| !s.is_empty())
        else {
            continue;
        };
        let id = map
            .get("id")
            .and_then(string_of)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| deterministic_class_id(&name));
        classes.push(Class { id, name });
    }
    classes
}

fn canonical_people(
    raw: Option<&Value>,
    fallback: &[Member],
    classes: &[Class],
    scope: &Scope,
) -> Vec<Member> {
    let items: Vec<Value> = match raw {
        Some(Value::Array(items)) if !items.is_empty() => items.clone(),
        _ => fallback
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect(),
    };

    let mut people = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Value::Object(map) = item else { continue };

        let id = map
            .get("id")
            .and_then(string_of)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("person-{}", index + 1));
        let name = map
            .get("name")
            .and_then(string_of)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("member-{}", index + 1));
        let role = Role::parse(map.get("role").and_then(Value::as_str));

        let class_id = map
            .get("classId")
            .and_then(string_of)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                let legacy = map.get("className").and_then(string_of)?;
                classes
                    .iter()
                    .find(|c| c.name == legacy)
                    .map(|c| c.id.clone())
            });

        let birth_year = match role {
            Role::Teacher => None,
            Role::Student => map
                .get("birthYear")
                .and_then(string_of)
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    if scope.has_cohort() {
                        Some(scope.cohort_year.clone())
                    } else {
                        None
                    }
                }),
        };

        people.push(Member {
            id,
            name,
            role,
            class_id,
            birth_year,
        });
    }
    people
}

fn canonical_attendance(raw: Option<&Value>) -> BTreeMap<String, BTreeMap<String, bool>> {
    let mut out = BTreeMap::new();
    let Some(Value::Object(weeks)) = raw else {
        return out;
    };
    for (week, marks) in weeks {
        let Value::Object(marks) = marks else { continue };
        let mut clean = BTreeMap::new();
        for (member_id, v) in marks {
            if let Some(b) = v.as_bool() {
                clean.insert(member_id.clone(), b);
            }
        }
        out.insert(week.clone(), clean);
    }
    out
}

fn canonical_profiles(raw: Option<&Value>) -> BTreeMap<String, Profile> {
    let mut out = BTreeMap::new();
    let Some(Value::Object(entries)) = raw else {
        return out;
    };
    for (member_id, v) in entries {
        let Value::Object(map) = v else { continue };
        let field = |key: &str| map.get(key).and_then(string_of).filter(|s| !s.is_empty());
        out.insert(
            member_id.clone(),
            Profile {
                phone: field("phone"),
                guardian_phone: field("guardianPhone"),
                note: field("note"),
                photo_path: field("photoPath"),
                photo_url: field("photoUrl"),
                photo_data_url: field("photoDataUrl"),
            },
        );
    }
    out
}

// Remote stores round-trip numbers freely; accept them wherever we expect
// string-shaped scalars (birth years especially).
fn string_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::resolve(
            Some("grp"),
            "1",
            NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
        )
    }

    fn renormalize(state: &CanonicalState, scope: &Scope) -> CanonicalState {
        let as_json = serde_json::to_value(state).expect("serialize");
        normalize(Some(&as_json), &[], scope)
    }

    #[test]
    fn non_object_input_seeds_from_fallback() {
        let fallback = vec![Member {
            id: String::new(),
            name: "민준".to_string(),
            role: Role::Student,
            class_id: None,
            birth_year: None,
        }];
        for raw in [None, Some(json!(null)), Some(json!("junk")), Some(json!(7))] {
            let s = normalize(raw.as_ref(), &fallback, &scope());
            assert_eq!(s.people.len(), 1);
            assert_eq!(s.people[0].id, "person-1");
            assert_eq!(s.people[0].name, "민준");
            assert_eq!(s.people[0].birth_year.as_deref(), Some("2010"));
            assert!(s.classes.is_empty());
            assert!(s.attendance_by_week.is_empty());
            assert!(s.profiles.is_empty());
        }
    }

    #[test]
    fn legacy_class_names_and_korean_roles() {
        let raw = json!({
            "classNames": ["사랑반"],
            "members": [{ "name": "김민", "role": "학생", "className": "사랑반" }],
        });
        let s = normalize(Some(&raw), &[], &scope());

        assert_eq!(s.classes.len(), 1);
        assert_eq!(s.classes[0].name, "사랑반");
        assert_eq!(s.classes[0].id, deterministic_class_id("사랑반"));

        assert_eq!(s.people.len(), 1);
        let m = &s.people[0];
        assert_eq!(m.id, "person-1");
        assert_eq!(m.role, Role::Student);
        assert_eq!(m.class_id.as_deref(), Some(s.classes[0].id.as_str()));
        assert_eq!(m.birth_year.as_deref(), Some("2010"));
    }

    #[test]
    fn class_names_dedupe_and_skip_blanks() {
        let raw = json!({ "classNames": ["사랑반", "사랑반", "  ", "믿음반"] });
        let s = normalize(Some(&raw), &[], &scope());
        let names: Vec<&str> = s.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["사랑반", "믿음반"]);
    }

    #[test]
    fn nested_wire_people_flatten_with_injected_keys() {
        let raw = json!({
            "people": {
                "teacher": { "t1": { "name": "담임" } },
                "student": {
                    "2010": { "s1": { "name": "김민" } },
                    "2009": { "s2": { "name": "이준", "birthYear": "2009" } },
                },
            },
        });
        let s = normalize(Some(&raw), &[], &scope());
        assert_eq!(s.people.len(), 3);

        let t = s.member("t1").expect("teacher");
        assert_eq!(t.role, Role::Teacher);
        assert_eq!(t.birth_year, None);

        let s1 = s.member("s1").expect("student 2010");
        assert_eq!(s1.birth_year.as_deref(), Some("2010"));
        let s2 = s.member("s2").expect("student 2009");
        assert_eq!(s2.birth_year.as_deref(), Some("2009"));
    }

    #[test]
    fn teacher_birth_year_is_always_cleared() {
        let raw = json!({
            "people": [{ "id": "t", "name": "담임", "role": "teacher", "birthYear": "1990" }],
        });
        let s = normalize(Some(&raw), &[], &scope());
        assert_eq!(s.people[0].birth_year, None);
    }

    #[test]
    fn attendance_and_profiles_shape_filtered() {
        let raw = json!({
            "people": [],
            "attendanceByWeek": {
                "attendance-2026-03-01": { "a": true, "b": false, "c": "yes" },
                "bogus": 3,
            },
            "profiles": {
                "a": { "phone": "010-1", "unknownField": 1 },
                "b": "junk",
            },
        });
        let s = normalize(Some(&raw), &[], &scope());
        let week = &s.attendance_by_week["attendance-2026-03-01"];
        assert_eq!(week.get("a"), Some(&true));
        assert_eq!(week.get("b"), Some(&false));
        assert!(!week.contains_key("c"));
        assert!(!s.attendance_by_week.contains_key("bogus"));

        assert_eq!(s.profiles["a"].phone.as_deref(), Some("010-1"));
        assert!(!s.profiles.contains_key("b"));
    }

    #[test]
    fn numeric_birth_years_are_accepted() {
        let raw = json!({
            "people": [{ "id": "s", "name": "김민", "role": "student", "birthYear": 2009 }],
        });
        let s = normalize(Some(&raw), &[], &scope());
        assert_eq!(s.people[0].birth_year.as_deref(), Some("2009"));
    }

    #[test]
    fn normalize_is_idempotent_on_legacy_input() {
        let raw = json!({
            "classNames": ["사랑반"],
            "members": [
                { "name": "김민", "role": "학생", "className": "사랑반" },
                { "id": "t9", "name": "담임", "role": "선생님" },
                { "name": "" },
            ],
            "attendanceByWeek": { "attendance-2026-03-01": { "x": true } },
        });
        let once = normalize(Some(&raw), &[], &scope());
        let twice = renormalize(&once, &scope());
        assert_eq!(once, twice);
        // Placeholder name for the blank third member.
        assert_eq!(once.people[2].name, "member-3");
    }

    #[test]
    fn invalid_scope_leaves_blank_student_years_unset() {
        let no_cohort = Scope::resolve(
            Some("grp"),
            "9",
            NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
        );
        let raw = json!({ "people": [{ "id": "s", "name": "김민" }] });
        let s = normalize(Some(&raw), &[], &no_cohort);
        assert_eq!(s.people[0].birth_year, None);
    }
}
