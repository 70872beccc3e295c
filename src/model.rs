use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role is fixed at creation; there is no rename/reassign operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    /// Accepts the canonical labels plus the legacy Korean labels found in
    /// older payloads. Anything unrecognized defaults to student.
    pub fn parse(raw: Option<&str>) -> Role {
        match raw.map(str::trim) {
            Some("teacher") | Some("선생님") => Role::Teacher,
            _ => Role::Student,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    /// Students carry their cohort birth year; teachers never do.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Remote-storage object key of the current photo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<String>,
    /// Resolved access URL for `photo_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Legacy inline-encoded fallback; kept readable, never written anew.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_data_url: Option<String>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.guardian_phone.is_none()
            && self.note.is_none()
            && self.photo_path.is_none()
            && self.photo_url.is_none()
            && self.photo_data_url.is_none()
    }
}

pub type WeekMarks = BTreeMap<String, bool>;

/// The in-memory shape the UI works against. The nested-by-cohort wire
/// shape exists only inside the codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalState {
    pub classes: Vec<Class>,
    pub people: Vec<Member>,
    /// week key -> member id -> present. A missing member id means
    /// "no record", which is distinct from an explicit `false`.
    pub attendance_by_week: BTreeMap<String, WeekMarks>,
    pub profiles: BTreeMap<String, Profile>,
}

impl CanonicalState {
    pub fn member(&self, member_id: &str) -> Option<&Member> {
        self.people.iter().find(|m| m.id == member_id)
    }

    pub fn class(&self, class_id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == class_id)
    }

    pub fn class_name_taken(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c.name == name)
    }

    /// Removes a member and cascades to its profile entry and to every
    /// week's marks. Weeks left with no other members stay behind as empty
    /// maps; the week itself is history, not member data.
    pub fn remove_member(&mut self, member_id: &str) -> bool {
        let before = self.people.len();
        self.people.retain(|m| m.id != member_id);
        if self.people.len() == before {
            return false;
        }
        self.profiles.remove(member_id);
        for marks in self.attendance_by_week.values_mut() {
            marks.remove(member_id);
        }
        true
    }

    /// Removes a class without touching its members; their assignment is
    /// cleared back to unassigned.
    pub fn remove_class(&mut self, class_id: &str) -> bool {
        let before = self.classes.len();
        self.classes.retain(|c| c.id != class_id);
        if self.classes.len() == before {
            return false;
        }
        for m in &mut self.people {
            if m.class_id.as_deref() == Some(class_id) {
                m.class_id = None;
            }
        }
        true
    }

    pub fn set_mark(&mut self, week_key: &str, member_id: &str, present: bool) {
        self.attendance_by_week
            .entry(week_key.to_string())
            .or_default()
            .insert(member_id.to_string(), present);
    }

    pub fn week_counts(&self, week_key: &str) -> (usize, usize) {
        let marks = self.attendance_by_week.get(week_key);
        let present = marks
            .map(|m| m.values().filter(|v| **v).count())
            .unwrap_or(0);
        let absent = marks
            .map(|m| m.values().filter(|v| !**v).count())
            .unwrap_or(0);
        (present, absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, role: Role) -> Member {
        Member {
            id: id.to_string(),
            name: format!("name-{}", id),
            role,
            class_id: None,
            birth_year: None,
        }
    }

    fn populated() -> CanonicalState {
        let mut s = CanonicalState::default();
        s.people.push(member("a", Role::Student));
        s.people.push(member("b", Role::Student));
        s.profiles.insert(
            "a".to_string(),
            Profile {
                phone: Some("010".to_string()),
                ..Profile::default()
            },
        );
        s.set_mark("attendance-2026-03-01", "a", true);
        s.set_mark("attendance-2026-03-01", "b", true);
        s.set_mark("attendance-2026-03-08", "a", false);
        s
    }

    #[test]
    fn remove_member_cascades_but_keeps_empty_weeks() {
        let mut s = populated();
        assert!(s.remove_member("a"));
        assert!(s.member("a").is_none());
        assert!(!s.profiles.contains_key("a"));

        let w1 = &s.attendance_by_week["attendance-2026-03-01"];
        assert!(!w1.contains_key("a"));
        assert_eq!(w1.get("b"), Some(&true));

        // The second week held only the removed member; it survives empty.
        let w2 = &s.attendance_by_week["attendance-2026-03-08"];
        assert!(w2.is_empty());
        assert_eq!(s.attendance_by_week.len(), 2);
    }

    #[test]
    fn remove_member_is_a_noop_for_unknown_ids() {
        let mut s = populated();
        assert!(!s.remove_member("zzz"));
        assert_eq!(s.people.len(), 2);
    }

    #[test]
    fn remove_class_clears_assignments() {
        let mut s = populated();
        s.classes.push(Class {
            id: "c1".to_string(),
            name: "사랑반".to_string(),
        });
        s.people[0].class_id = Some("c1".to_string());
        assert!(s.remove_class("c1"));
        assert!(s.classes.is_empty());
        assert_eq!(s.people[0].class_id, None);
    }

    #[test]
    fn week_counts_distinguish_absent_from_unrecorded() {
        let s = populated();
        let (present, absent) = s.week_counts("attendance-2026-03-01");
        assert_eq!((present, absent), (2, 0));
        let (present, absent) = s.week_counts("attendance-2026-03-08");
        assert_eq!((present, absent), (0, 1));
        assert_eq!(s.week_counts("attendance-2026-04-05"), (0, 0));
    }

    #[test]
    fn role_parse_accepts_legacy_labels_and_defaults_to_student() {
        assert_eq!(Role::parse(Some("teacher")), Role::Teacher);
        assert_eq!(Role::parse(Some("선생님")), Role::Teacher);
        assert_eq!(Role::parse(Some("학생")), Role::Student);
        assert_eq!(Role::parse(Some("whatever")), Role::Student);
        assert_eq!(Role::parse(None), Role::Student);
    }
}
