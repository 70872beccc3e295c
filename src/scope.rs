use chrono::{Datelike, Duration, NaiveDate};

/// Grade labels the resolver accepts. Anything else resolves to an empty
/// cohort year, which callers must treat as "no remote reads or writes".
pub const VALID_GRADES: [&str; 3] = ["1", "2", "3"];

/// A grade-1 member's birth year is the calendar year minus 16, grade 2
/// minus 17, grade 3 minus 18. Kept as one constant so the assumed
/// age-at-grade-1 offset is visible in exactly one place.
pub const COHORT_YEAR_OFFSET: i32 = 15;

pub const UNKNOWN_GROUP: &str = "unknown";

const WEEK_KEY_PREFIX: &str = "attendance-";

/// Partition key for everything persisted: which group, which birth-year
/// cohort. `cohort_year` may be empty (invalid grade), in which case the
/// scope is local-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub group_id: String,
    pub cohort_year: String,
}

impl Scope {
    /// Resolves a scope from a group id and grade label against a reference
    /// date. Computed fresh on every call: the same grade label maps to a
    /// different cohort year once the calendar year rolls over.
    pub fn resolve(group_id: Option<&str>, grade: &str, reference: NaiveDate) -> Scope {
        let group_id = match group_id.map(str::trim) {
            Some(g) if !g.is_empty() => g.to_string(),
            _ => UNKNOWN_GROUP.to_string(),
        };
        let cohort_year = cohort_year_for(grade, reference);
        Scope {
            group_id,
            cohort_year,
        }
    }

    pub fn has_cohort(&self) -> bool {
        !self.cohort_year.is_empty()
    }

    /// Remote document holding this scope's classes, students, attendance
    /// and profiles.
    pub fn cohort_path(&self, root: &str) -> String {
        format!(
            "{}/groups/{}/byBirthYear/{}",
            root, self.group_id, self.cohort_year
        )
    }

    /// Remote document holding the group's teachers. Teachers serve every
    /// grade, so they are stored once per group rather than per cohort.
    pub fn teachers_path(&self, root: &str) -> String {
        format!("{}/groups/{}/teachers", root, self.group_id)
    }
}

fn cohort_year_for(grade: &str, reference: NaiveDate) -> String {
    let grade = grade.trim();
    if !VALID_GRADES.contains(&grade) {
        return String::new();
    }
    let g: i32 = match grade.parse() {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    (reference.year() - (g + COHORT_YEAR_OFFSET)).to_string()
}

/// Most recent Sunday at or before the given date.
pub fn sunday_on_or_before(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_sunday() as i64;
    date - Duration::days(back)
}

/// Zero-padded YYYY-MM-DD, so string order equals date order.
pub fn format_date(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

/// Canonical week key for the week containing `date`. Lexicographic
/// comparison of week keys is chronological comparison.
pub fn week_key(date: NaiveDate) -> String {
    format!("{}{}", WEEK_KEY_PREFIX, format_date(sunday_on_or_before(date)))
}

pub fn is_week_key_for_year(key: &str, year: i32) -> bool {
    key.strip_prefix(WEEK_KEY_PREFIX)
        .map(|d| d.starts_with(&format!("{:04}-", year)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn grade_one_cohort_rolls_with_calendar_year() {
        let s26 = Scope::resolve(Some("g"), "1", d(2026, 5, 10));
        assert_eq!(s26.cohort_year, "2010");
        let s27 = Scope::resolve(Some("g"), "1", d(2027, 5, 10));
        assert_eq!(s27.cohort_year, "2011");
    }

    #[test]
    fn invalid_grade_yields_empty_cohort() {
        for bad in ["0", "4", "x", "", " 1 2"] {
            let s = Scope::resolve(Some("g"), bad, d(2026, 1, 1));
            assert!(!s.has_cohort(), "grade {:?} must not resolve", bad);
        }
    }

    #[test]
    fn missing_group_resolves_to_unknown_sentinel() {
        let s = Scope::resolve(None, "2", d(2026, 1, 1));
        assert_eq!(s.group_id, UNKNOWN_GROUP);
        assert_eq!(s.cohort_year, "2009");
        let s = Scope::resolve(Some("   "), "2", d(2026, 1, 1));
        assert_eq!(s.group_id, UNKNOWN_GROUP);
    }

    #[test]
    fn sunday_resolution() {
        // 2026-03-01 is a Sunday.
        assert_eq!(sunday_on_or_before(d(2026, 3, 1)), d(2026, 3, 1));
        assert_eq!(sunday_on_or_before(d(2026, 3, 4)), d(2026, 3, 1));
        assert_eq!(sunday_on_or_before(d(2026, 3, 7)), d(2026, 3, 1));
        assert_eq!(sunday_on_or_before(d(2026, 3, 8)), d(2026, 3, 8));
    }

    #[test]
    fn week_keys_order_lexicographically_across_years() {
        let a = week_key(d(2025, 12, 30));
        let b = week_key(d(2026, 1, 6));
        let c = week_key(d(2026, 11, 3));
        assert!(a < b && b < c);
        assert_eq!(week_key(d(2026, 3, 4)), "attendance-2026-03-01");
    }

    #[test]
    fn year_filter_matches_prefix_only() {
        assert!(is_week_key_for_year("attendance-2026-03-01", 2026));
        assert!(!is_week_key_for_year("attendance-2026-03-01", 2025));
        assert!(!is_week_key_for_year("garbage-2026-03-01", 2026));
    }

    #[test]
    fn remote_paths_embed_group_and_cohort() {
        let s = Scope::resolve(Some("grp-1"), "3", d(2026, 1, 1));
        assert_eq!(
            s.cohort_path("rollbook"),
            "rollbook/groups/grp-1/byBirthYear/2008"
        );
        assert_eq!(s.teachers_path("rollbook"), "rollbook/groups/grp-1/teachers");
    }
}
