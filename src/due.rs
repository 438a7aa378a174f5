//! Decides whether a task's notification date has arrived.
//!
//! A task may carry several candidate dates (the primary notification field
//! plus configured override fields). Each candidate is parsed with a fixed
//! list of layouts, the earliest parsed instant wins, and the task is due when
//! that instant falls inside `[now - 5min, now]`.
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::config::Udas;
use crate::model::Task;

/// Layouts without an offset; interpreted as local wall-clock time.
const NAIVE_LAYOUTS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Taskwarrior's compact export format, always UTC.
const COMPACT_UTC_LAYOUT: &str = "%Y%m%dT%H%M%SZ";

/// How far back a missed notification is still delivered.
pub fn due_window() -> Duration {
    Duration::minutes(5)
}

/// Parse a date string in any accepted layout and return it in local time.
///
/// Strings without an offset are local wall-clock time, not UTC. Only RFC3339
/// and the compact `...Z` form carry their own zone.
pub fn parse_notification_date(raw: &str) -> Option<DateTime<Local>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Local.from_local_datetime(&naive).earliest();
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, COMPACT_UTC_LAYOUT) {
        return Some(Utc.from_utc_datetime(&naive).with_timezone(&Local));
    }
    None
}

/// A task attribute that may hold a notification date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateField {
    NotificationDate,
    Due,
    Uda(String),
}

impl DateField {
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "notification_date" => DateField::NotificationDate,
            "due" => DateField::Due,
            other => DateField::Uda(other.to_string()),
        }
    }

    /// Attribute name as understood by `task modify`.
    pub fn name(&self) -> &str {
        match self {
            DateField::NotificationDate => "notification_date",
            DateField::Due => "due",
            DateField::Uda(name) => name,
        }
    }

    pub fn read<'t>(&self, task: &'t Task) -> Option<&'t str> {
        let value = match self {
            DateField::NotificationDate => task.notification_date.as_deref(),
            DateField::Due => task.due.as_deref(),
            DateField::Uda(name) => task.extra_str(name),
        }?;
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// The primary date field plus overrides, resolved once from config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSources {
    primary: DateField,
    overrides: Vec<DateField>,
}

impl Default for DateSources {
    fn default() -> Self {
        Self {
            primary: DateField::NotificationDate,
            overrides: Vec::new(),
        }
    }
}

impl DateSources {
    pub fn new(primary: DateField, overrides: Vec<DateField>) -> Self {
        Self { primary, overrides }
    }

    pub fn from_config(udas: &Udas) -> Self {
        Self::new(
            DateField::from_name(&udas.notification_date),
            udas.overrides.iter().map(|n| DateField::from_name(n)).collect(),
        )
    }

    pub fn primary(&self) -> &DateField {
        &self.primary
    }

    /// Non-empty candidate strings, primary first.
    pub fn candidates<'t>(&self, task: &'t Task) -> Vec<&'t str> {
        std::iter::once(&self.primary)
            .chain(self.overrides.iter())
            .filter_map(|field| field.read(task))
            .collect()
    }
}

/// The winning candidate: parsed instant plus the string it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub instant: DateTime<Local>,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotDueReason {
    Future,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Due(Resolved),
    NotDue(Resolved, NotDueReason),
    NoDate,
}

/// Identity of one delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub uuid: String,
    pub date: String,
}

impl DedupKey {
    pub fn new(task: &Task, resolved: &Resolved) -> Self {
        Self {
            uuid: task.uuid.clone(),
            date: resolved.raw.clone(),
        }
    }
}

/// Earliest parseable candidate date for `task`.
pub fn resolve(task: &Task, sources: &DateSources) -> Option<Resolved> {
    let mut best: Option<Resolved> = None;
    for raw in sources.candidates(task) {
        let Some(instant) = parse_notification_date(raw) else {
            debug!(uuid = %task.uuid, value = raw, "dropping unparseable notification date");
            continue;
        };
        if best.as_ref().map_or(true, |b| instant < b.instant) {
            best = Some(Resolved {
                instant,
                raw: raw.to_string(),
            });
        }
    }
    best
}

/// Classify `task` against `now`. The window is inclusive on both ends.
pub fn evaluate(task: &Task, now: DateTime<Local>, sources: &DateSources) -> Evaluation {
    let Some(resolved) = resolve(task, sources) else {
        return Evaluation::NoDate;
    };
    if resolved.instant > now {
        Evaluation::NotDue(resolved, NotDueReason::Future)
    } else if resolved.instant < now - due_window() {
        Evaluation::NotDue(resolved, NotDueReason::Expired)
    } else {
        Evaluation::Due(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, SecondsFormat, Timelike};

    fn task_with_date(date: &str) -> Task {
        let mut task = Task::new(1, "u1", "t1");
        task.notification_date = Some(date.to_string());
        task
    }

    fn rfc3339(dt: DateTime<Local>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    fn now_secs() -> DateTime<Local> {
        // RFC3339 strings below carry whole seconds only.
        Local::now().with_nanosecond(0).unwrap()
    }

    #[test]
    fn parses_every_accepted_layout() {
        let utc = parse_notification_date("2025-08-31T14:30:00Z").unwrap();
        assert_eq!(utc.with_timezone(&Utc).hour(), 14);

        let compact = parse_notification_date("20250831T143000Z").unwrap();
        assert_eq!(compact, utc);

        for local in [
            "2025-08-31T14:30:00",
            "2025-08-31 14:30:00",
            "2025-08-31 14:30",
        ] {
            let parsed = parse_notification_date(local).unwrap();
            assert_eq!(
                (parsed.year(), parsed.month(), parsed.day(), parsed.hour(), parsed.minute()),
                (2025, 8, 31, 14, 30),
                "layout {local}"
            );
        }
    }

    #[test]
    fn naive_strings_are_local_wall_clock() {
        let expected = Local.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).earliest().unwrap();
        assert_eq!(parse_notification_date("2025-01-15 09:00"), Some(expected));
        assert_eq!(parse_notification_date("2025-01-15T09:00:00"), Some(expected));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_notification_date("not-a-date").is_none());
        assert!(parse_notification_date("").is_none());
        assert!(parse_notification_date("2025-13-40 10:00").is_none());
    }

    #[test]
    fn no_parseable_candidate_is_no_date() {
        let sources = DateSources::default();
        assert_eq!(evaluate(&Task::new(1, "u1", "t"), Local::now(), &sources), Evaluation::NoDate);
        assert_eq!(evaluate(&task_with_date("soon"), Local::now(), &sources), Evaluation::NoDate);
        assert_eq!(evaluate(&task_with_date("   "), Local::now(), &sources), Evaluation::NoDate);
    }

    #[test]
    fn future_is_not_due() {
        let now = now_secs();
        let task = task_with_date(&rfc3339(now + Duration::seconds(1)));
        assert!(matches!(
            evaluate(&task, now, &DateSources::default()),
            Evaluation::NotDue(_, NotDueReason::Future)
        ));
    }

    #[test]
    fn older_than_window_is_expired() {
        let now = now_secs();
        let task = task_with_date(&rfc3339(now - due_window() - Duration::seconds(1)));
        assert!(matches!(
            evaluate(&task, now, &DateSources::default()),
            Evaluation::NotDue(_, NotDueReason::Expired)
        ));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = now_secs();
        for instant in [now, now - Duration::minutes(1), now - due_window()] {
            let raw = rfc3339(instant);
            let task = task_with_date(&raw);
            match evaluate(&task, now, &DateSources::default()) {
                Evaluation::Due(resolved) => {
                    assert_eq!(resolved.instant, instant);
                    assert_eq!(resolved.raw, raw);
                }
                other => panic!("expected due for {raw}, got {other:?}"),
            }
        }
    }

    #[test]
    fn earliest_candidate_wins_and_bad_candidates_are_dropped() {
        let now = now_secs();
        let mut task = task_with_date(&rfc3339(now - Duration::minutes(1)));
        let earlier = rfc3339(now - Duration::minutes(3));
        task.extra.insert("remind_early".into(), earlier.clone().into());
        task.extra.insert("broken".into(), "yesterday-ish".into());
        let sources = DateSources::new(
            DateField::NotificationDate,
            vec![DateField::from_name("broken"), DateField::from_name("remind_early")],
        );

        match evaluate(&task, now, &sources) {
            Evaluation::Due(resolved) => assert_eq!(resolved.raw, earlier),
            other => panic!("expected due, got {other:?}"),
        }
    }

    #[test]
    fn override_alone_can_make_task_due() {
        let now = now_secs();
        let mut task = Task::new(4, "u4", "t");
        task.due = Some(rfc3339(now - Duration::seconds(30)));
        let sources = DateSources::new(DateField::NotificationDate, vec![DateField::Due]);
        assert!(matches!(evaluate(&task, now, &sources), Evaluation::Due(_)));
    }

    #[test]
    fn dedup_key_tracks_date_string() {
        let now = now_secs();
        let task = task_with_date(&rfc3339(now));
        let Some(resolved) = resolve(&task, &DateSources::default()) else {
            panic!("expected resolved date");
        };
        let first = DedupKey::new(&task, &resolved);

        let moved = task_with_date(&rfc3339(now - Duration::seconds(10)));
        let Some(moved_resolved) = resolve(&moved, &DateSources::default()) else {
            panic!("expected resolved date");
        };
        let second = DedupKey::new(&moved, &moved_resolved);

        assert_eq!(first.uuid, second.uuid);
        assert_ne!(first, second);
    }

    #[test]
    fn field_names_map_to_accessors() {
        assert_eq!(DateField::from_name("notification_date"), DateField::NotificationDate);
        assert_eq!(DateField::from_name("due"), DateField::Due);
        assert_eq!(DateField::from_name("nudge"), DateField::Uda("nudge".into()));
        assert_eq!(DateField::from_name("nudge").name(), "nudge");
    }
}
