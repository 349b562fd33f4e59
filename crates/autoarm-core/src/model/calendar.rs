// ── Calendar events ──
//
// Raw events as returned by a calendar source, before pattern matching.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time-windowed event from a calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(default)]
    pub uid: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn new(summary: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            uid: None,
            summary: summary.into(),
            description: None,
            start,
            end,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stable tracking id: `{calendar_id}:{uid}`, or a content hash when
    /// the source supplies no uid.
    pub fn tracking_id(&self, calendar_id: &str) -> String {
        match &self.uid {
            Some(uid) => format!("{calendar_id}:{uid}"),
            None => {
                let mut hasher = DefaultHasher::new();
                self.summary.hash(&mut hasher);
                self.description.hash(&mut hasher);
                self.start.hash(&mut hasher);
                self.end.hash(&mut hasher);
                format!("{calendar_id}:{:016x}", hasher.finish())
            }
        }
    }

    /// Whether `[start, end]` overlaps `[from, to]`.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start <= to && self.end >= from
    }
}

/// Published view of a calendar event, as seen by rules and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub calendar: String,
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub uid: Option<String>,
}

impl EventSummary {
    pub fn new(calendar: &str, event: &CalendarEvent) -> Self {
        Self {
            calendar: calendar.to_owned(),
            summary: event.summary.clone(),
            description: event.description.clone(),
            start: event.start,
            end: event.end,
            uid: event.uid.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event() -> CalendarEvent {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        CalendarEvent::new("Holiday in Malta", start, start + Duration::days(7))
    }

    #[test]
    fn tracking_id_prefers_uid() {
        let ev = event().with_uid("abc-123");
        assert_eq!(ev.tracking_id("calendar.house"), "calendar.house:abc-123");
    }

    #[test]
    fn tracking_id_hash_is_stable_and_content_sensitive() {
        let a = event();
        let b = event();
        assert_eq!(a.tracking_id("cal"), b.tracking_id("cal"));
        let c = event().with_description("family trip");
        assert_ne!(a.tracking_id("cal"), c.tracking_id("cal"));
        assert!(a.tracking_id("cal").starts_with("cal:"));
    }

    #[test]
    fn overlap_is_inclusive() {
        let ev = event();
        assert!(ev.overlaps(ev.end, ev.end + Duration::hours(1)));
        assert!(!ev.overlaps(ev.end + Duration::seconds(1), ev.end + Duration::hours(1)));
    }
}
