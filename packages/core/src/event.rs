//! Calendar event types read by the conflict engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::slot::TimeSlot;

/// An event owned by the external calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default)]
    pub attendees: BTreeSet<String>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub is_recurring: bool,
    /// Rule string in `RRULE:` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_rule: Option<String>,
}

impl CalendarEvent {
    /// Create a single, timed event.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start_time,
            end_time,
            location: String::new(),
            attendees: BTreeSet::new(),
            is_all_day: false,
            is_recurring: false,
            recurrence_rule: None,
        }
    }

    /// Set the attendees.
    pub fn with_attendees<I, S>(mut self, attendees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attendees = attendees.into_iter().map(Into::into).collect();
        self
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Mark the event as all-day.
    pub fn all_day(mut self) -> Self {
        self.is_all_day = true;
        self
    }

    /// Attach a recurrence rule and mark the event recurring.
    pub fn with_recurrence(mut self, rule: impl Into<String>) -> Self {
        self.is_recurring = true;
        self.recurrence_rule = Some(rule.into());
        self
    }

    /// The rule to expand, if this event actually recurs.
    pub fn recurrence(&self) -> Option<&str> {
        if !self.is_recurring {
            return None;
        }
        self.recurrence_rule
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// The event's own interval.
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }

    /// Whether any attendee is shared with `others`. Empty sets match everyone.
    pub fn involves_any(&self, others: &BTreeSet<String>) -> bool {
        others.is_empty() || self.attendees.is_empty() || !self.attendees.is_disjoint(others)
    }
}

/// Outcome of a conflict check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub has_conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_event: Option<CalendarEvent>,
    #[serde(default)]
    pub alternatives: Vec<TimeSlot>,
}

impl ConflictResult {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn conflict(event: CalendarEvent, alternatives: Vec<TimeSlot>) -> Self {
        Self {
            has_conflict: true,
            conflicting_event: Some(event),
            alternatives,
        }
    }
}

/// Working window on one weekday, in the owner's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingDay {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Weekly working schedule of one attendee.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingHours {
    pub timezone: Tz,
    pub days: Vec<WorkingDay>,
}

impl WorkingHours {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            days: Vec::new(),
        }
    }

    /// Add the same window for each of `weekdays`.
    pub fn with_days(mut self, weekdays: &[Weekday], start: NaiveTime, end: NaiveTime) -> Self {
        self.days.extend(
            weekdays
                .iter()
                .map(|&weekday| WorkingDay { weekday, start, end }),
        );
        self
    }

    /// Whether `slot` falls entirely inside one working window.
    pub fn covers(&self, slot: &TimeSlot) -> bool {
        let start = slot.start.with_timezone(&self.timezone);
        let end = slot.end.with_timezone(&self.timezone);
        if start.date_naive() != end.date_naive() {
            return false;
        }

        self.days.iter().any(|day| {
            day.weekday == start.weekday() && day.start <= start.time() && end.time() <= day.end
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use chrono::TimeZone;

    #[test]
    fn recurrence_requires_flag_and_rule() {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let plain = CalendarEvent::new("a", "Standup", start, start + Duration::minutes(15));
        assert_eq!(plain.recurrence(), None);

        let mut flagged_only = plain.clone();
        flagged_only.is_recurring = true;
        assert_eq!(flagged_only.recurrence(), None);

        let recurring = plain.with_recurrence("RRULE:FREQ=DAILY");
        assert_eq!(recurring.recurrence(), Some("RRULE:FREQ=DAILY"));
    }

    #[test]
    fn working_hours_cover_local_window() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        let hours = WorkingHours::new(chrono_tz::America::New_York).with_days(
            &[Weekday::Mon, Weekday::Tue],
            nine,
            five,
        );

        // Monday 2025-01-06 10:00 New York is 15:00 UTC.
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 15, 0, 0).unwrap();
        assert!(hours.covers(&TimeSlot::starting_at(start, Duration::hours(1))));
        assert!(!hours.covers(&TimeSlot::starting_at(start, Duration::hours(8))));

        // Same wall-clock time on Wednesday is outside the schedule.
        let wednesday = start + Duration::days(2);
        assert!(!hours.covers(&TimeSlot::starting_at(wednesday, Duration::hours(1))));
    }
}
