//! Conflict detection and free-slot search over a calendar source.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CalendarError, CalendarResult};
use crate::event::{CalendarEvent, ConflictResult};
use crate::recurrence::expand_rule;
use crate::slot::{TimeRange, TimeSlot, merge_slots};
use crate::source::CalendarSource;
use crate::timezone::guess_timezone;

/// How far around a rejected candidate to look for alternatives.
const ALTERNATIVE_WINDOW_DAYS: i64 = 7;

/// Checks candidate events against existing ones and proposes openings.
///
/// The engine holds no mutable state and can be shared between tasks. It only
/// waits on the calendar source. Dropping a returned future abandons the
/// in-flight fetch without producing a partial result.
#[derive(Clone)]
pub struct ConflictEngine {
    source: Arc<dyn CalendarSource>,
    reference_tz: Tz,
    respect_working_hours: bool,
}

impl ConflictEngine {
    /// Create an engine over `source`, expanding recurrences in UTC.
    pub fn new(source: Arc<dyn CalendarSource>) -> Self {
        Self {
            source,
            reference_tz: Tz::UTC,
            respect_working_hours: false,
        }
    }

    /// Zone used for recurrence wall-clock stepping and all-day dates.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.reference_tz = tz;
        self
    }

    /// Like [`with_timezone`](Self::with_timezone), resolving an IANA name or
    /// a common abbreviation such as `EST`.
    pub fn with_timezone_name(self, name: &str) -> CalendarResult<Self> {
        let tz = guess_timezone(name)
            .ok_or_else(|| CalendarError::UnknownTimezone(name.to_string()))?;
        Ok(self.with_timezone(tz))
    }

    /// Drop alternative slots that fall outside the attendees' working hours.
    pub fn with_working_hours(mut self, enabled: bool) -> Self {
        self.respect_working_hours = enabled;
        self
    }

    pub fn source(&self) -> &Arc<dyn CalendarSource> {
        &self.source
    }

    pub fn timezone(&self) -> Tz {
        self.reference_tz
    }

    /// Check `event` against the existing events of `attendees`.
    ///
    /// The first overlapping event in source order wins. On conflict the
    /// result carries openings of the same length found within a week on
    /// either side of the candidate.
    pub async fn check_conflicts(
        &self,
        event: &CalendarEvent,
        attendees: &BTreeSet<String>,
    ) -> CalendarResult<ConflictResult> {
        let range = TimeRange::window(event.start_time, event.end_time);
        range.validate()?;
        let range = if event.is_all_day {
            let days = self.day_span(event.slot());
            TimeRange::window(days.start, days.end)
        } else {
            range
        };
        let existing = self.source.get_events(range, attendees).await?;

        for other in existing {
            if !event.id.is_empty() && other.id == event.id {
                continue;
            }
            if self.overlaps(event, &other)? {
                tracing::debug!("Event '{}' conflicts with {}", event.title, other.id);
                let alternatives = self.find_alternatives(event, &other).await?;
                return Ok(ConflictResult::conflict(other, alternatives));
            }
        }

        Ok(ConflictResult::clear())
    }

    /// Whether two events share any moment.
    ///
    /// Recurring events are expanded over the union of both events' ranges.
    /// When either side is all-day both sides are compared by calendar date.
    pub fn overlaps(&self, a: &CalendarEvent, b: &CalendarEvent) -> CalendarResult<bool> {
        let until = a.end_time.max(b.end_time);
        let by_date = a.is_all_day || b.is_all_day;

        let widen = |slots: Vec<TimeSlot>| -> Vec<TimeSlot> {
            if by_date {
                slots.into_iter().map(|s| self.day_span(s)).collect()
            } else {
                slots
            }
        };
        let left = widen(self.occurrences(a, until)?);
        let right = widen(self.occurrences(b, until)?);

        Ok(left.iter().any(|x| right.iter().any(|y| x.overlaps(y))))
    }

    /// Openings of `range.duration` between the busy periods of `attendees`.
    ///
    /// The scan emits at most one slot per gap, starting at the cursor.
    pub async fn find_available_slots(
        &self,
        range: TimeRange,
        attendees: &BTreeSet<String>,
    ) -> CalendarResult<Vec<TimeSlot>> {
        range.validate_for_search()?;
        let busy = merge_slots(self.get_busy_periods(range, attendees).await?);

        let mut slots = Vec::new();
        let mut cursor = range.start_time;
        for period in &busy {
            let gap_end = period.start.min(range.end_time);
            if gap_end - cursor >= range.duration {
                slots.push(TimeSlot::starting_at(cursor, range.duration));
            }
            cursor = cursor.max(period.end);
        }
        if range.end_time - cursor >= range.duration {
            slots.push(TimeSlot::starting_at(cursor, range.duration));
        }

        Ok(slots)
    }

    /// Intervals during which `attendees` are unavailable within `range`.
    pub async fn get_busy_periods(
        &self,
        range: TimeRange,
        attendees: &BTreeSet<String>,
    ) -> CalendarResult<Vec<TimeSlot>> {
        range.validate()?;
        let events = self.source.get_events(range, attendees).await?;
        let window = range.as_slot();

        let mut busy = Vec::new();
        for event in &events {
            let occurrences = self.occurrences(event, range.end_time)?;
            busy.extend(
                occurrences
                    .into_iter()
                    .map(|s| if event.is_all_day { self.day_span(s) } else { s })
                    .filter(|s| s.overlaps(&window)),
            );
        }

        busy.sort_by_key(|s| s.start);
        Ok(busy)
    }

    /// The event's own interval, or its expansion from its start up to `until`.
    fn occurrences(
        &self,
        event: &CalendarEvent,
        until: DateTime<Utc>,
    ) -> CalendarResult<Vec<TimeSlot>> {
        let Some(rule) = event.recurrence() else {
            return Ok(vec![event.slot()]);
        };

        let start = event.start_time.with_timezone(&self.reference_tz);
        let end = until.with_timezone(&self.reference_tz);
        expand_rule(rule, &start, &end, event.duration())
    }

    async fn find_alternatives(
        &self,
        candidate: &CalendarEvent,
        conflicting: &CalendarEvent,
    ) -> CalendarResult<Vec<TimeSlot>> {
        let duration = candidate.duration();
        if duration <= Duration::zero() {
            return Ok(Vec::new());
        }

        let window = Duration::days(ALTERNATIVE_WINDOW_DAYS);
        let range = TimeRange::search(
            candidate.start_time - window,
            candidate.start_time + window,
            duration,
        );
        let slots = self
            .find_available_slots(range, &conflicting.attendees)
            .await?;

        if !self.respect_working_hours {
            return Ok(slots);
        }

        let hours = self
            .source
            .get_working_hours(&conflicting.attendees)
            .await?;
        Ok(slots
            .into_iter()
            .filter(|slot| hours.values().all(|h| h.covers(slot)))
            .collect())
    }

    /// Midnight-to-midnight span of the dates `slot` touches. An end at exactly
    /// midnight does not touch the following date.
    fn day_span(&self, slot: TimeSlot) -> TimeSlot {
        let first = slot.start.with_timezone(&self.reference_tz).date_naive();
        let last_instant = if slot.end > slot.start {
            slot.end - Duration::nanoseconds(1)
        } else {
            slot.end
        };
        let last = last_instant.with_timezone(&self.reference_tz).date_naive();
        let next = last.succ_opt().unwrap_or(last);

        TimeSlot::new(self.midnight(first), self.midnight(next))
    }

    fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        // Some zones skip midnight on DST days; the day then starts an hour later.
        self.reference_tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                self.reference_tz
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| local.and_utc())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::error::CalendarError;
    use crate::event::WorkingHours;
    use crate::source::{MemoryCalendar, SourceFuture};
    use chrono::Weekday;
    use std::collections::HashMap;

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, min, 0).unwrap()
    }

    fn people(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn engine(calendar: MemoryCalendar) -> ConflictEngine {
        ConflictEngine::new(Arc::new(calendar))
    }

    #[tokio::test]
    async fn daily_recurring_events_conflict_with_alternatives() -> Result<(), Box<dyn std::error::Error>> {
        let b = CalendarEvent::new("b", "Sync", at(3, 9, 30), at(3, 10, 30))
            .with_attendees(["alice"])
            .with_recurrence("RRULE:FREQ=DAILY");
        let engine = engine(MemoryCalendar::new().with_events([b]));

        let a = CalendarEvent::new("a", "Standup", at(3, 9, 0), at(3, 10, 0))
            .with_attendees(["alice"])
            .with_recurrence("RRULE:FREQ=DAILY");
        let result = engine.check_conflicts(&a, &people(&["alice"])).await?;

        assert!(result.has_conflict);
        assert_eq!(result.conflicting_event.map(|e| e.id), Some("b".to_string()));
        assert!(!result.alternatives.is_empty());
        for slot in &result.alternatives {
            assert_eq!(slot.duration(), Duration::hours(1));
        }
        Ok(())
    }

    #[tokio::test]
    async fn clear_when_nothing_overlaps() -> Result<(), Box<dyn std::error::Error>> {
        let before = CalendarEvent::new("x", "Earlier", at(3, 8, 0), at(3, 9, 0));
        let engine = engine(MemoryCalendar::new().with_events([before]));

        let candidate = CalendarEvent::new("c", "Touching", at(3, 9, 0), at(3, 10, 0));
        let result = engine.check_conflicts(&candidate, &BTreeSet::new()).await?;
        assert_eq!(result, ConflictResult::clear());
        Ok(())
    }

    #[tokio::test]
    async fn skips_the_event_being_checked() -> Result<(), Box<dyn std::error::Error>> {
        let event = CalendarEvent::new("same", "Planning", at(4, 9, 0), at(4, 10, 0));
        let engine = engine(MemoryCalendar::new().with_events([event.clone()]));

        let result = engine.check_conflicts(&event, &BTreeSet::new()).await?;
        assert!(!result.has_conflict);
        Ok(())
    }

    #[test]
    fn overlap_is_symmetric() -> Result<(), Box<dyn std::error::Error>> {
        let engine = engine(MemoryCalendar::new());
        let events = [
            CalendarEvent::new("1", "Plain", at(3, 9, 0), at(3, 10, 0)),
            CalendarEvent::new("2", "Adjacent", at(3, 10, 0), at(3, 11, 0)),
            CalendarEvent::new("3", "Offsite", at(5, 0, 0), at(6, 0, 0)).all_day(),
            CalendarEvent::new("4", "Late", at(5, 22, 0), at(5, 23, 0)),
            CalendarEvent::new("5", "Alternate days", at(1, 9, 30), at(1, 10, 0))
                .with_recurrence("RRULE:FREQ=DAILY;INTERVAL=2"),
            CalendarEvent::new("6", "Evening", at(6, 18, 0), at(6, 19, 0)),
        ];

        for a in &events {
            for b in &events {
                assert_eq!(
                    engine.overlaps(a, b)?,
                    engine.overlaps(b, a)?,
                    "{} vs {}",
                    a.title,
                    b.title
                );
            }
        }

        // Day 1, 3, 5 at 09:30 reach the plain 09:00 event on day 3.
        assert!(engine.overlaps(&events[0], &events[4])?);
        assert!(!engine.overlaps(&events[0], &events[1])?);
        assert!(engine.overlaps(&events[2], &events[3])?);
        assert!(!engine.overlaps(&events[2], &events[5])?);
        Ok(())
    }

    #[test]
    fn all_day_compares_dates_in_reference_zone() -> Result<(), Box<dyn std::error::Error>> {
        let engine = engine(MemoryCalendar::new()).with_timezone(chrono_tz::Asia::Tokyo);
        // 2025-03-05 in Tokyo runs from 03-04 15:00 to 03-05 15:00 UTC.
        let holiday = CalendarEvent::new("h", "Holiday", at(4, 15, 0), at(5, 15, 0)).all_day();
        let morning = CalendarEvent::new("m", "Call", at(4, 16, 0), at(4, 17, 0));
        let previous_day = CalendarEvent::new("p", "Call", at(4, 14, 0), at(4, 14, 30));

        assert!(engine.overlaps(&holiday, &morning)?);
        assert!(!engine.overlaps(&holiday, &previous_day)?);
        Ok(())
    }

    #[test]
    fn timezone_names_and_abbreviations_set_reference_zone() -> Result<(), Box<dyn std::error::Error>> {
        let engine = engine(MemoryCalendar::new()).with_timezone_name("JST")?;
        assert_eq!(engine.timezone(), chrono_tz::Asia::Tokyo);

        // Same all-day comparison as above, configured by abbreviation.
        let holiday = CalendarEvent::new("h", "Holiday", at(4, 15, 0), at(5, 15, 0)).all_day();
        let morning = CalendarEvent::new("m", "Call", at(4, 16, 0), at(4, 17, 0));
        assert!(engine.overlaps(&holiday, &morning)?);

        let engine = engine.with_timezone_name("Europe/Berlin")?;
        assert_eq!(engine.timezone(), chrono_tz::Europe::Berlin);

        assert!(matches!(
            engine.with_timezone_name("Mars/Olympus"),
            Err(CalendarError::UnknownTimezone(_))
        ));
        Ok(())
    }

    #[test]
    fn malformed_rule_is_an_error() {
        let engine = engine(MemoryCalendar::new());
        let bad = CalendarEvent::new("b", "Bad", at(3, 9, 0), at(3, 10, 0))
            .with_recurrence("FREQ=DAILY");
        let plain = CalendarEvent::new("p", "Plain", at(3, 9, 0), at(3, 10, 0));
        assert!(matches!(
            engine.overlaps(&plain, &bad),
            Err(CalendarError::MalformedRule(_))
        ));
    }

    #[tokio::test]
    async fn gap_scan_emits_one_slot_per_gap() -> Result<(), Box<dyn std::error::Error>> {
        let t0 = at(10, 8, 0);
        let busy = CalendarEvent::new(
            "busy",
            "Review",
            t0 + Duration::hours(2),
            t0 + Duration::hours(3),
        );
        let engine = engine(MemoryCalendar::new().with_events([busy]));

        let range = TimeRange::search(t0, t0 + Duration::hours(6), Duration::hours(1));
        let slots = engine.find_available_slots(range, &BTreeSet::new()).await?;

        assert_eq!(
            slots,
            vec![
                TimeSlot::starting_at(t0, Duration::hours(1)),
                TimeSlot::starting_at(t0 + Duration::hours(3), Duration::hours(1)),
            ]
        );

        let periods = merge_slots(engine.get_busy_periods(range, &BTreeSet::new()).await?);
        for slot in &slots {
            assert_eq!(slot.duration(), Duration::hours(1));
            assert!(periods.iter().all(|p| !p.overlaps(slot)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn busy_periods_expand_recurring_and_all_day() -> Result<(), Box<dyn std::error::Error>> {
        let calendar = MemoryCalendar::new().with_events([
            CalendarEvent::new("r", "Standup", at(1, 9, 0), at(1, 9, 15))
                .with_recurrence("RRULE:FREQ=DAILY"),
            CalendarEvent::new("d", "Offsite", at(11, 13, 0), at(11, 14, 0)).all_day(),
        ]);
        let engine = engine(calendar);

        let range = TimeRange::window(at(10, 0, 0), at(12, 0, 0));
        let busy = engine.get_busy_periods(range, &BTreeSet::new()).await?;

        assert_eq!(
            busy,
            vec![
                TimeSlot::new(at(10, 9, 0), at(10, 9, 15)),
                TimeSlot::new(at(11, 0, 0), at(12, 0, 0)),
                TimeSlot::new(at(11, 9, 0), at(11, 9, 15)),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn source_failure_aborts_without_result() {
        let calendar = MemoryCalendar::new();
        calendar.set_outage(Some("timeout talking to calendar".into()));
        let engine = engine(calendar);

        let candidate = CalendarEvent::new("c", "Planning", at(3, 9, 0), at(3, 10, 0));
        let result = engine.check_conflicts(&candidate, &BTreeSet::new()).await;
        assert!(matches!(result, Err(CalendarError::SourceUnavailable(_))));

        let range = TimeRange::search(at(3, 8, 0), at(3, 18, 0), Duration::hours(1));
        let result = engine.find_available_slots(range, &BTreeSet::new()).await;
        assert!(matches!(result, Err(CalendarError::SourceUnavailable(_))));
    }

    struct StalledCalendar;

    impl CalendarSource for StalledCalendar {
        fn get_events<'a>(
            &'a self,
            _range: TimeRange,
            _attendees: &'a BTreeSet<String>,
        ) -> SourceFuture<'a, Vec<CalendarEvent>> {
            Box::pin(std::future::pending::<CalendarResult<Vec<CalendarEvent>>>())
        }

        fn create_event(&self, event: CalendarEvent) -> SourceFuture<'_, CalendarEvent> {
            Box::pin(async move { Ok::<_, CalendarError>(event) })
        }

        fn update_event(&self, event: CalendarEvent) -> SourceFuture<'_, CalendarEvent> {
            Box::pin(async move { Ok::<_, CalendarError>(event) })
        }

        fn delete_event<'a>(&'a self, _event_id: &'a str) -> SourceFuture<'a, ()> {
            Box::pin(async { Ok::<_, CalendarError>(()) })
        }

        fn get_working_hours<'a>(
            &'a self,
            _attendees: &'a BTreeSet<String>,
        ) -> SourceFuture<'a, HashMap<String, WorkingHours>> {
            Box::pin(async { Ok::<_, CalendarError>(HashMap::new()) })
        }
    }

    #[tokio::test]
    async fn caller_timeout_cancels_check() {
        let engine = ConflictEngine::new(Arc::new(StalledCalendar));
        let candidate = CalendarEvent::new("c", "Planning", at(3, 9, 0), at(3, 10, 0));

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            engine.check_conflicts(&candidate, &BTreeSet::new()),
        )
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn working_hours_filter_alternatives() -> Result<(), Box<dyn std::error::Error>> {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        let weekdays = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ];
        let hours = WorkingHours::new(Tz::UTC).with_days(&weekdays, nine, five);
        let existing = CalendarEvent::new("e", "Busy", at(12, 10, 0), at(12, 11, 0))
            .with_attendees(["bob"]);
        let calendar = MemoryCalendar::new()
            .with_events([existing])
            .with_working_hours("bob", hours.clone());

        let candidate = CalendarEvent::new("c", "Sync", at(12, 10, 0), at(12, 11, 0))
            .with_attendees(["bob"]);

        let checker = engine(calendar).with_working_hours(true);
        let result = checker.check_conflicts(&candidate, &people(&["bob"])).await?;
        assert!(result.has_conflict);
        assert!(!result.alternatives.is_empty());
        assert!(result.alternatives.iter().all(|slot| hours.covers(slot)));
        Ok(())
    }
}
