//! The calendar source seam and an in-memory implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use ulid::Ulid;

use crate::error::{CalendarError, CalendarResult};
use crate::event::{CalendarEvent, WorkingHours};
use crate::slot::TimeRange;

/// Future type returned by calendar sources.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = CalendarResult<T>> + Send + 'a>>;

/// External calendar backend.
///
/// Implementations return events of `attendees` that may intersect the
/// requested range. Recurring events are returned once, unexpanded, and the
/// caller expands them. An empty attendee set means every calendar.
pub trait CalendarSource: Send + Sync + 'static {
    fn get_events<'a>(
        &'a self,
        range: TimeRange,
        attendees: &'a BTreeSet<String>,
    ) -> SourceFuture<'a, Vec<CalendarEvent>>;

    /// Store a new event. An empty id is replaced with a fresh one.
    fn create_event(&self, event: CalendarEvent) -> SourceFuture<'_, CalendarEvent>;

    fn update_event(&self, event: CalendarEvent) -> SourceFuture<'_, CalendarEvent>;

    fn delete_event<'a>(&'a self, event_id: &'a str) -> SourceFuture<'a, ()>;

    /// Working schedules keyed by attendee. Attendees without one are absent.
    fn get_working_hours<'a>(
        &'a self,
        attendees: &'a BTreeSet<String>,
    ) -> SourceFuture<'a, HashMap<String, WorkingHours>>;
}

/// Calendar held in process memory.
///
/// Used by tests and by local runs that have no external calendar.
#[derive(Default)]
pub struct MemoryCalendar {
    events: RwLock<BTreeMap<String, CalendarEvent>>,
    working_hours: RwLock<HashMap<String, WorkingHours>>,
    outage: RwLock<Option<String>>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the calendar with events.
    pub fn with_events(self, events: impl IntoIterator<Item = CalendarEvent>) -> Self {
        if let Ok(mut map) = self.events.write() {
            map.extend(events.into_iter().map(|e| (e.id.clone(), e)));
        }
        self
    }

    pub fn with_working_hours(self, user_id: impl Into<String>, hours: WorkingHours) -> Self {
        if let Ok(mut map) = self.working_hours.write() {
            map.insert(user_id.into(), hours);
        }
        self
    }

    /// Make every call fail with `reason` until cleared with `None`.
    pub fn set_outage(&self, reason: Option<String>) {
        if let Ok(mut outage) = self.outage.write() {
            *outage = reason;
        }
    }

    /// Snapshot of all stored events.
    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> CalendarResult<()> {
        let outage = self.outage.read().map_err(poisoned)?;
        match outage.as_ref() {
            Some(reason) => Err(CalendarError::SourceUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn events_in(
        &self,
        range: TimeRange,
        attendees: &BTreeSet<String>,
    ) -> CalendarResult<Vec<CalendarEvent>> {
        self.check_available()?;
        let map = self.events.read().map_err(poisoned)?;
        Ok(map
            .values()
            .filter(|e| e.involves_any(attendees))
            .filter(|e| {
                let overlaps = e.start_time < range.end_time && e.end_time > range.start_time;
                // Recurring and all-day events may still reach into the range.
                let widened = (e.recurrence().is_some() || e.is_all_day)
                    && e.start_time <= range.end_time;
                overlaps || widened
            })
            .cloned()
            .collect())
    }

    fn insert(&self, mut event: CalendarEvent) -> CalendarResult<CalendarEvent> {
        self.check_available()?;
        if event.id.is_empty() {
            event.id = Ulid::new().to_string();
        }
        let mut map = self.events.write().map_err(poisoned)?;
        map.insert(event.id.clone(), event.clone());
        tracing::debug!("Created event {}", event.id);
        Ok(event)
    }

    fn replace(&self, event: CalendarEvent) -> CalendarResult<CalendarEvent> {
        self.check_available()?;
        let mut map = self.events.write().map_err(poisoned)?;
        match map.get_mut(&event.id) {
            Some(existing) => {
                *existing = event.clone();
                Ok(event)
            }
            None => Err(CalendarError::EventNotFound(event.id)),
        }
    }

    fn remove(&self, event_id: &str) -> CalendarResult<()> {
        self.check_available()?;
        let mut map = self.events.write().map_err(poisoned)?;
        map.remove(event_id)
            .map(|_| ())
            .ok_or_else(|| CalendarError::EventNotFound(event_id.to_string()))
    }

    fn hours_for(
        &self,
        attendees: &BTreeSet<String>,
    ) -> CalendarResult<HashMap<String, WorkingHours>> {
        self.check_available()?;
        let map = self.working_hours.read().map_err(poisoned)?;
        Ok(attendees
            .iter()
            .filter_map(|a| map.get(a).map(|h| (a.clone(), h.clone())))
            .collect())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> CalendarError {
    CalendarError::SourceUnavailable("memory calendar lock poisoned".into())
}

impl CalendarSource for MemoryCalendar {
    fn get_events<'a>(
        &'a self,
        range: TimeRange,
        attendees: &'a BTreeSet<String>,
    ) -> SourceFuture<'a, Vec<CalendarEvent>> {
        let result = self.events_in(range, attendees);
        Box::pin(async move { result })
    }

    fn create_event(&self, event: CalendarEvent) -> SourceFuture<'_, CalendarEvent> {
        let result = self.insert(event);
        Box::pin(async move { result })
    }

    fn update_event(&self, event: CalendarEvent) -> SourceFuture<'_, CalendarEvent> {
        let result = self.replace(event);
        Box::pin(async move { result })
    }

    fn delete_event<'a>(&'a self, event_id: &'a str) -> SourceFuture<'a, ()> {
        let result = self.remove(event_id);
        Box::pin(async move { result })
    }

    fn get_working_hours<'a>(
        &'a self,
        attendees: &'a BTreeSet<String>,
    ) -> SourceFuture<'a, HashMap<String, WorkingHours>> {
        let result = self.hours_for(attendees);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn create_update_delete_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let calendar = MemoryCalendar::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();

        let created = calendar
            .create_event(CalendarEvent::new("", "Review", start, start + Duration::hours(1)))
            .await?;
        assert!(!created.id.is_empty());

        let mut moved = created.clone();
        moved.start_time = start + Duration::hours(2);
        moved.end_time = start + Duration::hours(3);
        calendar.update_event(moved).await?;

        let day = TimeRange::window(start, start + Duration::days(1));
        let everyone = BTreeSet::new();
        let events = calendar.get_events(day, &everyone).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_time, start + Duration::hours(2));

        calendar.delete_event(&created.id).await?;
        assert!(calendar.get_events(day, &everyone).await?.is_empty());
        assert!(matches!(
            calendar.delete_event(&created.id).await,
            Err(CalendarError::EventNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let calendar = MemoryCalendar::new();
        calendar.set_outage(Some("backend down".into()));

        let now = Utc::now();
        let everyone = BTreeSet::new();
        let result = calendar.get_events(TimeRange::window(now, now), &everyone).await;
        assert!(matches!(result, Err(CalendarError::SourceUnavailable(_))));

        calendar.set_outage(None);
        assert!(calendar.get_events(TimeRange::window(now, now), &everyone).await.is_ok());
    }

    #[tokio::test]
    async fn filters_by_attendee() -> Result<(), Box<dyn std::error::Error>> {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let end = start + Duration::hours(1);
        let calendar = MemoryCalendar::new().with_events([
            CalendarEvent::new("a", "Alice only", start, end).with_attendees(["alice"]),
            CalendarEvent::new("b", "Bob only", start, end).with_attendees(["bob"]),
        ]);

        let alice: BTreeSet<String> = ["alice".to_string()].into();
        let events = calendar
            .get_events(TimeRange::window(start, end), &alice)
            .await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "a");
        Ok(())
    }
}
