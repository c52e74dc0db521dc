//! Time slot and time range value types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalendarError, CalendarResult};

/// A half-open interval `[start, end)` of time.
///
/// Slots built from events satisfy `start < end`. A zero-length slot is
/// accepted as an instant: it overlaps a slot that strictly contains it and
/// merges into any slot that touches it. Slots are plain values; interval
/// merging replaces the accumulator with a new slot instead of mutating one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    /// Create a slot from its bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start <= end, "slot start must not be after its end");
        Self { start, end }
    }

    /// Create a slot of `duration` starting at `start`.
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(start, start + duration)
    }

    /// Length of the slot.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open overlap test. Touching slots do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// A query window plus the slot size callers want when searching for openings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Granule size for slot search. Zero when the range is only a fetch window.
    pub duration: Duration,
}

impl TimeRange {
    /// A plain fetch window with no slot size.
    pub fn window(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
            duration: Duration::zero(),
        }
    }

    /// A search window that looks for openings of `duration`.
    pub fn search(start_time: DateTime<Utc>, end_time: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start_time,
            end_time,
            duration,
        }
    }

    /// Check `start_time <= end_time`.
    pub fn validate(&self) -> CalendarResult<()> {
        if self.start_time > self.end_time {
            return Err(CalendarError::InvalidTimeRange(format!(
                "start {} is after end {}",
                self.start_time, self.end_time
            )));
        }
        Ok(())
    }

    /// Check the range is usable for slot search (`duration > 0`).
    pub fn validate_for_search(&self) -> CalendarResult<()> {
        self.validate()?;
        if self.duration <= Duration::zero() {
            return Err(CalendarError::InvalidTimeRange(
                "slot duration must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The range as a slot, ignoring `duration`.
    pub fn as_slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }
}

/// Sort slots by start and fold overlapping or adjacent ones together.
///
/// A slot whose start is at or before the running slot's end is folded in,
/// extending the end when it reaches further.
pub fn merge_slots(mut slots: Vec<TimeSlot>) -> Vec<TimeSlot> {
    slots.sort_by_key(|s| s.start);

    let mut merged: Vec<TimeSlot> = Vec::with_capacity(slots.len());
    for slot in slots {
        match merged.last_mut() {
            Some(current) if slot.start <= current.end => {
                if slot.end > current.end {
                    *current = TimeSlot::new(current.start, slot.end);
                }
            }
            _ => merged.push(slot),
        }
    }
    merged
}
