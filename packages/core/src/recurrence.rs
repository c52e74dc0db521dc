//! Recurrence rule parsing and expansion.
//!
//! Only `FREQ`, `COUNT`, `INTERVAL`, `BYDAY`, `BYMONTH` and `BYMONTHDAY` are
//! modeled. Expansion steps on the wall-clock time of the zone the window is
//! expressed in, so a daily 09:00 rule stays at 09:00 across DST changes.

use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::error::{CalendarError, CalendarResult};
use crate::slot::TimeSlot;

/// Marker every rule string starts with.
pub const RULE_PREFIX: &str = "RRULE:";

/// Two-letter weekday codes.
const WEEKDAY_CODES: [(&str, Weekday); 7] = [
    ("MO", Weekday::Mon),
    ("TU", Weekday::Tue),
    ("WE", Weekday::Wed),
    ("TH", Weekday::Thu),
    ("FR", Weekday::Fri),
    ("SA", Weekday::Sat),
    ("SU", Weekday::Sun),
];

/// How often a rule repeats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Recognized but never expanded.
    Hourly,
    /// Any other token, kept verbatim. Expands to nothing.
    #[serde(untagged)]
    Unsupported(String),
}

impl Frequency {
    fn from_token(token: &str) -> Self {
        match token {
            "DAILY" => Frequency::Daily,
            "WEEKLY" => Frequency::Weekly,
            "MONTHLY" => Frequency::Monthly,
            "YEARLY" => Frequency::Yearly,
            "HOURLY" => Frequency::Hourly,
            other => Frequency::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
            Frequency::Hourly => "HOURLY",
            Frequency::Unsupported(token) => token,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed repeating-event description. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Step multiplier, at least 1.
    pub interval: u32,
    /// Cap on occurrences. For `WEEKLY` it caps weeks stepped, see [`RecurrenceRule::expand`].
    pub count: Option<u32>,
    pub by_day: Vec<Weekday>,
    /// Months, 1-12.
    pub by_month: Vec<u32>,
    /// Days of month. Negative values count back from the month's last day.
    pub by_month_day: Vec<i32>,
}

impl RecurrenceRule {
    /// A bare rule with the given frequency and defaults for everything else.
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            count: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
        }
    }

    /// Parse an `RRULE:KEY=VALUE;...` string.
    ///
    /// Parts without `=` and unknown keys are ignored. `FREQ` is required.
    pub fn parse(rule: &str) -> CalendarResult<Self> {
        let body = rule
            .trim()
            .strip_prefix(RULE_PREFIX)
            .ok_or_else(|| malformed(format!("missing {RULE_PREFIX} prefix in '{rule}'")))?;

        let mut frequency = None;
        let mut parsed = Self::new(Frequency::Daily);

        for part in body.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "FREQ" => frequency = Some(Frequency::from_token(value)),
                "COUNT" => parsed.count = Some(parse_positive("COUNT", value)?),
                "INTERVAL" => parsed.interval = parse_positive("INTERVAL", value)?,
                "BYDAY" => parsed.by_day = parse_list("BYDAY", value, parse_weekday)?,
                "BYMONTH" => parsed.by_month = parse_list("BYMONTH", value, parse_month)?,
                "BYMONTHDAY" => {
                    parsed.by_month_day = parse_list("BYMONTHDAY", value, parse_month_day)?
                }
                _ => {}
            }
        }

        parsed.frequency = frequency.ok_or_else(|| malformed("FREQ is required".to_string()))?;
        Ok(parsed)
    }

    /// Expand the rule into concrete occurrences.
    ///
    /// `start` is both the anchor of the series and the lower bound of the
    /// window; `end` is the inclusive upper bound for occurrence starts. Every
    /// occurrence lasts `duration`.
    ///
    /// `COUNT` caps emitted occurrences for `DAILY`, `MONTHLY` and `YEARLY`.
    /// For `WEEKLY` it caps the number of weeks stepped, so `BYDAY=MO,WE;COUNT=2`
    /// can produce four occurrences.
    pub fn expand<Tz: TimeZone>(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
        duration: Duration,
    ) -> Vec<TimeSlot> {
        if start > end {
            return Vec::new();
        }

        let window = Window {
            tz: start.timezone(),
            lower: start.with_timezone(&Utc),
            upper: end.with_timezone(&Utc),
            anchor: start.naive_local(),
            last_local: end.with_timezone(&start.timezone()).naive_local(),
            duration,
        };

        let mut slots = match self.frequency {
            Frequency::Daily => self.expand_daily(&window),
            Frequency::Weekly => self.expand_weekly(&window),
            Frequency::Monthly => self.expand_monthly(&window),
            Frequency::Yearly => self.expand_yearly(&window),
            Frequency::Hourly | Frequency::Unsupported(_) => {
                tracing::debug!("No expansion for frequency {}", self.frequency);
                Vec::new()
            }
        };

        slots.sort_by_key(|slot| slot.start);
        slots
    }

    fn reached(&self, n: u32) -> bool {
        self.count.is_some_and(|max| n >= max)
    }

    fn expand_daily<Tz: TimeZone>(&self, window: &Window<Tz>) -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        let mut current = Some(window.anchor);

        while let Some(local) = current.filter(|l| *l <= window.last_local) {
            if self.reached(slots.len() as u32) {
                break;
            }
            if let Some(slot) = window.slot_at(local) {
                slots.push(slot);
            }
            current = local.checked_add_days(Days::new(u64::from(self.interval)));
        }

        slots
    }

    fn expand_weekly<Tz: TimeZone>(&self, window: &Window<Tz>) -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        let mut weeks = 0;
        let mut current = Some(window.anchor);

        while let Some(week) = current.filter(|w| *w <= window.last_local) {
            if self.reached(weeks) {
                break;
            }

            if self.by_day.is_empty() {
                slots.extend(window.slot_at(week));
            } else {
                for &day in &self.by_day {
                    let offset = (7 + day.num_days_from_monday()
                        - week.weekday().num_days_from_monday())
                        % 7;
                    if let Some(local) = week.checked_add_days(Days::new(u64::from(offset))) {
                        slots.extend(window.slot_at(local));
                    }
                }
            }

            weeks += 1;
            current = week.checked_add_days(Days::new(7 * u64::from(self.interval)));
        }

        slots
    }

    fn expand_monthly<Tz: TimeZone>(&self, window: &Window<Tz>) -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        let first_of_anchor_month = window.anchor.date().with_day(1);
        let time = window.anchor.time();

        for step in 0u32.. {
            let Some(month_start) = first_of_anchor_month
                .and_then(|d| d.checked_add_months(Months::new(step * self.interval)))
            else {
                break;
            };
            if month_start > window.last_local.date() || self.reached(slots.len() as u32) {
                break;
            }

            let mut days: Vec<u32> = if self.by_month_day.is_empty() {
                vec![window.anchor.day()]
            } else {
                self.by_month_day
                    .iter()
                    .filter_map(|&d| resolve_month_day(month_start, d))
                    .collect()
            };
            days.sort_unstable();
            days.dedup();

            for day in days {
                if self.reached(slots.len() as u32) {
                    break;
                }
                if let Some(date) = month_start.with_day(day) {
                    slots.extend(window.slot_at(date.and_time(time)));
                }
            }
        }

        slots
    }

    fn expand_yearly<Tz: TimeZone>(&self, window: &Window<Tz>) -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        let anchor = window.anchor;

        let mut months: Vec<u32> = if self.by_month.is_empty() {
            vec![anchor.month()]
        } else {
            self.by_month.clone()
        };
        months.sort_unstable();
        months.dedup();

        for step in 0i32.. {
            let Some(year) = i32::try_from(self.interval)
                .ok()
                .and_then(|i| i.checked_mul(step))
                .and_then(|offset| anchor.year().checked_add(offset))
            else {
                break;
            };
            if year > window.last_local.year() || self.reached(slots.len() as u32) {
                break;
            }

            for &month in &months {
                if self.reached(slots.len() as u32) {
                    break;
                }
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, anchor.day()) {
                    slots.extend(window.slot_at(date.and_time(anchor.time())));
                }
            }
        }

        slots
    }
}

impl FromStr for RecurrenceRule {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse `rule` and expand it over `[start, end]`.
pub fn expand_rule<Tz: TimeZone>(
    rule: &str,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
    duration: Duration,
) -> CalendarResult<Vec<TimeSlot>> {
    Ok(RecurrenceRule::parse(rule)?.expand(start, end, duration))
}

/// Expansion bounds, in the zone the caller expressed them in.
struct Window<Tz: TimeZone> {
    tz: Tz,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
    anchor: NaiveDateTime,
    last_local: NaiveDateTime,
    duration: Duration,
}

impl<Tz: TimeZone> Window<Tz> {
    /// Resolve a wall-clock time to a slot if it exists and falls in the window.
    /// Wall-clock times skipped by a DST jump have no occurrence.
    fn slot_at(&self, local: NaiveDateTime) -> Option<TimeSlot> {
        let start = self
            .tz
            .from_local_datetime(&local)
            .earliest()?
            .with_timezone(&Utc);
        (self.lower <= start && start <= self.upper)
            .then(|| TimeSlot::starting_at(start, self.duration))
    }
}

/// Map a possibly negative day-of-month onto the month starting at `month_start`.
fn resolve_month_day(month_start: NaiveDate, day: i32) -> Option<u32> {
    let last = last_day_of_month(month_start)?;
    let resolved = if day > 0 { day } else { last as i32 + 1 + day };
    u32::try_from(resolved).ok().filter(|d| (1..=last).contains(d))
}

fn last_day_of_month(month_start: NaiveDate) -> Option<u32> {
    month_start
        .checked_add_months(Months::new(1))?
        .pred_opt()
        .map(|d| d.day())
}

fn malformed(message: String) -> CalendarError {
    CalendarError::MalformedRule(message)
}

fn parse_positive(key: &str, value: &str) -> CalendarResult<u32> {
    match value.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        Ok(_) => Err(malformed(format!("{key} must be at least 1, got {value}"))),
        Err(e) => Err(malformed(format!("invalid {key} value '{value}': {e}"))),
    }
}

fn parse_list<T>(
    key: &str,
    value: &str,
    parse_item: fn(&str) -> Option<T>,
) -> CalendarResult<Vec<T>>
where
    T: PartialEq,
{
    let mut items = Vec::new();
    for raw in value.split(',') {
        let item = parse_item(raw.trim())
            .ok_or_else(|| malformed(format!("invalid {key} value '{}'", raw.trim())))?;
        if !items.contains(&item) {
            items.push(item);
        }
    }
    Ok(items)
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    WEEKDAY_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, day)| *day)
}

fn parse_month(value: &str) -> Option<u32> {
    value.parse().ok().filter(|m| (1..=12).contains(m))
}

fn parse_month_day(value: &str) -> Option<i32> {
    value
        .parse()
        .ok()
        .filter(|d: &i32| *d != 0 && (-31..=31).contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        match Utc.with_ymd_and_hms(y, m, d, h, min, 0).single() {
            Some(dt) => dt,
            None => panic!("invalid test date"),
        }
    }

    fn parse(rule: &str) -> RecurrenceRule {
        match RecurrenceRule::parse(rule) {
            Ok(r) => r,
            Err(e) => panic!("rule {rule} should parse: {e}"),
        }
    }

    #[test]
    fn parses_all_modeled_keys() {
        let rule = parse("RRULE:FREQ=WEEKLY;COUNT=10;INTERVAL=2;BYDAY=MO,WE,FR");
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.count, Some(10));
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.by_day, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);

        let yearly = parse("RRULE:FREQ=YEARLY;BYMONTH=6,7");
        assert_eq!(yearly.by_month, vec![6, 7]);
        assert_eq!(yearly.interval, 1);

        let monthly = parse("RRULE:FREQ=MONTHLY;BYMONTHDAY=15,-1");
        assert_eq!(monthly.by_month_day, vec![15, -1]);
    }

    #[test]
    fn rejects_malformed_rules() {
        for rule in [
            "",
            "invalid",
            "FREQ=DAILY",
            "RRULE:COUNT=3",
            "RRULE:FREQ=DAILY;COUNT=abc",
            "RRULE:FREQ=DAILY;COUNT=0",
            "RRULE:FREQ=DAILY;INTERVAL=0",
            "RRULE:FREQ=WEEKLY;BYDAY=MO,XX",
            "RRULE:FREQ=YEARLY;BYMONTH=13",
            "RRULE:FREQ=MONTHLY;BYMONTHDAY=1,x",
        ] {
            assert!(
                matches!(RecurrenceRule::parse(rule), Err(CalendarError::MalformedRule(_))),
                "expected {rule:?} to be rejected"
            );
        }
    }

    #[test]
    fn ignores_unknown_keys_and_keeps_unknown_frequencies() {
        let rule = parse("RRULE:FREQ=SECONDLY;WKST=MO;UNTIL=20250101T000000Z;junk");
        assert_eq!(rule.frequency, Frequency::Unsupported("SECONDLY".into()));

        let start = utc(2025, 1, 1, 9, 0);
        let slots = rule.expand(&start, &(start + Duration::days(5)), Duration::hours(1));
        assert!(slots.is_empty());
    }

    #[test]
    fn hourly_parses_but_never_expands() {
        let rule = parse("RRULE:FREQ=HOURLY;COUNT=3");
        assert_eq!(rule.frequency, Frequency::Hourly);
        let start = utc(2025, 1, 1, 9, 0);
        assert!(rule.expand(&start, &(start + Duration::days(1)), Duration::hours(1)).is_empty());
    }

    #[test]
    fn daily_count_caps_occurrences() {
        let day0 = utc(2024, 2, 1, 10, 0);
        let slots = parse("RRULE:FREQ=DAILY;COUNT=5").expand(
            &day0,
            &(day0 + Duration::days(10)),
            Duration::hours(1),
        );

        assert_eq!(slots.len(), 5);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.start, day0 + Duration::days(i as i64));
            assert_eq!(slot.duration(), Duration::hours(1));
        }
    }

    #[test]
    fn daily_interval_stays_inside_window() {
        let start = utc(2024, 2, 1, 10, 0);
        let end = start + Duration::days(6);
        let slots = parse("RRULE:FREQ=DAILY;INTERVAL=2").expand(&start, &end, Duration::hours(1));

        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![
                start,
                start + Duration::days(2),
                start + Duration::days(4),
                start + Duration::days(6),
            ]
        );
    }

    #[test]
    fn weekly_byday_counts_weeks_not_slots() {
        // 2024-02-01 is a Thursday.
        let start = utc(2024, 2, 1, 10, 0);
        let end = start + Duration::days(30);
        let slots = parse("RRULE:FREQ=WEEKLY;BYDAY=MO,TH;COUNT=2").expand(
            &start,
            &end,
            Duration::hours(1),
        );

        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![
                utc(2024, 2, 1, 10, 0),
                utc(2024, 2, 5, 10, 0),
                utc(2024, 2, 8, 10, 0),
                utc(2024, 2, 12, 10, 0),
            ]
        );
    }

    #[test]
    fn weekly_without_byday_repeats_anchor() {
        let start = utc(2024, 2, 1, 10, 0);
        let slots = parse("RRULE:FREQ=WEEKLY;INTERVAL=2").expand(
            &start,
            &(start + Duration::days(28)),
            Duration::minutes(30),
        );
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].start, start + Duration::days(28));
    }

    #[test]
    fn monthly_by_month_day_skips_invalid_dates() {
        let start = utc(2025, 1, 10, 8, 0);
        let end = utc(2025, 4, 30, 23, 0);
        let slots = parse("RRULE:FREQ=MONTHLY;BYMONTHDAY=5,30").expand(
            &start,
            &end,
            Duration::hours(1),
        );

        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![
                utc(2025, 1, 30, 8, 0),
                utc(2025, 2, 5, 8, 0),
                utc(2025, 3, 5, 8, 0),
                utc(2025, 3, 30, 8, 0),
                utc(2025, 4, 5, 8, 0),
                utc(2025, 4, 30, 8, 0),
            ]
        );
    }

    #[test]
    fn monthly_negative_day_is_last_day() {
        let start = utc(2024, 1, 1, 12, 0);
        let end = utc(2024, 3, 31, 23, 0);
        let slots = parse("RRULE:FREQ=MONTHLY;BYMONTHDAY=-1").expand(
            &start,
            &end,
            Duration::hours(1),
        );
        let days: Vec<_> = slots.iter().map(|s| s.start.day()).collect();
        assert_eq!(days, vec![31, 29, 31]);
    }

    #[test]
    fn yearly_by_month_uses_anchor_day() {
        let start = utc(2024, 5, 15, 9, 0);
        let end = utc(2026, 12, 31, 0, 0);
        let slots = parse("RRULE:FREQ=YEARLY;BYMONTH=6,7;COUNT=3").expand(
            &start,
            &end,
            Duration::hours(2),
        );

        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![
                utc(2024, 6, 15, 9, 0),
                utc(2024, 7, 15, 9, 0),
                utc(2025, 6, 15, 9, 0),
            ]
        );
    }

    #[test]
    fn occurrences_stay_inside_window_with_count() {
        let start = utc(2024, 1, 31, 9, 0);
        let end = utc(2024, 12, 31, 9, 0);
        for rule in [
            "RRULE:FREQ=DAILY;COUNT=4",
            "RRULE:FREQ=MONTHLY;COUNT=4;BYMONTHDAY=1,15,31",
            "RRULE:FREQ=YEARLY;COUNT=4;BYMONTH=1,3,5,7,9,11",
        ] {
            let slots = parse(rule).expand(&start, &end, Duration::hours(1));
            assert!(slots.len() <= 4, "{rule} emitted {}", slots.len());
            assert!(slots.iter().all(|s| start <= s.start && s.start <= end));
        }
    }

    #[test]
    fn daily_keeps_wall_clock_across_dst() {
        let tz = chrono_tz::America::New_York;
        let local = NaiveDate::from_ymd_opt(2025, 3, 8)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .and_then(|dt| tz.from_local_datetime(&dt).single());
        let Some(start) = local else {
            panic!("valid local time");
        };
        let end = start.clone() + Duration::days(2);

        let slots = parse("RRULE:FREQ=DAILY").expand(&start, &end, Duration::hours(1));
        assert_eq!(slots.len(), 3);
        let nine = NaiveTime::from_hms_opt(9, 0, 0);
        for slot in &slots {
            assert_eq!(Some(slot.start.with_timezone(&tz).time()), nine);
        }
        // EST before the switch, EDT after it.
        assert_eq!(slots[0].start, utc(2025, 3, 8, 14, 0));
        assert_eq!(slots[1].start, utc(2025, 3, 9, 13, 0));
    }
}
