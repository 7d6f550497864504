//! Five-field cron expressions and next-fire-time computation.
//!
//! Field parsing and matching are delegated to [`croner`]: `*`, literals,
//! comma lists, ranges `a-b`, steps `*/n`, `a-b/n` and `a/n`, plus
//! three-letter month and weekday names. `7` is Sunday as well as `0`. The
//! `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight` and
//! `@hourly` macros are expanded here before parsing.
//!
//! Day matching follows Vixie cron: when both day-of-month and day-of-week
//! are restricted (neither field is a bare `*`) a day matches if EITHER
//! field matches. Otherwise both must match, which in practice means only
//! the restricted one matters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Local, LocalResult, TimeZone, Timelike, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// How many years past the reference instant `next_after` searches before
/// giving up. Eight years covers the longest gap between leap days.
const SEARCH_YEARS: i32 = 8;

/// A parsed cron expression.
#[derive(Clone)]
pub struct CronSchedule {
    /// As written, for display.
    expression: String,
    cron: Cron,
}

impl CronSchedule {
    /// Parse a five-field expression or macro.
    ///
    /// # Errors
    ///
    /// `InvalidExpression` on an unknown macro, a wrong field count, or any
    /// field croner rejects (out-of-range value, zero step, unknown name).
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(invalid(expression, format!("unknown macro '{trimmed}'")));
            }
            _ => trimmed,
        };

        let fields = expanded.split_whitespace().count();
        if fields != 5 {
            return Err(invalid(
                expression,
                format!(
                    "expected 5 fields (minute hour day-of-month month day-of-week), got {fields}"
                ),
            ));
        }

        let cron = Cron::new(expanded)
            .parse()
            .map_err(|e| invalid(expression, e.to_string()))?;

        Ok(Self {
            expression: trimmed.to_string(),
            cron,
        })
    }

    /// The expression as written (macros are kept unexpanded).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// True when the minute containing `at` (in `at`'s own time zone)
    /// satisfies every field.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        at.naive_local()
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .map(|t| Utc.from_utc_datetime(&t))
            .and_then(|wall| self.cron.is_time_matching(&wall).ok())
            .unwrap_or(false)
    }

    /// Earliest whole-minute instant strictly after `after` that matches.
    ///
    /// Pure: the only notion of "now" is the argument. Local times that do
    /// not exist (DST gaps) are skipped; ambiguous ones resolve to the
    /// earlier instant. Returns `None` when nothing matches within
    /// `SEARCH_YEARS` (e.g. `0 0 30 2 *`).
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let horizon = after.naive_local().year() + SEARCH_YEARS;

        // croner walks the zone's wall clock as if it were UTC, so it never
        // sees a transition; each candidate is then placed back in `tz`.
        let mut wall = Utc.from_utc_datetime(&after.naive_local());
        loop {
            wall = self.cron.find_next_occurrence(&wall, false).ok()?;
            if wall.year() > horizon {
                return None;
            }
            match tz.from_local_datetime(&wall.naive_utc()) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) if dt > *after => {
                    return Some(dt);
                }
                // gap, or the earlier half of a fold already passed
                _ => {}
            }
        }
    }

    /// Iterate fire times after `after`, each strictly later than the last.
    pub fn upcoming<Tz: TimeZone>(&self, after: DateTime<Tz>) -> Upcoming<'_, Tz> {
        Upcoming {
            schedule: self,
            cursor: Some(after),
        }
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl FromStr for CronSchedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Iterator returned by [`CronSchedule::upcoming`].
pub struct Upcoming<'a, Tz: TimeZone> {
    schedule: &'a CronSchedule,
    cursor: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> Iterator for Upcoming<'_, Tz> {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.schedule.next_after(self.cursor.as_ref()?);
        self.cursor = next.clone();
        next
    }
}

/// The clock a schedule is evaluated against. Instants are always stored
/// as UTC; only the field matching happens in the zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleZone {
    #[default]
    Local,
    Utc,
}

impl ScheduleZone {
    pub fn next_after(&self, schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleZone::Utc => schedule.next_after(&after),
            ScheduleZone::Local => schedule
                .next_after(&after.with_timezone(&Local))
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

fn invalid(expression: &str, reason: String) -> SchedulerError {
    SchedulerError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use chrono_tz::America::New_York;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn next(expr: &str, after: &str) -> Option<DateTime<Utc>> {
        CronSchedule::parse(expr).unwrap().next_after(&utc(after))
    }

    #[test]
    fn every_minute_rounds_up_to_next_whole_minute() {
        assert_eq!(
            next("* * * * *", "2024-01-01T10:15:42Z"),
            Some(utc("2024-01-01T10:16:00Z"))
        );
        // exactly on a boundary still moves forward
        assert_eq!(
            next("* * * * *", "2024-01-01T10:15:00Z"),
            Some(utc("2024-01-01T10:16:00Z"))
        );
    }

    #[test]
    fn literal_minute_and_hour() {
        assert_eq!(
            next("30 4 * * *", "2024-01-01T05:00:00Z"),
            Some(utc("2024-01-02T04:30:00Z"))
        );
        assert_eq!(
            next("30 4 * * *", "2024-01-01T04:29:59Z"),
            Some(utc("2024-01-01T04:30:00Z"))
        );
    }

    #[test]
    fn steps_ranges_and_lists() {
        assert_eq!(
            next("*/15 * * * *", "2024-01-01T10:16:00Z"),
            Some(utc("2024-01-01T10:30:00Z"))
        );
        assert_eq!(
            next("5/20 * * * *", "2024-01-01T10:26:00Z"),
            Some(utc("2024-01-01T10:45:00Z"))
        );
        assert_eq!(
            next("0 9-17/4 * * *", "2024-01-01T13:00:00Z"),
            Some(utc("2024-01-01T17:00:00Z"))
        );
        assert_eq!(
            next("0 1,12,23 * * *", "2024-01-01T12:00:00Z"),
            Some(utc("2024-01-01T23:00:00Z"))
        );
    }

    #[test]
    fn weekday_range_skips_weekend() {
        // 2024-01-05 is a Friday.
        assert_eq!(
            next("0 9 * * 1-5", "2024-01-05T10:00:00Z"),
            Some(utc("2024-01-08T09:00:00Z"))
        );
    }

    #[test]
    fn names_are_case_insensitive() {
        let by_name = CronSchedule::parse("0 0 1 jan,Jul mon-FRI").unwrap();
        let by_number = CronSchedule::parse("0 0 1 1,7 1-5").unwrap();
        let after = utc("2024-02-01T00:00:00Z");
        assert_eq!(by_name.next_after(&after), by_number.next_after(&after));
    }

    #[test]
    fn seven_is_sunday() {
        let seven = CronSchedule::parse("0 0 * * 7").unwrap();
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let after = utc("2024-01-01T00:00:00Z");
        // 2024-01-07 is a Sunday.
        assert_eq!(seven.next_after(&after), Some(utc("2024-01-07T00:00:00Z")));
        assert_eq!(seven.next_after(&after), zero.next_after(&after));
    }

    #[test]
    fn restricted_dom_and_dow_combine_with_or() {
        // The 13th, or any Friday.
        let sched = CronSchedule::parse("0 0 13 * 5").unwrap();
        let fires: Vec<_> = sched.upcoming(utc("2024-01-01T00:00:00Z")).take(4).collect();
        assert_eq!(
            fires,
            [
                utc("2024-01-05T00:00:00Z"),
                utc("2024-01-12T00:00:00Z"),
                utc("2024-01-13T00:00:00Z"),
                utc("2024-01-19T00:00:00Z"),
            ]
        );
    }

    #[test]
    fn bare_star_dom_leaves_dow_in_charge() {
        // Mondays only; 2024-01-01 is a Monday.
        let sched = CronSchedule::parse("0 0 * * 1").unwrap();
        let fires: Vec<_> = sched.upcoming(utc("2024-01-01T00:00:00Z")).take(2).collect();
        assert_eq!(
            fires,
            [utc("2024-01-08T00:00:00Z"), utc("2024-01-15T00:00:00Z")]
        );
    }

    #[test]
    fn leap_day_waits_for_leap_year() {
        assert_eq!(
            next("0 0 29 2 *", "2024-03-01T00:00:00Z"),
            Some(utc("2028-02-29T00:00:00Z"))
        );
    }

    #[test]
    fn impossible_date_returns_none() {
        assert_eq!(next("0 0 30 2 *", "2024-01-01T00:00:00Z"), None);
    }

    #[test]
    fn macros_expand() {
        assert_eq!(
            next("@hourly", "2024-01-01T10:15:00Z"),
            Some(utc("2024-01-01T11:00:00Z"))
        );
        assert_eq!(
            next("@daily", "2024-01-01T10:15:00Z"),
            Some(utc("2024-01-02T00:00:00Z"))
        );
        assert_eq!(
            next("@weekly", "2024-01-01T10:15:00Z"),
            Some(utc("2024-01-07T00:00:00Z"))
        );
        assert_eq!(
            next("@monthly", "2024-01-01T10:15:00Z"),
            Some(utc("2024-02-01T00:00:00Z"))
        );
        assert_eq!(
            next("@yearly", "2024-01-01T10:15:00Z"),
            Some(utc("2025-01-01T00:00:00Z"))
        );
        assert_eq!(CronSchedule::parse("@daily").unwrap().expression(), "@daily");
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for bad in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "* * * FOO *",
            "abc * * * *",
            "@fortnightly",
        ] {
            let err = CronSchedule::parse(bad).unwrap_err();
            assert!(
                matches!(err, SchedulerError::InvalidExpression { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn sequence_is_strictly_increasing_and_matching() {
        for expr in [
            "* * * * *",
            "*/7 */5 * * *",
            "0 0 13 * 5",
            "15 3 1,15 * *",
            "0 12 * feb-apr sat,sun",
        ] {
            let sched = CronSchedule::parse(expr).unwrap();
            let start = utc("2023-12-31T23:58:30Z");
            let mut prev = start;
            for fire in sched.upcoming(start).take(50) {
                assert!(fire > prev, "{expr}: {fire} not after {prev}");
                assert!(sched.matches(&fire), "{expr}: {fire} does not match");
                assert_eq!(fire.second(), 0);
                prev = fire;
            }
        }
    }

    #[test]
    fn evaluates_in_the_reference_time_zone() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let after = plus_two.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let fire = CronSchedule::parse("0 9 * * *")
            .unwrap()
            .next_after(&after)
            .unwrap();
        assert_eq!(fire, plus_two.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        assert_eq!(fire.with_timezone(&Utc), utc("2024-01-01T07:00:00Z"));
    }

    #[test]
    fn utc_zone_matches_direct_evaluation() {
        let sched = CronSchedule::parse("0 6 * * *").unwrap();
        let after = utc("2024-01-01T07:00:00Z");
        assert_eq!(
            ScheduleZone::Utc.next_after(&sched, after),
            Some(utc("2024-01-02T06:00:00Z"))
        );
    }

    #[test]
    fn dst_gap_is_skipped() {
        // 2024-03-10 02:00 EST jumps to 03:00 EDT in New York.
        let after = New_York.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let fire = CronSchedule::parse("30 2 * * *")
            .unwrap()
            .next_after(&after)
            .unwrap();
        assert_eq!(fire, New_York.with_ymd_and_hms(2024, 3, 11, 2, 30, 0).unwrap());
        assert_eq!(fire.with_timezone(&Utc), utc("2024-03-11T06:30:00Z"));
    }

    #[test]
    fn ambiguous_time_fires_once_at_the_earlier_instant() {
        // 2024-11-03 01:00-02:00 happens twice in New York (EDT, then EST).
        let after = New_York.with_ymd_and_hms(2024, 11, 3, 0, 0, 0).unwrap();
        let fires: Vec<_> = CronSchedule::parse("30 1 * * *")
            .unwrap()
            .upcoming(after)
            .take(2)
            .map(|t| t.with_timezone(&Utc))
            .collect();
        assert_eq!(
            fires,
            [
                // 01:30 EDT
                utc("2024-11-03T05:30:00Z"),
                // 01:30 EST the next day
                utc("2024-11-04T06:30:00Z"),
            ]
        );
    }

    #[test]
    fn second_pass_of_a_fold_does_not_refire() {
        // 01:10 EST, after the 01:30 EDT fire has already happened.
        let after = utc("2024-11-03T06:10:00Z").with_timezone(&New_York);
        assert_eq!(
            CronSchedule::parse("30 1 * * *")
                .unwrap()
                .next_after(&after)
                .map(|t| t.with_timezone(&Utc)),
            Some(utc("2024-11-04T06:30:00Z"))
        );
    }
}
