//! Schedule expression — `(weekdays, time, timezone) -> next-fire instant`.
//! See `spec.md` §3.3 and the next-fire algorithm in §4.1.
//!
//! DST handling follows the teacher's timezone-aware cron evaluator:
//! local times skipped by a spring-forward transition are never matched
//! (`LocalResult::None`), and a fall-back repeat resolves to its earliest
//! occurrence (`LocalResult::Ambiguous`'s first element).

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::Time;
use crate::weekday::Weekday;

/// How many calendar days ahead `next_fire` will search before giving up.
/// Always sufficient because `days` is non-empty (§3.3 invariant 1).
const MAX_SEARCH_DAYS: i64 = 8;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleExpression {
    days: BTreeSet<Weekday>,
    time: Time,
    timezone: String,
}

impl ScheduleExpression {
    pub fn new(days: impl IntoIterator<Item = Weekday>, time: Time, timezone: impl Into<String>) -> Result<Self> {
        let days: BTreeSet<Weekday> = days.into_iter().collect();
        if days.is_empty() {
            return Err(Error::Validation("schedule expression requires at least one weekday".into()));
        }
        let timezone = timezone.into();
        if timezone.is_empty() {
            return Err(Error::Validation("schedule expression requires a non-empty timezone".into()));
        }
        Ok(Self { days, time, timezone })
    }

    pub fn days(&self) -> impl Iterator<Item = &Weekday> {
        self.days.iter()
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| Error::Validation(format!("unrecognized timezone: {}", self.timezone)))
    }

    /// `matches-day` — is this local calendar date one of the expression's
    /// weekdays?
    pub fn matches_day(&self, at: &DateTime<Utc>) -> Result<bool> {
        let tz = self.tz()?;
        let local = at.with_timezone(&tz);
        Ok(self.days.contains(&Weekday::from_chrono(local.weekday())))
    }

    /// `should-execute-at` — matches-day AND local time == T (minute
    /// precision).
    pub fn should_execute_at(&self, at: &DateTime<Utc>) -> Result<bool> {
        let tz = self.tz()?;
        let local = at.with_timezone(&tz);
        let local_time = Time::new(local.hour() as u8, local.minute() as u8)?;
        Ok(self.matches_day(at)? && local_time == self.time)
    }

    /// The earliest instant strictly greater than `from` whose local
    /// weekday is in the day set and whose local time equals `time`.
    /// Bounded to `MAX_SEARCH_DAYS` calendar days.
    pub fn next_fire(&self, from: &DateTime<Utc>) -> Result<DateTime<Utc>> {
        let tz = self.tz()?;
        let local_from = from.with_timezone(&tz);
        let start_date = local_from.date_naive();

        for offset in 0..MAX_SEARCH_DAYS {
            let candidate_date = start_date + chrono::Duration::days(offset);
            let candidate_weekday = Weekday::from_chrono(candidate_date.weekday());
            if !self.days.contains(&candidate_weekday) {
                continue;
            }

            let candidate_naive = candidate_date
                .and_hms_opt(self.time.hour() as u32, self.time.minute() as u32, 0)
                .ok_or_else(|| Error::Validation("invalid candidate local time".into()))?;

            match tz.from_local_datetime(&candidate_naive) {
                chrono::LocalResult::Single(dt) => {
                    let utc = dt.with_timezone(&Utc);
                    if utc > *from {
                        return Ok(utc);
                    }
                }
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    let utc = earliest.with_timezone(&Utc);
                    if utc > *from {
                        return Ok(utc);
                    }
                }
                chrono::LocalResult::None => {
                    // Spring-forward gap: this local time doesn't exist on
                    // this date. Skip to the next matching day.
                    continue;
                }
            }
        }

        Err(Error::Other(format!(
            "no fire found within {MAX_SEARCH_DAYS} days (this should be unreachable for a non-empty day set)"
        )))
    }

    /// Sorted, deduplicated next-fire instants within `[from, from + days]`.
    pub fn upcoming(&self, days: i64, from: &DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let cutoff = *from + chrono::Duration::days(days);
        let mut results = Vec::new();
        let mut cursor = *from;
        loop {
            let next = self.next_fire(&cursor)?;
            if next > cutoff {
                break;
            }
            if results.last() != Some(&next) {
                results.push(next);
            }
            // Nudge one minute forward per spec.md §4.1 so the next
            // search starts strictly after the instant just found.
            cursor = next + chrono::Duration::minutes(1);
        }
        Ok(results)
    }

    /// `D ∩ other.D ≠ ∅` AND `|T − other.T| ≤ tolerance`.
    pub fn conflicts_with(&self, other: &ScheduleExpression, tolerance_minutes: i32) -> bool {
        let days_overlap = self.days.intersection(&other.days).next().is_some();
        let time_close = self.time.diff_minutes(&other.time).abs() <= tolerance_minutes;
        days_overlap && time_close
    }
}

/// Equality ignores order within `D` (a `BTreeSet` already normalizes
/// order, so derived equality on the set is sufficient).
impl PartialEq for ScheduleExpression {
    fn eq(&self, other: &Self) -> bool {
        self.days == other.days && self.time == other.time && self.timezone == other.timezone
    }
}
impl Eq for ScheduleExpression {}
