//! Cron expression evaluator.
//!
//! Standard 5-field expressions, `minute hour day-of-month month day-of-week`,
//! evaluated in UTC at minute granularity. Each field accepts `*`, `N`,
//! `N-M`, `*/S`, `N-M/S`, `N/S` and comma lists; months and weekdays also
//! accept three-letter names. Day-of-week `7` is Sunday. The `@hourly`,
//! `@daily`, `@midnight`, `@weekly`, `@monthly`, `@yearly` and `@annually`
//! macros are expanded before parsing.
//!
//! When both day fields are restricted a day matches if *either* does
//! (Vixie cron semantics).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// How far ahead `next_after` looks before concluding a schedule never fires.
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    pub expression: String,
    pub reason: String,
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>, // 0=Sun, 6=Sat
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a cron expression or macro.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fail = |reason: String| CronError {
            expression: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_macro(trimmed).ok_or_else(|| fail(format!("Unknown macro: {trimmed}")))?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(fail(format!(
                "Expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            )));
        }

        let mut days_of_week = parse_field(fields[4], 0, 7, &DAY_NAMES, 0).map_err(fail)?;
        for d in days_of_week.iter_mut() {
            if *d == 7 {
                *d = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Ok(Self {
            expression: trimmed.to_string(),
            minutes: parse_field(fields[0], 0, 59, &[], 0).map_err(fail)?,
            hours: parse_field(fields[1], 0, 23, &[], 0).map_err(fail)?,
            days_of_month: parse_field(fields[2], 1, 31, &[], 0).map_err(fail)?,
            months: parse_field(fields[3], 1, 12, &MONTH_NAMES, 1).map_err(fail)?,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Check if the given datetime falls on a firing minute.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.day_matches(dt.date_naive())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&date.day());
        let dow = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// The first firing minute strictly after `reference`, or `None` if the
    /// schedule does not fire within the search horizon.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let floor = reference
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?;
        let start = floor + Duration::minutes(1);
        let start_date = start.date_naive();

        for offset in 0..SEARCH_HORIZON_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.day_matches(date) {
                continue;
            }
            let first_day = offset == 0;
            for &hour in &self.hours {
                if first_day && hour < start.hour() {
                    continue;
                }
                for &minute in &self.minutes {
                    if first_day && hour == start.hour() && minute < start.minute() {
                        continue;
                    }
                    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                    return Some(Utc.from_utc_datetime(&date.and_time(time)));
                }
            }
        }
        None
    }

    /// Up to `count` consecutive fire times after `reference`.
    pub fn upcoming(&self, reference: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(count.min(64));
        let mut cursor = reference;
        while out.len() < count {
            let Some(next) = self.next_after(cursor) else {
                break;
            };
            out.push(next);
            cursor = next;
        }
        out
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn expand_macro(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "@hourly" => Some("0 * * * *"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@monthly" => Some("0 0 1 * *"),
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        _ => None,
    }
}

fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[&str],
    name_base: u32,
) -> Result<Vec<u32>, String> {
    let mut values = Vec::new();

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("Empty list item in '{field}'"));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("Invalid step: {step}"))?;
                if step == 0 {
                    return Err("Step cannot be zero".into());
                }
                if step > max - min + 1 {
                    return Err(format!("Step {step} exceeds field span {min}-{max}"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let start = parse_value(lo, names, name_base)?;
            let end = parse_value(hi, names, name_base)?;
            if start < min || end > max || start > end {
                return Err(format!("Range {start}-{end} invalid for {min}-{max}"));
            }
            (start, end)
        } else {
            let v = parse_value(range, names, name_base)?;
            if v < min || v > max {
                return Err(format!("{v} out of range {min}-{max}"));
            }
            // `N/S` runs from N to the field maximum
            if step.is_some() { (v, max) } else { (v, v) }
        };

        let step = step.unwrap_or(1);
        let mut v = Some(start);
        while let Some(current) = v.filter(|c| *c <= end) {
            values.push(current);
            v = current.checked_add(step);
        }
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err("Field produced no values".into());
    }
    Ok(values)
}

fn parse_value(s: &str, names: &[&str], name_base: u32) -> Result<u32, String> {
    if let Ok(v) = s.parse::<u32>() {
        return Ok(v);
    }
    let lower = s.to_ascii_lowercase();
    names
        .iter()
        .position(|n| *n == lower)
        .map(|i| i as u32 + name_base)
        .ok_or_else(|| format!("Invalid number: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_minute() {
        let expr = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(expr.minutes.len(), 60);
        assert_eq!(expr.hours.len(), 24);
    }

    #[test]
    fn specific_time() {
        let expr = CronSchedule::parse("30 9 * * 1-5").unwrap();
        assert_eq!(expr.minutes, vec![30]);
        assert_eq!(expr.hours, vec![9]);
        assert_eq!(expr.days_of_week, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn steps_and_lists() {
        assert_eq!(
            CronSchedule::parse("*/15 * * * *").unwrap().minutes,
            vec![0, 15, 30, 45]
        );
        assert_eq!(
            CronSchedule::parse("0,30 * * * *").unwrap().minutes,
            vec![0, 30]
        );
        assert_eq!(
            CronSchedule::parse("10-20/5 * * * *").unwrap().minutes,
            vec![10, 15, 20]
        );
        assert_eq!(
            CronSchedule::parse("50/5 * * * *").unwrap().minutes,
            vec![50, 55]
        );
    }

    #[test]
    fn step_as_wide_as_field_keeps_start_only() {
        assert_eq!(CronSchedule::parse("*/60 * * * *").unwrap().minutes, vec![0]);
        assert_eq!(CronSchedule::parse("59/60 * * * *").unwrap().minutes, vec![59]);
        assert_eq!(CronSchedule::parse("0 0 * * 6/8").unwrap().days_of_week, vec![6]);
    }

    #[test]
    fn names_and_sunday_alias() {
        let expr = CronSchedule::parse("0 0 * jan-mar SUN,7").unwrap();
        assert_eq!(expr.months, vec![1, 2, 3]);
        assert_eq!(expr.days_of_week, vec![0]);
    }

    #[test]
    fn macros_expand() {
        let hourly = CronSchedule::parse("@hourly").unwrap();
        assert_eq!(hourly.minutes, vec![0]);
        assert_eq!(hourly.hours.len(), 24);
        assert_eq!(hourly.expression(), "@hourly");

        let yearly = CronSchedule::parse("@annually").unwrap();
        assert_eq!(yearly.months, vec![1]);
        assert_eq!(yearly.days_of_month, vec![1]);
    }

    #[test]
    fn invalid_expressions_rejected() {
        for bad in [
            "",
            "* * *",
            "70 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "*/0 * * * *",
            "5-1 * * * *",
            "not a cron at all",
            "@fortnightly",
            "1,,2 * * * *",
            "59/4294967295 * * * *",
            "59/4294967237 * * * *",
            "*/61 * * * *",
            "0 0 * * */9",
        ] {
            assert!(CronSchedule::parse(bad).is_err(), "accepted: {bad:?}");
        }
    }

    #[test]
    fn matches_datetime() {
        // "At 09:30 on weekdays"
        let expr = CronSchedule::parse("30 9 * * 1-5").unwrap();

        // 2026-02-23 is a Monday
        assert!(expr.matches(&at(2026, 2, 23, 9, 30)));
        // 2026-02-22 is a Sunday
        assert!(!expr.matches(&at(2026, 2, 22, 9, 30)));
        assert!(!expr.matches(&at(2026, 2, 23, 10, 0)));
    }

    #[test]
    fn restricted_day_fields_are_ored() {
        // 1st of the month OR any Monday
        let expr = CronSchedule::parse("0 0 1 * 1").unwrap();
        assert!(expr.matches(&at(2026, 3, 1, 0, 0))); // Sunday the 1st
        assert!(expr.matches(&at(2026, 3, 2, 0, 0))); // Monday the 2nd
        assert!(!expr.matches(&at(2026, 3, 3, 0, 0)));
    }

    #[test]
    fn next_after_is_strictly_after() {
        let expr = CronSchedule::parse("*/5 * * * *").unwrap();
        let on_boundary = at(2026, 1, 1, 12, 0);
        assert_eq!(expr.next_after(on_boundary), Some(at(2026, 1, 1, 12, 5)));

        let mid_minute = on_boundary + Duration::seconds(30);
        assert_eq!(expr.next_after(mid_minute), Some(at(2026, 1, 1, 12, 5)));
    }

    #[test]
    fn next_after_always_exceeds_reference() {
        let reference = at(2026, 2, 27, 23, 59) + Duration::seconds(59);
        for expr in [
            "* * * * *",
            "0 * * * *",
            "59 23 * * *",
            "0 0 29 2 *",
            "30 9 * * 1-5",
            "@weekly",
            "0 0 1 * 1",
        ] {
            let schedule = CronSchedule::parse(expr).unwrap();
            let next = schedule.next_after(reference).unwrap();
            assert!(next > reference, "{expr}: {next} <= {reference}");
            assert!(schedule.matches(&next), "{expr}: {next} does not match");
        }
    }

    #[test]
    fn next_after_crosses_day_and_year() {
        let daily = CronSchedule::parse("0 9 * * *").unwrap();
        assert_eq!(
            daily.next_after(at(2026, 12, 31, 10, 0)),
            Some(at(2027, 1, 1, 9, 0))
        );
    }

    #[test]
    fn leap_day_schedule_finds_next_leap_year() {
        let schedule = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 1, 1, 0, 0)),
            Some(at(2028, 2, 29, 0, 0))
        );
    }

    #[test]
    fn impossible_schedule_never_fires() {
        let schedule = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert!(schedule.next_after(at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn upcoming_is_consecutive() {
        let schedule = CronSchedule::parse("0 */6 * * *").unwrap();
        let times = schedule.upcoming(at(2026, 1, 1, 0, 0), 3);
        assert_eq!(
            times,
            vec![at(2026, 1, 1, 6, 0), at(2026, 1, 1, 12, 0), at(2026, 1, 1, 18, 0)]
        );
    }

    #[test]
    fn upcoming_with_huge_count_does_not_preallocate() {
        let schedule = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert!(schedule.upcoming(at(2026, 1, 1, 0, 0), usize::MAX).is_empty());
    }
}
