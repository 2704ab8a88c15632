// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Six-field cron expression parsing and next-trigger computation.
//!
//! Fields, in order: seconds (0-59), minutes (0-59), hours (0-23),
//! day of month (1-31), month (1-12), day of week (0-6, values taken
//! modulo 7 so 7 also means Sunday). Each field is a comma list of
//! `*`, `*/step`, or `start[-stop][/step]` terms and is stored as a
//! set-membership bitmask over its domain.
//!
//! Day-of-month and day-of-week combine with OR when both are restricted:
//! a date matches when the month matches AND (the day-of-month matches OR
//! the day-of-week matches). A field covering its whole domain (`*`)
//! defers to the other, so `0 0 12 * * 1` fires on Mondays only. All
//! other fields combine with AND.

use crate::calendar::Calendar;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    #[error("expected 6 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid {field} field: '{spec}'")]
    Field { field: &'static str, spec: String },
    #[error("{0} field matches nothing")]
    EmptyField(&'static str),
}

/// A parsed, valid cron expression.
///
/// Parsing rejects syntactically malformed fields and fields whose
/// resulting value set is empty (such an expression could never fire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
}

/// (name, min, max, wrap-modulo) per field, in source order.
const FIELDS: [(&str, u32, u32, Option<u32>); 6] = [
    ("seconds", 0, 59, None),
    ("minutes", 0, 59, None),
    ("hours", 0, 23, None),
    ("day-of-month", 1, 31, None),
    ("month", 1, 12, None),
    ("day-of-week", 0, 6, Some(7)),
];

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronParseError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != FIELDS.len() {
            return Err(CronParseError::FieldCount(parts.len()));
        }
        let mut masks = [0u64; 6];
        for (i, (spec, (name, min, max, modulo))) in parts.iter().zip(FIELDS).enumerate() {
            let mask = parse_field(spec, min, max, modulo)
                .ok_or(CronParseError::Field { field: name, spec: spec.to_string() })?;
            if mask == 0 {
                return Err(CronParseError::EmptyField(name));
            }
            masks[i] = mask;
        }
        Ok(Self {
            source: expression.to_string(),
            seconds: masks[0],
            minutes: masks[1],
            hours: masks[2],
            days_of_month: masks[3],
            months: masks[4],
            days_of_week: masks[5],
        })
    }

    /// The expression text as given at parse time.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the parsed field sets back into compact range notation.
    ///
    /// Re-parsing the rendered expression yields the same field sets.
    pub fn canonical_expression(&self) -> String {
        let masks =
            [self.seconds, self.minutes, self.hours, self.days_of_month, self.months, self.days_of_week];
        masks
            .iter()
            .zip(FIELDS)
            .map(|(&mask, (_, min, max, _))| render_field(mask, min, max))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Smallest instant strictly after `after` (floored to whole seconds)
    /// matching all fields and, when given, included by `calendar`.
    /// Returns `None` if no such instant exists at or before `max`.
    ///
    /// Works by jump-and-retest: on the first mismatching field, jump to
    /// the start of the next candidate unit (next month, day, hour, minute
    /// or second) and retest from the top, so finding a yearly trigger
    /// never scans second by second.
    pub fn next_after(
        &self,
        after: DateTime<Utc>,
        max: DateTime<Utc>,
        calendar: Option<&Calendar>,
    ) -> Option<DateTime<Utc>> {
        let mut t = floor_second(after) + chrono::Duration::seconds(1);
        while t <= max {
            if !bit(self.months, t.month()) {
                t = next_month_start(t)?;
                continue;
            }
            let day_ok = self.day_matches(t.day(), t.weekday().num_days_from_sunday());
            let calendar_ok = calendar.is_none_or(|c| c.is_included(t.date_naive()));
            if !day_ok || !calendar_ok {
                t = next_day_start(t)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = next_hour_start(t)?;
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t = next_minute_start(t);
                continue;
            }
            if !bit(self.seconds, t.second()) {
                t += chrono::Duration::seconds(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    /// Combined day predicate.
    ///
    /// A field covering its full domain is a wildcard and defers to the
    /// other; when both are restricted they combine with OR.
    fn day_matches(&self, day: u32, weekday: u32) -> bool {
        let dom_all = self.days_of_month == full_mask(1, 31);
        let dow_all = self.days_of_week == full_mask(0, 6);
        match (dom_all, dow_all) {
            (true, true) => true,
            (true, false) => bit(self.days_of_week, weekday),
            (false, true) => bit(self.days_of_month, day),
            (false, false) => {
                bit(self.days_of_month, day) || bit(self.days_of_week, weekday)
            }
        }
    }
}

fn full_mask(min: u32, max: u32) -> u64 {
    (min..=max).map(|v| 1u64 << v).sum()
}

fn bit(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1u64 << value) != 0
}

/// Parse one field spec into its membership bitmask.
///
/// Returns `None` on malformed syntax or out-of-range values. A value
/// equal to `modulo` wraps to the start of the domain (day-of-week 7 == 0).
fn parse_field(spec: &str, min: u32, max: u32, modulo: Option<u32>) -> Option<u64> {
    let mut mask = 0u64;
    for term in spec.split(',') {
        let (range, step) = match term.split_once('/') {
            Some((range, step)) => (range, step.parse::<u32>().ok().filter(|s| *s > 0)?),
            None => (term, 1),
        };
        let (start, stop) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (norm(a.parse().ok()?, min, max, modulo)?, norm(b.parse().ok()?, min, max, modulo)?)
        } else {
            let start = norm(range.parse().ok()?, min, max, modulo)?;
            // "N/step" runs to the end of the domain, bare "N" is a single value
            if term.contains('/') {
                (start, max)
            } else {
                (start, start)
            }
        };
        if start > stop {
            return None;
        }
        let mut v = start;
        while v <= stop {
            mask |= 1u64 << v;
            v += step;
        }
    }
    Some(mask)
}

fn norm(value: u32, min: u32, max: u32, modulo: Option<u32>) -> Option<u32> {
    let value = match modulo {
        Some(m) => value % m,
        None => value,
    };
    (min..=max).contains(&value).then_some(value)
}

/// Render a bitmask back into `*` or a compact comma/range list.
fn render_field(mask: u64, min: u32, max: u32) -> String {
    if mask == full_mask(min, max) {
        return "*".to_string();
    }
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for v in min..=max {
        if !bit(mask, v) {
            continue;
        }
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == v => *end = v,
            _ => runs.push((v, v)),
        }
    }
    runs.iter()
        .map(|&(a, b)| if a == b { a.to_string() } else { format!("{a}-{b}") })
        .collect::<Vec<_>>()
        .join(",")
}

fn floor_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

fn next_month_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

fn next_day_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = t.date_naive().succ_opt()?;
    Utc.with_ymd_and_hms(next.year(), next.month(), next.day(), 0, 0, 0).single()
}

fn next_hour_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(t.with_minute(0)?.with_second(0)? + chrono::Duration::hours(1))
}

fn next_minute_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = t.with_second(0).unwrap_or(t);
    floored + chrono::Duration::minutes(1)
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;