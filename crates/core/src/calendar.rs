// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calendars: ordered include/exclude date-range rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One inclusion or exclusion rule over an inclusive date range.
///
/// Either bound may be open (`None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRule {
    pub include: bool,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl CalendarRule {
    fn matches(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// An ordered rule list restricting which dates a trigger may fire on.
///
/// `is_included` walks the rules in order and returns the first matching
/// rule's polarity; a date matching no rule is included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    rules: Vec<CalendarRule>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.rules.push(CalendarRule { include: true, from, to });
        self
    }

    pub fn exclude(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.rules.push(CalendarRule { include: false, from, to });
        self
    }

    pub fn rules(&self) -> &[CalendarRule] {
        &self.rules
    }

    pub fn is_included(&self, date: NaiveDate) -> bool {
        for rule in &self.rules {
            if rule.matches(date) {
                return rule.include;
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "calendar_tests.rs"]
mod tests;