// ABOUTME: Five-field cron expressions evaluated through the cron crate
// ABOUTME: Normalises day-of-week numbering and restores the day-of-month OR day-of-week rule

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// `minute hour day-of-month month day-of-week`, evaluated in UTC.
///
/// Day-of-week accepts `0-7` (0 and 7 are Sunday) or three-letter names.
/// When both day fields are restricted a time matches if either one does.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedules: Vec<cron::Schedule>,
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

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: String| {
            SchedulerError::InvalidSchedule(format!("cron expression {:?}: {}", expression, reason))
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        };

        let weekdays = normalize_day_of_week(day_of_week).map_err(invalid)?;
        let dom_restricted = !is_wildcard(day_of_month);

        // The cron crate ANDs the two day fields; classic cron ORs them
        let variants = match (&weekdays, dom_restricted) {
            (Some(days), true) => vec![
                format!("0 {} {} {} {} *", minute, hour, day_of_month, month),
                format!("0 {} {} * {} {}", minute, hour, month, days),
            ],
            (Some(days), false) => {
                vec![format!("0 {} {} * {} {}", minute, hour, month, days)]
            }
            (None, _) => vec![format!("0 {} {} {} {} *", minute, hour, day_of_month, month)],
        };

        let schedules = variants
            .iter()
            .map(|v| cron::Schedule::from_str(v).map_err(|e| invalid(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Earliest matching minute strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }
}

fn is_wildcard(field: &str) -> bool {
    field == "*" || field == "?"
}

/// Expand a day-of-week field into an explicit list of day names.
/// Returns `None` when every day matches.
fn normalize_day_of_week(field: &str) -> std::result::Result<Option<String>, String> {
    if is_wildcard(field) {
        return Ok(None);
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step {:?}", step))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (weekday(a)?, weekday(b)?)
        } else {
            let day = weekday(range)?;
            // `n/step` runs from n to the end of the week
            (day, if step.is_some() { 6 } else { day })
        };
        if start > end {
            return Err(format!("day-of-week range {:?} is reversed", range));
        }

        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            days.insert(day % 7);
        }
    }

    if days.len() == 7 {
        return Ok(None);
    }
    Ok(Some(
        days.iter()
            .map(|d| WEEKDAYS[*d as usize])
            .collect::<Vec<_>>()
            .join(","),
    ))
}

/// `0`-`7` or a three-letter name
fn weekday(value: &str) -> std::result::Result<u8, String> {
    if let Ok(n) = value.parse::<u8>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day-of-week {} out of range 0-7", n))
        };
    }
    WEEKDAYS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|i| i as u8)
        .ok_or_else(|| format!("unknown day-of-week {:?}", value))
}
