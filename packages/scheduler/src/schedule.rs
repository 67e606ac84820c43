// ABOUTME: Typed job schedules and next-fire computation
// ABOUTME: Intervals anchor on the scheduled fire time; missed fires coalesce into one

use crate::cron_expr::CronSchedule;
use crate::error::{Result, SchedulerError};
use automa_core::{Job, ScheduleType};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Fires once at `at`, or immediately when `None`
    Once { at: Option<DateTime<Utc>> },
    Interval { every: Duration },
    Cron(CronSchedule),
}

impl Schedule {
    pub fn from_job(job: &Job) -> Result<Self> {
        job.validate_schedule()?;
        match job.schedule_type {
            ScheduleType::Once => Ok(Self::Once { at: job.next_run }),
            ScheduleType::Interval => {
                let seconds = job.interval_seconds.unwrap_or_default();
                Ok(Self::Interval {
                    every: Duration::seconds(seconds),
                })
            }
            ScheduleType::Cron => {
                let expression = job.cron_expression.as_deref().unwrap_or_default();
                Ok(Self::Cron(CronSchedule::parse(expression)?))
            }
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::Once { .. })
    }

    /// First fire for a job that is being (re)scheduled at `now`.
    /// An interval job fires `every` after its last fire, or right away if it never fired.
    pub fn first_fire(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        match self {
            Self::Once { at } => Ok(at.unwrap_or(now)),
            Self::Interval { every } => Ok(last_run.map(|last| last + *every).unwrap_or(now)),
            Self::Cron(cron) => cron.next_after(now).ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!(
                    "cron expression {:?} never fires",
                    cron.expression()
                ))
            }),
        }
    }

    /// Fire that follows the one scheduled at `scheduled`, observed at `now`.
    /// `None` once the schedule is exhausted.
    pub fn next_fire(
        &self,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Once { .. } => None,
            Self::Interval { every } => Some(next_interval(scheduled, *every, now)),
            Self::Cron(cron) => cron.next_after(now),
        }
    }
}

/// `scheduled + k * every` for the smallest `k >= 1` that lands after `now`
fn next_interval(scheduled: DateTime<Utc>, every: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = scheduled + every;
    if next > now {
        return next;
    }
    let every_ms = every.num_milliseconds().max(1);
    let behind_ms = (now - scheduled).num_milliseconds();
    let skipped = behind_ms / every_ms + 1;
    scheduled + Duration::milliseconds(every_ms * skipped)
}
