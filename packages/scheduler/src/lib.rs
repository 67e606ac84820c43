// ABOUTME: Job scheduler for Automa: once, fixed-interval and cron schedules
// ABOUTME: A single timer loop computes next fires and hands due jobs to a dispatcher

pub mod cron_expr;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod schedule;

pub use cron_expr::CronSchedule;
pub use dispatch::JobDispatcher;
pub use engine::{Scheduler, SchedulerHandle, TickReport};
pub use error::{Result, SchedulerError};
pub use schedule::Schedule;
