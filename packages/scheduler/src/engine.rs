// ABOUTME: Single timer loop that fires due jobs through a JobDispatcher
// ABOUTME: Next fire is computed and persisted before the run starts; runs are independent tasks

use crate::dispatch::JobDispatcher;
use crate::error::Result;
use crate::schedule::Schedule;
use automa_config::SchedulerConfig;
use automa_core::Job;
use automa_storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Jobs fired and skipped by one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub fired: Vec<String>,
    /// Due, but a previous run was still in flight
    pub skipped: Vec<String>,
    /// Deactivated or deleted in storage; removed from the active set without firing
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    schedule: Schedule,
    next_run: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
}

/// Owns the active job set. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    storage: Storage,
    dispatcher: Arc<dyn JobDispatcher>,
    config: SchedulerConfig,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

/// Running timer loop. Dropping it leaves the loop running; call `stop`.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for it to exit. Runs already dispatched keep going.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("scheduler loop ended abnormally: {e}");
        }
    }
}

impl Scheduler {
    pub fn new(storage: Storage, dispatcher: Arc<dyn JobDispatcher>, config: SchedulerConfig) -> Self {
        Self {
            storage,
            dispatcher,
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reconcile the active set with storage. Active jobs not yet registered are
    /// added, keeping persisted fire times so fires missed while the process was
    /// down happen once on the next tick. Registered jobs whose rows are gone or
    /// inactive are dropped. Jobs with invalid schedules are logged and skipped.
    /// Returns how many jobs were newly registered.
    pub async fn load_active_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let active = self.storage.list_active_jobs().await?;
        let active_ids: HashSet<String> = active.iter().map(|job| job.id.clone()).collect();

        let mut loaded = 0;
        for job in active {
            if self.entries().contains_key(&job.id) {
                continue;
            }
            let registered = match job.next_run {
                Some(next_run) => {
                    Schedule::from_job(&job).map(|schedule| {
                        self.insert(&job, schedule, next_run);
                        next_run
                    })
                }
                _ => self.schedule_at(&job, now).await,
            };
            match registered {
                Ok(next_run) => {
                    debug!(job_id = %job.id, %next_run, "job registered");
                    loaded += 1;
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "skipping job that could not be registered"),
            }
        }

        let unlisted: Vec<String> = self
            .entries()
            .keys()
            .filter(|id| !active_ids.contains(*id))
            .cloned()
            .collect();
        for job_id in unlisted {
            // Registered after the listing was read, or really deactivated
            if !self.is_still_active(&job_id).await {
                self.unschedule(&job_id);
            }
        }

        info!(count = loaded, active = self.active_jobs(), "active jobs synced");
        Ok(loaded)
    }

    /// Whether the stored row still exists and is active. Read errors count as active.
    async fn is_still_active(&self, job_id: &str) -> bool {
        match self.storage.get_job(job_id).await {
            Ok(job) => job.is_active,
            Err(StorageError::NotFound { .. }) => false,
            Err(e) => {
                error!(%job_id, error = %e, "failed to re-read job");
                true
            }
        }
    }

    /// Compute the job's next fire from now, persist it and add the job to the
    /// active set. An invalid schedule is rejected here, never at fire time.
    pub async fn schedule(&self, job: &Job) -> Result<DateTime<Utc>> {
        self.schedule_at(job, Utc::now()).await
    }

    async fn schedule_at(&self, job: &Job, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let schedule = Schedule::from_job(job)?;
        let next_run = schedule.first_fire(job.last_run, now)?;
        self.storage
            .update_job_schedule(&job.id, Some(next_run), job.last_run, true)
            .await?;
        self.insert(job, schedule, next_run);
        info!(job_id = %job.id, schedule_type = %job.schedule_type, %next_run, "job scheduled");
        Ok(next_run)
    }

    fn insert(&self, job: &Job, schedule: Schedule, next_run: DateTime<Utc>) {
        self.entries().insert(
            job.id.clone(),
            Entry {
                schedule,
                next_run,
                last_run: job.last_run,
            },
        );
    }

    /// Remove a job from the active set. Returns whether it was present.
    pub fn unschedule(&self, job_id: &str) -> bool {
        let removed = self.entries().remove(job_id).is_some();
        if removed {
            info!(%job_id, "job unscheduled");
        }
        removed
    }

    pub fn next_run(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.entries().get(job_id).map(|e| e.next_run)
    }

    pub fn active_jobs(&self) -> usize {
        self.entries().len()
    }

    /// Fire every job due at `now` exactly once. Each fire is rescheduled
    /// before its run is spawned, so a slow run never delays the next fire.
    /// A job deactivated or deleted in storage is dropped instead of fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut due: Vec<(String, DateTime<Utc>)> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.next_run <= now)
            .map(|(id, entry)| (id.clone(), entry.next_run))
            .collect();
        due.sort_by_key(|(_, scheduled)| *scheduled);

        let mut report = TickReport::default();
        for (job_id, scheduled) in due {
            match self.storage.get_job(&job_id).await {
                Ok(job) if job.is_active => {}
                Ok(_) | Err(StorageError::NotFound { .. }) => {
                    info!(%job_id, "job no longer active, dropping it");
                    self.unschedule(&job_id);
                    report.dropped.push(job_id);
                    continue;
                }
                Err(e) => {
                    // Stays due; the next tick tries again
                    error!(%job_id, error = %e, "failed to re-read due job");
                    continue;
                }
            }

            match self.dispatcher.try_reserve(&job_id) {
                Some(slot) => {
                    if !self.advance(&job_id, scheduled, now, true).await {
                        report.dropped.push(job_id);
                        continue;
                    }
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let id = job_id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.dispatch(slot).await {
                            error!(job_id = %id, error_kind = %e.kind(), "job dispatch failed: {e}");
                        }
                    });
                    info!(%job_id, %scheduled, "job fired");
                    report.fired.push(job_id);
                }
                None => {
                    warn!(%job_id, %scheduled, "fire skipped, previous run still in flight");
                    if self.advance(&job_id, scheduled, now, false).await {
                        report.skipped.push(job_id);
                    } else {
                        report.dropped.push(job_id);
                    }
                }
            }
        }
        report
    }

    /// Move a job past the fire scheduled at `scheduled`.
    /// A skipped once-job is left due; a fired one is deactivated.
    /// Returns false when storage shows the job was deactivated or deleted, in
    /// which case it has been dropped from the active set.
    async fn advance(&self, job_id: &str, scheduled: DateTime<Utc>, now: DateTime<Utc>, fired: bool) -> bool {
        let update = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(job_id) else {
                return false;
            };
            if fired {
                entry.last_run = Some(scheduled);
            }
            match entry.schedule.next_fire(scheduled, now) {
                Some(next_run) => {
                    entry.next_run = next_run;
                    Some((Some(next_run), entry.last_run, true))
                }
                None if !entry.schedule.is_recurring() && !fired => None,
                None => {
                    let last_run = entry.last_run;
                    entries.remove(job_id);
                    Some((None, last_run, false))
                }
            }
        };

        let Some((next_run, last_run, is_active)) = update else {
            return true;
        };
        if !is_active {
            info!(%job_id, "job finished its schedule and was deactivated");
        }
        match self
            .storage
            .update_job_schedule(job_id, next_run, last_run, is_active)
            .await
        {
            Ok(()) => true,
            Err(StorageError::JobInactive(_) | StorageError::NotFound { .. }) => {
                info!(%job_id, "job deactivated while firing, dropping it");
                self.unschedule(job_id);
                false
            }
            Err(e) => {
                error!(%job_id, error = %e, "failed to persist job schedule");
                true
            }
        }
    }

    /// Pick up jobs created or deactivated since the last sync, then close
    /// executions whose owning process died
    pub async fn sync(&self) {
        if let Err(e) = self.load_active_jobs().await {
            error!(error_kind = %e.kind(), "failed to sync active jobs: {e}");
        }
        match self.dispatcher.recover_stale().await {
            Ok(0) => {}
            Ok(closed) => info!(closed, "stale executions closed"),
            Err(e) => error!(error_kind = %e.kind(), "failed to close stale executions: {e}"),
        }
    }

    /// Load active jobs and run the timer loop until the handle is stopped
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = scheduler.load_active_jobs().await {
                error!("failed to load active jobs: {e}");
            }
            info!(tick_ms = scheduler.config.tick_interval.as_millis() as u64, "scheduler started");

            let mut interval = tokio::time::interval(scheduler.config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let sync_every = scheduler.config.sync_interval;
            let mut sync = tokio::time::interval_at(Instant::now() + sync_every, sync_every);
            sync.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.tick(Utc::now()).await;
                    }
                    _ = sync.tick() => {
                        scheduler.sync().await;
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            info!("scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        SchedulerHandle { shutdown, task }
    }
}
