// ABOUTME: Seam between the timer loop and whatever runs a fired job
// ABOUTME: The Coordinator implements it; tests substitute a recording dispatcher

use async_trait::async_trait;
use automa_core::JobExecution;
use automa_executions::{Coordinator, ExecutionError, RunSlot, Trigger};

#[async_trait]
pub trait JobDispatcher: Send + Sync + 'static {
    /// Claim the per-job slot, or `None` while a previous run is in flight
    fn try_reserve(&self, job_id: &str) -> Option<RunSlot>;

    /// Run the reserved job to completion
    async fn dispatch(&self, slot: RunSlot) -> Result<JobExecution, ExecutionError>;

    /// Close executions abandoned by a dead process. Returns how many were closed.
    async fn recover_stale(&self) -> Result<u64, ExecutionError> {
        Ok(0)
    }
}

#[async_trait]
impl JobDispatcher for Coordinator {
    fn try_reserve(&self, job_id: &str) -> Option<RunSlot> {
        Coordinator::try_reserve(self, job_id)
    }

    async fn dispatch(&self, slot: RunSlot) -> Result<JobExecution, ExecutionError> {
        self.execute_reserved(slot, Trigger::Scheduled).await
    }

    async fn recover_stale(&self) -> Result<u64, ExecutionError> {
        self.recover().await
    }
}
