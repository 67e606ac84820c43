// ABOUTME: Per-key mutual exclusion for executions and agent lifecycle operations
// ABOUTME: A held RunSlot marks its key busy until dropped; contenders are refused, never queued

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `job_id`, or `None` if it is already held
    pub fn try_acquire(&self, job_id: &str) -> Option<RunSlot> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(job_id.to_string()) {
            return None;
        }
        Some(RunSlot {
            job_id: job_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, job_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }
}

/// Exclusive right to run one job. Released on drop.
#[derive(Debug)]
pub struct RunSlot {
    job_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl RunSlot {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}
