// ABOUTME: Execution Coordinator for Automa
// ABOUTME: Resolves job, script and credentials, runs the sandbox, and records the terminal execution

pub mod agents;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod password;
mod resolve;

pub use agents::{AgentSupervisor, ShutdownReport};
pub use coordinator::{Coordinator, Trigger};
pub use error::{ExecutionError, Result};
pub use locks::{JobLocks, RunSlot};
pub use password::{EnvPasswordSource, PasswordSource, StaticPasswordSource};
pub use resolve::redact;
