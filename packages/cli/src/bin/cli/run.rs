// ABOUTME: `automa run`: trigger one job immediately
// ABOUTME: Exits non-zero when the execution did not succeed

use anyhow::{bail, Result};
use automa_cli::{display, AppContext};
use automa_core::ExecutionStatus;
use automa_executions::Trigger;

pub async fn run_job(
    ctx: &AppContext,
    job_id: &str,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let trigger = match password {
        Some(password) => Trigger::manual_with_password(password),
        None => Trigger::manual(),
    };

    let execution = ctx.coordinator.execute(job_id, trigger).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        display::print_execution(&execution);
    }

    if execution.status != ExecutionStatus::Success {
        bail!("Execution {} finished with status {}", execution.id, execution.status);
    }
    Ok(())
}
