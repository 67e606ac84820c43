// ABOUTME: Terminal rendering for executions, agents and sandbox health
// ABOUTME: Plain tables via comfy-table; colour only on status words

use automa_core::{Agent, AgentStatus, ExecutionStatus, JobExecution};
use automa_sandbox::{ManagedContainer, SandboxHealth};
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn execution_status(status: ExecutionStatus) -> ColoredString {
    match status {
        ExecutionStatus::Success => status.as_str().green(),
        ExecutionStatus::Failed | ExecutionStatus::Timeout => status.as_str().red(),
        ExecutionStatus::Pending | ExecutionStatus::Running => status.as_str().yellow(),
    }
}

fn agent_status(status: AgentStatus) -> ColoredString {
    match status {
        AgentStatus::Running => status.as_str().green(),
        AgentStatus::Stopped => status.as_str().normal(),
        AgentStatus::Error => status.as_str().red(),
    }
}

pub fn execution_table(execution: &JobExecution) -> Table {
    let mut table = table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Execution".to_string(), execution.id.clone()]);
    table.add_row(vec!["Job".to_string(), execution.job_id.clone()]);
    table.add_row(vec![
        "Status".to_string(),
        execution_status(execution.status).to_string(),
    ]);
    table.add_row(vec![
        "Started".to_string(),
        execution.started_at.to_rfc3339(),
    ]);
    if let Some(finished_at) = execution.finished_at {
        let seconds = (finished_at - execution.started_at).num_milliseconds() as f64 / 1000.0;
        table.add_row(vec!["Duration".to_string(), format!("{:.1}s", seconds)]);
    }
    if let Some(exit_code) = execution.exit_code {
        table.add_row(vec!["Exit code".to_string(), exit_code.to_string()]);
    }
    if let Some(kind) = execution.error_kind {
        table.add_row(vec!["Error kind".to_string(), kind.code().to_string()]);
    }
    table.add_row(vec!["Attempts".to_string(), execution.attempts.to_string()]);
    table
}

pub fn print_execution(execution: &JobExecution) {
    println!("{}", execution_table(execution));
    if let Some(output) = &execution.output {
        println!("{}", "Output:".cyan());
        println!("{}", output.trim_end());
    }
    if let Some(error_log) = &execution.error_log {
        println!("{}", "Errors:".cyan());
        println!("{}", error_log.trim_end().red());
    }
}

pub fn print_agent(agent: &Agent) {
    println!("{:<12} {}", "Agent:".cyan(), agent.id);
    println!("{:<12} {}", "Name:".cyan(), agent.name);
    println!("{:<12} {}", "Status:".cyan(), agent_status(agent.status));
    if let Some(container_id) = &agent.container_id {
        println!("{:<12} {}", "Container:".cyan(), container_id);
    }
}

pub fn health_table(health: &SandboxHealth) -> Table {
    let yes_no = |ok: bool| if ok { "yes".green() } else { "no".red() };
    let mut table = table();
    table.set_header(vec!["Check", "Result"]);
    table.add_row(vec![
        "Docker daemon reachable".to_string(),
        yes_no(health.daemon_available).to_string(),
    ]);
    table.add_row(vec![
        format!("Image {} present", health.image),
        yes_no(health.image_present).to_string(),
    ]);
    table
}

pub fn containers_table(containers: &[ManagedContainer]) -> Table {
    let mut table = table();
    table.set_header(vec!["Container", "Name", "Was running"]);
    for container in containers {
        table.add_row(vec![
            container.id.clone(),
            container.name.clone(),
            container.running.to_string(),
        ]);
    }
    table
}
