// ABOUTME: `automa agent`: start, stop and restart long-running agents

use anyhow::Result;
use automa_cli::{display, AppContext};
use clap::Subcommand;
use colored::*;

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Start the agent's container
    Start {
        agent_id: String,
        /// Vault password for the agent owner (defaults to AUTOMA_VAULT_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },
    /// Stop the agent and remove its container
    Stop { agent_id: String },
    /// Replace the agent's container with a fresh one
    Restart {
        agent_id: String,
        #[arg(long)]
        password: Option<String>,
    },
}

impl AgentCommands {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let agent = match self {
            AgentCommands::Start { agent_id, password } => {
                ctx.supervisor
                    .start_agent(agent_id, password.as_deref())
                    .await?
            }
            AgentCommands::Stop { agent_id } => ctx.supervisor.stop_agent(agent_id).await?,
            AgentCommands::Restart { agent_id, password } => {
                ctx.supervisor
                    .restart_agent(agent_id, password.as_deref())
                    .await?
            }
        };

        println!("{}", format!("Agent '{}' updated", agent.name).green());
        display::print_agent(&agent);
        Ok(())
    }
}
