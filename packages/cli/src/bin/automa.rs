// ABOUTME: Entry point for the automa binary
// ABOUTME: Loads .env and configuration, installs logging, dispatches subcommands

use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

use automa_cli::AppContext;
use automa_config::AutomaConfig;
use cli::agent::AgentCommands;
use cli::sandbox::SandboxCommands;

#[derive(Parser)]
#[command(name = "automa")]
#[command(about = "Automa - scheduled Python automation in isolated containers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Trigger one job now and print the execution record
    Run {
        job_id: String,
        /// Vault password for the job owner (defaults to AUTOMA_VAULT_PASSWORD)
        #[arg(long)]
        password: Option<String>,
        /// Print the execution record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage long-running agents
    #[command(subcommand)]
    Agent(AgentCommands),
    /// Inspect and clean up the container runtime
    #[command(subcommand)]
    Sandbox(SandboxCommands),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = AutomaConfig::from_env()?;
    let ctx = AppContext::connect(config).await?;

    match command {
        Commands::Serve => cli::serve::serve(&ctx).await,
        Commands::Run {
            job_id,
            password,
            json,
        } => cli::run::run_job(&ctx, &job_id, password, json).await,
        Commands::Agent(cmd) => cmd.execute(&ctx).await,
        Commands::Sandbox(cmd) => cmd.execute(&ctx).await,
    }
}
