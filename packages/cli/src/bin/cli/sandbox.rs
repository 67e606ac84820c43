// ABOUTME: `automa sandbox`: daemon health and orphaned container cleanup
// ABOUTME: Cleanup keeps containers that belong to agents recorded as running

use anyhow::{bail, Result};
use automa_cli::{display, AppContext};
use clap::Subcommand;
use colored::*;

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Check that Docker is reachable and the sandbox image is present
    Health,
    /// Remove managed containers left behind by earlier processes.
    /// Run it only while `automa serve` is stopped.
    Cleanup,
}

impl SandboxCommands {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        match self {
            SandboxCommands::Health => {
                let health = ctx.sandbox.health().await;
                println!("{}", display::health_table(&health));
                if !health.is_healthy() {
                    bail!("Sandbox runtime is not ready");
                }
                println!("{}", "Sandbox runtime is ready".green());
            }
            SandboxCommands::Cleanup => {
                let removed = ctx.remove_orphans().await?;
                if removed.is_empty() {
                    println!("{}", "No orphaned containers found".green());
                } else {
                    println!("{}", display::containers_table(&removed));
                    println!(
                        "{}",
                        format!("Removed {} orphaned container(s)", removed.len()).green()
                    );
                }
            }
        }
        Ok(())
    }
}
