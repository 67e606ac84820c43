// ABOUTME: `automa serve`: recovery, scheduler loop and graceful shutdown
// ABOUTME: Running agents are stopped on Ctrl-C after the scheduler exits

use anyhow::Result;
use automa_cli::AppContext;
use tracing::{info, warn};

pub async fn serve(ctx: &AppContext) -> Result<()> {
    let health = ctx.sandbox.health().await;
    if !health.is_healthy() {
        warn!(
            daemon_available = health.daemon_available,
            image = %health.image,
            image_present = health.image_present,
            "Sandbox runtime is not ready; runs will fail until it is"
        );
    }

    ctx.recover().await?;

    let scheduler = ctx.scheduler();
    let handle = scheduler.start();
    info!("Automa is running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    handle.stop().await;
    let report = ctx.supervisor.shutdown_all().await?;
    info!(
        stopped = report.stopped,
        failed = report.failed,
        "Agents shut down"
    );
    ctx.storage.close().await;
    Ok(())
}
