//! `steward run`: Run the service with its background jobs.

use steward_scheduler::TokioScheduler;
use tracing::info;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let steward = super::open_steward().await?;
    let config = steward.config();

    println!("Steward — Starting");
    println!("   Store:        {}", steward.store().name());
    println!("   Decisions:    {}", steward.decisions().decisions().len());
    println!("   Drain every:  {} ms", config.executor.drain_interval_ms);
    println!("   Persist every: {} s", config.scheduler.persist_interval_secs);

    let scheduler = TokioScheduler::new();
    steward.start(&scheduler);
    info!("Steward running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    scheduler.shutdown();
    steward.shutdown().await?;
    println!("Stopped.");
    Ok(())
}
