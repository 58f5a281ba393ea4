//! `cadence daemon` — Run the scheduler and sweeper until interrupted.

use crate::app::{self, CliResult, Services};
use cadence_config::AppConfig;
use cadence_loops::LoopRuntime;
use tracing::{info, warn};

pub async fn run(config: &AppConfig) -> CliResult {
    let services = Services::open(config).await?;

    println!("🔁 Cadence daemon starting");
    println!("   Store:     {}", services.store.name());
    println!("   Model:     {}", config.inference.model);
    println!("   Tick:      every {}s", config.loops.tick_interval_secs);
    println!(
        "   Sweep:     every {}s, {} day retention",
        config.loops.sweep_interval_secs, config.loops.retention_days
    );

    let (seeded, errors) = app::seed_loops(&services.registry, &config.loops.definitions).await;
    for err in &errors {
        warn!("Loop seed error: {err}");
    }
    if !config.loops.definitions.is_empty() {
        println!("   Seeded:    {seeded}/{} loops from config", config.loops.definitions.len());
    }

    let enabled = services.registry.list_enabled().await?;
    println!("   Loops:     {} enabled", enabled.len());

    let executor = services.executor(config)?;
    let runtime = LoopRuntime::new(executor, app::runtime_settings(&config.loops));
    runtime.start();
    info!("Loop runtime started");

    tokio::signal::ctrl_c().await?;
    println!();
    println!("🛑 Shutting down...");
    runtime.shutdown();
    info!("Loop runtime stopped");
    Ok(())
}
