//! `cadence sweep` — Remove execution records past retention.

use crate::app::{CliResult, Services};
use cadence_config::AppConfig;
use cadence_loops::ExecutionSweeper;

pub async fn run(config: &AppConfig) -> CliResult {
    let services = Services::open(config).await?;
    let retention = chrono::Duration::days(i64::from(config.loops.retention_days));
    let sweeper = ExecutionSweeper::new(services.history.clone(), retention);

    println!("🧹 Sweeping executions older than {} days...", config.loops.retention_days);
    let report = sweeper.sweep().await?;
    println!("   Removed:        {}", report.removed);
    println!("   Files deleted:  {}", report.files_deleted);
    if report.file_errors > 0 || report.record_errors > 0 {
        println!(
            "   ⚠️  {} file errors, {} record errors (see logs)",
            report.file_errors, report.record_errors
        );
    }
    Ok(())
}
