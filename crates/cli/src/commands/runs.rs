//! `cadence runs` — Inspect execution history.

use crate::app::{CliResult, Services};
use crate::commands::loop_cmd::{format_time, run_line};
use cadence_config::AppConfig;
use chrono::{DateTime, Utc};

pub async fn list(config: &AppConfig, loop_id: Option<&str>, limit: usize) -> CliResult {
    let services = Services::open(config).await?;
    let mut runs = match loop_id {
        Some(id) => services.history.list_for_loop(id).await?,
        None => {
            services
                .history
                .list_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
                .await?
        }
    };
    runs.reverse();

    if runs.is_empty() {
        println!("📋 No executions recorded.");
        return Ok(());
    }

    let shown = runs.len().min(limit);
    println!("📋 Executions ({shown} of {}):", runs.len());
    println!("{:-<72}", "");
    for log in runs.iter().take(limit) {
        println!("  {}", run_line(log));
    }
    Ok(())
}

pub async fn show(config: &AppConfig, execution_id: &str, full_traces: bool) -> CliResult {
    let services = Services::open(config).await?;
    let Some(log) = services.history.get(execution_id).await? else {
        println!("❌ Execution '{execution_id}' not found.");
        return Ok(());
    };

    println!("🧾 Execution '{}'", log.id);
    println!("   Loop:      {}", log.loop_id);
    println!("   Status:    {}", log.status);
    println!("   Started:   {}", format_time(Some(log.started_at)));
    println!("   Finished:  {}", format_time(log.finished_at));
    if let Some(path) = &log.log_file_path {
        println!("   Artifact:  {path}");
    }
    if let Some(error) = &log.error {
        println!("   Error:     {error}");
    }
    if !log.response_preview.is_empty() {
        println!("   Preview:   {}", log.response_preview);
    }

    let traces = services.history.traces(execution_id).await?;
    println!("   Traces:    {}", traces.len());
    for trace in &traces {
        if full_traces {
            println!("{}", serde_json::to_string_pretty(&trace.payload)?);
        } else {
            println!("   - {} at {}", trace.id, format_time(Some(trace.recorded_at)));
        }
    }
    Ok(())
}
