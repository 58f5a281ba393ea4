//! `cadence loop` — Manage scheduled loops.

use crate::app::{CliResult, Services};
use cadence_config::AppConfig;
use cadence_loops::{CronSchedule, ExecutionStatus, LoopDefinition, LoopError, LoopExecutionLog};
use chrono::Utc;

const RECENT_RUNS: usize = 5;

pub async fn add(
    config: &AppConfig,
    id: &str,
    schedule: &str,
    prompt: &str,
    enabled: bool,
) -> CliResult {
    let services = Services::open(config).await?;
    let existed = services.registry.get_loop(id).await?.is_some();

    match services.registry.upsert_loop(id, schedule, prompt, enabled).await {
        Ok(def) => {
            let verb = if existed { "updated" } else { "added" };
            println!("✅ Loop '{id}' {verb} with schedule: {}", def.schedule);
            if let Some(next) = CronSchedule::parse(&def.schedule)
                .ok()
                .and_then(|s| s.next_after(Utc::now()))
            {
                println!("   Next fire: {}", next.format("%Y-%m-%d %H:%M UTC"));
            }
            Ok(())
        }
        Err(e @ (LoopError::InvalidSchedule(_) | LoopError::NeverFires(_))) => {
            println!("❌ {e}");
            println!("   Example: \"*/30 * * * *\" = every 30 minutes");
            Ok(())
        }
        Err(e @ LoopError::InvalidId(_)) => {
            println!("❌ {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn list(config: &AppConfig) -> CliResult {
    let services = Services::open(config).await?;
    let loops = services.registry.list_loops().await?;

    if loops.is_empty() {
        println!("📋 No loops defined.");
        println!();
        println!("   Add one with:");
        println!("   cadence loop add morning-digest \"0 8 * * *\" \"Summarize overnight activity\"");
        return Ok(());
    }

    println!("📋 Loops ({}):", loops.len());
    println!("{:-<72}", "");
    for def in &loops {
        let status = if def.enabled { "✅" } else { "⏸️ " };
        println!(
            "  {status} {:<24} {:<16} last run: {}",
            def.id,
            def.schedule,
            format_time(def.last_run_at)
        );
    }

    Ok(())
}

pub async fn show(config: &AppConfig, id: &str) -> CliResult {
    let services = Services::open(config).await?;
    let Some(def) = services.registry.get_loop(id).await? else {
        println!("❌ Loop '{id}' not found.");
        return Ok(());
    };

    print_definition(&def);

    let mut runs = services.history.list_for_loop(id).await?;
    runs.reverse();
    if runs.is_empty() {
        println!("   Runs:      none");
    } else {
        println!("   Runs ({} total, newest first):", runs.len());
        for log in runs.iter().take(RECENT_RUNS) {
            println!("   {}", run_line(log));
        }
    }

    Ok(())
}

pub async fn remove(config: &AppConfig, id: &str) -> CliResult {
    let services = Services::open(config).await?;
    if services.registry.delete_loop(id).await? {
        println!("🗑️  Loop '{id}' removed. Its execution history is kept until swept.");
    } else {
        println!("❌ Loop '{id}' not found.");
    }
    Ok(())
}

pub async fn set_enabled(config: &AppConfig, id: &str, enabled: bool) -> CliResult {
    let services = Services::open(config).await?;
    match services.registry.set_enabled(id, enabled).await {
        Ok(_) if enabled => println!("▶️  Loop '{id}' resumed."),
        Ok(_) => println!("⏸️  Loop '{id}' paused."),
        Err(LoopError::NotFound(_)) => println!("❌ Loop '{id}' not found."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn next(config: &AppConfig, id: &str, count: usize) -> CliResult {
    let services = Services::open(config).await?;
    let Some(def) = services.registry.get_loop(id).await? else {
        println!("❌ Loop '{id}' not found.");
        return Ok(());
    };

    let schedule = CronSchedule::parse(&def.schedule)?;
    let upcoming = schedule.upcoming(Utc::now(), count);
    println!("🕐 Next {} fire times for '{id}' ({}):", upcoming.len(), def.schedule);
    for at in upcoming {
        println!("   {}", at.format("%a %Y-%m-%d %H:%M UTC"));
    }
    if !def.enabled {
        println!("   ⏸️  Loop is paused; none of these will fire until resumed.");
    }
    Ok(())
}

pub async fn run(config: &AppConfig, id: &str) -> CliResult {
    let services = Services::open(config).await?;
    let Some(def) = services.registry.get_loop(id).await? else {
        println!("❌ Loop '{id}' not found.");
        return Ok(());
    };

    println!("🔄 Running loop '{id}'...");
    let executor = services.executor(config)?;
    match executor.execute_loop(&def).await {
        Some(log) => {
            println!("   {}", run_line(&log));
            if let Some(path) = &log.log_file_path {
                println!("   Artifact:  {path}");
            }
            if !log.response_preview.is_empty() {
                println!();
                println!("{}", log.response_preview);
            }
        }
        None => println!("⏭️  Loop '{id}' is already running elsewhere; skipped."),
    }
    Ok(())
}

fn print_definition(def: &LoopDefinition) {
    let status = if def.enabled { "enabled" } else { "paused" };
    println!("🔁 Loop '{}'", def.id);
    println!("   Schedule:  {}", def.schedule);
    println!("   Status:    {status}");
    println!("   Created:   {}", def.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   Updated:   {}", def.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   Last run:  {}", format_time(def.last_run_at));
    println!("   Prompt:    {}", def.prompt);
}

pub(crate) fn run_line(log: &LoopExecutionLog) -> String {
    let icon = match log.status {
        ExecutionStatus::Running => "⏳",
        ExecutionStatus::Completed => "✅",
        ExecutionStatus::Failed => "❌",
    };
    let duration = log
        .duration()
        .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_else(|| "-".into());
    let mut line = format!(
        "{icon} {:<36} {:<9} {:>7}  traces: {}",
        log.id,
        log.status.to_string(),
        duration,
        log.trace_count
    );
    if let Some(error) = &log.error {
        line.push_str(&format!("  error: {error}"));
    }
    line
}

pub(crate) fn format_time(at: Option<chrono::DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".into())
}
