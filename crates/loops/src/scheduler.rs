//! Loop scheduler — one tick decides which loops are due and runs them.
//!
//! A loop is due when the first fire time after its reference instant has
//! been reached. The reference is `last_run_at`; a loop that has never run
//! is measured from the start of the current tick window (`now` minus the
//! tick interval), so a fire time that fell inside the window is caught
//! without replaying anything older.

use crate::cron::CronSchedule;
use crate::error::Result;
use crate::executor::LoopExecutor;
use crate::model::{ExecutionStatus, LoopDefinition};
use crate::registry::LoopRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Enabled loops examined
    pub considered: usize,
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    /// Due loops whose previous run was still in flight
    pub skipped_busy: usize,
    /// Loops whose schedule could not be evaluated
    pub skipped_invalid: usize,
}

pub struct LoopScheduler {
    registry: Arc<LoopRegistry>,
    executor: Arc<LoopExecutor>,
    tick_interval: Duration,
}

impl LoopScheduler {
    pub fn new(
        registry: Arc<LoopRegistry>,
        executor: Arc<LoopExecutor>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            tick_interval,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Run one tick against the wall clock.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as if the time were `now`. Due loops execute
    /// sequentially in id order.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let loops = self.registry.list_enabled().await?;
        let mut report = TickReport {
            considered: loops.len(),
            ..Default::default()
        };

        for def in loops {
            let next = match self.next_fire(&def, now) {
                Ok(next) => next,
                Err(reason) => {
                    warn!(loop_id = %def.id, schedule = %def.schedule, reason = %reason, "Cannot evaluate schedule, skipping");
                    report.skipped_invalid += 1;
                    continue;
                }
            };
            if next > now {
                continue;
            }

            report.due += 1;
            debug!(loop_id = %def.id, fire_time = %next, "Loop due");
            match self.executor.execute_loop(&def).await {
                Some(log) if log.status == ExecutionStatus::Completed => report.completed += 1,
                Some(_) => report.failed += 1,
                None => report.skipped_busy += 1,
            }
        }

        debug!(
            considered = report.considered,
            due = report.due,
            completed = report.completed,
            failed = report.failed,
            "Scheduler tick finished"
        );
        Ok(report)
    }

    /// First fire time after the loop's reference instant.
    ///
    /// A loop that has never run is measured from one tick interval before
    /// `now` rather than from `now` itself. Measuring from `now` would always
    /// land in the future, so a fresh loop would never become due; this way
    /// it fires at the first tick after a matching minute.
    pub fn next_fire(
        &self,
        def: &LoopDefinition,
        now: DateTime<Utc>,
    ) -> std::result::Result<DateTime<Utc>, String> {
        let schedule = CronSchedule::parse(&def.schedule).map_err(|e| e.to_string())?;
        let window = chrono::Duration::from_std(self.tick_interval).map_err(|e| e.to_string())?;
        let reference = def.last_run_at.unwrap_or(now - window);
        schedule
            .next_after(reference)
            .ok_or_else(|| "schedule never fires".to_string())
    }
}
