//! Loop runtime — owns the scheduler and sweeper periodic tasks.
//!
//! Each task is an independent interval loop, so a slow sweep never holds
//! up scheduling and vice versa. Every tick body runs in a task of its own:
//! an error or a panic inside it is logged and the next tick still fires.

use crate::error::{LoopError, Result};
use crate::executor::LoopExecutor;
use crate::model::LoopExecutionLog;
use crate::registry::LoopRegistry;
use crate::scheduler::LoopScheduler;
use crate::sweeper::ExecutionSweeper;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub tick_interval: Duration,
    pub sweep_interval: Duration,
    pub retention: chrono::Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(3600),
            retention: chrono::Duration::days(ExecutionSweeper::DEFAULT_RETENTION_DAYS),
        }
    }
}

pub struct LoopRuntime {
    registry: Arc<LoopRegistry>,
    executor: Arc<LoopExecutor>,
    scheduler: Arc<LoopScheduler>,
    sweeper: Arc<ExecutionSweeper>,
    sweep_interval: Duration,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopRuntime {
    pub fn new(executor: Arc<LoopExecutor>, settings: RuntimeSettings) -> Self {
        let registry = executor.registry().clone();
        let scheduler = Arc::new(LoopScheduler::new(
            registry.clone(),
            executor.clone(),
            settings.tick_interval,
        ));
        let sweeper = Arc::new(ExecutionSweeper::new(
            executor.history().clone(),
            settings.retention,
        ));
        Self {
            registry,
            executor,
            scheduler,
            sweeper,
            sweep_interval: settings.sweep_interval,
            scheduler_task: Mutex::new(None),
            sweeper_task: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Arc<LoopScheduler> {
        &self.scheduler
    }

    pub fn sweeper(&self) -> &Arc<ExecutionSweeper> {
        &self.sweeper
    }

    /// Start the scheduler task. Returns `false` if it was already running.
    pub fn start_scheduler(&self) -> bool {
        let scheduler = self.scheduler.clone();
        let period = scheduler.tick_interval();
        start_periodic(&self.scheduler_task, "scheduler", period, move || {
            let scheduler = scheduler.clone();
            async move {
                let report = scheduler.tick().await?;
                debug!(due = report.due, "Scheduler tick");
                Ok(())
            }
        })
    }

    /// Start the sweeper task. Returns `false` if it was already running.
    pub fn start_sweeper(&self) -> bool {
        let sweeper = self.sweeper.clone();
        start_periodic(&self.sweeper_task, "sweeper", self.sweep_interval, move || {
            let sweeper = sweeper.clone();
            async move {
                sweeper.sweep().await?;
                Ok(())
            }
        })
    }

    /// Start both periodic tasks.
    pub fn start(&self) {
        self.start_scheduler();
        self.start_sweeper();
        info!("Loop runtime started");
    }

    pub fn is_running(&self) -> bool {
        is_live(&self.scheduler_task) || is_live(&self.sweeper_task)
    }

    /// Run one loop now, through the same overlap guard as scheduled runs.
    /// `Ok(None)` when a run of that loop is already in flight.
    pub async fn trigger(&self, loop_id: &str) -> Result<Option<LoopExecutionLog>> {
        let def = self
            .registry
            .get_loop(loop_id)
            .await?
            .ok_or_else(|| LoopError::NotFound(loop_id.to_string()))?;
        Ok(self.executor.execute_loop(&def).await)
    }

    /// Stop both periodic tasks. In-flight tick bodies run to completion.
    pub fn shutdown(&self) {
        for slot in [&self.scheduler_task, &self.sweeper_task] {
            if let Some(handle) = take_slot(slot).take() {
                handle.abort();
            }
        }
        info!("Loop runtime stopped");
    }
}

impl Drop for LoopRuntime {
    fn drop(&mut self) {
        for slot in [&self.scheduler_task, &self.sweeper_task] {
            if let Some(handle) = take_slot(slot).take() {
                handle.abort();
            }
        }
    }
}

fn take_slot(slot: &Mutex<Option<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_live(slot: &Mutex<Option<JoinHandle<()>>>) -> bool {
    take_slot(slot).as_ref().is_some_and(|h| !h.is_finished())
}

fn start_periodic<F, Fut>(
    slot: &Mutex<Option<JoinHandle<()>>>,
    name: &'static str,
    period: Duration,
    body: F,
) -> bool
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut guard = take_slot(slot);
    if guard.as_ref().is_some_and(|h| !h.is_finished()) {
        debug!(task = name, "Periodic task already running");
        return false;
    }

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            // Isolate the body so a panic cannot end the loop
            match tokio::spawn(body()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = name, error = %e, "Periodic task failed"),
                Err(e) if e.is_panic() => error!(task = name, "Periodic task panicked"),
                Err(e) => error!(task = name, error = %e, "Periodic task aborted"),
            }
        }
    });
    *guard = Some(handle);
    info!(task = name, period_secs = period.as_secs_f64(), "Periodic task started");
    true
}
