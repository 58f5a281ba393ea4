//! # cadence-loops
//!
//! Autonomous, cron-scheduled model invocations.
//!
//! - [`LoopRegistry`]: CRUD over [`LoopDefinition`]s, schedules validated on write
//! - [`LoopScheduler`]: one tick finds due loops and runs them in id order
//! - [`LoopExecutor`]: a single run behind an [`OverlapGuard`], recorded as a
//!   [`LoopExecutionLog`] plus trace snapshot and JSON artifact
//! - [`ExecutionSweeper`]: drops execution records past retention
//! - [`LoopRuntime`]: owns the scheduler and sweeper periodic tasks
//!
//! All state lives in a [`KvStore`](cadence_core::KvStore); see [`keys`] for
//! the layout.

pub mod cron;
pub mod error;
pub mod executor;
pub mod guard;
pub mod history;
pub mod keys;
pub mod model;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use cron::{CronError, CronSchedule};
pub use error::{LoopError, Result};
pub use executor::{ExecutorSettings, LoopExecutor};
pub use guard::{GuardHandle, InMemoryGuard, LeaseGuard, OverlapGuard};
pub use history::ExecutionLogStore;
pub use model::{ExecutionStatus, LoopArtifact, LoopDefinition, LoopExecutionLog};
pub use registry::LoopRegistry;
pub use runtime::{LoopRuntime, RuntimeSettings};
pub use scheduler::{LoopScheduler, TickReport};
pub use sweeper::{ExecutionSweeper, SweepReport};
