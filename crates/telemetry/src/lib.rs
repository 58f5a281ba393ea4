//! Execution tracing for Cadence inference runs.
//!
//! Provides span-based tracing of every model call and tool execution, and
//! an in-process [`TraceRecorder`] that serves the records as a
//! [`TraceSource`](cadence_core::TraceSource).

pub mod model;
pub mod recorder;

pub use model::{Span, SpanKind, Trace};
pub use recorder::TraceRecorder;

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
