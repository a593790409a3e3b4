//! Lifecycle reporters
//!
//! Reporters translate lifecycle transitions into persisted status changes
//! plus `tracing` events. They never decide anything: the loop tells them
//! what happened and they record it.

mod step;
mod workflow;

pub use step::StepReporter;
pub use workflow::WorkflowReporter;

use crate::persistence::StoreError;

/// Status message stored when a step is skipped
pub const SKIPPED_MESSAGE: &str = "skipped";

/// Status message stored when a workflow has no steps
pub const EMPTY_MESSAGE: &str = "empty";

/// Errors from reporter operations
#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    /// The status change could not be persisted
    #[error("failed to persist status: {0}")]
    Store(#[from] StoreError),
}
