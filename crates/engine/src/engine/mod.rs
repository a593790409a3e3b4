//! Workflow engine: the step loop and the trigger service

mod config;
mod executor;
mod trigger;

pub use config::EngineConfig;
pub use executor::{LoopError, LoopOutcome, WorkflowLoop};
pub use trigger::{RequestContext, TriggerError, TriggerMeta, TriggerService};
