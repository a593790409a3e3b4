//! Runtime steps and the logic that runs them
//!
//! - [`Step`]: frozen merge of a selected step and its template
//! - [`Decision`]: what step logic asks the loop to do next
//! - [`StepLogic`] / [`StepRegistry`]: behaviour resolved by executor reference

mod decision;
mod logic;
mod model;
mod registry;

pub use decision::{
    CallbackOutput, CallbackRef, Decision, PauseSpec, StepError, SuspensionKind,
    SuspensionMemento, WaitSpec,
};
pub use logic::{StepContext, StepLogic};
pub use model::{materialize_steps, validate_workflow_template, Step, StepModelError};
pub use registry::StepRegistry;
