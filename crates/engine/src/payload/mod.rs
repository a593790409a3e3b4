//! Step and workflow payload stores
//!
//! Payloads are keyed, lazily hydrated stores scoped to a step or an
//! instance. Step `N` reads what steps `< N` wrote through
//! [`SearchableStores`].

mod step_payload;
mod workflow_payload;

pub use step_payload::{PayloadContent, StepPayload, StepPayloadMemento};
pub use workflow_payload::{SearchableStores, WorkflowPayload, WorkflowPayloadMemento};
