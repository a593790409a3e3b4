//! Step logic trait and its execution context

use async_trait::async_trait;
use serde_json::Value;

use super::decision::{CallbackOutput, CallbackRef, Decision, StepError};
use super::model::Step;
use crate::payload::{StepPayload, WorkflowPayload};
use crate::reporter::{ReporterError, StepReporter};

/// Behaviour behind a step's executor reference
///
/// `run` is invoked once per step entry. Wait and pause decisions name
/// their callbacks with [`CallbackRef`]s, which the loop resolves through
/// `call` on every evaluation, including after a resume.
///
/// # Example
///
/// ```ignore
/// struct Approval;
///
/// #[async_trait]
/// impl StepLogic for Approval {
///     async fn run(&self, _ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
///         Ok(WaitSpec::new("is_approved", "approved", "rejected").pause("awaiting approval"))
///     }
///
///     async fn call(
///         &self,
///         callback: &CallbackRef,
///         ctx: &mut StepContext<'_>,
///     ) -> Result<CallbackOutput, StepError> {
///         match callback.name.as_str() {
///             "is_approved" => Ok(ctx.get_value("approved").is_some().into()),
///             "approved" => Ok(Decision::Proceed.into()),
///             "rejected" => Ok(Decision::fail("not approved").into()),
///             _ => Err(StepError::unknown_callback(&callback.name)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait StepLogic: Send + Sync + 'static {
    /// Run the step and decide what happens next
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<Decision, StepError>;

    /// Evaluate a named callback
    ///
    /// Logic without callbacks keeps the default, which rejects every name.
    async fn call(
        &self,
        callback: &CallbackRef,
        ctx: &mut StepContext<'_>,
    ) -> Result<CallbackOutput, StepError> {
        let _ = ctx;
        Err(StepError::unknown_callback(&callback.name))
    }
}

/// What a step's logic sees while it runs
pub struct StepContext<'a> {
    step: &'a Step,
    payload: &'a mut WorkflowPayload,
    reporter: &'a StepReporter,
}

impl<'a> StepContext<'a> {
    pub fn new(step: &'a Step, payload: &'a mut WorkflowPayload, reporter: &'a StepReporter) -> Self {
        Self {
            step,
            payload,
            reporter,
        }
    }

    pub fn step(&self) -> &Step {
        self.step
    }

    pub fn step_index(&self) -> usize {
        self.step.index()
    }

    /// Merged config value of the step
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.step.config(key)
    }

    /// Trigger metadata of the instance
    pub fn meta(&self) -> &Value {
        self.payload.meta()
    }

    /// Original trigger input of the instance
    pub fn input(&self) -> &Value {
        self.payload.input()
    }

    /// Look a key up in this step's payload, then in the nearest upstream step
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        let index = self.step.index();
        self.payload
            .step_payload(index)
            .and_then(|p| p.get_value(key))
            .or_else(|| self.payload.searchable_stores().upstream_value(key, index))
    }

    pub fn set_key(&mut self, key: impl Into<String>, value: Value) {
        self.own_payload().set_key(key, value);
    }

    pub fn remove_key(&mut self, key: &str) -> Option<Value> {
        self.own_payload().remove_key(key)
    }

    /// This step's payload
    pub fn own_payload(&mut self) -> &mut StepPayload {
        self.payload.get_step_payload(self.step.index())
    }

    /// The whole instance payload, read-only
    pub fn workflow_payload(&self) -> &WorkflowPayload {
        &*self.payload
    }

    /// Publish a progress message on the step record
    pub async fn status_message(&self, message: &str) -> Result<(), ReporterError> {
        self.reporter.status_message(message).await
    }

    pub async fn clear_status_message(&self) -> Result<(), ReporterError> {
        self.reporter.clear_status_message().await
    }
}

impl std::fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step_index", &self.step.index())
            .field("executor", &self.step.executor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryInstanceService;
    use crate::template::{SelectedStepTemplate, StepTemplate};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl StepLogic for Echo {
        async fn run(&self, ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
            let value = ctx.get_value("x").cloned().unwrap_or(Value::Null);
            ctx.set_key("echo", value);
            Ok(Decision::Proceed)
        }
    }

    fn step(index: usize) -> Step {
        let template = StepTemplate::new("echo", 1, "Echo", "echo");
        Step::materialize(index, &SelectedStepTemplate::new("echo", 1), &template).unwrap()
    }

    #[tokio::test]
    async fn test_context_reads_upstream_and_writes_own_payload() {
        let instance_id = Uuid::now_v7();
        let mut payload = WorkflowPayload::new(instance_id, json!({"by": "ci"}), Value::Null);
        payload.get_step_payload(0).set_key("x", json!("a"));

        let step = step(1);
        let reporter = StepReporter::new(Arc::new(InMemoryInstanceService::new()), "wf", instance_id, 1);
        let mut ctx = StepContext::new(&step, &mut payload, &reporter);

        assert_eq!(ctx.meta(), &json!({"by": "ci"}));
        Echo.run(&mut ctx).await.unwrap();

        assert_eq!(
            payload.step_payload(1).and_then(|p| p.get_value("echo")),
            Some(&json!("a"))
        );
    }

    #[tokio::test]
    async fn test_default_call_rejects_callbacks() {
        let instance_id = Uuid::now_v7();
        let mut payload = WorkflowPayload::new(instance_id, Value::Null, Value::Null);
        let step = step(0);
        let reporter = StepReporter::new(Arc::new(InMemoryInstanceService::new()), "wf", instance_id, 0);
        let mut ctx = StepContext::new(&step, &mut payload, &reporter);

        let err = Echo
            .call(&CallbackRef::new("poll"), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err, StepError::unknown_callback("poll"));
    }
}
