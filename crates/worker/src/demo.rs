//! Demo step logic and templates served by the worker

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use waypoint_engine::step::{
    CallbackOutput, CallbackRef, Decision, StepContext, StepError, StepLogic, StepRegistry,
    WaitSpec,
};
use waypoint_engine::template::{
    InMemoryTemplateCatalog, InputField, OverrideOption, SelectedStepTemplate, StepTemplate,
    WorkflowTemplate,
};

pub const RELEASE_WORKFLOW: &str = "release";

/// Resolves the ref to release from the trigger input
pub struct Checkout;

#[async_trait]
impl StepLogic for Checkout {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
        let git_ref = ctx
            .input()
            .get("ref")
            .cloned()
            .unwrap_or_else(|| json!("main"));
        ctx.set_key("ref", git_ref);
        Ok(Decision::Proceed)
    }
}

/// Polls until enough checks have reported green
pub struct AwaitChecks;

#[async_trait]
impl StepLogic for AwaitChecks {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
        let every = ctx.config("poll_secs").and_then(Value::as_u64).unwrap_or(1);
        let attempts = ctx
            .config("max_polls")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(5);

        Ok(Decision::wait(
            WaitSpec::new("checks_green", "checks_passed", "checks_timed_out")
                .every(every)
                .max_attempts(attempts),
        ))
    }

    async fn call(
        &self,
        callback: &CallbackRef,
        ctx: &mut StepContext<'_>,
    ) -> Result<CallbackOutput, StepError> {
        match callback.name.as_str() {
            "checks_green" => {
                let polls = ctx
                    .own_payload()
                    .get_value("polls")
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    + 1;
                ctx.set_key("polls", json!(polls));
                let needed = ctx.config("polls_needed").and_then(Value::as_u64).unwrap_or(2);
                ctx.status_message(&format!("checks polled {polls}/{needed}"))
                    .await
                    .map_err(|e| StepError::new(e.to_string()))?;
                Ok((polls >= needed).into())
            }
            "checks_passed" => Ok(Decision::Proceed.into()),
            "checks_timed_out" => Ok(Decision::fail("checks did not pass in time").into()),
            _ => Err(StepError::unknown_callback(&callback.name)),
        }
    }
}

/// Logs the release and records it in the payload
pub struct Announce;

#[async_trait]
impl StepLogic for Announce {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
        let git_ref = ctx.get_value("ref").cloned().unwrap_or(Value::Null);
        let channel = ctx
            .config("channel")
            .and_then(Value::as_str)
            .unwrap_or("#releases")
            .to_string();

        info!(%channel, git_ref = %git_ref, "release announced");
        ctx.set_key("announced", json!({ "channel": channel, "ref": git_ref }));
        Ok(Decision::Proceed)
    }
}

/// Registry with every demo executor
pub fn registry() -> StepRegistry {
    StepRegistry::new()
        .with("checkout", Checkout)
        .with("await_checks", AwaitChecks)
        .with("announce", Announce)
}

/// Catalog holding the demo step templates and the release workflow
pub fn catalog() -> InMemoryTemplateCatalog {
    let catalog = InMemoryTemplateCatalog::new();

    catalog.publish_step(
        StepTemplate::new("checkout", 1, "Checkout", "checkout")
            .with_desc("Resolve the ref to release"),
    );
    catalog.publish_step(
        StepTemplate::new("await_checks", 1, "Await checks", "await_checks")
            .with_input(InputField::new("poll_secs").with_default(json!(1)))
            .with_input(InputField::new("max_polls").with_default(json!(5)))
            .with_input(InputField::new("polls_needed").with_default(json!(2))),
    );
    catalog.publish_step(
        StepTemplate::new("announce", 1, "Announce", "announce")
            .with_skippable(true)
            .with_input(InputField::new("channel").with_default(json!("#releases"))),
    );

    catalog.publish(
        WorkflowTemplate::new(RELEASE_WORKFLOW, 1, "Release")
            .with_step(SelectedStepTemplate::new("checkout", 1))
            .with_step(SelectedStepTemplate::new("await_checks", 1))
            .with_step(
                SelectedStepTemplate::new("announce", 1)
                    .with_props_override(OverrideOption::allow(["channel"]))
                    .with_default("channel", json!("#deploys")),
            ),
    );

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waypoint_engine::dispatch::InProcessDispatcher;
    use waypoint_engine::engine::{
        LoopOutcome, RequestContext, TriggerMeta, TriggerService, WorkflowLoop,
    };
    use waypoint_engine::persistence::{
        InMemoryInstanceService, InMemoryPayloadStore, InstanceQuery, InstanceService, RunStatus,
    };

    #[tokio::test(start_paused = true)]
    async fn test_release_workflow_runs_to_done() {
        let instances = Arc::new(InMemoryInstanceService::new());
        let payloads = Arc::new(InMemoryPayloadStore::new());
        let engine = WorkflowLoop::new(instances.clone(), payloads.clone(), Arc::new(registry()));
        let dispatcher = InProcessDispatcher::new(engine);
        let trigger = TriggerService::new(
            Arc::new(catalog()),
            instances.clone(),
            Arc::new(dispatcher.clone()),
        );

        let summary = trigger
            .trigger_workflow(
                &RequestContext::new("tester"),
                TriggerMeta::latest(RELEASE_WORKFLOW),
                json!({"ref": "v1.0"}),
            )
            .await
            .unwrap();

        dispatcher.drain().await;
        assert_eq!(dispatcher.last_outcome(summary.id), Some(LoopOutcome::Passed));

        let instance = instances
            .must_find_instance(InstanceQuery::by_id(summary.id))
            .await
            .unwrap();
        assert_eq!(instance.status, RunStatus::Done);
        assert_eq!(instance.steps[1].message, None);

        let payload = payloads.snapshot(summary.id).unwrap();
        assert_eq!(payload.store[1].content.get("polls"), Some(&json!(2)));
        assert_eq!(
            payload.store[2].content.get("announced"),
            Some(&json!({"channel": "#deploys", "ref": "v1.0"}))
        );
    }
}
