//! Step-execution loop
//!
//! The `WorkflowLoop` drives one instance:
//! - Runs steps strictly in ascending index order
//! - Resolves each step's logic through the [`StepRegistry`]
//! - Interprets the returned [`Decision`], including wait/pause polling
//! - Persists a [`SuspensionMemento`] when a wait/pause is unresolved
//!
//! Resumption is external: calling [`WorkflowLoop::run`] again re-enters the
//! suspended step with its rehydrated decision.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::config::EngineConfig;
use crate::payload::WorkflowPayload;
use crate::persistence::{
    InstanceQuery, InstanceService, InstanceStep, PayloadStore, RunStatus, StepAttribs,
    StepAttribsUpdate, StoreError, WorkflowInstance,
};
use crate::reporter::{ReporterError, StepReporter, WorkflowReporter};
use crate::step::{
    Decision, PauseSpec, StepContext, StepError, StepLogic, StepRegistry, SuspensionKind,
    SuspensionMemento, WaitSpec,
};

/// Errors that abort a loop invocation
///
/// Step failures are not errors here; they end in [`LoopOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A status change could not be recorded
    #[error("reporter error: {0}")]
    Reporter(#[from] ReporterError),
}

/// Result of one loop invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Every step finished and the instance is `done`
    Passed,

    /// The instance had no steps
    Empty,

    /// A step failed and the instance is `error`
    Failed { step_index: usize, error: StepError },

    /// A wait/pause is unresolved; run again after `resume_after`
    Suspended {
        step_index: usize,
        resume_after: Duration,
        kind: SuspensionKind,
    },

    /// The per-run step limit was reached; run again to continue
    Yielded { next_step_index: usize },

    /// The instance was already `done` or `error`
    AlreadyTerminal(RunStatus),
}

impl LoopOutcome {
    /// Whether the instance needs no further runs
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Empty | Self::Failed { .. } | Self::AlreadyTerminal(_)
        )
    }
}

/// How a step's decision chain settled, before anything is recorded
enum StepExit {
    Passed,
    Skipped,
    Failed(StepError),
    Suspend {
        wait: WaitSpec,
        pause_reason: Option<String>,
    },
}

/// How processing of a single step ended
enum StepOutcome {
    Advanced,
    Failed(StepError),
    Suspended {
        resume_after: Duration,
        kind: SuspensionKind,
    },
}

/// Drives workflow instances through their steps
///
/// # Example
///
/// ```ignore
/// use waypoint_engine::prelude::*;
///
/// let registry = StepRegistry::new().with("notify", Notify);
/// let engine = WorkflowLoop::new(instances, payloads, Arc::new(registry));
///
/// match engine.run(instance_id).await? {
///     LoopOutcome::Suspended { resume_after, .. } => schedule(instance_id, resume_after),
///     outcome => println!("finished: {outcome:?}"),
/// }
/// ```
#[derive(Clone)]
pub struct WorkflowLoop {
    instances: Arc<dyn InstanceService>,
    payloads: Arc<dyn PayloadStore>,
    registry: Arc<StepRegistry>,
    config: EngineConfig,
}

impl std::fmt::Debug for WorkflowLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowLoop")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl WorkflowLoop {
    /// Create a loop with the default config
    pub fn new(
        instances: Arc<dyn InstanceService>,
        payloads: Arc<dyn PayloadStore>,
        registry: Arc<StepRegistry>,
    ) -> Self {
        Self {
            instances,
            payloads,
            registry,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn instances(&self) -> &Arc<dyn InstanceService> {
        &self.instances
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Advance an instance until it finishes, fails or suspends
    #[instrument(skip(self))]
    pub async fn run(&self, instance_id: Uuid) -> Result<LoopOutcome, LoopError> {
        let instance = self
            .instances
            .must_find_instance(InstanceQuery::by_id(instance_id))
            .await?;

        if instance.status.is_terminal() {
            debug!(%instance_id, status = %instance.status, "instance already in terminal state");
            return Ok(LoopOutcome::AlreadyTerminal(instance.status));
        }

        let reporter = WorkflowReporter::new(
            self.instances.clone(),
            instance.workflow_id.clone(),
            instance.id,
        );

        if instance.status == RunStatus::NotStarted {
            reporter.workflow_started().await?;
        }

        if instance.steps.is_empty() {
            reporter.workflow_is_empty().await?;
            return Ok(LoopOutcome::Empty);
        }

        let start = instance.current_step_index().unwrap_or(instance.steps.len());

        // A step resume was recorded but the workflow half of it was not
        if instance.status == RunStatus::Paused
            && instance
                .steps
                .get(start)
                .map_or(true, |entry| entry.status != RunStatus::Paused)
        {
            debug!(%instance_id, "completing interrupted resume");
            reporter.workflow_resuming().await?;
        }

        let mut payload =
            WorkflowPayload::new(instance.id, instance.meta.clone(), instance.input.clone());
        payload.load(self.payloads.as_ref()).await?;

        let mut finished = 0;

        for entry in &instance.steps[start..] {
            if entry.status == RunStatus::Done {
                continue;
            }

            let step_index = entry.step.index();
            if finished >= self.config.max_steps_per_run {
                debug!(%instance_id, step_index, "step limit reached, yielding");
                return Ok(LoopOutcome::Yielded {
                    next_step_index: step_index,
                });
            }

            match self
                .run_step(&instance, entry, &reporter, &mut payload)
                .await?
            {
                StepOutcome::Advanced => finished += 1,
                StepOutcome::Failed(error) => {
                    return Ok(LoopOutcome::Failed { step_index, error });
                }
                StepOutcome::Suspended { resume_after, kind } => {
                    info!(%instance_id, step_index, %kind, ?resume_after, "step suspended");
                    return Ok(LoopOutcome::Suspended {
                        step_index,
                        resume_after,
                        kind,
                    });
                }
            }
        }

        payload.save(self.payloads.as_ref()).await?;
        reporter.workflow_passed().await?;
        Ok(LoopOutcome::Passed)
    }

    async fn run_step(
        &self,
        instance: &WorkflowInstance,
        entry: &InstanceStep,
        reporter: &WorkflowReporter,
        payload: &mut WorkflowPayload,
    ) -> Result<StepOutcome, LoopError> {
        let step_index = entry.step.index();

        if entry.status == RunStatus::Error {
            // The step failure is durable; only the workflow failure is missing
            let error = StepError::new(entry.message.clone().unwrap_or_default());
            debug!(instance_id = %instance.id, step_index, "completing recorded step failure");
            reporter.workflow_failed(&error).await?;
            return Ok(StepOutcome::Failed(error));
        }

        let step_reporter = reporter.step(step_index);
        let mut guard = StepGuard {
            instance,
            step_index,
            reporter,
            step_reporter: &step_reporter,
            paused: None,
            has_memento: entry.attribs.suspension.is_some(),
        };

        match entry.status {
            RunStatus::NotStarted => step_reporter.step_started().await?,
            RunStatus::Paused => {
                guard.paused = Some(
                    entry
                        .attribs
                        .suspension
                        .as_ref()
                        .and_then(|m| m.pause_reason.clone())
                        .unwrap_or_default(),
                );
            }
            _ => {}
        }

        let exit = match self.registry.resolve(entry.step.executor()) {
            Ok(logic) => {
                let mut ctx = StepContext::new(&entry.step, payload, &step_reporter);
                self.decide(entry, logic.as_ref(), &mut ctx, &mut guard).await?
            }
            Err(error) => StepExit::Failed(error),
        };

        // Step writes are durable before the step claims any outcome
        payload.save(self.payloads.as_ref()).await?;

        match exit {
            StepExit::Passed => {
                guard.clear_memento(self).await?;
                step_reporter.step_passed().await?;
                Ok(StepOutcome::Advanced)
            }
            StepExit::Skipped => {
                guard.clear_memento(self).await?;
                step_reporter.step_skipped().await?;
                Ok(StepOutcome::Advanced)
            }
            StepExit::Failed(error) => guard.fail(self, error).await,
            StepExit::Suspend { wait, pause_reason } => guard.suspend(self, wait, pause_reason).await,
        }
    }

    /// Evaluate the step's decision chain until it settles
    async fn decide(
        &self,
        entry: &InstanceStep,
        logic: &dyn StepLogic,
        ctx: &mut StepContext<'_>,
        guard: &mut StepGuard<'_>,
    ) -> Result<StepExit, LoopError> {
        let instance_id = guard.instance.id;
        let step_index = guard.step_index;

        let first = match &entry.attribs.suspension {
            Some(memento) => {
                debug!(
                    %instance_id,
                    step_index,
                    kind = %memento.kind,
                    counter = memento.counter,
                    "rehydrating suspended decision"
                );
                memento.to_decision()
            }
            None => logic.run(ctx).await,
        };
        let mut decision = match first {
            Ok(decision) => decision,
            Err(error) => return Ok(StepExit::Failed(error)),
        };

        // A rehydrated pause was reported when it was first entered
        let mut pause_entered = entry.attribs.suspension.is_some();
        let mut evaluated = 0;

        loop {
            evaluated += 1;
            if evaluated > self.config.max_decisions_per_step {
                decision = Decision::Fail(StepError::contract(format!(
                    "step {step_index} chained more than {} decisions",
                    self.config.max_decisions_per_step
                )));
            }

            debug!(%instance_id, step_index, decision = decision.kind(), "processing decision");

            let (mut wait, pause_reason) = match decision {
                Decision::Proceed => return Ok(StepExit::Passed),
                Decision::Skip => return Ok(StepExit::Skipped),
                Decision::Fail(error) => return Ok(StepExit::Failed(error)),
                Decision::Wait(wait) => (wait, None),
                Decision::Pause(PauseSpec { wait, reason }) => (wait, Some(reason)),
            };

            if let Some(reason) = &pause_reason {
                if !pause_entered {
                    guard.step_reporter.step_paused(reason).await?;
                    guard.reporter.workflow_paused().await?;
                    guard.paused = Some(reason.clone());
                }
            }
            pause_entered = false;

            let check = match logic.call(&wait.check, ctx).await {
                Ok(output) => output.into_check(&wait.check),
                Err(error) => Err(error),
            };
            let passed = match check {
                Ok(passed) => passed,
                Err(error) => return Ok(StepExit::Failed(error)),
            };

            let next = if passed {
                wait.then_call.clone()
            } else {
                wait.counter += 1;
                if wait.counter < wait.max_attempts {
                    return Ok(StepExit::Suspend { wait, pause_reason });
                }
                debug!(%instance_id, step_index, attempts = wait.counter, "wait attempts exhausted");
                wait.otherwise.clone()
            };

            guard.leave_pause().await?;

            decision = match logic.call(&next, ctx).await {
                Ok(output) => match output.into_decision(&next) {
                    Ok(decision) => decision,
                    Err(error) => return Ok(StepExit::Failed(error)),
                },
                Err(error) => return Ok(StepExit::Failed(error)),
            };
        }
    }
}

/// Per-step bookkeeping shared by every exit path of `run_step`
struct StepGuard<'a> {
    instance: &'a WorkflowInstance,
    step_index: usize,
    reporter: &'a WorkflowReporter,
    step_reporter: &'a StepReporter,

    /// Reason of the pause currently reported, if any
    paused: Option<String>,

    /// Whether the step record holds a memento that must be cleared on exit
    has_memento: bool,
}

impl StepGuard<'_> {
    async fn save_attribs(&self, engine: &WorkflowLoop, attribs: StepAttribs) -> Result<(), LoopError> {
        engine
            .instances
            .save_step_attribs(StepAttribsUpdate {
                workflow_id: self.instance.workflow_id.clone(),
                instance_id: self.instance.id,
                step_index: self.step_index,
                attribs,
            })
            .await?;
        Ok(())
    }

    async fn clear_memento(&mut self, engine: &WorkflowLoop) -> Result<(), LoopError> {
        if self.has_memento {
            self.save_attribs(engine, StepAttribs::default()).await?;
            self.has_memento = false;
        }
        Ok(())
    }

    async fn leave_pause(&mut self) -> Result<(), LoopError> {
        if let Some(reason) = self.paused.take() {
            self.step_reporter.step_resumed(&reason).await?;
            self.reporter.workflow_resuming().await?;
        }
        Ok(())
    }

    async fn fail(
        &mut self,
        engine: &WorkflowLoop,
        error: StepError,
    ) -> Result<StepOutcome, LoopError> {
        // paused has no direct edge to error
        self.leave_pause().await?;
        self.clear_memento(engine).await?;
        self.step_reporter.step_failed(&error).await?;
        self.reporter.workflow_failed(&error).await?;
        Ok(StepOutcome::Failed(error))
    }

    async fn suspend(
        &mut self,
        engine: &WorkflowLoop,
        wait: WaitSpec,
        pause_reason: Option<String>,
    ) -> Result<StepOutcome, LoopError> {
        let seconds = wait.interval_seconds;
        let memento = match pause_reason {
            Some(reason) => SuspensionMemento::from_pause(&PauseSpec { wait, reason }),
            None => SuspensionMemento::from_wait(&wait),
        };
        let kind = memento.kind;

        self.save_attribs(engine, StepAttribs::suspended(memento)).await?;
        self.has_memento = true;

        let resume_after = if seconds == 0 {
            engine.config.default_interval
        } else {
            Duration::from_secs(seconds)
        };
        Ok(StepOutcome::Suspended { resume_after, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        InMemoryInstanceService, InMemoryPayloadStore, NewInstance, RunSpec, StatusEvent,
    };
    use crate::step::{CallbackOutput, CallbackRef, Step, StepLogic};
    use crate::template::{SelectedStepTemplate, StepTemplate};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Polls `check` and counts every callback it serves
    struct Poll {
        max_attempts: u32,
        ready_after: Option<u32>,
        pause: bool,
        checks: AtomicU32,
        thens: AtomicU32,
        otherwises: AtomicU32,
    }

    impl Poll {
        fn new(max_attempts: u32, ready_after: Option<u32>, pause: bool) -> Arc<Self> {
            Arc::new(Self {
                max_attempts,
                ready_after,
                pause,
                checks: AtomicU32::new(0),
                thens: AtomicU32::new(0),
                otherwises: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl StepLogic for Poll {
        async fn run(&self, _ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
            let wait = WaitSpec::new("check", "then", "otherwise")
                .every(5)
                .max_attempts(self.max_attempts);
            Ok(if self.pause {
                wait.pause("approval")
            } else {
                Decision::Wait(wait)
            })
        }

        async fn call(
            &self,
            callback: &CallbackRef,
            _ctx: &mut StepContext<'_>,
        ) -> Result<CallbackOutput, StepError> {
            match callback.name.as_str() {
                "check" => {
                    let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(self.ready_after.map_or(false, |after| n >= after).into())
                }
                "then" => {
                    self.thens.fetch_add(1, Ordering::SeqCst);
                    Ok(Decision::Proceed.into())
                }
                "otherwise" => {
                    self.otherwises.fetch_add(1, Ordering::SeqCst);
                    Ok(Decision::Skip.into())
                }
                other => Err(StepError::unknown_callback(other)),
            }
        }
    }

    /// Keeps answering `then` with another wait whose check passes
    struct Cycle;

    #[async_trait]
    impl StepLogic for Cycle {
        async fn run(&self, _ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
            Ok(Decision::Wait(WaitSpec::new("yes", "again", "again")))
        }

        async fn call(
            &self,
            callback: &CallbackRef,
            _ctx: &mut StepContext<'_>,
        ) -> Result<CallbackOutput, StepError> {
            match callback.name.as_str() {
                "yes" => Ok(true.into()),
                _ => Ok(Decision::Wait(WaitSpec::new("yes", "again", "again")).into()),
            }
        }
    }

    struct Harness {
        instances: Arc<InMemoryInstanceService>,
        engine: WorkflowLoop,
    }

    fn harness(registry: StepRegistry) -> Harness {
        let instances = Arc::new(InMemoryInstanceService::new());
        let engine = WorkflowLoop::new(
            instances.clone(),
            Arc::new(InMemoryPayloadStore::new()),
            Arc::new(registry),
        );
        Harness { instances, engine }
    }

    impl Harness {
        async fn instance(&self, executors: &[&str]) -> Uuid {
            let steps = executors
                .iter()
                .enumerate()
                .map(|(i, executor)| {
                    let template = StepTemplate::new(*executor, 1, *executor, *executor);
                    Step::materialize(i, &SelectedStepTemplate::new(*executor, 1), &template)
                        .unwrap()
                })
                .collect();
            self.instances
                .create_instance(
                    NewInstance {
                        workflow_id: "wf".into(),
                        workflow_version: 1,
                        steps,
                        created_by: "test".into(),
                        run_spec: RunSpec::default(),
                    },
                    Value::Null,
                    Value::Null,
                )
                .await
                .unwrap()
                .id
        }

        async fn load(&self, id: Uuid) -> WorkflowInstance {
            self.instances
                .must_find_instance(InstanceQuery::by_id(id))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_wait_bound_restores_counter() {
        let poll = Poll::new(3, None, false);
        let mut registry = StepRegistry::new();
        registry.register_arc("poll", poll.clone());
        let h = harness(registry);
        let id = h.instance(&["poll"]).await;

        for expected_counter in 1..=2 {
            let outcome = h.engine.run(id).await.unwrap();
            assert_eq!(
                outcome,
                LoopOutcome::Suspended {
                    step_index: 0,
                    resume_after: Duration::from_secs(5),
                    kind: SuspensionKind::Wait
                }
            );
            let memento = h.load(id).await.steps[0].attribs.suspension.clone().unwrap();
            assert_eq!(memento.counter, expected_counter);
        }

        let outcome = h.engine.run(id).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Passed);

        assert_eq!(poll.checks.load(Ordering::SeqCst), 3);
        assert_eq!(poll.otherwises.load(Ordering::SeqCst), 1);
        assert_eq!(poll.thens.load(Ordering::SeqCst), 0);

        let instance = h.load(id).await;
        assert_eq!(instance.steps[0].message.as_deref(), Some("skipped"));
        assert!(instance.steps[0].attribs.suspension.is_none());
    }

    #[tokio::test]
    async fn test_pause_reported_once() {
        let poll = Poll::new(10, Some(3), true);
        let mut registry = StepRegistry::new();
        registry.register_arc("approve", poll.clone());
        let h = harness(registry);
        let id = h.instance(&["approve"]).await;

        for _ in 0..2 {
            let outcome = h.engine.run(id).await.unwrap();
            assert!(matches!(
                outcome,
                LoopOutcome::Suspended {
                    kind: SuspensionKind::Pause,
                    ..
                }
            ));
            assert_eq!(h.load(id).await.status, RunStatus::Paused);
        }

        assert_eq!(h.engine.run(id).await.unwrap(), LoopOutcome::Passed);
        assert_eq!(poll.thens.load(Ordering::SeqCst), 1);

        let workflow_statuses: Vec<RunStatus> = h
            .instances
            .status_history(id)
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Workflow { status, .. } => Some(status),
                StatusEvent::Step { .. } => None,
            })
            .collect();
        assert_eq!(
            workflow_statuses,
            vec![
                RunStatus::InProgress,
                RunStatus::Paused,
                RunStatus::InProgress,
                RunStatus::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_logic_fails_workflow() {
        let h = harness(StepRegistry::new());
        let id = h.instance(&["ghost"]).await;

        let outcome = h.engine.run(id).await.unwrap();
        assert!(matches!(
            outcome,
            LoopOutcome::Failed { step_index: 0, ref error } if error.is_contract_error()
        ));

        let instance = h.load(id).await;
        assert_eq!(instance.status, RunStatus::Error);
        assert_eq!(instance.steps[0].status, RunStatus::Error);
        assert_eq!(
            h.engine.run(id).await.unwrap(),
            LoopOutcome::AlreadyTerminal(RunStatus::Error)
        );
    }

    #[tokio::test]
    async fn test_decision_chain_is_bounded() {
        let h = {
            let mut h = harness(StepRegistry::new().with("cycle", Cycle));
            h.engine = h
                .engine
                .clone()
                .with_config(EngineConfig::default().with_max_decisions_per_step(4));
            h
        };
        let id = h.instance(&["cycle"]).await;

        let outcome = h.engine.run(id).await.unwrap();
        match outcome {
            LoopOutcome::Failed { error, .. } => {
                assert!(matches!(error, StepError::Contract { .. }));
                assert!(error.to_string().contains("more than 4 decisions"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_limit_yields() {
        let poll = Poll::new(1, Some(1), false);
        let mut registry = StepRegistry::new();
        registry.register_arc("poll", poll);
        let mut h = harness(registry);
        h.engine = h
            .engine
            .clone()
            .with_config(EngineConfig::default().with_max_steps_per_run(1));
        let id = h.instance(&["poll", "poll"]).await;

        assert_eq!(
            h.engine.run(id).await.unwrap(),
            LoopOutcome::Yielded { next_step_index: 1 }
        );
        assert_eq!(h.engine.run(id).await.unwrap(), LoopOutcome::Passed);
    }

    #[tokio::test]
    async fn test_empty_instance() {
        let h = harness(StepRegistry::new());
        let id = h.instance(&[]).await;

        assert_eq!(h.engine.run(id).await.unwrap(), LoopOutcome::Empty);
        assert_eq!(h.load(id).await.status, RunStatus::Done);
    }
}
