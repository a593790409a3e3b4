//! # Waypoint Workflow Engine
//!
//! A sequential workflow orchestration engine with resumable wait/pause
//! decisions.
//!
//! ## Features
//!
//! - **Override validation**: workflow authors may only customize the step fields a template allows
//! - **Frozen steps**: templates are merged into immutable runtime steps at trigger time
//! - **Payload stores**: keyed, lazily hydrated per-step stores; the only channel between steps
//! - **Wait/Pause decisions**: polled checks persisted as mementos and resumed by a later run
//! - **Pluggable boundaries**: instance service, template catalog, payload store and executor
//!   dispatch are traits with in-memory implementations
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TriggerService                          │
//! │  (resolves template version, materializes steps)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ create_instance / dispatch
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutorDispatch                         │
//! │  (InProcessDispatcher: timers, explicit resume, shutdown)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ run(instance_id)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowLoop                            │
//! │  (StepLogic → Decision → Reporters → InstanceService)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              InstanceService / PayloadStore                  │
//! │  (status records, suspension mementos, step payloads)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use waypoint_engine::prelude::*;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl StepLogic for Greet {
//!     async fn run(&self, ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
//!         let name = ctx.config("name").cloned().unwrap_or_default();
//!         ctx.set_key("greeting", json!(format!("hello {name}")));
//!         Ok(Decision::Proceed)
//!     }
//! }
//!
//! let registry = Arc::new(StepRegistry::new().with("greet", Greet));
//! let engine = WorkflowLoop::new(instances.clone(), payloads, registry);
//! let dispatcher = Arc::new(InProcessDispatcher::new(engine));
//! let trigger = TriggerService::new(catalog, instances, dispatcher);
//!
//! trigger
//!     .trigger_workflow(&RequestContext::new("alice"), TriggerMeta::latest("hello"), json!({}))
//!     .await?;
//! ```

pub mod dispatch;
pub mod engine;
pub mod payload;
pub mod persistence;
pub mod reporter;
pub mod step;
pub mod template;

/// Prelude for common imports
pub mod prelude {
    pub use crate::dispatch::{
        DispatchError, DispatchRequest, ExecutorDispatch, InProcessDispatcher, RecordingDispatch,
    };
    pub use crate::engine::{
        EngineConfig, LoopError, LoopOutcome, RequestContext, TriggerError, TriggerMeta,
        TriggerService, WorkflowLoop,
    };
    pub use crate::payload::{StepPayload, WorkflowPayload};
    pub use crate::persistence::{
        InMemoryInstanceService, InMemoryPayloadStore, InstanceQuery, InstanceService,
        PayloadStore, RunSpec, RunStatus, StoreError, WorkflowInstance,
    };
    pub use crate::step::{
        CallbackOutput, CallbackRef, Decision, Step, StepContext, StepError, StepLogic,
        StepRegistry, WaitSpec,
    };
    pub use crate::template::{
        InMemoryTemplateCatalog, InputField, OverrideOption, SelectedStepTemplate, StepTemplate,
        TemplateCatalog, WorkflowTemplate,
    };
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use dispatch::{DispatchError, DispatchRequest, ExecutorDispatch, InProcessDispatcher};
pub use engine::{
    EngineConfig, LoopError, LoopOutcome, RequestContext, TriggerError, TriggerMeta,
    TriggerService, WorkflowLoop,
};
pub use payload::{StepPayload, WorkflowPayload};
pub use persistence::{
    InMemoryInstanceService, InMemoryPayloadStore, InstanceService, PayloadStore, RunStatus,
    StoreError, WorkflowInstance,
};
pub use step::{Decision, Step, StepContext, StepError, StepLogic, StepRegistry};
pub use template::{InMemoryTemplateCatalog, TemplateCatalog, WorkflowTemplate};
