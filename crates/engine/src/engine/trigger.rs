//! Trigger service: template lookup, instance creation, hand-off

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::dispatch::{DispatchError, DispatchRequest, ExecutorDispatch};
use crate::persistence::{InstanceService, InstanceSummary, NewInstance, RunSpec, StoreError};
use crate::step::{materialize_steps, StepModelError};
use crate::template::{CatalogError, TemplateCatalog, WorkflowTemplate};

/// Caller identity, already authorized upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user: String,
    #[serde(default)]
    pub tenant: Option<String>,
}

impl RequestContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

/// What to trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMeta {
    pub workflow_id: String,

    /// Template version; `None` runs the latest
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub run_spec: RunSpec,

    /// Free-form metadata stored on the instance
    #[serde(default)]
    pub meta: Value,
}

impl TriggerMeta {
    pub fn latest(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            version: None,
            run_spec: RunSpec::default(),
            meta: Value::Null,
        }
    }

    pub fn version(workflow_id: impl Into<String>, version: u32) -> Self {
        Self {
            version: Some(version),
            ..Self::latest(workflow_id)
        }
    }

    pub fn with_run_spec(mut self, run_spec: RunSpec) -> Self {
        self.run_spec = run_spec;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Errors from triggering a workflow
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// No template with this id/version
    #[error("workflow template not found: {id} (version {version:?})")]
    TemplateNotFound { id: String, version: Option<u32> },

    /// A step could not be materialized
    #[error("invalid workflow template: {0}")]
    Validation(StepModelError),

    /// Catalog failure other than a missing workflow template
    #[error("catalog error: {0}")]
    Catalog(CatalogError),

    /// Instance could not be created
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Instance was created but could not be handed to the executor
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl From<CatalogError> for TriggerError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::TemplateNotFound { id, version } => {
                Self::TemplateNotFound { id, version }
            }
            other => Self::Catalog(other),
        }
    }
}

impl From<StepModelError> for TriggerError {
    fn from(err: StepModelError) -> Self {
        match err {
            StepModelError::Catalog(catalog) => catalog.into(),
            other => Self::Validation(other),
        }
    }
}

/// Starts workflow instances
///
/// # Example
///
/// ```ignore
/// let trigger = TriggerService::new(catalog, instances, dispatcher);
/// let summary = trigger
///     .trigger_workflow(&RequestContext::new("alice"), TriggerMeta::latest("deploy"), input)
///     .await?;
/// ```
#[derive(Clone)]
pub struct TriggerService {
    catalog: Arc<dyn TemplateCatalog>,
    instances: Arc<dyn InstanceService>,
    dispatch: Arc<dyn ExecutorDispatch>,
}

impl TriggerService {
    pub fn new(
        catalog: Arc<dyn TemplateCatalog>,
        instances: Arc<dyn InstanceService>,
        dispatch: Arc<dyn ExecutorDispatch>,
    ) -> Self {
        Self {
            catalog,
            instances,
            dispatch,
        }
    }

    /// Create an instance of a workflow template and hand it to the executor
    #[instrument(skip(self, ctx, trigger, input), fields(user = %ctx.user, workflow_id = %trigger.workflow_id))]
    pub async fn trigger_workflow(
        &self,
        ctx: &RequestContext,
        trigger: TriggerMeta,
        input: Value,
    ) -> Result<InstanceSummary, TriggerError> {
        let template = self.resolve_template(&trigger).await?;
        let steps = materialize_steps(&template, self.catalog.as_ref()).await?;

        let instance = self
            .instances
            .create_instance(
                NewInstance {
                    workflow_id: template.id.clone(),
                    workflow_version: template.version,
                    steps,
                    created_by: ctx.user.clone(),
                    run_spec: trigger.run_spec.clone(),
                },
                trigger.meta,
                input,
            )
            .await?;

        info!(
            instance_id = %instance.id,
            workflow_id = %instance.workflow_id,
            workflow_version = instance.workflow_version,
            steps = instance.steps.len(),
            "workflow instance created"
        );

        self.dispatch
            .dispatch(DispatchRequest::now(instance.id, trigger.run_spec.target))
            .await?;

        Ok(instance.summary())
    }

    async fn resolve_template(&self, trigger: &TriggerMeta) -> Result<WorkflowTemplate, TriggerError> {
        match trigger.version {
            Some(version) => Ok(self
                .catalog
                .must_find_version(&trigger.workflow_id, Some(version))
                .await?),
            None => self
                .catalog
                .find_version(&trigger.workflow_id, None)
                .await?
                .ok_or_else(|| TriggerError::TemplateNotFound {
                    id: trigger.workflow_id.clone(),
                    version: None,
                }),
        }
    }
}
