use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::{ReporterError, StepReporter, EMPTY_MESSAGE};
use crate::persistence::{InstanceService, RunStatus, WorkflowStatusChange};
use crate::step::StepError;

/// Reports the lifecycle of a whole instance
#[derive(Clone)]
pub struct WorkflowReporter {
    service: Arc<dyn InstanceService>,
    workflow_id: String,
    instance_id: Uuid,
}

impl std::fmt::Debug for WorkflowReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowReporter")
            .field("workflow_id", &self.workflow_id)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl WorkflowReporter {
    pub fn new(
        service: Arc<dyn InstanceService>,
        workflow_id: impl Into<String>,
        instance_id: Uuid,
    ) -> Self {
        Self {
            service,
            workflow_id: workflow_id.into(),
            instance_id,
        }
    }

    /// Reporter for one of this instance's steps
    pub fn step(&self, step_index: usize) -> StepReporter {
        StepReporter::new(
            self.service.clone(),
            self.workflow_id.clone(),
            self.instance_id,
            step_index,
        )
    }

    async fn change(&self, status: RunStatus, message: Option<String>) -> Result<(), ReporterError> {
        self.service
            .change_workflow_status(WorkflowStatusChange {
                workflow_id: self.workflow_id.clone(),
                instance_id: self.instance_id,
                status,
                message,
            })
            .await?;
        Ok(())
    }

    pub async fn workflow_started(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::InProgress, None).await?;
        info!(instance_id = %self.instance_id, workflow_id = %self.workflow_id, "workflow started");
        Ok(())
    }

    pub async fn workflow_paused(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::Paused, None).await?;
        info!(instance_id = %self.instance_id, workflow_id = %self.workflow_id, "workflow paused");
        Ok(())
    }

    pub async fn workflow_resuming(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::InProgress, None).await?;
        info!(instance_id = %self.instance_id, workflow_id = %self.workflow_id, "workflow resuming");
        Ok(())
    }

    pub async fn workflow_passed(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::Done, None).await?;
        info!(instance_id = %self.instance_id, workflow_id = %self.workflow_id, "workflow passed");
        Ok(())
    }

    pub async fn workflow_failed(&self, error: &StepError) -> Result<(), ReporterError> {
        self.change(RunStatus::Error, Some(error.to_string())).await?;
        warn!(instance_id = %self.instance_id, workflow_id = %self.workflow_id, %error, "workflow failed");
        Ok(())
    }

    pub async fn workflow_is_empty(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::Done, Some(EMPTY_MESSAGE.to_string())).await?;
        info!(instance_id = %self.instance_id, workflow_id = %self.workflow_id, "workflow has no steps");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryInstanceService, InstanceQuery, NewInstance, RunSpec};
    use serde_json::Value;

    async fn setup() -> (Arc<InMemoryInstanceService>, WorkflowReporter) {
        let service = Arc::new(InMemoryInstanceService::new());
        let instance = service
            .create_instance(
                NewInstance {
                    workflow_id: "wf".into(),
                    workflow_version: 1,
                    steps: Vec::new(),
                    created_by: "test".into(),
                    run_spec: RunSpec::default(),
                },
                Value::Null,
                Value::Null,
            )
            .await
            .unwrap();
        let reporter = WorkflowReporter::new(service.clone(), "wf", instance.id);
        (service, reporter)
    }

    #[tokio::test]
    async fn test_empty_workflow_is_done() {
        let (service, reporter) = setup().await;
        reporter.workflow_started().await.unwrap();
        reporter.workflow_is_empty().await.unwrap();

        let instance = service
            .must_find_instance(InstanceQuery::by_id(reporter.instance_id))
            .await
            .unwrap();
        assert_eq!(instance.status, RunStatus::Done);
        assert_eq!(instance.message.as_deref(), Some("empty"));
    }

    #[tokio::test]
    async fn test_failure_message_is_persisted() {
        let (service, reporter) = setup().await;
        reporter.workflow_started().await.unwrap();
        reporter.workflow_paused().await.unwrap();
        reporter.workflow_resuming().await.unwrap();
        reporter
            .workflow_failed(&StepError::new("boom"))
            .await
            .unwrap();

        let instance = service
            .must_find_instance(InstanceQuery::by_id(reporter.instance_id))
            .await
            .unwrap();
        assert_eq!(instance.status, RunStatus::Error);
        assert_eq!(instance.message.as_deref(), Some("boom"));

        let again = reporter.workflow_passed().await;
        assert!(matches!(again, Err(ReporterError::Store(_))));
    }
}
