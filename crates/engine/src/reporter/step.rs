use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ReporterError, SKIPPED_MESSAGE};
use crate::persistence::{InstanceService, RunStatus, StepMessageChange, StepStatusChange};
use crate::step::StepError;

/// Reports the lifecycle of one step of an instance
#[derive(Clone)]
pub struct StepReporter {
    service: Arc<dyn InstanceService>,
    workflow_id: String,
    instance_id: Uuid,
    step_index: usize,
}

impl std::fmt::Debug for StepReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepReporter")
            .field("workflow_id", &self.workflow_id)
            .field("instance_id", &self.instance_id)
            .field("step_index", &self.step_index)
            .finish()
    }
}

impl StepReporter {
    pub fn new(
        service: Arc<dyn InstanceService>,
        workflow_id: impl Into<String>,
        instance_id: Uuid,
        step_index: usize,
    ) -> Self {
        Self {
            service,
            workflow_id: workflow_id.into(),
            instance_id,
            step_index,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    async fn change(&self, status: RunStatus, message: Option<String>) -> Result<(), ReporterError> {
        self.service
            .change_step_status(StepStatusChange {
                workflow_id: self.workflow_id.clone(),
                instance_id: self.instance_id,
                step_index: self.step_index,
                status,
                message,
            })
            .await?;
        Ok(())
    }

    pub async fn step_started(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::InProgress, None).await?;
        info!(instance_id = %self.instance_id, step_index = self.step_index, "step started");
        Ok(())
    }

    pub async fn step_paused(&self, reason: &str) -> Result<(), ReporterError> {
        self.change(RunStatus::Paused, Some(reason.to_string())).await?;
        info!(instance_id = %self.instance_id, step_index = self.step_index, %reason, "step paused");
        Ok(())
    }

    pub async fn step_resumed(&self, reason: &str) -> Result<(), ReporterError> {
        self.change(RunStatus::InProgress, None).await?;
        info!(instance_id = %self.instance_id, step_index = self.step_index, %reason, "step resumed");
        Ok(())
    }

    pub async fn step_failed(&self, error: &StepError) -> Result<(), ReporterError> {
        self.change(RunStatus::Error, Some(error.to_string())).await?;
        warn!(instance_id = %self.instance_id, step_index = self.step_index, %error, "step failed");
        Ok(())
    }

    pub async fn step_passed(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::Done, None).await?;
        info!(instance_id = %self.instance_id, step_index = self.step_index, "step passed");
        Ok(())
    }

    pub async fn step_skipped(&self) -> Result<(), ReporterError> {
        self.change(RunStatus::Done, Some(SKIPPED_MESSAGE.to_string())).await?;
        info!(instance_id = %self.instance_id, step_index = self.step_index, "step skipped");
        Ok(())
    }

    async fn set_message(&self, message: Option<String>) -> Result<(), ReporterError> {
        self.service
            .change_step_message(StepMessageChange {
                workflow_id: self.workflow_id.clone(),
                instance_id: self.instance_id,
                step_index: self.step_index,
                message,
            })
            .await?;
        Ok(())
    }

    /// Set a progress message; the step keeps its status
    pub async fn status_message(&self, message: &str) -> Result<(), ReporterError> {
        self.set_message(Some(message.to_string())).await?;
        debug!(instance_id = %self.instance_id, step_index = self.step_index, %message, "step status message");
        Ok(())
    }

    pub async fn clear_status_message(&self) -> Result<(), ReporterError> {
        self.set_message(None).await
    }
}
