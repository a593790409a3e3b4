//! InstanceService and PayloadStore trait definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::instance::{InstanceSummary, RunSpec, RunStatus, StepAttribs, WorkflowInstance};
use crate::payload::{StepPayloadMemento, WorkflowPayloadMemento};
use crate::step::Step;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Instance not found
    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// Step index out of range for the instance
    #[error("instance {instance_id} has no step {step_index}")]
    StepNotFound { instance_id: Uuid, step_index: usize },

    /// The lifecycle does not allow this status change
    #[error("invalid status transition {from} -> {to} (step {step_index:?})")]
    InvalidTransition {
        from: RunStatus,
        to: RunStatus,
        step_index: Option<usize>,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Everything needed to create an instance
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub workflow_id: String,
    pub workflow_version: u32,
    pub steps: Vec<Step>,
    pub created_by: String,
    pub run_spec: RunSpec,
}

/// Request to change an instance's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStatusChange {
    pub workflow_id: String,
    pub instance_id: Uuid,
    pub status: RunStatus,
    pub message: Option<String>,
}

/// Request to change one step's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatusChange {
    pub workflow_id: String,
    pub instance_id: Uuid,
    pub step_index: usize,
    pub status: RunStatus,
    pub message: Option<String>,
}

/// Request to set one step's message without touching its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMessageChange {
    pub workflow_id: String,
    pub instance_id: Uuid,
    pub step_index: usize,
    pub message: Option<String>,
}

/// Request to replace one step's attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAttribsUpdate {
    pub workflow_id: String,
    pub instance_id: Uuid,
    pub step_index: usize,
    pub attribs: StepAttribs,
}

/// Optional parts of an instance record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceField {
    Steps,
    Meta,
    Input,
}

/// Lookup of a single instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceQuery {
    pub id: Uuid,

    /// Projection; `None` loads every field
    pub fields: Option<Vec<InstanceField>>,
}

impl InstanceQuery {
    pub fn by_id(id: Uuid) -> Self {
        Self { id, fields: None }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = InstanceField>) -> Self {
        self.fields = Some(fields.into_iter().collect());
        self
    }

    pub fn wants(&self, field: InstanceField) -> bool {
        self.fields.as_ref().map_or(true, |f| f.contains(&field))
    }
}

/// Filter for listing instances
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub created_by: Option<String>,
}

impl InstanceFilter {
    pub fn with_status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.workflow_id
            .as_ref()
            .map_or(true, |id| &instance.workflow_id == id)
            && self.status.map_or(true, |s| instance.status == s)
            && self
                .created_by
                .as_ref()
                .map_or(true, |u| &instance.created_by == u)
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// One page of results
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: u32,
    pub limit: u32,
}

/// Durable storage for workflow instances
///
/// Implementations must be thread-safe. The engine relies on exactly one live
/// loop per instance; implementations are not required to serialize writers.
#[async_trait]
pub trait InstanceService: Send + Sync + 'static {
    /// Create an instance with all steps `not_started`
    async fn create_instance(
        &self,
        trigger: NewInstance,
        meta: Value,
        input: Value,
    ) -> Result<WorkflowInstance, StoreError>;

    /// Change the instance status
    async fn change_workflow_status(&self, change: WorkflowStatusChange) -> Result<(), StoreError>;

    /// Change one step's status
    async fn change_step_status(&self, change: StepStatusChange) -> Result<(), StoreError>;

    /// Replace one step's message, keeping its status
    async fn change_step_message(&self, change: StepMessageChange) -> Result<(), StoreError>;

    /// Replace one step's attributes
    async fn save_step_attribs(&self, update: StepAttribsUpdate) -> Result<(), StoreError>;

    /// Find an instance
    async fn find_instance(
        &self,
        query: InstanceQuery,
    ) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Find an instance, failing if it does not exist
    async fn must_find_instance(&self, query: InstanceQuery) -> Result<WorkflowInstance, StoreError> {
        let id = query.id;
        self.find_instance(query)
            .await?
            .ok_or(StoreError::InstanceNotFound(id))
    }

    /// List instances matching a filter
    async fn list_paged(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<InstanceSummary>, StoreError>;

    /// List all instances
    async fn list(&self, pagination: Pagination) -> Result<Vec<InstanceSummary>, StoreError> {
        Ok(self
            .list_paged(InstanceFilter::default(), pagination)
            .await?
            .items)
    }

    /// List instances with the given status
    async fn list_by_status(
        &self,
        status: RunStatus,
        pagination: Pagination,
    ) -> Result<Vec<InstanceSummary>, StoreError> {
        Ok(self
            .list_paged(InstanceFilter::with_status(status), pagination)
            .await?
            .items)
    }
}

/// Durable storage for workflow payloads
#[async_trait]
pub trait PayloadStore: Send + Sync + 'static {
    /// Load the whole payload of an instance
    async fn load_workflow_payload(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<WorkflowPayloadMemento>, StoreError>;

    /// Replace the whole payload of an instance in one write
    async fn save_workflow_payload(
        &self,
        instance_id: Uuid,
        memento: &WorkflowPayloadMemento,
    ) -> Result<(), StoreError>;

    /// Load a single step payload
    async fn load_step_payload(
        &self,
        instance_id: Uuid,
        step_index: usize,
    ) -> Result<Option<StepPayloadMemento>, StoreError>;

    /// Upsert a single step payload
    async fn save_step_payload(
        &self,
        instance_id: Uuid,
        memento: &StepPayloadMemento,
    ) -> Result<(), StoreError>;
}
