//! In-memory implementations of InstanceService and PayloadStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::instance::{InstanceStep, InstanceSummary, RunStatus, WorkflowInstance};
use super::store::*;
use crate::payload::{StepPayloadMemento, WorkflowPayloadMemento};

/// A recorded status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Workflow {
        status: RunStatus,
        message: Option<String>,
    },
    Step {
        step_index: usize,
        status: RunStatus,
        message: Option<String>,
    },
}

/// In-memory implementation of InstanceService
///
/// Enforces the status lifecycle and keeps a per-instance history of every
/// status change, which makes it useful as a test double.
///
/// # Example
///
/// ```
/// use waypoint_engine::InMemoryInstanceService;
///
/// let service = InMemoryInstanceService::new();
/// assert_eq!(service.instance_count(), 0);
/// ```
pub struct InMemoryInstanceService {
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    history: RwLock<HashMap<Uuid, Vec<StatusEvent>>>,
    fail_writes: AtomicBool,
}

impl InMemoryInstanceService {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Get the number of instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Every status change recorded for an instance, oldest first
    pub fn status_history(&self, instance_id: Uuid) -> Vec<StatusEvent> {
        self.history
            .read()
            .get(&instance_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent write fail with a database error (for testing)
    pub fn inject_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".to_string()));
        }
        Ok(())
    }

    fn record(&self, instance_id: Uuid, event: StatusEvent) {
        self.history
            .write()
            .entry(instance_id)
            .or_default()
            .push(event);
    }
}

impl Default for InMemoryInstanceService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceService for InMemoryInstanceService {
    async fn create_instance(
        &self,
        trigger: NewInstance,
        meta: Value,
        input: Value,
    ) -> Result<WorkflowInstance, StoreError> {
        self.check_writable()?;

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: Uuid::now_v7(),
            workflow_id: trigger.workflow_id,
            workflow_version: trigger.workflow_version,
            status: RunStatus::NotStarted,
            message: None,
            steps: trigger.steps.into_iter().map(InstanceStep::new).collect(),
            meta,
            input,
            created_at: now,
            created_by: trigger.created_by,
            updated_at: now,
            run_spec: trigger.run_spec,
        };

        self.instances.write().insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn change_workflow_status(&self, change: WorkflowStatusChange) -> Result<(), StoreError> {
        self.check_writable()?;

        {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(&change.instance_id)
                .ok_or(StoreError::InstanceNotFound(change.instance_id))?;

            if !instance.status.can_transition_to(change.status) {
                return Err(StoreError::InvalidTransition {
                    from: instance.status,
                    to: change.status,
                    step_index: None,
                });
            }

            instance.status = change.status;
            instance.message = change.message.clone();
            instance.updated_at = Utc::now();
        }

        self.record(
            change.instance_id,
            StatusEvent::Workflow {
                status: change.status,
                message: change.message,
            },
        );
        Ok(())
    }

    async fn change_step_status(&self, change: StepStatusChange) -> Result<(), StoreError> {
        self.check_writable()?;

        {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(&change.instance_id)
                .ok_or(StoreError::InstanceNotFound(change.instance_id))?;
            let step = instance
                .steps
                .get_mut(change.step_index)
                .ok_or(StoreError::StepNotFound {
                    instance_id: change.instance_id,
                    step_index: change.step_index,
                })?;

            if !step.status.can_transition_to(change.status) {
                return Err(StoreError::InvalidTransition {
                    from: step.status,
                    to: change.status,
                    step_index: Some(change.step_index),
                });
            }

            step.status = change.status;
            step.message = change.message.clone();
            instance.updated_at = Utc::now();
        }

        self.record(
            change.instance_id,
            StatusEvent::Step {
                step_index: change.step_index,
                status: change.status,
                message: change.message,
            },
        );
        Ok(())
    }

    async fn change_step_message(&self, change: StepMessageChange) -> Result<(), StoreError> {
        self.check_writable()?;

        let status = {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(&change.instance_id)
                .ok_or(StoreError::InstanceNotFound(change.instance_id))?;
            let step = instance
                .steps
                .get_mut(change.step_index)
                .ok_or(StoreError::StepNotFound {
                    instance_id: change.instance_id,
                    step_index: change.step_index,
                })?;

            step.message = change.message.clone();
            instance.updated_at = Utc::now();
            step.status
        };

        self.record(
            change.instance_id,
            StatusEvent::Step {
                step_index: change.step_index,
                status,
                message: change.message,
            },
        );
        Ok(())
    }

    async fn save_step_attribs(&self, update: StepAttribsUpdate) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&update.instance_id)
            .ok_or(StoreError::InstanceNotFound(update.instance_id))?;
        let step = instance
            .steps
            .get_mut(update.step_index)
            .ok_or(StoreError::StepNotFound {
                instance_id: update.instance_id,
                step_index: update.step_index,
            })?;

        step.attribs = update.attribs;
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn find_instance(
        &self,
        query: InstanceQuery,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        let instances = self.instances.read();
        Ok(instances.get(&query.id).map(|instance| {
            let mut instance = instance.clone();
            if !query.wants(InstanceField::Steps) {
                instance.steps.clear();
            }
            if !query.wants(InstanceField::Meta) {
                instance.meta = Value::Null;
            }
            if !query.wants(InstanceField::Input) {
                instance.input = Value::Null;
            }
            instance
        }))
    }

    async fn list_paged(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<InstanceSummary>, StoreError> {
        let instances = self.instances.read();
        let mut matching: Vec<&WorkflowInstance> =
            instances.values().filter(|i| filter.matches(i)).collect();
        // v7 ids sort by creation time
        matching.sort_by_key(|i| i.id);

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .map(WorkflowInstance::summary)
            .collect();

        Ok(Page {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}

/// In-memory implementation of PayloadStore
///
/// Counts writes so tests can assert on persistence behaviour.
pub struct InMemoryPayloadStore {
    payloads: RwLock<HashMap<Uuid, WorkflowPayloadMemento>>,
    writes: AtomicUsize,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self {
            payloads: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of save calls that reached the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored payload for an instance
    pub fn snapshot(&self, instance_id: Uuid) -> Option<WorkflowPayloadMemento> {
        self.payloads.read().get(&instance_id).cloned()
    }
}

impl Default for InMemoryPayloadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn load_workflow_payload(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<WorkflowPayloadMemento>, StoreError> {
        Ok(self.payloads.read().get(&instance_id).cloned())
    }

    async fn save_workflow_payload(
        &self,
        instance_id: Uuid,
        memento: &WorkflowPayloadMemento,
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.payloads.write().insert(instance_id, memento.clone());
        Ok(())
    }

    async fn load_step_payload(
        &self,
        instance_id: Uuid,
        step_index: usize,
    ) -> Result<Option<StepPayloadMemento>, StoreError> {
        Ok(self.payloads.read().get(&instance_id).and_then(|p| {
            p.store
                .iter()
                .find(|s| s.step_index == step_index)
                .cloned()
        }))
    }

    async fn save_step_payload(
        &self,
        instance_id: Uuid,
        memento: &StepPayloadMemento,
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut payloads = self.payloads.write();
        let payload = payloads.entry(instance_id).or_default();
        match payload
            .store
            .iter_mut()
            .find(|s| s.step_index == memento.step_index)
        {
            Some(existing) => *existing = memento.clone(),
            None => {
                payload.store.push(memento.clone());
                payload.store.sort_by_key(|s| s.step_index);
            }
        }
        Ok(())
    }
}
