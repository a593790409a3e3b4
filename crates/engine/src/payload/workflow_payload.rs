//! Instance-wide payload: the step payloads plus trigger meta and input

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::step_payload::{PayloadContent, StepPayload, StepPayloadMemento};
use crate::persistence::{PayloadStore, StoreError};

/// Persisted form of a [`WorkflowPayload`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPayloadMemento {
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub input: Value,

    /// Step payloads in ascending index order
    #[serde(default)]
    pub store: Vec<StepPayloadMemento>,
}

/// Ordered step payloads of one instance
///
/// This is the only channel through which steps exchange data. It is saved
/// as a whole in a single [`PayloadStore::save_workflow_payload`] call.
#[derive(Debug, Clone)]
pub struct WorkflowPayload {
    instance_id: Uuid,
    meta: Value,
    input: Value,

    /// Sorted by step index, at most one entry per index
    store: Vec<StepPayload>,
    shape_changed: bool,
    loaded: bool,
}

impl WorkflowPayload {
    pub fn new(instance_id: Uuid, meta: Value, input: Value) -> Self {
        Self {
            instance_id,
            meta,
            input,
            store: Vec::new(),
            shape_changed: false,
            loaded: false,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Trigger metadata
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    /// Original trigger input
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Hydrate from the store; no-op once loaded
    ///
    /// Step payloads already created in memory are kept over persisted ones.
    pub async fn load<S>(&mut self, store: &S) -> Result<(), StoreError>
    where
        S: PayloadStore + ?Sized,
    {
        if self.loaded {
            return Ok(());
        }

        if let Some(memento) = store.load_workflow_payload(self.instance_id).await? {
            if self.meta.is_null() {
                self.meta = memento.meta;
            }
            if self.input.is_null() {
                self.input = memento.input;
            }
            for step in memento.store {
                if let Err(pos) = self.position(step.step_index) {
                    self.store
                        .insert(pos, StepPayload::from_memento(self.instance_id, step));
                }
            }
        }

        self.loaded = true;
        Ok(())
    }

    /// Persist everything in one write if anything changed
    ///
    /// Returns whether a write happened.
    pub async fn save<S>(&mut self, store: &S) -> Result<bool, StoreError>
    where
        S: PayloadStore + ?Sized,
    {
        if !self.is_dirty() {
            return Ok(false);
        }

        store
            .save_workflow_payload(self.instance_id, &self.get_memento())
            .await?;

        for step in &mut self.store {
            step.mark_clean();
        }
        self.shape_changed = false;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.shape_changed || self.store.iter().any(StepPayload::is_dirty)
    }

    fn position(&self, step_index: usize) -> Result<usize, usize> {
        self.store
            .binary_search_by_key(&step_index, StepPayload::step_index)
    }

    /// Payload of a step, created if absent
    pub fn get_step_payload(&mut self, step_index: usize) -> &mut StepPayload {
        let pos = match self.position(step_index) {
            Ok(pos) => pos,
            Err(pos) => {
                self.store.insert(
                    pos,
                    StepPayload::new(self.instance_id, step_index).mark_loaded(),
                );
                self.shape_changed = true;
                pos
            }
        };
        &mut self.store[pos]
    }

    /// Payload of a step if it exists
    pub fn step_payload(&self, step_index: usize) -> Option<&StepPayload> {
        self.position(step_index).ok().map(|pos| &self.store[pos])
    }

    pub fn get_memento(&self) -> WorkflowPayloadMemento {
        WorkflowPayloadMemento {
            meta: self.meta.clone(),
            input: self.input.clone(),
            store: self.store.iter().map(StepPayload::to_memento).collect(),
        }
    }

    /// Replace the whole state; the result counts as loaded and clean
    pub fn set_memento(&mut self, memento: WorkflowPayloadMemento) {
        self.meta = memento.meta;
        self.input = memento.input;

        let mut steps: Vec<StepPayload> = memento
            .store
            .into_iter()
            .map(|m| StepPayload::from_memento(self.instance_id, m))
            .collect();
        steps.sort_by_key(StepPayload::step_index);
        steps.dedup_by_key(|s| s.step_index());

        self.store = steps;
        self.shape_changed = false;
        self.loaded = true;
    }

    /// Flatten every step payload; later steps override earlier keys
    pub fn to_payload_content(&self) -> PayloadContent {
        let mut content = PayloadContent::new();
        for step in &self.store {
            content.extend(step.spread());
        }
        content
    }

    pub fn searchable_stores(&self) -> SearchableStores<'_> {
        SearchableStores { stores: &self.store }
    }
}

/// Read-only lookups across the step payloads of an instance
#[derive(Debug, Clone, Copy)]
pub struct SearchableStores<'a> {
    stores: &'a [StepPayload],
}

impl<'a> SearchableStores<'a> {
    /// Latest step payload carrying this name
    pub fn by_name(&self, name: &str) -> Option<&'a StepPayload> {
        self.stores.iter().rev().find(|s| s.name() == Some(name))
    }

    pub fn by_index(&self, step_index: usize) -> Option<&'a StepPayload> {
        self.stores
            .binary_search_by_key(&step_index, StepPayload::step_index)
            .ok()
            .map(|pos| &self.stores[pos])
    }

    /// Highest-index step below `before_index` that set `key`
    pub fn nearest_upstream(&self, key: &str, before_index: usize) -> Option<&'a StepPayload> {
        self.stores
            .iter()
            .rev()
            .filter(|s| s.step_index() < before_index)
            .find(|s| s.contains_key(key))
    }

    /// Value of `key` from the nearest upstream step
    pub fn upstream_value(&self, key: &str, before_index: usize) -> Option<&'a Value> {
        self.nearest_upstream(key, before_index)
            .and_then(|s| s.get_value(key))
    }
}
