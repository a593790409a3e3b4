//! Per-step key/value payload

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::persistence::{PayloadStore, StoreError};

/// Content of a step payload, ordered by key
pub type PayloadContent = BTreeMap<String, Value>;

/// Persisted form of a [`StepPayload`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPayloadMemento {
    pub step_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub content: PayloadContent,
}

/// Mutable store scoped to one step of an instance
///
/// Lazily hydrated from a [`PayloadStore`]; writes only happen when the
/// content diverged from the persisted copy.
#[derive(Debug, Clone, PartialEq)]
pub struct StepPayload {
    instance_id: Uuid,
    step_index: usize,
    name: Option<String>,
    content: PayloadContent,
    dirty: bool,
    loaded: bool,
}

impl StepPayload {
    /// Create an empty, not yet hydrated payload
    pub fn new(instance_id: Uuid, step_index: usize) -> Self {
        Self {
            instance_id,
            step_index,
            name: None,
            content: PayloadContent::new(),
            dirty: false,
            loaded: false,
        }
    }

    pub(crate) fn from_memento(instance_id: Uuid, memento: StepPayloadMemento) -> Self {
        Self {
            instance_id,
            step_index: memento.step_index,
            name: memento.name,
            content: memento.content,
            dirty: false,
            loaded: true,
        }
    }

    /// Mark as hydrated without touching the store
    pub(crate) fn mark_loaded(mut self) -> Self {
        self.loaded = true;
        self
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = Some(name.into());
        if self.name != name {
            self.name = name;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Hydrate from the store; no-op once loaded
    ///
    /// Keys set before hydration win over the persisted ones.
    pub async fn load<S>(&mut self, store: &S) -> Result<(), StoreError>
    where
        S: PayloadStore + ?Sized,
    {
        if self.loaded {
            return Ok(());
        }

        if let Some(memento) = store
            .load_step_payload(self.instance_id, self.step_index)
            .await?
        {
            let local = std::mem::replace(&mut self.content, memento.content);
            self.content.extend(local);
            if self.name.is_none() {
                self.name = memento.name;
            }
        }

        self.loaded = true;
        Ok(())
    }

    /// Persist if dirty; returns whether a write happened
    pub async fn save<S>(&mut self, store: &S) -> Result<bool, StoreError>
    where
        S: PayloadStore + ?Sized,
    {
        if !self.dirty {
            return Ok(false);
        }

        store
            .save_step_payload(self.instance_id, &self.to_memento())
            .await?;
        self.dirty = false;
        Ok(true)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.content.contains_key(key)
    }

    pub fn set_key(&mut self, key: impl Into<String>, value: Value) {
        self.content.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn remove_key(&mut self, key: &str) -> Option<Value> {
        let removed = self.content.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn remove_all_keys(&mut self) {
        if !self.content.is_empty() {
            self.content.clear();
            self.dirty = true;
        }
    }

    /// Owned copy of the content
    pub fn spread(&self) -> PayloadContent {
        self.content.clone()
    }

    pub fn to_memento(&self) -> StepPayloadMemento {
        StepPayloadMemento {
            step_index: self.step_index,
            name: self.name.clone(),
            content: self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPayloadStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_only_when_dirty() {
        let store = InMemoryPayloadStore::new();
        let mut payload = StepPayload::new(Uuid::now_v7(), 0);
        payload.load(&store).await.unwrap();

        assert!(!payload.save(&store).await.unwrap());

        payload.set_key("x", json!(1));
        assert!(payload.is_dirty());
        assert!(payload.save(&store).await.unwrap());
        assert!(!payload.is_dirty());
        assert!(!payload.save(&store).await.unwrap());

        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_load_is_idempotent_and_keeps_local_keys() {
        let store = InMemoryPayloadStore::new();
        let instance_id = Uuid::now_v7();

        let mut first = StepPayload::new(instance_id, 1);
        first.set_name("build");
        first.set_key("artifact", json!("a.tar"));
        first.set_key("size", json!(10));
        first.save(&store).await.unwrap();

        let mut second = StepPayload::new(instance_id, 1);
        second.set_key("size", json!(20));
        second.load(&store).await.unwrap();
        second.load(&store).await.unwrap();

        assert_eq!(second.name(), Some("build"));
        assert_eq!(second.get_value("artifact"), Some(&json!("a.tar")));
        assert_eq!(second.get_value("size"), Some(&json!(20)));
    }

    #[test]
    fn test_remove_marks_dirty_only_on_change() {
        let mut payload = StepPayload::new(Uuid::now_v7(), 0).mark_loaded();

        assert_eq!(payload.remove_key("missing"), None);
        payload.remove_all_keys();
        assert!(!payload.is_dirty());

        payload.set_key("a", json!(1));
        payload.set_key("b", json!(2));
        payload.mark_clean();

        assert_eq!(payload.remove_key("a"), Some(json!(1)));
        assert!(payload.is_dirty());

        payload.mark_clean();
        payload.remove_all_keys();
        assert!(payload.is_dirty());
        assert!(payload.spread().is_empty());
    }
}
