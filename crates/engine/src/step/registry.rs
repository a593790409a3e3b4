//! Registry resolving executor references to step logic

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::decision::StepError;
use super::logic::StepLogic;

/// Registry of step logic
///
/// Maps the `executor` reference of a step template to the logic that runs
/// it. Shared by every loop in the process.
#[derive(Clone, Default)]
pub struct StepRegistry {
    logics: HashMap<String, Arc<dyn StepLogic>>,
}

impl StepRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            logics: HashMap::new(),
        }
    }

    /// Register logic under an executor reference, replacing any previous one
    pub fn register(&mut self, executor: impl Into<String>, logic: impl StepLogic) {
        self.register_arc(executor, Arc::new(logic));
    }

    pub fn register_arc(&mut self, executor: impl Into<String>, logic: Arc<dyn StepLogic>) {
        self.logics.insert(executor.into(), logic);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, executor: impl Into<String>, logic: impl StepLogic) -> Self {
        self.register(executor, logic);
        self
    }

    /// Check if an executor reference is registered
    pub fn contains(&self, executor: &str) -> bool {
        self.logics.contains_key(executor)
    }

    /// Resolve an executor reference
    pub fn resolve(&self, executor: &str) -> Result<Arc<dyn StepLogic>, StepError> {
        self.logics
            .get(executor)
            .cloned()
            .ok_or_else(|| StepError::MissingLogic {
                executor: executor.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.logics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logics.is_empty()
    }

    /// Registered executor references, sorted
    pub fn executors(&self) -> Vec<&str> {
        let mut executors: Vec<&str> = self.logics.keys().map(String::as_str).collect();
        executors.sort_unstable();
        executors
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("executors", &self.executors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Decision, StepContext};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl StepLogic for Noop {
        async fn run(&self, _ctx: &mut StepContext<'_>) -> Result<Decision, StepError> {
            Ok(Decision::Proceed)
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = StepRegistry::new().with("noop", Noop).with("also_noop", Noop);

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("noop"));
        assert!(registry.resolve("noop").is_ok());
        assert_eq!(registry.executors(), vec!["also_noop", "noop"]);
    }

    #[test]
    fn test_missing_logic_is_contract_error() {
        let registry = StepRegistry::new();
        assert!(registry.is_empty());

        let err = registry.resolve("ghost").err().unwrap();
        assert!(err.is_contract_error());
        assert_eq!(err.to_string(), "no step logic registered for executor: ghost");
    }

    #[test]
    fn test_debug_lists_executors() {
        let registry = StepRegistry::new().with("noop", Noop);
        assert_eq!(format!("{registry:?}"), "StepRegistry { executors: [\"noop\"] }");
    }
}
