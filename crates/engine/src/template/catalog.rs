//! Template catalog trait and in-memory implementation

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::definition::{StepTemplate, WorkflowTemplate};

/// Error type for catalog lookups
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No workflow template with this id (and version, if given)
    #[error("workflow template not found: {id} (version {version:?})")]
    TemplateNotFound { id: String, version: Option<u32> },

    /// No step template with this id and version
    #[error("step template not found: {id}@{version}")]
    StepTemplateNotFound { id: String, version: u32 },

    /// Backend failure
    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// Read-only access to published templates
#[async_trait]
pub trait TemplateCatalog: Send + Sync + 'static {
    /// Find a workflow template version; `None` selects the latest version
    async fn find_version(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<Option<WorkflowTemplate>, CatalogError>;

    /// Like [`find_version`](Self::find_version) but missing templates are an error
    async fn must_find_version(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<WorkflowTemplate, CatalogError>;

    /// Find a step template by id and version
    async fn must_find_step_template(
        &self,
        id: &str,
        version: u32,
    ) -> Result<StepTemplate, CatalogError>;
}

/// In-memory catalog
///
/// Versions are kept ordered so the latest version is the last entry.
pub struct InMemoryTemplateCatalog {
    workflows: RwLock<HashMap<String, BTreeMap<u32, WorkflowTemplate>>>,
    steps: RwLock<HashMap<(String, u32), StepTemplate>>,
}

impl InMemoryTemplateCatalog {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a workflow template version (replaces an existing one)
    pub fn publish(&self, template: WorkflowTemplate) {
        self.workflows
            .write()
            .entry(template.id.clone())
            .or_default()
            .insert(template.version, template);
    }

    /// Publish a step template version
    pub fn publish_step(&self, template: StepTemplate) {
        self.steps
            .write()
            .insert((template.id.clone(), template.version), template);
    }

    fn lookup(&self, id: &str, version: Option<u32>) -> Option<WorkflowTemplate> {
        let workflows = self.workflows.read();
        let versions = workflows.get(id)?;
        match version {
            Some(v) => versions.get(&v).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }
}

impl Default for InMemoryTemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryTemplateCatalog {
    async fn find_version(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<Option<WorkflowTemplate>, CatalogError> {
        Ok(self.lookup(id, version))
    }

    async fn must_find_version(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<WorkflowTemplate, CatalogError> {
        self.lookup(id, version)
            .ok_or_else(|| CatalogError::TemplateNotFound {
                id: id.to_string(),
                version,
            })
    }

    async fn must_find_step_template(
        &self,
        id: &str,
        version: u32,
    ) -> Result<StepTemplate, CatalogError> {
        self.steps
            .read()
            .get(&(id.to_string(), version))
            .cloned()
            .ok_or_else(|| CatalogError::StepTemplateNotFound {
                id: id.to_string(),
                version,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_version_without_version_returns_latest() {
        let catalog = InMemoryTemplateCatalog::new();
        catalog.publish(WorkflowTemplate::new("deploy", 1, "Deploy v1"));
        catalog.publish(WorkflowTemplate::new("deploy", 3, "Deploy v3"));
        catalog.publish(WorkflowTemplate::new("deploy", 2, "Deploy v2"));

        let latest = catalog.find_version("deploy", None).await.unwrap().unwrap();
        assert_eq!(latest.version, 3);

        let pinned = catalog.must_find_version("deploy", Some(2)).await.unwrap();
        assert_eq!(pinned.title, "Deploy v2");
    }

    #[tokio::test]
    async fn test_missing_template() {
        let catalog = InMemoryTemplateCatalog::new();

        assert!(catalog.find_version("nope", None).await.unwrap().is_none());

        let err = catalog.must_find_version("nope", Some(4)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "workflow template not found: nope (version Some(4))"
        );

        let err = catalog.must_find_step_template("build", 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::StepTemplateNotFound { .. }));
    }
}
