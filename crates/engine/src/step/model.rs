//! Runtime step materialized from a selected step template

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::template::{
    validate_selected_step, validate_template_override, CatalogError, SelectedStepTemplate,
    StepTemplate, TemplateCatalog, ValidationReport, WorkflowTemplate,
};

/// Errors from step materialization
#[derive(Debug, thiserror::Error)]
pub enum StepModelError {
    /// The selection points at a different template than the one supplied
    #[error("step {step_index} selects {expected} but template {actual} was supplied")]
    TemplateMismatch {
        step_index: usize,
        expected: String,
        actual: String,
    },

    /// The selection customizes fields it is not allowed to
    #[error("step {step_index} overrides fields that are not allowed: {}", .violations.join(", "))]
    OverrideViolation {
        step_index: usize,
        violations: Vec<String>,
    },

    /// A required input has no value after merging
    #[error("step {step_index} is missing required input '{input}'")]
    MissingRequiredInput { step_index: usize, input: String },

    /// Catalog lookup failed
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Frozen snapshot of one step of an instance
///
/// Created at trigger time; the engine never mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    index: usize,
    template_id: String,
    template_version: u32,
    title: String,
    desc: String,
    skippable: bool,
    executor: String,
    overrides: Map<String, Value>,
    configs: Map<String, Value>,
}

impl Step {
    /// Validate a selection against its template and merge the two
    pub fn materialize(
        index: usize,
        selected: &SelectedStepTemplate,
        template: &StepTemplate,
    ) -> Result<Self, StepModelError> {
        if selected.step_template_id != template.id
            || selected.step_template_ver != template.version
        {
            return Err(StepModelError::TemplateMismatch {
                step_index: index,
                expected: format!("{}@{}", selected.step_template_id, selected.step_template_ver),
                actual: format!("{}@{}", template.id, template.version),
            });
        }

        let violations = validate_selected_step(selected, template);
        if !violations.is_empty() {
            return Err(StepModelError::OverrideViolation {
                step_index: index,
                violations: violations.all(),
            });
        }

        let mut configs = template.manifest_defaults();
        for (key, value) in &selected.defaults {
            configs.insert(key.clone(), value.clone());
        }

        if let Some(missing) = template
            .input_manifest
            .iter()
            .find(|f| f.required && configs.get(&f.name).map_or(true, Value::is_null))
        {
            return Err(StepModelError::MissingRequiredInput {
                step_index: index,
                input: missing.name.clone(),
            });
        }

        Ok(Self {
            index,
            template_id: template.id.clone(),
            template_version: template.version,
            title: selected.title.clone().unwrap_or_else(|| template.title.clone()),
            desc: selected.desc.clone().unwrap_or_else(|| template.desc.clone()),
            skippable: selected.skippable.unwrap_or(template.skippable),
            executor: template.executor.clone(),
            overrides: selected.defaults.clone(),
            configs,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn template_version(&self) -> u32 {
        self.template_version
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn skippable(&self) -> bool {
        self.skippable
    }

    /// Reference used to resolve the step logic
    pub fn executor(&self) -> &str {
        &self.executor
    }

    /// Values the workflow author set on the selection
    pub fn overrides(&self) -> &Map<String, Value> {
        &self.overrides
    }

    /// Manifest defaults merged with the author's values
    pub fn configs(&self) -> &Map<String, Value> {
        &self.configs
    }

    pub fn config(&self, key: &str) -> Option<&Value> {
        self.configs.get(key)
    }
}

/// Materialize every step of a workflow template
pub async fn materialize_steps<C>(
    template: &WorkflowTemplate,
    catalog: &C,
) -> Result<Vec<Step>, StepModelError>
where
    C: TemplateCatalog + ?Sized,
{
    let mut steps = Vec::with_capacity(template.steps.len());
    for (index, selected) in template.steps.iter().enumerate() {
        let step_template = catalog
            .must_find_step_template(&selected.step_template_id, selected.step_template_ver)
            .await?;
        steps.push(Step::materialize(index, selected, &step_template)?);
    }
    Ok(steps)
}

/// Collect every violation in a draft template without stopping at the first
///
/// Used by the template editor; `source` is the template the draft was derived from.
pub async fn validate_workflow_template<C>(
    draft: &WorkflowTemplate,
    source: Option<&WorkflowTemplate>,
    catalog: &C,
) -> Result<ValidationReport, CatalogError>
where
    C: TemplateCatalog + ?Sized,
{
    let mut report = ValidationReport::default();

    for (index, selected) in draft.steps.iter().enumerate() {
        let step_template = catalog
            .must_find_step_template(&selected.step_template_id, selected.step_template_ver)
            .await?;
        let violations = validate_selected_step(selected, &step_template);
        if !violations.is_empty() {
            report.step_violations.push((index, violations.all()));
        }
    }

    if let Some(source) = source {
        report.template_violations = validate_template_override(draft, source);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{InMemoryTemplateCatalog, InputField, OverrideOption};
    use serde_json::json;

    fn notify_template() -> StepTemplate {
        StepTemplate::new("notify", 2, "Notify", "notify")
            .with_desc("Send a message")
            .with_input(InputField::new("channel").with_default(json!("#ops")))
            .with_input(InputField::new("message").required())
    }

    #[test]
    fn test_materialize_falls_back_to_template_fields() {
        let selected = SelectedStepTemplate::new("notify", 2)
            .with_default("message", json!("deployed"))
            .with_props_override(OverrideOption::allow(["message"]));

        let step = Step::materialize(3, &selected, &notify_template()).unwrap();

        assert_eq!(step.index(), 3);
        assert_eq!(step.title(), "Notify");
        assert_eq!(step.desc(), "Send a message");
        assert!(!step.skippable());
        assert_eq!(step.executor(), "notify");
        assert_eq!(step.config("channel"), Some(&json!("#ops")));
        assert_eq!(step.config("message"), Some(&json!("deployed")));
        assert_eq!(step.overrides().len(), 1);
    }

    #[test]
    fn test_materialize_uses_allowed_selection_fields() {
        let selected = SelectedStepTemplate::new("notify", 2)
            .with_title("Tell the team")
            .with_skippable(true)
            .with_config_override(OverrideOption::allow(["title", "skippable"]))
            .with_default("message", json!("hi"));

        let step = Step::materialize(0, &selected, &notify_template()).unwrap();
        assert_eq!(step.title(), "Tell the team");
        assert!(step.skippable());
    }

    #[test]
    fn test_materialize_refuses_invalid_override() {
        let selected = SelectedStepTemplate::new("notify", 2)
            .with_title("Tell the team")
            .with_default("channel", json!("#general"))
            .with_default("message", json!("hi"));

        let err = Step::materialize(1, &selected, &notify_template()).unwrap_err();
        match err {
            StepModelError::OverrideViolation {
                step_index,
                violations,
            } => {
                assert_eq!(step_index, 1);
                assert_eq!(violations, vec!["title".to_string(), "channel".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_materialize_requires_required_inputs() {
        let selected = SelectedStepTemplate::new("notify", 2);
        let err = Step::materialize(0, &selected, &notify_template()).unwrap_err();
        assert!(matches!(
            err,
            StepModelError::MissingRequiredInput { ref input, .. } if input == "message"
        ));
    }

    #[test]
    fn test_materialize_rejects_template_mismatch() {
        let selected = SelectedStepTemplate::new("notify", 1);
        let err = Step::materialize(0, &selected, &notify_template()).unwrap_err();
        assert!(matches!(err, StepModelError::TemplateMismatch { .. }));
    }

    #[tokio::test]
    async fn test_materialize_steps_keeps_duplicate_templates_apart() {
        let catalog = InMemoryTemplateCatalog::new();
        catalog.publish_step(notify_template());

        let template = WorkflowTemplate::new("release", 1, "Release")
            .with_step(SelectedStepTemplate::new("notify", 2).with_default("message", json!("a")))
            .with_step(SelectedStepTemplate::new("notify", 2).with_default("message", json!("b")));

        let steps = materialize_steps(&template, &catalog).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].index(), 0);
        assert_eq!(steps[1].index(), 1);
        assert_eq!(steps[1].template_id(), steps[0].template_id());
    }

    #[tokio::test]
    async fn test_validate_workflow_template_collects_all_violations() {
        let catalog = InMemoryTemplateCatalog::new();
        catalog.publish_step(notify_template());

        let draft = WorkflowTemplate::new("release", 1, "Release")
            .with_step(SelectedStepTemplate::new("notify", 2).with_title("A"))
            .with_step(SelectedStepTemplate::new("notify", 2))
            .with_step(SelectedStepTemplate::new("notify", 2).with_desc("B"));

        let report = validate_workflow_template(&draft, None, &catalog)
            .await
            .unwrap();
        assert!(!report.is_valid());
        assert_eq!(
            report.step_violations,
            vec![
                (0, vec!["title".to_string()]),
                (2, vec!["desc".to_string()])
            ]
        );
    }
}
