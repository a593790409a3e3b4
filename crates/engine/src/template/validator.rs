//! Override permission validators
//!
//! A customization (overriding config) may only diverge from its source on
//! fields listed in the [`OverrideOption`]. Validators report the offending
//! keys; they never fail.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::definition::{OverrideOption, SelectedStepTemplate, StepTemplate, WorkflowTemplate};

/// Pseudo-key holding a workflow template's whole step list
pub const STEPS_KEY: &str = "steps";

/// Config fields a selected step can customize
pub const STEP_CONFIG_KEYS: [&str; 3] = ["title", "desc", "skippable"];

/// Validates a proposed customization against its source
pub trait OverrideValidator {
    /// Return the keys that differ between `overriding` and `source` without
    /// being allowed by `option`
    ///
    /// When `supported_keys` is given, only those keys are considered.
    fn violated(
        &self,
        overriding: &Map<String, Value>,
        source: &Map<String, Value>,
        option: &OverrideOption,
        supported_keys: Option<&[&str]>,
    ) -> Vec<String>;
}

fn differs(key: &str, overriding: &Map<String, Value>, source: &Map<String, Value>) -> bool {
    match (overriding.get(key), source.get(key)) {
        (Some(new), Some(old)) => new != old,
        _ => false,
    }
}

fn is_supported(key: &str, supported_keys: Option<&[&str]>) -> bool {
    supported_keys.map_or(true, |keys| keys.contains(&key))
}

/// Direct key comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigOverrideValidator;

impl OverrideValidator for ConfigOverrideValidator {
    fn violated(
        &self,
        overriding: &Map<String, Value>,
        source: &Map<String, Value>,
        option: &OverrideOption,
        supported_keys: Option<&[&str]>,
    ) -> Vec<String> {
        overriding
            .keys()
            .filter(|key| is_supported(key, supported_keys))
            .filter(|key| differs(key, overriding, source))
            .filter(|key| !option.is_allowed(key))
            .cloned()
            .collect()
    }
}

/// Maps a key name to the name looked up in `allowed`
#[derive(Clone, Default)]
pub enum KeyTransform {
    /// Look the key up unchanged
    #[default]
    Identity,

    /// `a__b` is looked up as `a.b`
    FlattenedToPath,

    /// Arbitrary mapping
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl KeyTransform {
    pub fn apply(&self, key: &str) -> String {
        match self {
            Self::Identity => key.to_string(),
            Self::FlattenedToPath => key.replace("__", "."),
            Self::Custom(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "Identity"),
            Self::FlattenedToPath => write!(f, "FlattenedToPath"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Properties validator with `steps` whitelisting and key transforms
#[derive(Debug, Clone, Default)]
pub struct PropsOverrideValidator {
    whitelist_steps: bool,
    transform: KeyTransform,
}

impl PropsOverrideValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip comparing the `steps` pseudo-key when it is allowed
    pub fn with_steps_whitelist(mut self) -> Self {
        self.whitelist_steps = true;
        self
    }

    pub fn with_transform(mut self, transform: KeyTransform) -> Self {
        self.transform = transform;
        self
    }
}

impl OverrideValidator for PropsOverrideValidator {
    fn violated(
        &self,
        overriding: &Map<String, Value>,
        source: &Map<String, Value>,
        option: &OverrideOption,
        supported_keys: Option<&[&str]>,
    ) -> Vec<String> {
        let steps_bypassed = self.whitelist_steps && option.is_allowed(STEPS_KEY);

        overriding
            .keys()
            .filter(|key| is_supported(key, supported_keys))
            .filter(|key| !(steps_bypassed && key.as_str() == STEPS_KEY))
            .filter(|key| differs(key, overriding, source))
            .filter(|key| !option.is_allowed(&self.transform.apply(key)))
            .cloned()
            .collect()
    }
}

/// Violations found while validating one selected step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepViolations {
    /// Offending config fields (`title`, `desc`, `skippable`)
    pub config: Vec<String>,

    /// Offending input defaults
    pub props: Vec<String>,
}

impl StepViolations {
    pub fn is_empty(&self) -> bool {
        self.config.is_empty() && self.props.is_empty()
    }

    /// All offending field names, config first
    pub fn all(&self) -> Vec<String> {
        self.config.iter().chain(self.props.iter()).cloned().collect()
    }
}

/// Validate a selection's customizations against its step template
pub fn validate_selected_step(
    selected: &SelectedStepTemplate,
    template: &StepTemplate,
) -> StepViolations {
    let config = ConfigOverrideValidator.violated(
        &selected.config_fields(),
        &template.config_fields(),
        &selected.config_override_option,
        Some(&STEP_CONFIG_KEYS[..]),
    );

    let props = PropsOverrideValidator::new()
        .with_transform(KeyTransform::FlattenedToPath)
        .violated(
            &selected.defaults,
            &template.manifest_defaults(),
            &selected.props_override_option,
            None,
        );

    StepViolations { config, props }
}

/// Validate a template derived from `source` against the source's props option
pub fn validate_template_override(
    draft: &WorkflowTemplate,
    source: &WorkflowTemplate,
) -> Vec<String> {
    PropsOverrideValidator::new().with_steps_whitelist().violated(
        &draft.props(),
        &source.props(),
        &source.props_override_option,
        None,
    )
}

/// Authoring-time report covering a whole workflow template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Violations per step index (only steps with violations)
    pub step_violations: Vec<(usize, Vec<String>)>,

    /// Violations of the template against its source, if one was given
    pub template_violations: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.step_violations.is_empty() && self.template_violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_reports_only_unallowed_differing_key() {
        let source = map(json!({"k1": 1, "k2": 2, "k3": 3, "k4": 4, "k5": 5}));
        let overriding = map(json!({"k1": 10, "k2": 20, "k3": 30, "k4": 4, "k5": 50}));
        let option = OverrideOption::allow(["k1", "k2", "k3"]);

        let violations = ConfigOverrideValidator.violated(&overriding, &source, &option, None);
        assert_eq!(violations, vec!["k5".to_string()]);
    }

    #[test]
    fn test_empty_allowed_reports_every_differing_key() {
        let source = map(json!({"a": 1, "b": 2, "c": 3}));
        let overriding = map(json!({"a": 2, "b": 2, "c": 4}));

        let violations =
            ConfigOverrideValidator.violated(&overriding, &source, &OverrideOption::none(), None);
        assert_eq!(violations, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_keys_missing_from_either_side_are_not_violations() {
        let source = map(json!({"a": 1}));
        let overriding = map(json!({"b": 2}));

        let violations =
            ConfigOverrideValidator.violated(&overriding, &source, &OverrideOption::none(), None);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_supported_keys_limit_comparison() {
        let source = map(json!({"a": 1, "b": 1}));
        let overriding = map(json!({"a": 2, "b": 2}));

        let violations = ConfigOverrideValidator.violated(
            &overriding,
            &source,
            &OverrideOption::none(),
            Some(&["b"][..]),
        );
        assert_eq!(violations, vec!["b".to_string()]);
    }

    #[test]
    fn test_steps_whitelist_bypasses_comparison_only_when_allowed() {
        let source = map(json!({"steps": [1], "title": "a"}));
        let overriding = map(json!({"steps": [1, 2], "title": "a"}));
        let validator = PropsOverrideValidator::new().with_steps_whitelist();

        let allowed = validator.violated(
            &overriding,
            &source,
            &OverrideOption::allow(["steps"]),
            None,
        );
        assert!(allowed.is_empty());

        let denied = validator.violated(&overriding, &source, &OverrideOption::none(), None);
        assert_eq!(denied, vec!["steps".to_string()]);
    }

    #[test]
    fn test_transform_applies_before_allowed_lookup() {
        let source = map(json!({"retry__count": 1}));
        let overriding = map(json!({"retry__count": 3}));
        let option = OverrideOption::allow(["retry.count"]);

        let plain = PropsOverrideValidator::new().violated(&overriding, &source, &option, None);
        assert_eq!(plain, vec!["retry__count".to_string()]);

        let transformed = PropsOverrideValidator::new()
            .with_transform(KeyTransform::FlattenedToPath)
            .violated(&overriding, &source, &option, None);
        assert!(transformed.is_empty());
    }

    #[test]
    fn test_custom_transform() {
        let source = map(json!({"Channel": "a"}));
        let overriding = map(json!({"Channel": "b"}));
        let validator = PropsOverrideValidator::new()
            .with_transform(KeyTransform::Custom(Arc::new(|k| k.to_lowercase())));

        let violations =
            validator.violated(&overriding, &source, &OverrideOption::allow(["channel"]), None);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_validate_selected_step() {
        let template = StepTemplate::new("notify", 1, "Notify", "notify")
            .with_input(crate::template::InputField::new("channel").with_default(json!("#ops")));

        let ok = SelectedStepTemplate::new("notify", 1)
            .with_title("Notify on-call")
            .with_config_override(OverrideOption::allow(["title"]));
        assert!(validate_selected_step(&ok, &template).is_empty());

        let bad = SelectedStepTemplate::new("notify", 1)
            .with_skippable(true)
            .with_default("channel", json!("#general"));
        let violations = validate_selected_step(&bad, &template);
        assert_eq!(violations.config, vec!["skippable".to_string()]);
        assert_eq!(violations.props, vec!["channel".to_string()]);
        assert_eq!(violations.all().len(), 2);
    }

    #[test]
    fn test_validate_template_override() {
        let source = WorkflowTemplate::new("deploy", 1, "Deploy")
            .with_step(SelectedStepTemplate::new("build", 1))
            .with_props_override(OverrideOption::allow(["steps"]));

        let draft = WorkflowTemplate::new("deploy-copy", 1, "Deploy")
            .with_step(SelectedStepTemplate::new("build", 1))
            .with_step(SelectedStepTemplate::new("notify", 1));
        assert!(validate_template_override(&draft, &source).is_empty());

        let renamed = WorkflowTemplate::new("deploy-copy", 1, "Ship it");
        assert_eq!(
            validate_template_override(&renamed, &source),
            vec!["title".to_string()]
        );
    }
}
