//! Workflow and step template definitions

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declares which fields a customization may change relative to its source
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideOption {
    /// Field names that may differ from the source
    #[serde(default)]
    pub allowed: BTreeSet<String>,
}

impl OverrideOption {
    /// An option that allows nothing to change
    pub fn none() -> Self {
        Self::default()
    }

    /// Create an option allowing the given field names
    pub fn allow<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether a field may be overridden
    pub fn is_allowed(&self, field: &str) -> bool {
        self.allowed.contains(field)
    }
}

/// One input declared by a step template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputField {
    /// Input name (key in the step's configs)
    pub name: String,

    /// Default value used when the selection does not provide one
    #[serde(default)]
    pub default: Option<Value>,

    /// Whether a value must be present after merging
    #[serde(default)]
    pub required: bool,
}

impl InputField {
    /// Create an optional input without a default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            required: false,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark the input as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Read-only catalog entry shared across workflow templates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepTemplate {
    pub id: String,
    pub version: u32,
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub skippable: bool,

    /// Reference used to look up the step logic in the registry
    pub executor: String,

    #[serde(default)]
    pub input_manifest: Vec<InputField>,
}

impl StepTemplate {
    /// Create a step template with the given executor reference
    pub fn new(
        id: impl Into<String>,
        version: u32,
        title: impl Into<String>,
        executor: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            title: title.into(),
            desc: String::new(),
            skippable: false,
            executor: executor.into(),
            input_manifest: Vec::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self
    }

    pub fn with_input(mut self, field: InputField) -> Self {
        self.input_manifest.push(field);
        self
    }

    /// Config fields a selection may override, as a comparable map
    pub fn config_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("title".into(), Value::String(self.title.clone()));
        map.insert("desc".into(), Value::String(self.desc.clone()));
        map.insert("skippable".into(), Value::Bool(self.skippable));
        map
    }

    /// Defaults declared by the input manifest
    pub fn manifest_defaults(&self) -> Map<String, Value> {
        self.input_manifest
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect()
    }
}

/// A workflow template's customization of one shared step template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedStepTemplate {
    pub step_template_id: String,
    pub step_template_ver: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub skippable: Option<bool>,

    /// Which of `title`, `desc`, `skippable` may differ from the step template
    #[serde(default)]
    pub config_override_option: OverrideOption,

    /// Which input defaults may differ from the manifest defaults
    #[serde(default)]
    pub props_override_option: OverrideOption,

    /// Input values set by the workflow author
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl SelectedStepTemplate {
    /// Select a step template without customizations
    pub fn new(step_template_id: impl Into<String>, step_template_ver: u32) -> Self {
        Self {
            step_template_id: step_template_id.into(),
            step_template_ver,
            title: None,
            desc: None,
            skippable: None,
            config_override_option: OverrideOption::none(),
            props_override_option: OverrideOption::none(),
            defaults: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_skippable(mut self, skippable: bool) -> Self {
        self.skippable = Some(skippable);
        self
    }

    pub fn with_config_override(mut self, option: OverrideOption) -> Self {
        self.config_override_option = option;
        self
    }

    pub fn with_props_override(mut self, option: OverrideOption) -> Self {
        self.props_override_option = option;
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// Config fields explicitly set by this selection
    pub fn config_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(title) = &self.title {
            map.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(desc) = &self.desc {
            map.insert("desc".into(), Value::String(desc.clone()));
        }
        if let Some(skippable) = self.skippable {
            map.insert("skippable".into(), Value::Bool(skippable));
        }
        map
    }
}

/// A versioned, ordered list of selected steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowTemplate {
    pub id: String,
    pub version: u32,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<SelectedStepTemplate>,

    /// Which props a template derived from this one may change
    #[serde(default)]
    pub props_override_option: OverrideOption,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, version: u32, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version,
            title: title.into(),
            steps: Vec::new(),
            props_override_option: OverrideOption::none(),
        }
    }

    pub fn with_step(mut self, step: SelectedStepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_props_override(mut self, option: OverrideOption) -> Self {
        self.props_override_option = option;
        self
    }

    /// Props compared when validating a derived template
    pub fn props(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("title".into(), Value::String(self.title.clone()));
        map.insert(
            "steps".into(),
            serde_json::to_value(&self.steps).unwrap_or(Value::Null),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selected_step_config_fields_only_include_set_values() {
        let selected = SelectedStepTemplate::new("notify", 1).with_title("Ping ops");
        let fields = selected.config_fields();

        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("title"), Some(&json!("Ping ops")));
    }

    #[test]
    fn test_manifest_defaults_skip_inputs_without_default() {
        let template = StepTemplate::new("notify", 1, "Notify", "notify")
            .with_input(InputField::new("channel").with_default(json!("#ops")))
            .with_input(InputField::new("message").required());

        let defaults = template.manifest_defaults();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults.get("channel"), Some(&json!("#ops")));
    }

    #[test]
    fn test_override_option_deserializes_without_allowed() {
        let option: OverrideOption = serde_json::from_value(json!({})).unwrap();
        assert!(option.allowed.is_empty());
        assert!(!option.is_allowed("title"));
    }
}
