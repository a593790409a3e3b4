//! Templates and override validation
//!
//! This module contains the authoring-time model:
//! - [`WorkflowTemplate`], [`SelectedStepTemplate`], [`StepTemplate`] definitions
//! - [`OverrideValidator`] implementations deciding which customizations are allowed
//! - [`TemplateCatalog`] for looking up published template versions

mod catalog;
mod definition;
mod validator;

pub use catalog::{CatalogError, InMemoryTemplateCatalog, TemplateCatalog};
pub use definition::{
    InputField, OverrideOption, SelectedStepTemplate, StepTemplate, WorkflowTemplate,
};
pub use validator::{
    validate_selected_step, validate_template_override, ConfigOverrideValidator, KeyTransform,
    OverrideValidator, PropsOverrideValidator, StepViolations, ValidationReport,
    STEPS_KEY, STEP_CONFIG_KEYS,
};
