//! Workflow instance records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::step::{Step, SuspensionMemento};

/// Lifecycle status shared by instances and their steps
///
/// `not_started → in_progress → {paused ⇄ in_progress} → {done | error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Paused,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    ///
    /// Staying in a non-terminal status is allowed so the status message can
    /// change without a transition.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (NotStarted, NotStarted | InProgress) => true,
            (InProgress, InProgress | Paused | Done | Error) => true,
            (Paused, Paused | InProgress) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Paused => write!(f, "paused"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Where and how an instance is executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Executor target the dispatch hands the instance to
    pub target: String,
}

impl Default for RunSpec {
    fn default() -> Self {
        Self {
            target: "in_process".to_string(),
        }
    }
}

/// Mutable attributes stored alongside a step record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttribs {
    /// Present while the step is suspended on a wait/pause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<SuspensionMemento>,
}

impl StepAttribs {
    pub fn suspended(memento: SuspensionMemento) -> Self {
        Self {
            suspension: Some(memento),
        }
    }
}

/// One step of an instance: the frozen step plus its run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStep {
    pub step: Step,
    pub status: RunStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attribs: StepAttribs,
}

impl InstanceStep {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            status: RunStatus::NotStarted,
            message: None,
            attribs: StepAttribs::default(),
        }
    }
}

/// One triggered execution of a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    #[serde(default)]
    pub message: Option<String>,
    pub steps: Vec<InstanceStep>,

    /// Trigger metadata
    #[serde(default)]
    pub meta: Value,

    /// Original trigger input
    #[serde(default)]
    pub input: Value,

    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub run_spec: RunSpec,
}

impl WorkflowInstance {
    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id,
            workflow_id: self.workflow_id.clone(),
            workflow_version: self.workflow_version,
            status: self.status,
            created_at: self.created_at,
            created_by: self.created_by.clone(),
        }
    }

    /// Index of the first step that has not finished
    pub fn current_step_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status != RunStatus::Done)
    }
}

/// Short form of an instance returned by trigger and list operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use RunStatus::*;

        assert!(NotStarted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Done));
        assert!(InProgress.can_transition_to(Error));

        assert!(!NotStarted.can_transition_to(Done));
        assert!(!Paused.can_transition_to(Done));
        assert!(!Paused.can_transition_to(Error));
        assert!(!Done.can_transition_to(InProgress));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(RunStatus::NotStarted.to_string(), "not_started");
    }
}
