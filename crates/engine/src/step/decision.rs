//! Decisions returned by step logic and their persisted mementos

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for step failures
///
/// Serializable so it can be carried in a failure status message and in
/// suspension records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The step logic decided to fail
    #[error("{message}")]
    Failed {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },

    /// A decision broke the engine's contract (e.g. a non-boolean check)
    #[error("decision contract violated: {message}")]
    Contract { message: String },

    /// A callback reference did not resolve against the step logic
    #[error("unknown callback: {name}")]
    UnknownCallback { name: String },

    /// No logic is registered for the step's executor reference
    #[error("no step logic registered for executor: {executor}")]
    MissingLogic { executor: String },
}

impl StepError {
    /// Create a step failure
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            code: None,
        }
    }

    /// Create a contract error
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    /// Create an unknown-callback error
    pub fn unknown_callback(name: impl Into<String>) -> Self {
        Self::UnknownCallback { name: name.into() }
    }

    /// Set the error code (only meaningful for [`StepError::Failed`])
    pub fn with_code(self, code: impl Into<String>) -> Self {
        match self {
            Self::Failed { message, .. } => Self::Failed {
                message,
                code: Some(code.into()),
            },
            other => other,
        }
    }

    /// Whether this error comes from the engine contract rather than step logic
    pub fn is_contract_error(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A named reference to one of a step's callbacks
///
/// Resolved by [`StepLogic::call`](super::StepLogic::call), which keeps
/// suspended decisions serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRef {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl CallbackRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

impl From<&str> for CallbackRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Wait for `check` to succeed, polling every `interval_seconds`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    pub check: CallbackRef,
    pub then_call: CallbackRef,
    pub otherwise: CallbackRef,
    pub interval_seconds: u64,
    pub max_attempts: u32,

    /// Failed checks so far
    pub counter: u32,
}

impl WaitSpec {
    /// Create a wait with a 60 second interval and 10 attempts
    pub fn new(
        check: impl Into<CallbackRef>,
        then_call: impl Into<CallbackRef>,
        otherwise: impl Into<CallbackRef>,
    ) -> Self {
        Self {
            check: check.into(),
            then_call: then_call.into(),
            otherwise: otherwise.into(),
            interval_seconds: 60,
            max_attempts: 10,
            counter: 0,
        }
    }

    pub fn every(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Turn this wait into a pause with the given reason
    pub fn pause(self, reason: impl Into<String>) -> Decision {
        Decision::Pause(PauseSpec {
            wait: self,
            reason: reason.into(),
        })
    }
}

/// A wait that also pauses the instance while it is unresolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseSpec {
    pub wait: WaitSpec,
    pub reason: String,
}

/// What the loop should do next with a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Step passed, advance
    Proceed,

    /// Step skipped, advance without touching the payload
    Skip,

    /// Step failed, the workflow fails
    Fail(StepError),

    /// Poll a check until it succeeds or attempts run out
    Wait(WaitSpec),

    /// Like wait, but the instance is reported as paused meanwhile
    Pause(PauseSpec),
}

impl Decision {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(StepError::new(message))
    }

    pub fn wait(spec: WaitSpec) -> Self {
        Self::Wait(spec)
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Skip => "skip",
            Self::Fail(_) => "fail",
            Self::Wait(_) => "wait",
            Self::Pause(_) => "pause",
        }
    }
}

/// Value produced by a step callback
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutput {
    Bool(bool),
    Decision(Decision),
    Value(Value),
}

impl CallbackOutput {
    /// Interpret the output of a `check` callback
    pub fn into_check(self, callback: &CallbackRef) -> Result<bool, StepError> {
        match self {
            Self::Bool(b) | Self::Value(Value::Bool(b)) => Ok(b),
            other => Err(StepError::contract(format!(
                "check callback '{}' must yield a boolean, got {}",
                callback.name,
                other.describe()
            ))),
        }
    }

    /// Interpret the output of a `then_call`/`otherwise` callback
    pub fn into_decision(self, callback: &CallbackRef) -> Result<Decision, StepError> {
        match self {
            Self::Decision(decision) => Ok(decision),
            other => Err(StepError::contract(format!(
                "callback '{}' must yield a decision, got {}",
                callback.name,
                other.describe()
            ))),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Bool(b) => format!("boolean {b}"),
            Self::Decision(d) => format!("decision {}", d.kind()),
            Self::Value(v) => format!("value {v}"),
        }
    }
}

impl From<bool> for CallbackOutput {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Decision> for CallbackOutput {
    fn from(d: Decision) -> Self {
        Self::Decision(d)
    }
}

/// Discriminant of a suspension memento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionKind {
    Wait,
    Pause,
}

impl std::fmt::Display for SuspensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wait => write!(f, "wait"),
            Self::Pause => write!(f, "pause"),
        }
    }
}

/// Resumable snapshot of an unresolved wait/pause decision
///
/// Stored in the step's attributes when the loop suspends. A pause memento
/// always means the pause was already entered and reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionMemento {
    #[serde(rename = "type")]
    pub kind: SuspensionKind,
    pub seconds: u64,
    pub counter: u32,
    pub max: u32,
    pub check: CallbackRef,
    pub then_call: CallbackRef,
    pub otherwise: CallbackRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
}

impl SuspensionMemento {
    pub fn from_wait(spec: &WaitSpec) -> Self {
        Self {
            kind: SuspensionKind::Wait,
            seconds: spec.interval_seconds,
            counter: spec.counter,
            max: spec.max_attempts,
            check: spec.check.clone(),
            then_call: spec.then_call.clone(),
            otherwise: spec.otherwise.clone(),
            pause_reason: None,
        }
    }

    pub fn from_pause(spec: &PauseSpec) -> Self {
        Self {
            kind: SuspensionKind::Pause,
            pause_reason: Some(spec.reason.clone()),
            ..Self::from_wait(&spec.wait)
        }
    }

    /// Rehydrate the suspended decision
    pub fn to_decision(&self) -> Result<Decision, StepError> {
        let wait = WaitSpec {
            check: self.check.clone(),
            then_call: self.then_call.clone(),
            otherwise: self.otherwise.clone(),
            interval_seconds: self.seconds,
            max_attempts: self.max,
            counter: self.counter,
        };

        match (self.kind, &self.pause_reason) {
            (SuspensionKind::Wait, None) => Ok(Decision::Wait(wait)),
            (SuspensionKind::Pause, Some(reason)) => Ok(Decision::Pause(PauseSpec {
                wait,
                reason: reason.clone(),
            })),
            (SuspensionKind::Wait, Some(_)) => Err(StepError::contract(
                "wait memento must not carry a pause reason",
            )),
            (SuspensionKind::Pause, None) => {
                Err(StepError::contract("pause memento is missing its reason"))
            }
        }
    }
}
