//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the workflow loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Steps one `run` call may finish before it yields
    pub max_steps_per_run: usize,

    /// Chained `then_call`/`otherwise` decisions evaluated for one step entry
    pub max_decisions_per_step: usize,

    /// Suspension delay used when a wait asks for a zero interval
    #[serde(with = "duration_secs")]
    pub default_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: 1000,
            max_decisions_per_step: 32,
            default_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Load from `WAYPOINT_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_steps_per_run = std::env::var("WAYPOINT_MAX_STEPS_PER_RUN")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_steps_per_run);

        let max_decisions_per_step = std::env::var("WAYPOINT_MAX_DECISIONS_PER_STEP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_decisions_per_step);

        Self {
            max_steps_per_run,
            max_decisions_per_step,
            ..defaults
        }
        .normalized()
    }

    pub fn with_max_steps_per_run(mut self, max: usize) -> Self {
        self.max_steps_per_run = max;
        self.normalized()
    }

    pub fn with_max_decisions_per_step(mut self, max: usize) -> Self {
        self.max_decisions_per_step = max;
        self.normalized()
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    fn normalized(mut self) -> Self {
        self.max_steps_per_run = self.max_steps_per_run.max(1);
        self.max_decisions_per_step = self.max_decisions_per_step.max(1);
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
