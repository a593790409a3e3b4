//! Worker configuration

use std::time::Duration;

use waypoint_engine::EngineConfig;

/// Configuration for the worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Workflow template triggered at startup
    pub demo_workflow: String,
    /// Longest the worker waits for triggered instances before shutting down
    pub run_timeout: Duration,
    /// Grace period for drivers to exit on shutdown
    pub shutdown_timeout: Duration,
    /// User recorded as the trigger's creator
    pub trigger_user: String,
    pub engine: EngineConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            demo_workflow: crate::demo::RELEASE_WORKFLOW.to_string(),
            run_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(10),
            trigger_user: "worker".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables
    ///
    /// Environment variables:
    /// - `WAYPOINT_DEMO_WORKFLOW`: Template id to trigger (default: "release")
    /// - `WAYPOINT_RUN_TIMEOUT_SECS`: Run timeout in seconds (default: 120)
    /// - `WAYPOINT_SHUTDOWN_TIMEOUT_SECS`: Shutdown grace in seconds (default: 10)
    /// - `WAYPOINT_TRIGGER_USER`: Trigger user (default: "worker")
    /// - plus the engine limits read by [`EngineConfig::from_env`]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            demo_workflow: std::env::var("WAYPOINT_DEMO_WORKFLOW")
                .unwrap_or(defaults.demo_workflow),
            run_timeout: secs("WAYPOINT_RUN_TIMEOUT_SECS", defaults.run_timeout),
            shutdown_timeout: secs("WAYPOINT_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout),
            trigger_user: std::env::var("WAYPOINT_TRIGGER_USER").unwrap_or(defaults.trigger_user),
            engine: EngineConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.demo_workflow, "release");
        assert_eq!(config.run_timeout, Duration::from_secs(120));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.engine, EngineConfig::default());
    }
}
