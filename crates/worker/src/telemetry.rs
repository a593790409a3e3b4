//! Console logging for the worker process

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup event
    pub service_name: String,
    /// Log filter (e.g., "info", "waypoint_engine=debug")
    pub log_filter: Option<String>,
    /// Include event targets in console output
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "waypoint-worker".to_string(),
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WAYPOINT_SERVICE_NAME`: Service name (default: "waypoint-worker")
    /// - `RUST_LOG`: Full log filter, used as is
    /// - `LOG_LEVEL`: Level applied to the waypoint crates when `RUST_LOG` is unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("WAYPOINT_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_filter: std::env::var("RUST_LOG").ok().or_else(|| {
                std::env::var("LOG_LEVEL")
                    .ok()
                    .map(|level| default_filter(&level))
            }),
            with_target: defaults.with_target,
        }
    }

    pub(crate) fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(default_filter("debug")))
    }
}

fn default_filter(level: &str) -> String {
    format!("info,waypoint_worker={level},waypoint_engine={level}")
}

/// Install the global subscriber
pub fn init_telemetry(config: &TelemetryConfig) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_filter(config.filter());

    tracing_subscriber::registry().with(console_layer).init();
}
