//! Handing instances to an executor
//!
//! The loop never schedules itself. After a trigger, and whenever an
//! instance suspends, something outside the loop has to run it again. That
//! something is an [`ExecutorDispatch`]:
//! - [`InProcessDispatcher`] drives instances on tokio tasks in this process
//! - [`RecordingDispatch`] only records requests (for tests and dry runs)

mod in_process;
mod locks;

pub use in_process::InProcessDispatcher;
pub use locks::{InstanceClaim, InstanceLocks};

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::step::SuspensionMemento;

/// Errors from dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No executor handles this run target
    #[error("unknown run target: {0}")]
    UnknownTarget(String),

    /// The executor stopped accepting work
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// Graceful shutdown did not finish in time
    #[error("dispatcher shutdown timed out")]
    ShutdownTimeout,

    /// Executor failure
    #[error("dispatch backend error: {0}")]
    Backend(String),
}

/// Request to (re-)run an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub instance_id: Uuid,

    /// `run_spec.target` of the instance
    pub target: String,

    /// How long to wait before running
    pub delay: Duration,

    /// Suspended decision the run will resume, if any
    pub memento: Option<SuspensionMemento>,
}

impl DispatchRequest {
    /// Run as soon as possible
    pub fn now(instance_id: Uuid, target: impl Into<String>) -> Self {
        Self {
            instance_id,
            target: target.into(),
            delay: Duration::ZERO,
            memento: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_memento(mut self, memento: SuspensionMemento) -> Self {
        self.memento = Some(memento);
        self
    }
}

/// An executor able to advance instances
#[async_trait]
pub trait ExecutorDispatch: Send + Sync + 'static {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError>;
}

/// Dispatch that records requests instead of running them
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    requests: Mutex<Vec<DispatchRequest>>,
    reject: AtomicBool,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().clone()
    }

    /// Make every subsequent dispatch fail (for testing)
    pub fn reject_all(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutorDispatch for RecordingDispatch {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(DispatchError::Backend("dispatch rejected".to_string()));
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::WaitSpec;

    #[tokio::test]
    async fn test_recording_dispatch() {
        let dispatch = RecordingDispatch::new();
        let id = Uuid::now_v7();
        let memento = SuspensionMemento::from_wait(&WaitSpec::new("a", "b", "c"));

        dispatch
            .dispatch(
                DispatchRequest::now(id, "in_process")
                    .after(Duration::from_secs(30))
                    .with_memento(memento.clone()),
            )
            .await
            .unwrap();

        let requests = dispatch.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].delay, Duration::from_secs(30));
        assert_eq!(requests[0].memento, Some(memento));

        dispatch.reject_all(true);
        let err = dispatch
            .dispatch(DispatchRequest::now(id, "in_process"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Backend(_)));
    }
}
