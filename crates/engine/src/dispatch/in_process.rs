//! In-process executor driving instances on tokio tasks

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::locks::{InstanceClaim, InstanceLocks};
use super::{DispatchError, DispatchRequest, ExecutorDispatch};
use crate::engine::{LoopOutcome, WorkflowLoop};
use crate::persistence::RunSpec;

/// Terminal outcomes kept for [`InProcessDispatcher::last_outcome`]
pub const RETAINED_TERMINAL_OUTCOMES: usize = 1024;

/// Executor that runs the loop in this process
///
/// Each dispatched instance gets one driver task. The driver runs the loop,
/// sleeps for `resume_after` whenever the instance suspends, and stops at a
/// terminal outcome. A second dispatch for an instance that already has a
/// driver wakes that driver instead of starting another one; if the driver
/// is mid-run, it runs once more before stopping.
///
/// # Example
///
/// ```ignore
/// let dispatcher = InProcessDispatcher::new(engine);
/// dispatcher.dispatch(DispatchRequest::now(instance_id, "in_process")).await?;
///
/// // An approver clicked "approve": re-check the pause now
/// dispatcher.resume_now(instance_id);
///
/// dispatcher.shutdown(Duration::from_secs(10)).await?;
/// ```
#[derive(Clone)]
pub struct InProcessDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    engine: WorkflowLoop,
    target: String,
    locks: InstanceLocks,

    /// One entry per claimed instance; inserted and removed with the claim
    drivers: Mutex<HashMap<Uuid, Arc<DriverSignal>>>,
    outcomes: Mutex<OutcomeLog>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Wake-up channel into one driver
#[derive(Default)]
struct DriverSignal {
    notify: Notify,

    /// A run was requested since the driver last started one
    rerun: AtomicBool,
}

impl DriverSignal {
    fn wake(&self) {
        self.rerun.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// Latest outcome per instance, with a bounded number of terminal ones
#[derive(Debug)]
struct OutcomeLog {
    latest: HashMap<Uuid, LoopOutcome>,
    terminal: VecDeque<Uuid>,
    capacity: usize,
}

impl OutcomeLog {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            latest: HashMap::new(),
            terminal: VecDeque::new(),
            capacity,
        }
    }

    fn record(&mut self, instance_id: Uuid, outcome: LoopOutcome) {
        let terminal = outcome.is_terminal();
        let replaced = self.latest.insert(instance_id, outcome);
        if replaced.is_some_and(|o| o.is_terminal()) {
            self.terminal.retain(|id| *id != instance_id);
        }

        if terminal {
            self.terminal.push_back(instance_id);
            while self.terminal.len() > self.capacity {
                if let Some(oldest) = self.terminal.pop_front() {
                    self.latest.remove(&oldest);
                }
            }
        }
    }

    fn get(&self, instance_id: Uuid) -> Option<LoopOutcome> {
        self.latest.get(&instance_id).cloned()
    }
}

impl InProcessDispatcher {
    /// Create a dispatcher serving the default `in_process` target
    pub fn new(engine: WorkflowLoop) -> Self {
        Self::with_target(engine, RunSpec::default().target)
    }

    pub fn with_target(engine: WorkflowLoop, target: impl Into<String>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                engine,
                target: target.into(),
                locks: InstanceLocks::new(),
                drivers: Mutex::new(HashMap::new()),
                outcomes: Mutex::new(OutcomeLog::with_capacity(RETAINED_TERMINAL_OUTCOMES)),
                handles: Mutex::new(Vec::new()),
                shutdown_tx,
                shutdown_rx,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Wake a suspended instance before its timer fires
    ///
    /// Returns false if the instance has no driver in this process.
    pub fn resume_now(&self, instance_id: Uuid) -> bool {
        match self.inner.drivers.lock().get(&instance_id) {
            Some(signal) => {
                debug!(%instance_id, "explicit resume requested");
                signal.wake();
                true
            }
            None => false,
        }
    }

    /// Outcome of the latest loop run for an instance
    ///
    /// Only the most recent [`RETAINED_TERMINAL_OUTCOMES`] terminal outcomes
    /// are kept.
    pub fn last_outcome(&self, instance_id: Uuid) -> Option<LoopOutcome> {
        self.inner.outcomes.lock().get(instance_id)
    }

    /// Number of instances with a live driver
    pub fn active_instances(&self) -> usize {
        self.inner.locks.len()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_rx.borrow()
    }

    /// Wait until every driver started so far has finished
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        log_join_errors(futures::future::join_all(handles).await);
    }

    /// Stop accepting work and wait for drivers to exit
    ///
    /// Suspended instances keep their mementos and can be dispatched again
    /// by the next process.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), DispatchError> {
        info!(target = %self.inner.target, "Initiating dispatcher shutdown");
        let _ = self.inner.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                log_join_errors(results);
                info!("Dispatcher stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    remaining = self.inner.locks.len(),
                    "Dispatcher shutdown timeout reached"
                );
                Err(DispatchError::ShutdownTimeout)
            }
        }
    }
}

/// How one loop run ended, as seen by the driver
enum RunEnd {
    /// Suspended or yielded; run again after the delay
    Again(Duration),
    /// Terminal outcome recorded
    Settled,
    /// The run returned an error
    Failed,
}

/// Result of asking for a driver
enum Driver {
    /// No driver was running; the caller must start one
    Start(InstanceClaim, Arc<DriverSignal>),
    /// A driver already owns the instance
    Running,
}

impl Inner {
    /// Claim the instance, or signal the driver that already holds it
    ///
    /// Claims are taken and released under the drivers lock, so a request
    /// either reaches a live driver or finds the instance free.
    fn claim_or_signal(&self, instance_id: Uuid, wake: bool) -> Driver {
        let mut drivers = self.drivers.lock();
        if let Some(signal) = drivers.get(&instance_id) {
            if wake {
                signal.wake();
            }
            return Driver::Running;
        }

        match self.locks.try_claim(instance_id) {
            Some(claim) => {
                let signal = Arc::new(DriverSignal::default());
                drivers.insert(instance_id, signal.clone());
                Driver::Start(claim, signal)
            }
            None => Driver::Running,
        }
    }

    /// Release the instance unless a run was requested meanwhile
    ///
    /// Hands the claim back when the driver must run again.
    fn release(
        &self,
        claim: InstanceClaim,
        signal: &DriverSignal,
        rerun_allowed: bool,
    ) -> Option<InstanceClaim> {
        let mut drivers = self.drivers.lock();
        if rerun_allowed && signal.rerun.swap(false, Ordering::SeqCst) {
            return Some(claim);
        }
        drivers.remove(&claim.instance_id());
        drop(claim);
        None
    }

    /// Run the loop once and record its outcome
    async fn run_once(&self, instance_id: Uuid) -> RunEnd {
        match self.engine.run(instance_id).await {
            Ok(outcome) => {
                let end = match &outcome {
                    LoopOutcome::Suspended { resume_after, .. } => RunEnd::Again(*resume_after),
                    LoopOutcome::Yielded { .. } => RunEnd::Again(Duration::ZERO),
                    _ => RunEnd::Settled,
                };
                debug!(%instance_id, ?outcome, "loop run finished");
                self.outcomes.lock().record(instance_id, outcome);
                end
            }
            Err(e) => {
                error!(%instance_id, "Workflow loop failed: {}", e);
                RunEnd::Failed
            }
        }
    }

    async fn drive(
        self: Arc<Self>,
        mut claim: InstanceClaim,
        signal: Arc<DriverSignal>,
        mut delay: Duration,
    ) {
        let instance_id = claim.instance_id();
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.notify.notified() => {
                        debug!(%instance_id, "resuming before timer");
                    }
                    _ = shutdown.changed() => {}
                }
            }

            // A settled instance has nothing left to rerun
            let rerun_allowed = if *shutdown.borrow() {
                debug!(%instance_id, "shutdown requested, leaving instance for later");
                false
            } else {
                signal.rerun.store(false, Ordering::SeqCst);
                match self.run_once(instance_id).await {
                    RunEnd::Again(after) => {
                        delay = after;
                        continue;
                    }
                    RunEnd::Settled => false,
                    RunEnd::Failed => true,
                }
            };

            match self.release(claim, &signal, rerun_allowed) {
                Some(kept) => {
                    debug!(%instance_id, "run requested during last run, running again");
                    claim = kept;
                    delay = Duration::ZERO;
                }
                None => break,
            }
        }
    }
}

fn log_join_errors(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(e) = result {
            error!("Driver task failed: {}", e);
        }
    }
}

#[async_trait]
impl ExecutorDispatch for InProcessDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        if request.target != self.inner.target {
            return Err(DispatchError::UnknownTarget(request.target));
        }
        if self.is_shutdown() {
            return Err(DispatchError::ShuttingDown);
        }

        let instance_id = request.instance_id;
        if let Some(memento) = &request.memento {
            debug!(%instance_id, kind = %memento.kind, counter = memento.counter, "dispatching suspended instance");
        }

        // Already driven here; an immediate request means "run now"
        let (claim, signal) = match self
            .inner
            .claim_or_signal(instance_id, request.delay.is_zero())
        {
            Driver::Start(claim, signal) => (claim, signal),
            Driver::Running => return Ok(()),
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.drive(claim, signal, request.delay));

        let mut handles = self.inner.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }
}
