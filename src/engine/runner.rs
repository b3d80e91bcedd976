//! Concurrent Operation Runner
//!
//! Executes every operation of one phase on a bounded worker pool and blocks
//! the caller until each of them has a recorded outcome.
//!
//! # Bookkeeping
//!
//! - Operations are numbered by their position in the submitted list; that
//!   index is the [`OperationId`] and addresses a preallocated outcome slot.
//! - Workers write their slot and decrement the pending count under a single
//!   mutex, so no outcome is lost or written twice.
//! - The worker that finishes the last operation sends on a one-shot channel
//!   that the submitting thread is waiting on.
//!
//! # Cancellation
//!
//! [`OperationRunner::cancel`] only stops operations that have not started
//! yet; they are recorded as [`OperationOutcome::Canceled`] without running.
//! Operations already executing finish normally. Actions that need to stop
//! mid-flight must build that in themselves.
//!
//! Every cancel also leaves a request behind that outlives the active run.
//! `run()` ignores it; the coordinator takes it between phases so a cancel
//! that lands while no batch is active still stops the transaction.
//!
//! # Faults
//!
//! An action error becomes `Failed`, a panic inside an action becomes
//! `Faulted`. Neither escapes `run()`, and both are reported to the
//! diagnostics sink with the owning component and phase. A panicking sink is
//! logged and does not stop the outcome from being recorded.
//!
//! `run()` must not be called from a thread of the runner's own pool.

use crate::diagnostics::{DiagnosticsSink, FailureRecord, TracingSink};
use crate::engine::operation::{Operation, OperationOutcome};
use crate::error::{InstallKitError, Result};
use crate::types::Phase;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

// ============================================================================
// Outcome Map
// ============================================================================

/// Stable handle of an operation within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub usize);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Outcome of one operation, with the identity it was submitted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: OperationId,
    pub component: String,
    pub outcome: OperationOutcome,
}

/// Every outcome of one `run()`, indexed by [`OperationId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMap {
    phase: Phase,
    records: Vec<OutcomeRecord>,
}

impl OutcomeMap {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: OperationId) -> Option<&OutcomeRecord> {
        self.records.get(id.0)
    }

    /// `Some(true)` if the operation succeeded, `None` for an unknown id
    pub fn success(&self, id: OperationId) -> Option<bool> {
        self.get(id).map(|r| r.outcome.is_success())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records.iter()
    }

    pub fn all_succeeded(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_success())
    }

    pub fn succeeded_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records.iter().filter(|r| !r.outcome.is_success())
    }

    /// Combined outcome of every operation bound to `component`.
    ///
    /// `None` if the component had no operations in this run.
    pub fn component_succeeded(&self, component: &str) -> Option<bool> {
        let mut ops = self.records.iter().filter(|r| r.component == component).peekable();
        ops.peek()?;
        Some(ops.all(|r| r.outcome.is_success()))
    }

    /// First failure recorded for `component`, in submission order
    pub fn first_failure(&self, component: &str) -> Option<&OutcomeRecord> {
        self.failures().find(|r| r.component == component)
    }
}

// ============================================================================
// Per-run Bookkeeping
// ============================================================================

struct Slots {
    outcomes: Vec<Option<OperationOutcome>>,
    pending: usize,
    done: Option<SyncSender<()>>,
}

/// State shared between the submitting thread and the workers of one run.
struct Batch {
    canceled: AtomicBool,
    slots: Mutex<Slots>,
}

impl Batch {
    fn new(total: usize, done: SyncSender<()>) -> Self {
        Self {
            canceled: AtomicBool::new(false),
            slots: Mutex::new(Slots {
                outcomes: vec![None; total],
                pending: total,
                done: Some(done),
            }),
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn pending(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).pending
    }

    /// Record the outcome of operation `index`. The first write wins.
    fn finish(&self, index: usize, outcome: OperationOutcome) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.outcomes.get_mut(index) else {
            return;
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(outcome);
        slots.pending -= 1;

        if slots.pending == 0 {
            if let Some(done) = slots.done.take() {
                // The receiver only disappears if run() itself is gone.
                let _ = done.send(());
            }
        }
    }

    fn take_outcomes(&self) -> Vec<Option<OperationOutcome>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut slots.outcomes)
    }
}

// ============================================================================
// Runner
// ============================================================================

type FinishedCallback = Box<dyn Fn(&OutcomeMap) + Send + Sync>;

/// Runs one phase of operations at a time on a bounded pool.
pub struct OperationRunner {
    pool: Arc<ThreadPool>,
    active: Mutex<Option<Arc<Batch>>>,
    cancel_requested: AtomicBool,
    sink: Arc<dyn DiagnosticsSink>,
    on_finished: Option<FinishedCallback>,
}

impl fmt::Debug for OperationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRunner")
            .field("workers", &self.workers())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Host logical core count, falling back to one worker
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl OperationRunner {
    /// Create a runner with its own pool of `workers` threads
    /// (`None` = one per logical core).
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let workers = workers.unwrap_or_else(default_workers);
        if workers == 0 {
            return Err(InstallKitError::pool("worker count must be at least 1"));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("installkit-op-{}", i))
            .panic_handler(|payload| {
                error!("Worker job panicked: {}", panic_message(payload.as_ref()))
            })
            .build()
            .map_err(|e| InstallKitError::pool(e.to_string()))?;

        debug!("Operation runner started with {} worker(s)", workers);
        Ok(Self::with_pool(Arc::new(pool)))
    }

    /// Create a runner on an existing pool
    pub fn with_pool(pool: Arc<ThreadPool>) -> Self {
        Self {
            pool,
            active: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            sink: Arc::new(TracingSink),
            on_finished: None,
        }
    }

    /// Send failure records to `sink` instead of `tracing`
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register the completion notification, fired once per `run()` after
    /// the outcome map is final and before `run()` returns.
    pub fn on_finished<F>(&mut self, callback: F)
    where
        F: Fn(&OutcomeMap) + Send + Sync + 'static,
    {
        self.on_finished = Some(Box::new(callback));
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.sink
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Operations of the active run still without an outcome
    pub fn pending(&self) -> Option<usize> {
        self.active_batch().map(|batch| batch.pending())
    }

    /// Cancel every operation of the active run that has not started yet.
    /// Does not wait and does not touch operations already executing.
    ///
    /// The request is also kept until [`take_cancel_request`] consumes it.
    ///
    /// [`take_cancel_request`]: OperationRunner::take_cancel_request
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        match self.active_batch() {
            Some(batch) => {
                info!("Canceling pending operations");
                batch.canceled.store(true, Ordering::SeqCst);
            }
            None => debug!("Cancel requested with no active run"),
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Consume a pending cancel request, returning whether there was one
    pub fn take_cancel_request(&self) -> bool {
        self.cancel_requested.swap(false, Ordering::SeqCst)
    }

    /// Drop bookkeeping left over from a previous run
    pub fn reset(&self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Execute `operations` for `phase` and block until all have an outcome.
    ///
    /// Operations built for a different phase are not executed and are
    /// recorded as faulted.
    pub fn run(&self, operations: Vec<Operation>, phase: Phase) -> OutcomeMap {
        self.reset();

        let total = operations.len();
        if phase.is_mutating() {
            info!("Running {} operation(s) in {} phase", total, phase);
        } else {
            debug!("Running {} operation(s) in {} phase", total, phase);
        }

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let batch = Arc::new(Batch::new(total, done_tx));
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&batch));

        let components: Vec<String> = operations.iter().map(|op| op.component().to_string()).collect();

        for (index, operation) in operations.into_iter().enumerate() {
            let batch = Arc::clone(&batch);
            let sink = Arc::clone(&self.sink);
            self.pool.spawn(move || {
                let outcome = run_one(&operation, phase, &batch);
                let reported = panic::catch_unwind(AssertUnwindSafe(|| {
                    report(&operation, phase, &outcome, sink.as_ref())
                }));
                if let Err(payload) = reported {
                    error!(
                        "Diagnostics sink failed while recording {} of {}: {}",
                        phase,
                        operation.component(),
                        panic_message(payload.as_ref())
                    );
                }
                batch.finish(index, outcome);
            });
        }

        if total > 0 && done_rx.recv().is_err() {
            error!("Completion channel closed before every operation reported");
        }

        let records = batch
            .take_outcomes()
            .into_iter()
            .zip(components)
            .enumerate()
            .map(|(index, (outcome, component))| OutcomeRecord {
                id: OperationId(index),
                component,
                outcome: outcome
                    .unwrap_or_else(|| OperationOutcome::Faulted("no outcome reported".into())),
            })
            .collect();
        let map = OutcomeMap { phase, records };

        self.reset();
        info!(
            "{} phase finished: {}/{} succeeded",
            phase,
            map.succeeded_count(),
            map.len()
        );

        if let Some(callback) = &self.on_finished {
            callback(&map);
        }
        map
    }

    fn active_batch(&self) -> Option<Arc<Batch>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Execute a single operation on a worker thread.
fn run_one(operation: &Operation, phase: Phase, batch: &Batch) -> OperationOutcome {
    if batch.is_canceled() {
        return OperationOutcome::Canceled;
    }

    if operation.phase() != phase {
        return OperationOutcome::Faulted(format!(
            "operation built for {} phase submitted to {} phase",
            operation.phase(),
            phase
        ));
    }

    debug!("Starting {} for {}", phase, operation.component());
    match panic::catch_unwind(AssertUnwindSafe(|| operation.execute())) {
        Ok(result) => OperationOutcome::from(result),
        Err(payload) => OperationOutcome::Faulted(format!(
            "unexpected fault: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn report(operation: &Operation, phase: Phase, outcome: &OperationOutcome, sink: &dyn DiagnosticsSink) {
    match outcome {
        OperationOutcome::Succeeded => debug!("{} succeeded for {}", phase, operation.component()),
        OperationOutcome::Canceled => {
            debug!("{} canceled for {} before start", phase, operation.component())
        }
        OperationOutcome::Failed(reason) | OperationOutcome::Faulted(reason) => {
            sink.record(FailureRecord::operation(operation.component(), phase, reason.clone()));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
