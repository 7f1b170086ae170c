//! Single-consumer scheduler that feeds event batches through the fold.

use super::events::{LogicalOp, RawEvent};
use super::fold::EventFold;
use crate::error::SyncError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How long `terminate` waits for the worker before leaving it behind.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives the folded operations of each batch, on the worker thread.
pub trait OpSink: Send {
    fn apply(&mut self, ops: Vec<LogicalOp>);
}

impl OpSink for mpsc::Sender<Vec<LogicalOp>> {
    fn apply(&mut self, ops: Vec<LogicalOp>) {
        if let Err(e) = self.send(ops) {
            debug!(dropped = e.0.len(), "Operation receiver gone, dropping batch");
        }
    }
}

struct SchedulerState {
    sink: Option<Box<dyn OpSink>>,
    sender: Option<mpsc::Sender<Vec<RawEvent>>>,
    worker: Option<JoinHandle<()>>,
}

/// Batches are folded strictly in arrival order by one worker thread,
/// started on the first enqueue and idle on the channel while the queue is
/// empty. `terminate` stops it without draining.
pub struct EventScheduler {
    state: Mutex<SchedulerState>,
    stopped: Arc<AtomicBool>,
    processed: Arc<AtomicUsize>,
}

impl EventScheduler {
    pub fn new(sink: impl OpSink + 'static) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                sink: Some(Box::new(sink)),
                sender: None,
                worker: None,
            }),
            stopped: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue one batch, as delivered by a single watcher callback.
    pub fn enqueue(&self, batch: Vec<RawEvent>) -> Result<(), SyncError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SyncError::Watch("scheduler terminated".to_string()));
        }
        let mut state = self.state.lock();
        if state.sender.is_none() {
            let sink = state
                .sink
                .take()
                .ok_or_else(|| SyncError::Watch("scheduler worker already exited".to_string()))?;
            let (tx, rx) = mpsc::channel();
            let stopped = Arc::clone(&self.stopped);
            let processed = Arc::clone(&self.processed);
            let worker = thread::Builder::new()
                .name("syncfold-coalescer".to_string())
                .spawn(move || run_worker(rx, sink, stopped, processed))
                .map_err(|e| SyncError::Watch(format!("Failed to start coalescer: {}", e)))?;
            state.sender = Some(tx);
            state.worker = Some(worker);
        }
        match &state.sender {
            Some(sender) => sender
                .send(batch)
                .map_err(|_| SyncError::Watch("coalescer is not running".to_string())),
            None => Err(SyncError::Watch("coalescer is not running".to_string())),
        }
    }

    /// Hard stop: queued batches are dropped and an in-flight fold may not
    /// reach the sink.
    pub fn terminate(&self) {
        self.terminate_within(JOIN_TIMEOUT);
    }

    /// [`terminate`](Self::terminate), waiting at most `limit` for the worker.
    /// Returns false when the worker was still busy in its sink and was left
    /// to finish on its own.
    pub fn terminate_within(&self, limit: Duration) -> bool {
        self.stopped.store(true, Ordering::Release);
        let worker = {
            let mut state = self.state.lock();
            state.sender.take();
            state.worker.take()
        };
        let Some(worker) = worker else {
            return true;
        };

        let deadline = Instant::now() + limit;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(waited_ms = limit.as_millis() as u64, "Coalescer still busy, not waiting for it");
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        if worker.join().is_err() {
            error!("Coalescer thread panicked");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.state.lock().worker.is_some()
    }

    /// Batches folded so far.
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }
}

impl Drop for EventScheduler {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_worker(
    rx: mpsc::Receiver<Vec<RawEvent>>,
    mut sink: Box<dyn OpSink>,
    stopped: Arc<AtomicBool>,
    processed: Arc<AtomicUsize>,
) {
    let mut fold = EventFold::new();
    while let Ok(batch) = rx.recv() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        let ops = fold.fold(batch);
        processed.fetch_add(1, Ordering::AcqRel);
        if stopped.load(Ordering::Acquire) {
            break;
        }
        if !ops.is_empty() {
            sink.apply(ops);
        }
    }
    debug!(
        deferred = fold.deferred().len(),
        pending_creates = fold.pending_creates(),
        "Coalescer stopped"
    );
}
