//! The dispatcher: single consumer of the ingestion queue.
//!
//! This module sits between the watcher and the sink and provides:
//!
//! - [`IngestionQueue`]: unbounded FIFO of discovered files
//! - [`RateLimiter`]: token bucket consulted before every batch
//! - [`Dispatcher`]: classify → decode → batch → deliver → route, one file at a time
//! - Real-time metrics + observer hooks for monitoring

mod observer;
mod queue;
mod rate_limiter;

use std::any::Any;
use std::io;
use std::ops::Range;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::decoder::Decoder;
use crate::error::RateLimitError;
use crate::outcome::{OutcomeRouter, ProcessingOutcome};
use crate::sink::Sink;
use crate::types::{ProcessingTask, TripRecord};

pub use observer::{
    DispatchEvent, DispatchMetrics, DispatchMetricsSnapshot, DispatchObserver, TracingDispatchObserver,
};
pub use queue::{IngestionQueue, QueueProducer};
pub use rate_limiter::{REFILL_INTERVAL, RateLimiter};

/// Configuration for the [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Rows per sink delivery. The last batch of a file may be shorter.
    pub batch_size: usize,
    /// How long the idle loop blocks on the queue before re-checking for shutdown.
    pub idle_poll: Duration,
    /// Slice used when waiting for permits, so a forced stop is noticed while throttled.
    pub permit_poll: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            idle_poll: Duration::from_millis(250),
            permit_poll: Duration::from_millis(100),
        }
    }
}

/// What happened to one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub outcome: ProcessingOutcome,
    /// New location of the file, or `None` if the move failed and the file stayed put.
    pub destination: Option<PathBuf>,
}

/// Processes files one at a time against a single sink.
pub struct Dispatcher {
    decoder: Arc<dyn Decoder>,
    sink: Box<dyn Sink>,
    limiter: Arc<RateLimiter>,
    router: OutcomeRouter,
    opts: DispatchOptions,
    observer: Option<Arc<dyn DispatchObserver>>,
    metrics: Arc<DispatchMetrics>,
}

enum Admission {
    Granted(Duration),
    Abandoned,
    Refused(RateLimitError),
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if `opts.batch_size == 0`.
    pub fn new(
        decoder: Arc<dyn Decoder>,
        sink: Box<dyn Sink>,
        limiter: Arc<RateLimiter>,
        router: OutcomeRouter,
        opts: DispatchOptions,
    ) -> Self {
        assert!(opts.batch_size > 0, "batch_size must be > 0");
        Self {
            decoder,
            sink,
            limiter,
            router,
            opts,
            observer: None,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Attach an observer for dispatch events.
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Share an existing metrics handle instead of the dispatcher's own.
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Swap the rate limiter, e.g. when re-spawning after the previous one was shut down.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Get a handle to real-time dispatch metrics.
    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Process one task to completion on the calling thread.
    ///
    /// Returns `None` if the task was abandoned because the rate limiter shut down; the file
    /// is left where it was.
    pub fn process(&mut self, task: ProcessingTask) -> Option<TaskReport> {
        let never = AtomicBool::new(false);
        self.run_task(task, &never)
    }

    /// Move the dispatcher onto its own thread, consuming `queue` until shut down.
    pub fn spawn(self, queue: &IngestionQueue) -> io::Result<DispatcherHandle> {
        let control = Arc::new(Control::default());
        let rx = queue.receiver();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_control = Arc::clone(&control);
        let thread_rx = rx.clone();
        let mut this = self;
        let handle = thread::Builder::new()
            .name("ingest-dispatcher".to_string())
            .spawn(move || {
                this.run_loop(&thread_rx, &thread_control);
                if let Err(e) = this.sink.flush() {
                    error!(error = %e, "failed to flush sink");
                }
                let _ = done_tx.send(());
                this
            })?;

        Ok(DispatcherHandle {
            control,
            rx,
            done: done_rx,
            handle: Some(handle),
        })
    }

    fn run_loop(&mut self, rx: &Receiver<ProcessingTask>, control: &Control) {
        info!(batch_size = self.opts.batch_size, "dispatcher started");
        loop {
            if control.abort.load(Ordering::SeqCst) {
                break;
            }
            let task = if control.draining.load(Ordering::SeqCst) {
                match rx.try_recv() {
                    Ok(t) => t,
                    Err(_) => break,
                }
            } else {
                match rx.recv_timeout(self.opts.idle_poll) {
                    Ok(t) => t,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };
            if let Some(report) = self.run_task(task, &control.abort) {
                debug!(
                    outcome = %report.outcome.kind(),
                    destination = ?report.destination,
                    "task finished"
                );
            }
        }
        info!(metrics = %self.metrics.snapshot(), "dispatcher stopped");
    }

    fn run_task(&mut self, task: ProcessingTask, abort: &AtomicBool) -> Option<TaskReport> {
        let path = task.path;
        info!(path = %path.display(), "processing file");
        self.emit(DispatchEvent::TaskStarted {
            path: path.clone(),
            queued_for: task.enqueued_at.elapsed(),
        });

        let Some(outcome) = self.execute(&path, abort) else {
            warn!(path = %path.display(), "file abandoned; it stays in the input directory");
            self.metrics.on_abandoned();
            self.emit(DispatchEvent::TaskAbandoned { path });
            return None;
        };
        self.metrics.on_outcome(&outcome);

        let destination = match self.router.route(&path, &outcome) {
            Ok(dest) => {
                self.emit(DispatchEvent::Routed {
                    path: path.clone(),
                    outcome: outcome.clone(),
                    destination: dest.clone(),
                });
                Some(dest)
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    outcome = %outcome.kind(),
                    error = %e,
                    "failed to move file; leaving it in place for manual intervention"
                );
                self.metrics.on_route_failure();
                self.emit(DispatchEvent::RouteFailed {
                    path: path.clone(),
                    outcome: outcome.clone(),
                    error: e.to_string(),
                });
                None
            }
        };

        Some(TaskReport {
            outcome,
            destination,
        })
    }

    /// Classify, decode and deliver. `None` means the task was abandoned mid-flight.
    fn execute(&mut self, path: &Path, abort: &AtomicBool) -> Option<ProcessingOutcome> {
        let detected = self.decoder.detect_schema(path);
        self.emit(DispatchEvent::Classified {
            path: path.to_path_buf(),
            schema: detected,
        });

        let Some(schema) = detected else {
            warn!(path = %path.display(), "file matches neither green nor yellow schema");
            return Some(ProcessingOutcome::UnknownSchema);
        };
        let expected = self.sink.expected_schema();
        if schema != expected {
            warn!(path = %path.display(), %schema, %expected, "file schema does not match sink schema");
            return Some(ProcessingOutcome::SchemaMismatch {
                detected: schema,
                expected,
            });
        }

        let decoder = Arc::clone(&self.decoder);
        let rows = match catch_unwind(AssertUnwindSafe(|| decoder.decode(path, schema))) {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                return Some(ProcessingOutcome::ParseFailure {
                    reason: e.to_string(),
                });
            }
            Err(panic) => {
                return Some(ProcessingOutcome::ParseFailure {
                    reason: format!("decoder panicked: {}", panic_message(&*panic)),
                });
            }
        };
        info!(path = %path.display(), rows = rows.len(), %schema, "parsed file");

        self.deliver_batches(&rows, abort)
    }

    fn deliver_batches(&mut self, rows: &[TripRecord], abort: &AtomicBool) -> Option<ProcessingOutcome> {
        let mut batches = 0usize;
        let mut delivered = 0usize;
        for range in batch_ranges(rows.len(), self.opts.batch_size) {
            let batch = &rows[range];

            match self.admit(batch.len(), abort) {
                Admission::Granted(waited) => {
                    if waited > Duration::ZERO {
                        self.metrics.on_throttle_wait(waited);
                    }
                    self.emit(DispatchEvent::PermitsAcquired {
                        permits: batch.len(),
                        waited,
                    });
                }
                Admission::Abandoned | Admission::Refused(RateLimitError::Shutdown) => return None,
                Admission::Refused(e) => {
                    return Some(ProcessingOutcome::SinkFailure {
                        reason: e.to_string(),
                        batches_delivered: batches,
                        rows_delivered: delivered,
                    });
                }
            }

            let sink = &mut self.sink;
            let result = catch_unwind(AssertUnwindSafe(|| sink.deliver(batch)));
            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(format!("sink panicked: {}", panic_message(&*panic))),
            };
            if let Some(reason) = failure {
                error!(batch = batches, rows = batch.len(), %reason, "sink rejected batch");
                return Some(ProcessingOutcome::SinkFailure {
                    reason,
                    batches_delivered: batches,
                    rows_delivered: delivered,
                });
            }

            batches += 1;
            delivered += batch.len();
            self.metrics.on_batch(batch.len());
            self.emit(DispatchEvent::BatchDelivered { rows: batch.len() });
            debug!(batch = batches, rows = batch.len(), total = rows.len(), "delivered batch");
        }

        Some(ProcessingOutcome::Delivered {
            rows: delivered,
            batches,
        })
    }

    /// Wait for permits in bounded slices so a forced stop is observed promptly.
    fn admit(&self, permits: usize, abort: &AtomicBool) -> Admission {
        let start = Instant::now();
        loop {
            if abort.load(Ordering::SeqCst) {
                return Admission::Abandoned;
            }
            match self.limiter.try_acquire_for(permits, self.opts.permit_poll) {
                Ok(true) => return Admission::Granted(start.elapsed()),
                Ok(false) => continue,
                Err(e) => return Admission::Refused(e),
            }
        }
    }

    fn emit(&self, event: DispatchEvent) {
        let Some(obs) = &self.observer else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| obs.on_event(&event))) {
            error!(?event, panic = %panic_message(&*panic), "dispatch observer panicked");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("opts", &self.opts)
            .field("router", &self.router)
            .field("sink_schema", &self.sink.expected_schema())
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Control {
    draining: AtomicBool,
    abort: AtomicBool,
}

/// Result of [`DispatcherHandle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `true` if the queue was fully drained within the grace period.
    pub drained: bool,
    /// Tasks left in the queue when the dispatcher stopped.
    pub discarded: usize,
}

/// Owner handle for a running dispatcher thread.
#[derive(Debug)]
pub struct DispatcherHandle {
    control: Arc<Control>,
    rx: Receiver<ProcessingTask>,
    done: Receiver<()>,
    handle: Option<JoinHandle<Dispatcher>>,
}

impl DispatcherHandle {
    /// Drain queued tasks for up to `grace`, then force the dispatcher to stop.
    ///
    /// Tasks still queued after a forced stop are discarded; their files stay in the input
    /// directory. If the dispatcher is stuck inside a decoder or sink call it is detached
    /// after a second `grace` period.
    pub fn shutdown(self, grace: Duration) -> ShutdownReport {
        self.shutdown_and_recover(grace).0
    }

    /// Like [`Self::shutdown`], also handing back the stopped dispatcher (and its sink) so it
    /// can be spawned again. `None` if the thread was detached or panicked.
    pub fn shutdown_and_recover(mut self, grace: Duration) -> (ShutdownReport, Option<Dispatcher>) {
        self.control.draining.store(true, Ordering::SeqCst);

        // The thread signals `done` only after a clean exit; a dropped sender means it panicked.
        let (drained, finished) = match self.done.recv_timeout(grace) {
            Ok(()) => (true, true),
            Err(RecvTimeoutError::Disconnected) => {
                error!("dispatcher thread died before draining the queue");
                (false, true)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?grace, pending = self.rx.len(), "grace period elapsed; forcing dispatcher stop");
                self.control.abort.store(true, Ordering::SeqCst);
                let exited = !matches!(self.done.recv_timeout(grace), Err(RecvTimeoutError::Timeout));
                (false, exited)
            }
        };

        let dispatcher = match self.handle.take() {
            Some(handle) if finished => handle.join().ok(),
            Some(_) => {
                error!("dispatcher did not stop; detaching its thread");
                None
            }
            None => None,
        };

        // Forget whatever is left; the files are re-discovered on the next start.
        let discarded = self.rx.try_iter().count();
        if discarded > 0 {
            warn!(discarded, "discarded queued tasks; files remain in the input directory");
        }
        (ShutdownReport { drained, discarded }, dispatcher)
    }
}

fn batch_ranges(row_count: usize, batch_size: usize) -> Vec<Range<usize>> {
    if row_count == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(row_count.div_ceil(batch_size));
    let mut start = 0usize;
    while start < row_count {
        let end = (start + batch_size).min(row_count);
        out.push(start..end);
        start = end;
    }
    out
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
