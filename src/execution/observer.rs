use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::outcome::{OutcomeKind, ProcessingOutcome};
use crate::types::SchemaKind;

/// Events emitted by the dispatcher while it works through a file.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    TaskStarted { path: PathBuf, queued_for: Duration },
    Classified { path: PathBuf, schema: Option<SchemaKind> },
    PermitsAcquired { permits: usize, waited: Duration },
    BatchDelivered { rows: usize },
    Routed {
        path: PathBuf,
        outcome: ProcessingOutcome,
        destination: PathBuf,
    },
    /// The file could not be moved and was left in place.
    RouteFailed {
        path: PathBuf,
        outcome: ProcessingOutcome,
        error: String,
    },
    /// Shutdown forced the dispatcher to stop mid-file; the file stays in the input directory.
    TaskAbandoned { path: PathBuf },
}

/// Observer hook for dispatch events.
pub trait DispatchObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Forwards every event to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingDispatchObserver;

impl DispatchObserver for TracingDispatchObserver {
    fn on_event(&self, event: &DispatchEvent) {
        debug!(?event, "dispatch event");
    }
}

/// Running counters for the dispatcher. Updated lock-free; snapshot at any time.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    files_delivered: AtomicU64,
    files_unknown_schema: AtomicU64,
    files_schema_mismatch: AtomicU64,
    files_parse_failure: AtomicU64,
    files_sink_failure: AtomicU64,
    files_abandoned: AtomicU64,
    route_failures: AtomicU64,
    rows_delivered: AtomicU64,
    batches_delivered: AtomicU64,
    throttle_wait_ns: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_outcome(&self, outcome: &ProcessingOutcome) {
        let counter = match outcome.kind() {
            OutcomeKind::Delivered => &self.files_delivered,
            OutcomeKind::UnknownSchema => &self.files_unknown_schema,
            OutcomeKind::SchemaMismatch => &self.files_schema_mismatch,
            OutcomeKind::ParseFailure => &self.files_parse_failure,
            OutcomeKind::SinkFailure => &self.files_sink_failure,
        };
        let _ = counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_batch(&self, rows: usize) {
        let _ = self.batches_delivered.fetch_add(1, Ordering::SeqCst);
        let _ = self.rows_delivered.fetch_add(rows as u64, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let add = d.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self.throttle_wait_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn on_route_failure(&self) {
        let _ = self.route_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_abandoned(&self) {
        let _ = self.files_abandoned.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        let quarantined = [
            &self.files_unknown_schema,
            &self.files_schema_mismatch,
            &self.files_parse_failure,
            &self.files_sink_failure,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum();

        DispatchMetricsSnapshot {
            files_delivered: self.files_delivered.load(Ordering::SeqCst),
            files_quarantined: quarantined,
            files_unknown_schema: self.files_unknown_schema.load(Ordering::SeqCst),
            files_schema_mismatch: self.files_schema_mismatch.load(Ordering::SeqCst),
            files_parse_failure: self.files_parse_failure.load(Ordering::SeqCst),
            files_sink_failure: self.files_sink_failure.load(Ordering::SeqCst),
            files_abandoned: self.files_abandoned.load(Ordering::SeqCst),
            route_failures: self.route_failures.load(Ordering::SeqCst),
            rows_delivered: self.rows_delivered.load(Ordering::SeqCst),
            batches_delivered: self.batches_delivered.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
        }
    }
}

/// Immutable snapshot of [`DispatchMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    pub files_delivered: u64,
    pub files_quarantined: u64,
    pub files_unknown_schema: u64,
    pub files_schema_mismatch: u64,
    pub files_parse_failure: u64,
    pub files_sink_failure: u64,
    pub files_abandoned: u64,
    pub route_failures: u64,
    pub rows_delivered: u64,
    pub batches_delivered: u64,
    pub throttle_wait: Duration,
}

impl fmt::Display for DispatchMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files_delivered={}, files_quarantined={}, files_abandoned={}, route_failures={}, rows_delivered={}, batches={}, throttle_wait={:?}",
            self.files_delivered,
            self.files_quarantined,
            self.files_abandoned,
            self.route_failures,
            self.rows_delivered,
            self.batches_delivered,
            self.throttle_wait
        )
    }
}
