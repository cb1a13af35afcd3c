//! Wires the watcher, queue, dispatcher, rate limiter and router into one service.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::decoder::Decoder;
use crate::error::{PipelineError, PipelineResult};
use crate::execution::{
    DispatchMetrics, DispatchObserver, DispatchOptions, Dispatcher, DispatcherHandle, IngestionQueue,
    RateLimiter, ShutdownReport,
};
use crate::outcome::OutcomeRouter;
use crate::sink::Sink;
use crate::watcher::DirectoryWatcher;

/// A directory-to-sink ingestion service.
///
/// `start()` and `stop()` are idempotent. A stopped pipeline can be started again as long as
/// its dispatcher shut down cleanly.
pub struct IngestionPipeline {
    config: PipelineConfig,
    decoder: Arc<dyn Decoder>,
    observer: Option<Arc<dyn DispatchObserver>>,
    metrics: Arc<DispatchMetrics>,
    queue: IngestionQueue,
    state: Mutex<State>,
}

enum State {
    Stopped { sink: Option<Box<dyn Sink>>, dispatcher: Option<Dispatcher> },
    Running(Running),
}

struct Running {
    watcher: DirectoryWatcher,
    dispatcher: DispatcherHandle,
    limiter: Arc<RateLimiter>,
}

impl IngestionPipeline {
    /// Validate `config` and assemble a stopped pipeline.
    pub fn new(config: PipelineConfig, decoder: Arc<dyn Decoder>, sink: Box<dyn Sink>) -> PipelineResult<Self> {
        config.validate()?;
        if sink.expected_schema() != config.sink.schema {
            warn!(
                configured = %config.sink.schema,
                sink = %sink.expected_schema(),
                "sink schema differs from configuration; the sink wins"
            );
        }
        Ok(Self {
            config,
            decoder,
            observer: None,
            metrics: Arc::new(DispatchMetrics::new()),
            queue: IngestionQueue::new(),
            state: Mutex::new(State::Stopped {
                sink: Some(sink),
                dispatcher: None,
            }),
        })
    }

    /// Build the sink described by `config.sink`.
    pub fn from_config(config: PipelineConfig, decoder: Arc<dyn Decoder>) -> PipelineResult<Self> {
        let sink = config.sink.build();
        Self::new(config, decoder, sink)
    }

    /// Attach an observer for dispatch events. Takes effect on the next `start()`.
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self) -> PipelineResult<()> {
        let mut state = self.state();
        let State::Stopped { sink, dispatcher } = &mut *state else {
            return Ok(());
        };

        let directory = ensure_dir(&self.config.directory)?;
        let output = ensure_dir(&self.config.output_directory)?;
        let error = ensure_dir(&self.config.error_directory)?;

        let producer = self.queue.producer();
        let watcher = DirectoryWatcher::builder(&directory, self.config.file_pattern.clone())
            .scan_period(self.config.scan_period())
            .announce_existing(true)
            .on_file_added(move |path| {
                if producer.enqueue(path) {
                    Ok(())
                } else {
                    Err("ingestion queue is closed".into())
                }
            })
            .build()?;

        let limiter = Arc::new(
            RateLimiter::new(self.config.rate_limit_permits_per_second).map_err(PipelineError::Spawn)?,
        );

        let prepared = match (dispatcher.take(), sink.take()) {
            (Some(d), _) => d,
            (None, Some(s)) => self.dispatcher(s, Arc::clone(&limiter), OutcomeRouter::new(&output, &error)),
            (None, None) => return Err(PipelineError::SinkUnavailable),
        };
        let prepared = prepared.with_limiter(Arc::clone(&limiter));

        let handle = match prepared.spawn(&self.queue) {
            Ok(h) => h,
            Err(e) => {
                limiter.shutdown();
                return Err(PipelineError::Spawn(e));
            }
        };

        if let Err(e) = watcher.start() {
            let (_, recovered) = handle.shutdown_and_recover(self.config.shutdown_grace());
            limiter.shutdown();
            *dispatcher = recovered;
            return Err(e.into());
        }

        info!(
            directory = %directory.display(),
            output = %output.display(),
            error = %error.display(),
            sink = %self.config.sink.schema,
            "pipeline started"
        );
        *state = State::Running(Running {
            watcher,
            dispatcher: handle,
            limiter,
        });
        Ok(())
    }

    /// Stop discovering files, drain the queue within the configured grace period, then
    /// release the rate limiter. Returns `None` if the pipeline was not running.
    pub fn stop(&self) -> Option<ShutdownReport> {
        let mut state = self.state();
        let stopped = State::Stopped {
            sink: None,
            dispatcher: None,
        };
        let running = match std::mem::replace(&mut *state, stopped) {
            State::Running(r) => r,
            other => {
                *state = other;
                return None;
            }
        };

        running.watcher.stop();
        let (report, recovered) = running.dispatcher.shutdown_and_recover(self.config.shutdown_grace());
        running.limiter.shutdown();

        info!(
            drained = report.drained,
            discarded = report.discarded,
            metrics = %self.metrics.snapshot(),
            "pipeline stopped"
        );
        *state = State::Stopped {
            sink: None,
            dispatcher: recovered,
        };
        Some(report)
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state(), State::Running(_))
    }

    /// Files the watcher currently knows about. Empty while stopped.
    pub fn known_files(&self) -> BTreeSet<PathBuf> {
        match &*self.state() {
            State::Running(r) => r.watcher.known_files(),
            State::Stopped { .. } => BTreeSet::new(),
        }
    }

    /// Tasks waiting for the dispatcher.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn dispatcher(&self, sink: Box<dyn Sink>, limiter: Arc<RateLimiter>, router: OutcomeRouter) -> Dispatcher {
        let opts = DispatchOptions {
            batch_size: self.config.batch_size,
            ..DispatchOptions::default()
        };
        let d = Dispatcher::new(Arc::clone(&self.decoder), sink, limiter, router, opts)
            .with_metrics(Arc::clone(&self.metrics));
        match &self.observer {
            Some(o) => d.with_observer(Arc::clone(o)),
            None => d,
        }
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("queue_len", &self.queue.len())
            .finish()
    }
}

/// Create `dir` if needed and return its absolute form.
fn ensure_dir(dir: &Path) -> PipelineResult<PathBuf> {
    fs::create_dir_all(dir)
        .and_then(|()| fs::canonicalize(dir))
        .map_err(|source| PipelineError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })
}
