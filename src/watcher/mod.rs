//! Polling directory watcher.
//!
//! [`DirectoryWatcher`] lists one directory (non-recursively) every scan period, diffs the
//! matching regular files against the files it already knows, and reports each transition
//! exactly once to its [`FileObserver`]s.
//!
//! ```no_run
//! use std::time::Duration;
//! use tripdata_ingest::watcher::DirectoryWatcher;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let watcher = DirectoryWatcher::builder("/data/incoming", r"^trip.*\.parquet$")
//!     .scan_period(Duration::from_secs(5))
//!     .on_file_added(|path| {
//!         println!("new file: {}", path.display());
//!         Ok(())
//!     })
//!     .build()?;
//! watcher.start()?;
//! // ...
//! watcher.stop();
//! # Ok(())
//! # }
//! ```

mod hooks;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{RecvTimeoutError, Sender};
use regex::Regex;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

use crate::config::compile_file_pattern;
use crate::error::{ConfigError, WatchError};

pub use hooks::{FileEvent, FileObserver, HookResult};
use hooks::{ClosureObserver, HookFn};

/// Default time between scans.
pub const DEFAULT_SCAN_PERIOD: Duration = Duration::from_secs(5);

/// Size and modification time recorded for a known file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

/// Builder for [`DirectoryWatcher`].
pub struct WatcherBuilder {
    directory: PathBuf,
    file_pattern: String,
    scan_period: Duration,
    announce_existing: bool,
    observers: Vec<Arc<dyn FileObserver>>,
}

impl WatcherBuilder {
    pub fn scan_period(mut self, period: Duration) -> Self {
        self.scan_period = period;
        self
    }

    /// Report files already present at `start()` as added. Off by default.
    ///
    /// Those hooks run inside `start()`, so they must not call back into `start`/`stop`.
    pub fn announce_existing(mut self, announce: bool) -> Self {
        self.announce_existing = announce;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FileObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn on_file_added<F>(self, hook: F) -> Self
    where
        F: Fn(&Path) -> HookResult + Send + Sync + 'static,
    {
        self.closure(FileEvent::Added, Box::new(hook))
    }

    pub fn on_file_modified<F>(self, hook: F) -> Self
    where
        F: Fn(&Path) -> HookResult + Send + Sync + 'static,
    {
        self.closure(FileEvent::Modified, Box::new(hook))
    }

    pub fn on_file_deleted<F>(self, hook: F) -> Self
    where
        F: Fn(&Path) -> HookResult + Send + Sync + 'static,
    {
        self.closure(FileEvent::Deleted, Box::new(hook))
    }

    fn closure(self, event: FileEvent, hook: HookFn) -> Self {
        self.observer(Arc::new(ClosureObserver::new(event, hook)))
    }

    /// Compile the pattern and produce a stopped watcher.
    pub fn build(self) -> Result<DirectoryWatcher, ConfigError> {
        if self.scan_period.is_zero() {
            return Err(ConfigError::invalid("scan period must be > 0"));
        }
        let matcher = compile_file_pattern(&self.file_pattern)?;
        Ok(DirectoryWatcher {
            inner: Arc::new(Inner {
                directory: self.directory,
                file_pattern: self.file_pattern,
                matcher,
                scan_period: self.scan_period,
                announce_existing: self.announce_existing,
                observers: self.observers,
                known: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                scan_lock: Mutex::new(()),
                scanning_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for WatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherBuilder")
            .field("directory", &self.directory)
            .field("file_pattern", &self.file_pattern)
            .field("scan_period", &self.scan_period)
            .field("announce_existing", &self.announce_existing)
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

/// Polls one directory and reports matching files as they appear, change and disappear.
///
/// Lifecycle is `stopped -> running -> stopped`; both transitions are idempotent and a stopped
/// watcher can be started again (it starts cold, with an empty known set).
pub struct DirectoryWatcher {
    inner: Arc<Inner>,
    worker: Mutex<Option<ScanWorker>>,
}

struct ScanWorker {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    directory: PathBuf,
    file_pattern: String,
    matcher: Regex,
    scan_period: Duration,
    announce_existing: bool,
    observers: Vec<Arc<dyn FileObserver>>,
    known: RwLock<HashMap<PathBuf, FileStamp>>,
    running: AtomicBool,
    scan_lock: Mutex<()>,
    scanning_thread: Mutex<Option<ThreadId>>,
}

/// Files that changed state in one scan.
#[derive(Debug, Default)]
struct ScanDiff {
    added: Vec<PathBuf>,
    modified: Vec<PathBuf>,
    removed: Vec<PathBuf>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DirectoryWatcher {
    /// Start building a watcher for `directory`, matching file names against `file_pattern`.
    ///
    /// The pattern must match the whole file name.
    pub fn builder(directory: impl Into<PathBuf>, file_pattern: impl Into<String>) -> WatcherBuilder {
        WatcherBuilder {
            directory: directory.into(),
            file_pattern: file_pattern.into(),
            scan_period: DEFAULT_SCAN_PERIOD,
            announce_existing: false,
            observers: Vec::new(),
        }
    }

    /// Validate the directory, seed the known set and schedule recurring scans.
    ///
    /// No-op if already running.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            debug!(directory = %self.inner.directory.display(), "watcher already running");
            return Ok(());
        }
        self.inner.check_directory()?;

        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.scan(self.inner.announce_existing);

        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let period = self.inner.scan_period;
        let spawned = thread::Builder::new()
            .name("dir-watcher".to_string())
            .spawn(move || {
                loop {
                    match cancelled.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => inner.scan(true),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                trace!("watcher scan thread exiting");
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                self.inner.clear_known();
                return Err(WatchError::Spawn(e));
            }
        };
        *worker = Some(ScanWorker { cancel, handle });
        info!(
            directory = %self.inner.directory.display(),
            pattern = %self.inner.file_pattern,
            period = ?self.inner.scan_period,
            known = self.inner.known_len(),
            "watcher started"
        );
        Ok(())
    }

    /// Cancel recurring scans and forget every known file.
    ///
    /// Idempotent. When it returns, no further scan will run and no hook will be invoked.
    /// Called from a hook, the current scan stops early and the scan thread is left to exit
    /// on its own once that scan releases the scan lock.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = worker.cancel.send(());

        let in_scan = *lock(&self.inner.scanning_thread) == Some(thread::current().id());
        if in_scan {
            // The scan thread may be blocked on `scan_lock`, which this thread holds.
            drop(worker.handle);
            self.inner.clear_known();
        } else {
            if worker.handle.join().is_err() {
                error!("watcher scan thread panicked");
            }
            // Wait out a manual scan running on another thread.
            let _scan = lock(&self.inner.scan_lock);
            self.inner.clear_known();
        }
        info!(directory = %self.inner.directory.display(), "watcher stopped");
    }

    /// Run one scan now, on the calling thread. No-op while stopped.
    pub fn scan(&self) {
        self.inner.scan(true);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the files currently known, sorted by path.
    pub fn known_files(&self) -> BTreeSet<PathBuf> {
        self.inner
            .known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// The pattern as configured (before anchoring).
    pub fn file_pattern(&self) -> &str {
        &self.inner.file_pattern
    }

    pub fn scan_period(&self) -> Duration {
        self.inner.scan_period
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("directory", &self.inner.directory)
            .field("file_pattern", &self.inner.file_pattern)
            .field("scan_period", &self.inner.scan_period)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn check_directory(&self) -> Result<(), WatchError> {
        let meta = match fs::metadata(&self.directory) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WatchError::Missing(self.directory.clone()));
            }
            Err(source) => {
                return Err(WatchError::Unreadable {
                    path: self.directory.clone(),
                    source,
                });
            }
        };
        if !meta.is_dir() {
            return Err(WatchError::NotADirectory(self.directory.clone()));
        }
        fs::read_dir(&self.directory).map_err(|source| WatchError::Unreadable {
            path: self.directory.clone(),
            source,
        })?;
        Ok(())
    }

    fn known_len(&self) -> usize {
        self.known.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn clear_known(&self) {
        self.known.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// One scan. `notify == false` only seeds the known set.
    fn scan(&self, notify: bool) {
        let _scan = lock(&self.scan_lock);
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        *lock(&self.scanning_thread) = Some(thread::current().id());

        match self.list_matching() {
            Ok(current) => {
                let diff = self.apply(current);
                trace!(
                    added = diff.added.len(),
                    modified = diff.modified.len(),
                    removed = diff.removed.len(),
                    "scan complete"
                );
                if notify {
                    self.notify_all(FileEvent::Added, &diff.added);
                    self.notify_all(FileEvent::Modified, &diff.modified);
                    self.notify_all(FileEvent::Deleted, &diff.removed);
                }
            }
            Err(e) => {
                warn!(directory = %self.directory.display(), error = %e, "scan failed; retrying next tick");
            }
        }

        *lock(&self.scanning_thread) = None;
    }

    /// Regular files directly in the directory whose name matches the pattern.
    fn list_matching(&self) -> io::Result<HashMap<PathBuf, FileStamp>> {
        let mut out = HashMap::new();
        // Links are followed: a symlink to a regular file counts as a regular file.
        let entries = WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true);
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !self.matcher.is_match(name) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => {
                    out.insert(entry.into_path(), FileStamp::of(&meta));
                }
                Err(e) => debug!(error = %e, "file vanished during scan"),
            }
        }
        Ok(out)
    }

    /// Replace the known set with `current` and report the differences.
    fn apply(&self, current: HashMap<PathBuf, FileStamp>) -> ScanDiff {
        let mut known = self.known.write().unwrap_or_else(PoisonError::into_inner);
        let mut diff = ScanDiff::default();

        for (path, stamp) in &current {
            match known.get(path) {
                None => diff.added.push(path.clone()),
                Some(prev) if prev != stamp => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        diff.removed = known
            .keys()
            .filter(|p| !current.contains_key(*p))
            .cloned()
            .collect();

        *known = current;
        diff.added.sort();
        diff.modified.sort();
        diff.removed.sort();
        diff
    }

    fn notify_all(&self, event: FileEvent, paths: &[PathBuf]) {
        for path in paths {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            debug!(file = %path.display(), %event, "file transition");
            for observer in &self.observers {
                self.notify(observer.as_ref(), event, path);
            }
        }
    }

    fn notify(&self, observer: &dyn FileObserver, event: FileEvent, path: &Path) {
        match catch_unwind(AssertUnwindSafe(|| hooks::dispatch(observer, event, path))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(file = %path.display(), %event, error = %e, "file hook failed");
            }
            Err(_) => {
                error!(file = %path.display(), %event, "file hook panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DirectoryWatcher;
    use std::fs;
    use std::sync::{Arc, Mutex};

    #[test]
    fn modification_fires_only_when_stamp_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("trip_a.parquet");
        fs::write(&file, b"one").unwrap();

        let modified = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&modified);
        let w = DirectoryWatcher::builder(dir.path(), r"trip_.*\.parquet")
            .on_file_modified(move |p| {
                sink.lock().unwrap().push(p.to_path_buf());
                Ok(())
            })
            .build()
            .unwrap();
        w.start().unwrap();

        w.scan();
        assert!(modified.lock().unwrap().is_empty());

        fs::write(&file, b"one plus more bytes").unwrap();
        w.scan();
        assert_eq!(*modified.lock().unwrap(), vec![file.clone()]);

        w.scan();
        assert_eq!(modified.lock().unwrap().len(), 1);
        w.stop();
    }

    #[test]
    fn seeding_scan_is_silent_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("trip_old.parquet"), b"x").unwrap();

        for (announce, expected) in [(false, 0usize), (true, 1usize)] {
            let seen = Arc::new(Mutex::new(0usize));
            let counter = Arc::clone(&seen);
            let w = DirectoryWatcher::builder(dir.path(), r"trip_.*\.parquet")
                .announce_existing(announce)
                .on_file_added(move |_| {
                    *counter.lock().unwrap() += 1;
                    Ok(())
                })
                .build()
                .unwrap();
            w.start().unwrap();
            assert_eq!(w.known_files().len(), 1);
            assert_eq!(*seen.lock().unwrap(), expected);
            w.stop();
        }
    }

    #[test]
    fn pattern_must_match_whole_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("trip.parquet"), b"x").unwrap();
        fs::write(dir.path().join("trip.parquet.tmp"), b"x").unwrap();

        let w = DirectoryWatcher::builder(dir.path(), r"trip\.parquet").build().unwrap();
        w.start().unwrap();
        assert_eq!(w.known_files().len(), 1);
        w.stop();
    }
}
