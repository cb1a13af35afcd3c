mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use tripdata_ingest::error::WatchError;
use tripdata_ingest::watcher::{DirectoryWatcher, FileObserver, HookResult};

const PATTERN: &str = r"^trip.*\.parquet$";
const NEVER: Duration = Duration::from_secs(3_600);

#[derive(Default)]
struct Recorder {
    added: Mutex<Vec<PathBuf>>,
    modified: Mutex<Vec<PathBuf>>,
    deleted: Mutex<Vec<PathBuf>>,
}

impl Recorder {
    fn added(&self) -> Vec<PathBuf> {
        self.added.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<PathBuf> {
        self.deleted.lock().unwrap().clone()
    }
}

impl FileObserver for Recorder {
    fn on_file_added(&self, path: &Path) -> HookResult {
        self.added.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn on_file_modified(&self, path: &Path) -> HookResult {
        self.modified.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn on_file_deleted(&self, path: &Path) -> HookResult {
        self.deleted.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

fn manual_watcher(dir: &Path, rec: &Arc<Recorder>) -> DirectoryWatcher {
    DirectoryWatcher::builder(dir, PATTERN)
        .scan_period(NEVER)
        .observer(rec.clone())
        .build()
        .unwrap()
}

#[test]
fn only_matching_files_are_announced() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(dir.path(), &rec);
    w.start().unwrap();

    for name in ["tripdata.parquet", "data.parquet", "tripdata.txt"] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }
    w.scan();

    assert_eq!(rec.added(), vec![dir.path().join("tripdata.parquet")]);
    w.stop();
}

#[test]
fn known_set_tracks_regular_matching_files_only() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("trip_subdir.parquet")).unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested").join("trip_inner.parquet"), b"x").unwrap();
    fs::write(dir.path().join("trip_a.parquet"), b"x").unwrap();
    fs::write(dir.path().join("trip_b.parquet"), b"x").unwrap();
    fs::write(dir.path().join("other.csv"), b"x").unwrap();

    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(dir.path(), &rec);
    w.start().unwrap();

    let expected: BTreeSet<PathBuf> = ["trip_a.parquet", "trip_b.parquet"]
        .iter()
        .map(|n| dir.path().join(n))
        .collect();
    assert_eq!(w.known_files(), expected);

    fs::remove_file(dir.path().join("trip_a.parquet")).unwrap();
    w.scan();
    assert_eq!(w.known_files().len(), 1);
    w.stop();
}

#[test]
fn each_transition_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(dir.path(), &rec);
    w.start().unwrap();

    let file = dir.path().join("trip_1.parquet");
    fs::write(&file, b"x").unwrap();
    w.scan();
    w.scan();
    assert_eq!(rec.added(), vec![file.clone()]);

    fs::remove_file(&file).unwrap();
    w.scan();
    w.scan();
    assert_eq!(rec.deleted(), vec![file.clone()]);
    assert!(rec.modified.lock().unwrap().is_empty());
    w.stop();
}

#[test]
fn pre_existing_files_are_not_announced() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("trip_old.parquet"), b"x").unwrap();
    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(dir.path(), &rec);

    w.start().unwrap();
    w.scan();
    assert!(rec.added().is_empty());
    assert_eq!(w.known_files().len(), 1);

    // Restart is cold, but still silent for files that were already there.
    w.stop();
    w.start().unwrap();
    w.scan();
    assert!(rec.added().is_empty());
    w.stop();
}

#[test]
fn start_and_stop_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(dir.path(), &rec);

    w.start().unwrap();
    w.start().unwrap();
    assert!(w.is_running());

    fs::write(dir.path().join("trip_x.parquet"), b"x").unwrap();
    w.scan();
    assert_eq!(rec.added().len(), 1);

    w.stop();
    assert!(!w.is_running());
    w.stop();
    assert!(!w.is_running());
    assert!(w.known_files().is_empty());
}

#[test]
fn scan_is_a_no_op_while_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(dir.path(), &rec);

    fs::write(dir.path().join("trip_x.parquet"), b"x").unwrap();
    w.scan();
    assert!(rec.added().is_empty());
    assert!(w.known_files().is_empty());
}

#[test]
fn periodic_scans_pick_up_new_files_and_stop_means_stop() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let w = DirectoryWatcher::builder(dir.path(), PATTERN)
        .scan_period(Duration::from_millis(20))
        .observer(rec.clone())
        .build()
        .unwrap();
    w.start().unwrap();

    fs::write(dir.path().join("trip_live.parquet"), b"x").unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || rec.added().len() == 1));

    w.stop();
    fs::write(dir.path().join("trip_late.parquet"), b"x").unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(rec.added().len(), 1);
}

#[test]
fn failing_hooks_are_isolated_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_hook = Arc::clone(&seen);

    let w = DirectoryWatcher::builder(dir.path(), PATTERN)
        .scan_period(NEVER)
        .on_file_added(move |p| {
            let name = p.file_name().unwrap().to_string_lossy().into_owned();
            seen_by_hook.lock().unwrap().push(name.clone());
            match name.as_str() {
                "trip_err.parquet" => Err("downstream unavailable".into()),
                "trip_panic.parquet" => panic!("hook blew up"),
                _ => Ok(()),
            }
        })
        .build()
        .unwrap();
    w.start().unwrap();

    for name in ["trip_err.parquet", "trip_ok.parquet", "trip_panic.parquet"] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }
    w.scan();
    w.scan();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["trip_err.parquet", "trip_ok.parquet", "trip_panic.parquet"]);
    assert_eq!(w.known_files().len(), 3);
    assert!(w.is_running());
    w.stop();
}

#[test]
fn start_rejects_bad_directories() {
    let dir = tempfile::tempdir().unwrap();

    let missing = DirectoryWatcher::builder(dir.path().join("nope"), PATTERN)
        .build()
        .unwrap();
    assert!(matches!(missing.start(), Err(WatchError::Missing(_))));
    assert!(!missing.is_running());

    let file = dir.path().join("plain.txt");
    fs::write(&file, b"x").unwrap();
    let not_dir = DirectoryWatcher::builder(&file, PATTERN).build().unwrap();
    assert!(matches!(not_dir.start(), Err(WatchError::NotADirectory(_))));
}

#[test]
fn invalid_pattern_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DirectoryWatcher::builder(dir.path(), "trip(").build().is_err());
    assert!(
        DirectoryWatcher::builder(dir.path(), PATTERN)
            .scan_period(Duration::ZERO)
            .build()
            .is_err()
    );
}

#[test]
fn accessors_report_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let w = DirectoryWatcher::builder(dir.path(), PATTERN)
        .scan_period(Duration::from_millis(1_500))
        .build()
        .unwrap();
    assert_eq!(w.directory(), dir.path());
    assert_eq!(w.file_pattern(), PATTERN);
    assert_eq!(w.scan_period(), Duration::from_millis(1_500));
    assert!(!w.is_running());
}

#[test]
fn directory_vanishing_between_scans_does_not_stop_the_watcher() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("incoming");
    let aside = root.path().join("aside");
    fs::create_dir(&dir).unwrap();
    let rec = Arc::new(Recorder::default());
    let w = manual_watcher(&dir, &rec);
    w.start().unwrap();

    fs::rename(&dir, &aside).unwrap();
    w.scan();
    assert!(w.is_running());

    fs::rename(&aside, &dir).unwrap();
    let file = dir.join("trip_back.parquet");
    fs::write(&file, b"x").unwrap();
    w.scan();
    w.scan();
    assert_eq!(rec.added(), vec![file]);
    w.stop();
}

#[test]
fn stop_from_a_hook_during_a_manual_scan_returns() {
    let dir = tempfile::tempdir().unwrap();
    let slot: Arc<OnceLock<Weak<DirectoryWatcher>>> = Arc::default();
    let hook_slot = Arc::clone(&slot);

    let w = Arc::new(
        DirectoryWatcher::builder(dir.path(), PATTERN)
            .scan_period(Duration::from_millis(50))
            .on_file_added(move |_| {
                // Long enough for the periodic tick to queue up behind this scan.
                thread::sleep(Duration::from_millis(150));
                if let Some(w) = hook_slot.get().and_then(Weak::upgrade) {
                    w.stop();
                }
                Ok(())
            })
            .build()
            .unwrap(),
    );
    slot.set(Arc::downgrade(&w)).unwrap();
    w.start().unwrap();

    fs::write(dir.path().join("trip_now.parquet"), b"x").unwrap();
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let scanner = Arc::clone(&w);
    thread::spawn(move || {
        scanner.scan();
        let _ = done_tx.send(());
    });

    assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    assert!(!w.is_running());
    assert!(w.known_files().is_empty());
}
