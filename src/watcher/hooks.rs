use std::error::Error;
use std::fmt;
use std::path::Path;

/// What a hook returns. An `Err` is logged and isolated to the one file it was raised for.
pub type HookResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Observer interface for watched-directory transitions.
///
/// Implementors can enqueue work, record metrics, or trigger alerts. Every method defaults to a
/// no-op, so observers only override what they care about.
pub trait FileObserver: Send + Sync {
    /// Called once when a matching file is first seen.
    fn on_file_added(&self, _path: &Path) -> HookResult {
        Ok(())
    }

    /// Called when a known file's size or modification time changes between scans.
    fn on_file_modified(&self, _path: &Path) -> HookResult {
        Ok(())
    }

    /// Called once when a known file disappears.
    fn on_file_deleted(&self, _path: &Path) -> HookResult {
        Ok(())
    }
}

/// Which transition a hook fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Added,
    Modified,
    Deleted,
}

impl FileEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type HookFn = Box<dyn Fn(&Path) -> HookResult + Send + Sync>;

/// Adapts a closure registered on the builder into a [`FileObserver`] for one event.
pub(crate) struct ClosureObserver {
    event: FileEvent,
    hook: HookFn,
}

impl ClosureObserver {
    pub(crate) fn new(event: FileEvent, hook: HookFn) -> Self {
        Self { event, hook }
    }

    fn fire(&self, event: FileEvent, path: &Path) -> HookResult {
        if self.event == event { (self.hook)(path) } else { Ok(()) }
    }
}

impl fmt::Debug for ClosureObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureObserver").field("event", &self.event).finish()
    }
}

impl FileObserver for ClosureObserver {
    fn on_file_added(&self, path: &Path) -> HookResult {
        self.fire(FileEvent::Added, path)
    }

    fn on_file_modified(&self, path: &Path) -> HookResult {
        self.fire(FileEvent::Modified, path)
    }

    fn on_file_deleted(&self, path: &Path) -> HookResult {
        self.fire(FileEvent::Deleted, path)
    }
}

pub(crate) fn dispatch(observer: &dyn FileObserver, event: FileEvent, path: &Path) -> HookResult {
    match event {
        FileEvent::Added => observer.on_file_added(path),
        FileEvent::Modified => observer.on_file_modified(path),
        FileEvent::Deleted => observer.on_file_deleted(path),
    }
}

#[cfg(test)]
mod tests {
    use super::{ClosureObserver, FileEvent, FileObserver};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closure_fires_only_for_its_event() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let obs = ClosureObserver::new(
            FileEvent::Deleted,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let p = Path::new("/in/a.parquet");
        obs.on_file_added(p).unwrap();
        obs.on_file_modified(p).unwrap();
        obs.on_file_deleted(p).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
