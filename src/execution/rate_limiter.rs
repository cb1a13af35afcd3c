use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::error::RateLimitError;

/// Default refill cadence: the bucket holds one second's worth of permits.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// A blocking token bucket.
///
/// Starts full at `capacity` permits. A background thread tops the bucket back up to
/// `capacity` once per interval; unused permits never accumulate beyond that, so a burst is
/// capped at one interval's worth. Waiters are served first-come-first-served.
pub struct RateLimiter {
    bucket: Arc<Bucket>,
    refill: Mutex<Option<RefillWorker>>,
}

struct RefillWorker {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

struct Bucket {
    capacity: usize,
    state: Mutex<BucketState>,
    cv: Condvar,
}

struct BucketState {
    available: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
    shutdown: bool,
}

impl BucketState {
    fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.waiters.push_back(ticket);
        ticket
    }

    fn leave(&mut self, ticket: u64) {
        self.waiters.retain(|t| *t != ticket);
    }

    fn is_next(&self, ticket: u64) -> bool {
        self.waiters.front() == Some(&ticket)
    }
}

impl Bucket {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self) {
        let mut st = self.lock();
        if st.available < self.capacity {
            trace!(from = st.available, to = self.capacity, "refilling rate limiter");
            st.available = self.capacity;
            self.cv.notify_all();
        }
    }
}

impl RateLimiter {
    /// Create a limiter granting `permits_per_second` permits per second.
    ///
    /// # Panics
    ///
    /// Panics if `permits_per_second == 0`.
    pub fn new(permits_per_second: usize) -> io::Result<Self> {
        Self::with_interval(permits_per_second, REFILL_INTERVAL)
    }

    /// Create a limiter that refills to `capacity` every `interval`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0` or `interval` is zero.
    pub fn with_interval(capacity: usize, interval: Duration) -> io::Result<Self> {
        assert!(capacity > 0, "permits must be > 0");
        assert!(!interval.is_zero(), "refill interval must be > 0");

        let bucket = Arc::new(Bucket {
            capacity,
            state: Mutex::new(BucketState {
                available: capacity,
                waiters: VecDeque::new(),
                next_ticket: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(1);
        let refill_bucket = Arc::clone(&bucket);
        let handle = thread::Builder::new()
            .name("rate-limiter-refill".to_string())
            .spawn(move || {
                loop {
                    match cancelled.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => refill_bucket.refill(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                trace!("rate limiter refill thread exiting");
            })?;

        debug!(capacity, ?interval, "rate limiter started");
        Ok(Self {
            bucket,
            refill: Mutex::new(Some(RefillWorker { cancel, handle })),
        })
    }

    /// Bucket capacity (permits per interval).
    pub fn capacity(&self) -> usize {
        self.bucket.capacity
    }

    /// Acquire `permits`, blocking until they are available.
    ///
    /// Returns the time spent waiting (zero if no wait was required).
    pub fn acquire(&self, permits: usize) -> Result<Duration, RateLimitError> {
        self.check_request(permits)?;
        let start = Instant::now();
        let mut st = self.bucket.lock();
        let ticket = st.enqueue();
        let mut waited = false;
        loop {
            if st.shutdown {
                st.leave(ticket);
                self.bucket.cv.notify_all();
                return Err(RateLimitError::Shutdown);
            }
            if st.is_next(ticket) && st.available >= permits {
                st.available -= permits;
                st.leave(ticket);
                self.bucket.cv.notify_all();
                break;
            }
            waited = true;
            st = self
                .bucket
                .cv
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(if waited { start.elapsed() } else { Duration::ZERO })
    }

    /// Take `permits` only if they are available right now and nobody is queued ahead.
    pub fn try_acquire(&self, permits: usize) -> bool {
        if self.check_request(permits).is_err() {
            return false;
        }
        let mut st = self.bucket.lock();
        if st.shutdown || !st.waiters.is_empty() || st.available < permits {
            return false;
        }
        st.available -= permits;
        true
    }

    /// Like [`Self::acquire`], but gives up after `timeout`.
    ///
    /// Returns `Ok(true)` if the permits were taken, `Ok(false)` on timeout.
    pub fn try_acquire_for(&self, permits: usize, timeout: Duration) -> Result<bool, RateLimitError> {
        self.check_request(permits)?;
        let deadline = Instant::now() + timeout;
        let mut st = self.bucket.lock();
        let ticket = st.enqueue();
        loop {
            if st.shutdown {
                st.leave(ticket);
                self.bucket.cv.notify_all();
                return Err(RateLimitError::Shutdown);
            }
            if st.is_next(ticket) && st.available >= permits {
                st.available -= permits;
                st.leave(ticket);
                self.bucket.cv.notify_all();
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                st.leave(ticket);
                self.bucket.cv.notify_all();
                return Ok(false);
            }
            st = self
                .bucket
                .cv
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Snapshot of the current permit count. For observability only; it may be stale as soon
    /// as it is returned.
    pub fn available_permits(&self) -> usize {
        self.bucket.lock().available
    }

    /// Stop the refill thread and fail any pending or future acquisitions.
    ///
    /// Idempotent; returns once the refill thread has exited.
    pub fn shutdown(&self) {
        let worker = self
            .refill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        {
            let mut st = self.bucket.lock();
            st.shutdown = true;
            self.bucket.cv.notify_all();
        }
        let _ = worker.cancel.send(());
        let _ = worker.handle.join();
        debug!("rate limiter shut down");
    }

    fn check_request(&self, permits: usize) -> Result<(), RateLimitError> {
        if permits > self.bucket.capacity {
            return Err(RateLimitError::ExceedsCapacity {
                requested: permits,
                capacity: self.bucket.capacity,
            });
        }
        Ok(())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.bucket.capacity)
            .field("available", &self.available_permits())
            .finish()
    }
}
