//! Bounded lookahead fetching of archive segments.
//!
//! A small pool of named worker threads claims epochs inside a window ahead
//! of the consumer. Completions land in a [`ReorderBuffer`] so the consumer
//! always receives epochs in plan order, whatever order the fetches finish in.

use crate::reorder::ReorderBuffer;
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy, Sleeper};
use crate::shutdown::ShutdownSignal;
use crate::source::{ArchiveSource, SourceError};
use crate::types::{ArchiveSegment, EpochNumber};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Pool sizing for segment prefetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_workers() -> usize {
    2
}

fn default_window() -> usize {
    4
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            window: default_window(),
        }
    }
}

/// Result delivered for one epoch.
pub type FetchOutcome = Result<ArchiveSegment, RetryError>;

/// Observer of transient fetch failures: `(epoch, attempt, error)`.
pub type RetryObserver = Arc<dyn Fn(EpochNumber, u32, &SourceError) + Send + Sync>;

/// Counters shared between the workers and the owner.
#[derive(Debug, Default)]
pub struct PrefetchMetrics {
    fetched: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
}

impl PrefetchMetrics {
    pub fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

struct PrefetchState {
    next_to_claim: EpochNumber,
    completed: ReorderBuffer<FetchOutcome>,
    closed: bool,
}

struct PrefetchShared {
    last: EpochNumber,
    window: u64,
    state: Mutex<PrefetchState>,
    work_cv: Condvar,
    done_cv: Condvar,
}

impl PrefetchShared {
    fn lock(&self) -> MutexGuard<'_, PrefetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next epoch a worker may claim, or `None` once closed or past the plan.
    fn claim(&self) -> Option<EpochNumber> {
        let mut guard = self.lock();
        loop {
            if guard.closed || guard.next_to_claim > self.last {
                return None;
            }
            let horizon = guard
                .completed
                .next_expected()
                .saturating_add(self.window);
            if guard.next_to_claim < horizon {
                let epoch = guard.next_to_claim;
                guard.next_to_claim += 1;
                return Some(epoch);
            }
            guard = self
                .work_cv
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn complete(&self, epoch: EpochNumber, outcome: FetchOutcome) {
        let mut guard = self.lock();
        if guard.completed.insert(epoch, outcome).is_err() {
            debug!(epoch, "dropping duplicate prefetch completion");
        }
        self.done_cv.notify_all();
    }

    fn close(&self) {
        let mut guard = self.lock();
        guard.closed = true;
        self.work_cv.notify_all();
        self.done_cv.notify_all();
    }
}

/// Prefetches epochs `first..=last` from one archive.
pub struct SegmentPrefetcher {
    shared: Arc<PrefetchShared>,
    metrics: Arc<PrefetchMetrics>,
    cancel: ShutdownSignal,
    shutdown: ShutdownSignal,
    workers: Vec<JoinHandle<()>>,
}

impl SegmentPrefetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        archive: Arc<dyn ArchiveSource>,
        first: EpochNumber,
        last: EpochNumber,
        config: &PrefetchConfig,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        shutdown: ShutdownSignal,
        on_retry: RetryObserver,
    ) -> io::Result<Self> {
        let shared = Arc::new(PrefetchShared {
            last,
            window: config.window.max(1) as u64,
            state: Mutex::new(PrefetchState {
                next_to_claim: first,
                completed: ReorderBuffer::new(first),
                closed: false,
            }),
            work_cv: Condvar::new(),
            done_cv: Condvar::new(),
        });
        let metrics = Arc::new(PrefetchMetrics::default());
        let cancel = ShutdownSignal::new();
        let mut prefetcher = Self {
            shared,
            metrics,
            cancel,
            shutdown,
            workers: Vec::new(),
        };
        for index in 0..config.workers.max(1) {
            let shared = Arc::clone(&prefetcher.shared);
            let metrics = Arc::clone(&prefetcher.metrics);
            let archive = Arc::clone(&archive);
            let sleeper = Arc::clone(&sleeper);
            let on_retry = Arc::clone(&on_retry);
            let policy = policy.clone();
            let cancel = prefetcher.cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("prefetch_{index}"))
                .spawn(move || {
                    while let Some(epoch) = shared.claim() {
                        let outcome = retry_with_backoff(
                            &policy,
                            sleeper.as_ref(),
                            &cancel,
                            || archive.fetch_segment(epoch),
                            |attempt, err| {
                                metrics.retries.fetch_add(1, Ordering::Relaxed);
                                on_retry(epoch, attempt, err);
                            },
                        );
                        match &outcome {
                            Ok(_) => metrics.fetched.fetch_add(1, Ordering::Relaxed),
                            Err(_) => metrics.failed.fetch_add(1, Ordering::Relaxed),
                        };
                        shared.complete(epoch, outcome);
                    }
                });
            match handle {
                Ok(handle) => prefetcher.workers.push(handle),
                Err(err) => {
                    prefetcher.close();
                    return Err(err);
                }
            }
        }
        Ok(prefetcher)
    }

    pub fn metrics(&self) -> &PrefetchMetrics {
        &self.metrics
    }

    /// Blocks until the next epoch in order is available. Returns `None` once
    /// the plan is drained or shutdown was requested.
    pub fn next(&mut self) -> Option<(EpochNumber, FetchOutcome)> {
        let mut guard = self.shared.lock();
        loop {
            if let Some(ready) = guard.completed.pop_ready() {
                self.shared.work_cv.notify_all();
                return Some(ready);
            }
            if guard.closed || guard.completed.next_expected() > self.shared.last {
                return None;
            }
            if self.shutdown.is_requested() {
                drop(guard);
                self.close();
                return None;
            }
            let (next_guard, _) = self
                .shared
                .done_cv
                .wait_timeout(guard, Duration::from_millis(100))
                .unwrap_or_else(PoisonError::into_inner);
            guard = next_guard;
        }
    }

    /// Stops claiming new work and cancels pending retries. In-flight fetches
    /// are abandoned.
    pub fn close(&self) {
        self.cancel.request();
        self.shared.close();
    }

    /// Closes the pool and waits for every worker to exit.
    pub fn join(mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SegmentPrefetcher {
    fn drop(&mut self) {
        self.close();
    }
}
