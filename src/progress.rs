//! Progress reporting: a polled tracker plus an optional phase callback.
//!
//! [`ProgressTracker`] is the only progress state shared between workers.
//! Workers write counters under a short lock; observers (a CLI bar, a UI)
//! poll [`ProgressTracker::fraction`] or [`ProgressTracker::snapshot`] at
//! whatever rate they like. A polling reader may miss intermediate values,
//! but indices never go backwards within one file.
//!
//! [`StatusCallback`] is the one push-style hook: it receives a message at
//! each phase transition of a processing call.
//!
//! # Example
//!
//! ```rust
//! use medocr::ProgressTracker;
//!
//! let tracker = ProgressTracker::new(2);
//! tracker.update(Some(0), None, Some(4));
//! tracker.advance_page();
//! tracker.advance_page();
//! // file axis 0/2, page axis 2/4 → (0.0 + 0.5) / 2
//! assert_eq!(tracker.fraction(), 0.25);
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters behind the tracker lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub total_files: usize,
    pub current_file_index: usize,
    pub total_pages_for_current_file: usize,
    pub current_page_index: usize,
}

impl ProgressState {
    fn fraction(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        let file = ratio(self.current_file_index, self.total_files);
        if self.total_pages_for_current_file > 0 {
            let page = ratio(self.current_page_index, self.total_pages_for_current_file);
            (file + page) / 2.0
        } else {
            file
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    (num as f64 / den as f64).clamp(0.0, 1.0)
}

/// Point-in-time copy of the tracker for read-only observers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub state: ProgressState,
    pub fraction: f64,
    /// Pages completed across all files since the tracker was created.
    pub pages_completed: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completed pages per second over the tracker's lifetime.
    pub fn pages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.pages_completed as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: ProgressState,
    pages_completed: usize,
    /// Bumped whenever the file axis moves; see [`ProgressTracker::begin_file`].
    generation: u64,
}

/// Thread-safe two-axis progress counter (files × pages).
///
/// Every method takes the lock for O(1) counter work only; nothing here does
/// I/O, so workers never stall on progress reporting.
#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ProgressTracker {
    pub fn new(total_files: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ProgressState {
                    total_files,
                    ..ProgressState::default()
                },
                pages_completed: 0,
                generation: 0,
            }),
            started: Instant::now(),
        }
    }

    /// Reset for a new batch of `total_files` files.
    pub fn start_batch(&self, total_files: usize) {
        let mut inner = self.inner.lock();
        inner.state = ProgressState {
            total_files,
            ..ProgressState::default()
        };
        inner.generation += 1;
    }

    /// Move to `file_index`, reset the page axis and return the file's
    /// generation token.
    ///
    /// Workers report pages with [`Self::advance_page_for`]; a worker that
    /// outlives its file (abandoned after a timeout) carries a stale token
    /// and its late advances are dropped.
    pub fn begin_file(&self, file_index: usize) -> u64 {
        let mut inner = self.inner.lock();
        inner.state.current_file_index = file_index;
        inner.state.current_page_index = 0;
        inner.state.total_pages_for_current_file = 0;
        inner.generation += 1;
        inner.generation
    }

    /// Atomically update any subset of the counters.
    ///
    /// Moving to a different file resets the page axis. Within one file the
    /// page index never decreases; a smaller value is ignored.
    pub fn update(
        &self,
        file_index: Option<usize>,
        page_index: Option<usize>,
        total_pages: Option<usize>,
    ) {
        let mut guard = self.inner.lock();
        let Inner {
            state: s,
            generation,
            ..
        } = &mut *guard;
        if let Some(f) = file_index {
            if f != s.current_file_index {
                s.current_page_index = 0;
                s.total_pages_for_current_file = 0;
                *generation += 1;
            }
            s.current_file_index = f;
        }
        if let Some(t) = total_pages {
            s.total_pages_for_current_file = t;
        }
        if let Some(p) = page_index {
            s.current_page_index = s.current_page_index.max(p);
        }
    }

    /// Count one more completed page of the current file.
    pub fn advance_page(&self) {
        let mut inner = self.inner.lock();
        inner.state.current_page_index += 1;
        inner.pages_completed += 1;
    }

    /// Count one completed page if `generation` is still the current file's.
    /// Returns `false` when the advance was stale and ignored.
    pub fn advance_page_for(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state.current_page_index += 1;
        inner.pages_completed += 1;
        true
    }

    /// Overall completion in `[0.0, 1.0]`.
    ///
    /// Average of the file and page axes when the current file's page count
    /// is known, else the file axis alone.
    pub fn fraction(&self) -> f64 {
        self.inner.lock().state.fraction()
    }

    pub fn state(&self) -> ProgressState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.lock();
        ProgressSnapshot {
            state: inner.state,
            fraction: inner.state.fraction(),
            pages_completed: inner.pages_completed,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Phase of one processing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    CacheLookup,
    CacheHit,
    SourceOpen,
    BatchProcess,
    Enrich,
    Assemble,
    CacheWrite,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::CacheLookup => "cache lookup",
            Phase::CacheHit => "cache hit",
            Phase::SourceOpen => "opening source",
            Phase::BatchProcess => "processing pages",
            Phase::Enrich => "enriching",
            Phase::Assemble => "assembling",
            Phase::CacheWrite => "writing cache",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Called at every phase transition of a processing call.
///
/// Implementations must be `Send + Sync`; the default method is a no-op so
/// callers only override what they need. Keep it cheap: it runs inline on
/// the orchestrating task.
pub trait StatusCallback: Send + Sync {
    fn on_phase(&self, phase: Phase, message: &str) {
        let _ = (phase, message);
    }
}

/// A no-op implementation for callers that don't need status messages.
pub struct NoopStatusCallback;

impl StatusCallback for NoopStatusCallback {}

/// Convenience alias for the callback stored on the orchestrator.
pub type SharedStatusCallback = Arc<dyn StatusCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn empty_tracker_is_zero() {
        assert_eq!(ProgressTracker::new(0).fraction(), 0.0);
    }

    #[test]
    fn file_axis_only_without_page_total() {
        let t = ProgressTracker::new(4);
        t.update(Some(1), None, None);
        assert_eq!(t.fraction(), 0.25);
    }

    #[test]
    fn averages_axes_when_pages_known() {
        let t = ProgressTracker::new(2);
        t.update(Some(1), Some(2), Some(4));
        // (0.5 + 0.5) / 2
        assert_eq!(t.fraction(), 0.5);
    }

    #[test]
    fn page_index_is_monotonic_within_file() {
        let t = ProgressTracker::new(1);
        t.update(Some(0), Some(3), Some(5));
        t.update(None, Some(1), None);
        assert_eq!(t.state().current_page_index, 3);
    }

    #[test]
    fn switching_file_resets_page_axis() {
        let t = ProgressTracker::new(2);
        t.update(Some(0), Some(5), Some(5));
        t.update(Some(1), None, None);
        let s = t.state();
        assert_eq!(s.current_page_index, 0);
        assert_eq!(s.total_pages_for_current_file, 0);
    }

    #[test]
    fn stale_generation_advances_are_dropped() {
        let t = ProgressTracker::new(2);
        let first = t.begin_file(0);
        t.update(None, None, Some(3));
        assert!(t.advance_page_for(first));

        let second = t.begin_file(1);
        t.update(None, None, Some(3));
        // A worker of file 0 finishing late.
        assert!(!t.advance_page_for(first));
        let snap = t.snapshot();
        assert_eq!(snap.state.current_file_index, 1);
        assert_eq!(snap.state.current_page_index, 0);
        assert_eq!(snap.pages_completed, 1);

        assert!(t.advance_page_for(second));
        assert_eq!(t.state().current_page_index, 1);
    }

    #[test]
    fn file_switch_via_update_invalidates_token() {
        let t = ProgressTracker::new(2);
        let token = t.begin_file(0);
        t.update(Some(2), None, None);
        assert!(!t.advance_page_for(token));
        assert_eq!(t.state().current_page_index, 0);
    }

    #[test]
    fn fraction_clamped_on_overshoot() {
        let t = ProgressTracker::new(1);
        t.update(Some(3), Some(10), Some(2));
        assert_eq!(t.fraction(), 1.0);
    }

    #[test]
    fn concurrent_advances_are_all_counted() {
        let t = Arc::new(ProgressTracker::new(1));
        t.update(Some(0), None, Some(800));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                thread::spawn(move || {
                    for _ in 0..100 {
                        t.advance_page();
                        let f = t.fraction();
                        assert!((0.0..=1.0).contains(&f));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = t.snapshot();
        assert_eq!(snap.state.current_page_index, 800);
        assert_eq!(snap.pages_completed, 800);
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb: SharedStatusCallback = Arc::new(NoopStatusCallback);
        cb.on_phase(Phase::CacheLookup, "looking up");
        cb.on_phase(Phase::Done, "finished");
    }
}
