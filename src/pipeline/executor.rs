//! Bounded-concurrency page executor.
//!
//! Pages are CPU or native-library bound (OCR, plugin raster analysis), so
//! each unit of work runs on tokio's blocking pool via `spawn_blocking`,
//! while `buffer_unordered(concurrency)` bounds how many run at once. Results
//! come back in completion order and are re-sorted by page index before
//! being returned.
//!
//! ## Failure policy
//!
//! Fail-fast: the first page error sets a stop flag that every not-yet-started
//! item checks before dispatch. Items already running are allowed to finish
//! (there is no mid-page preemption) and their results are discarded. The
//! same check covers caller cancellation and the deadline.
//!
//! The pool is scoped to one [`BatchExecutor::run`] call: when it returns, on
//! any path, no work of that batch is still being scheduled.

use crate::config::RetryPolicy;
use crate::error::ProcessingError;
use crate::output::{PageResult, PageUnit};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared cancellation flag. Setting it stops new pages from starting.
pub type CancelFlag = Arc<AtomicBool>;

/// Per-call cancellation and deadline.
#[derive(Debug, Clone)]
pub struct BatchControl {
    cancel: CancelFlag,
    deadline: Option<Instant>,
    started: Instant,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchControl {
    /// No deadline, fresh cancel flag.
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            started: Instant::now(),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = self.started + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Share an existing flag (e.g. one wired to Ctrl-C).
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Error to report when the deadline has passed.
    pub fn timeout_error(&self, completed_pages: usize) -> ProcessingError {
        ProcessingError::Timeout {
            elapsed_ms: self.elapsed().as_millis() as u64,
            completed_pages,
        }
    }
}

enum Outcome {
    Done(PageResult),
    Failed(ProcessingError),
    Cancelled,
    TimedOut,
    Skipped,
}

/// Runs page work with bounded concurrency and order-restoring collection.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    concurrency: usize,
    retry: RetryPolicy,
}

impl BatchExecutor {
    /// `concurrency` is clamped to at least 1.
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `work` over every item and return the results sorted by page
    /// index.
    ///
    /// Each item is moved into its worker and dropped there as soon as its
    /// result is produced. On failure the first error (in completion order)
    /// is returned; `Cancelled`/`Timeout` count only this call's completed
    /// pages.
    pub async fn run<F>(
        &self,
        items: Vec<PageUnit>,
        control: &BatchControl,
        work: Arc<F>,
    ) -> Result<Vec<PageResult>, ProcessingError>
    where
        F: Fn(&PageUnit) -> Result<PageResult, ProcessingError> + Send + Sync + 'static,
    {
        let total = items.len();
        let stop = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicUsize::new(0));

        let batch = stream::iter(items.into_iter().map(|unit| {
            let work = Arc::clone(&work);
            let stop = Arc::clone(&stop);
            let completed = Arc::clone(&completed);
            let cancel = control.cancel_flag();
            let deadline = control.deadline;
            let retry = self.retry;
            async move {
                if stop.load(Ordering::SeqCst) {
                    return Outcome::Skipped;
                }
                if cancel.load(Ordering::SeqCst) {
                    stop.store(true, Ordering::SeqCst);
                    return Outcome::Cancelled;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    stop.store(true, Ordering::SeqCst);
                    return Outcome::TimedOut;
                }

                let index = unit.index;
                let joined = tokio::task::spawn_blocking(move || {
                    let result = run_with_retry(work.as_ref(), &unit, retry, &cancel);
                    drop(unit);
                    result
                })
                .await;

                match joined {
                    Ok(Ok(page)) => {
                        completed.fetch_add(1, Ordering::SeqCst);
                        debug!("Page {} done", index);
                        Outcome::Done(page)
                    }
                    Ok(Err(e)) => {
                        stop.store(true, Ordering::SeqCst);
                        Outcome::Failed(e)
                    }
                    Err(join) => {
                        stop.store(true, Ordering::SeqCst);
                        Outcome::Failed(ProcessingError::Internal(format!(
                            "worker for page {index} panicked: {join}"
                        )))
                    }
                }
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<Outcome>>();

        let outcomes = match control.deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), batch).await
                {
                    Ok(outcomes) => outcomes,
                    Err(_) => {
                        // In-flight blocking work keeps running; its results
                        // are dropped with the stream.
                        stop.store(true, Ordering::SeqCst);
                        warn!("Deadline reached with pages still running");
                        return Err(control.timeout_error(completed.load(Ordering::SeqCst)));
                    }
                }
            }
            None => batch.await,
        };

        let done = completed.load(Ordering::SeqCst);
        let mut results = Vec::with_capacity(total);
        let mut failure: Option<ProcessingError> = None;
        for outcome in outcomes {
            let err = match outcome {
                Outcome::Done(page) => {
                    results.push(page);
                    continue;
                }
                Outcome::Skipped => continue,
                Outcome::Failed(e) => e,
                Outcome::Cancelled => ProcessingError::Cancelled {
                    completed_pages: done,
                },
                Outcome::TimedOut => control.timeout_error(done),
            };
            if failure.is_none() {
                failure = Some(err);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        results.sort_by_key(|p| p.index);
        Ok(results)
    }
}

/// Call `work` once, then up to `retry.max_retries` more times with
/// exponential backoff. Stops retrying once the batch is cancelled.
fn run_with_retry<F>(
    work: &F,
    unit: &PageUnit,
    retry: RetryPolicy,
    cancel: &AtomicBool,
) -> Result<PageResult, ProcessingError>
where
    F: Fn(&PageUnit) -> Result<PageResult, ProcessingError>,
{
    let mut attempt = 0u32;
    loop {
        match work(unit) {
            Ok(page) => return Ok(page),
            Err(e) if attempt < retry.max_retries && !cancel.load(Ordering::SeqCst) => {
                attempt += 1;
                let delay = retry.delay(attempt);
                warn!(
                    "Page {} failed (attempt {}/{}), retrying in {:?}: {}",
                    unit.index,
                    attempt,
                    retry.max_retries + 1,
                    delay,
                    e
                );
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{PageContent, PluginResults};
    use parking_lot::Mutex;

    type Work = Result<PageResult, ProcessingError>;

    fn units(n: usize) -> Vec<PageUnit> {
        (1..=n).map(|i| PageUnit::text(i, format!("p{i}"))).collect()
    }

    fn echo(unit: &PageUnit) -> PageResult {
        let text = match &unit.content {
            PageContent::Text(t) => t.clone(),
            PageContent::Raster(_) => String::new(),
        };
        PageResult {
            index: unit.index,
            text,
            plugin_results: PluginResults::new(),
        }
    }

    #[tokio::test]
    async fn results_follow_submission_order_not_completion_order() {
        // A finishes last, C first.
        let finished = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::clone(&finished);
        let work = Arc::new(move |u: &PageUnit| -> Work {
            let delay = match u.index {
                1 => 150,
                2 => 75,
                _ => 0,
            };
            std::thread::sleep(Duration::from_millis(delay));
            order.lock().push(u.index);
            Ok(echo(u))
        });

        let exec = BatchExecutor::new(3, RetryPolicy::none());
        let out = exec.run(units(3), &BatchControl::new(), work).await.unwrap();

        assert_eq!(*finished.lock(), vec![3, 2, 1]);
        let texts: Vec<&str> = out.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let work = Arc::new(move |u: &PageUnit| -> Work {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(echo(u))
        });
        let exec = BatchExecutor::new(2, RetryPolicy::none());
        let out = exec.run(units(8), &BatchControl::new(), work).await.unwrap();
        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn first_failure_fails_batch_and_skips_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let work = Arc::new(move |u: &PageUnit| -> Work {
            c.fetch_add(1, Ordering::SeqCst);
            if u.index == 2 {
                Err(ProcessingError::OcrEngine {
                    page: 2,
                    message: "engine crashed".into(),
                })
            } else {
                Ok(echo(u))
            }
        });
        let exec = BatchExecutor::new(1, RetryPolicy::none());
        let err = exec
            .run(units(5), &BatchControl::new(), work)
            .await
            .unwrap_err();
        assert_eq!(err.page(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let control = BatchControl::new();
        control.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let work = Arc::new(move |u: &PageUnit| -> Work {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(echo(u))
        });
        let err = BatchExecutor::new(2, RetryPolicy::none())
            .run(units(4), &control, work)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Cancelled { completed_pages: 0 }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_mid_batch_lets_running_page_finish() {
        let control = BatchControl::new();
        let flag = control.cancel_flag();
        let work = Arc::new(move |u: &PageUnit| -> Work {
            if u.index == 1 {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(echo(u))
        });
        let err = BatchExecutor::new(1, RetryPolicy::none())
            .run(units(3), &control, work)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Cancelled { completed_pages: 1 }
        ));
    }

    #[tokio::test]
    async fn retry_recovers_transient_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let work = Arc::new(move |u: &PageUnit| -> Work {
            if a.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProcessingError::OcrEngine {
                    page: u.index,
                    message: "busy".into(),
                })
            } else {
                Ok(echo(u))
            }
        });
        let retry = RetryPolicy {
            max_retries: 2,
            backoff_ms: 1,
        };
        let out = BatchExecutor::new(1, retry)
            .run(units(1), &BatchControl::new(), work)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_by_default() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let work = Arc::new(move |u: &PageUnit| -> Work {
            a.fetch_add(1, Ordering::SeqCst);
            Err(ProcessingError::OcrEngine {
                page: u.index,
                message: "busy".into(),
            })
        });
        let _ = BatchExecutor::new(1, RetryPolicy::default())
            .run(units(1), &BatchControl::new(), work)
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_reports_timeout() {
        let work = Arc::new(|u: &PageUnit| -> Work {
            std::thread::sleep(Duration::from_millis(300));
            Ok(echo(u))
        });
        let control = BatchControl::new().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = BatchExecutor::new(1, RetryPolicy::none())
            .run(units(3), &control, work)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Timeout { .. }), "got {err}");
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn worker_panic_becomes_internal_error() {
        let work = Arc::new(|u: &PageUnit| -> Work {
            if u.index == 1 {
                panic!("boom");
            }
            Ok(echo(u))
        });
        let err = BatchExecutor::new(1, RetryPolicy::none())
            .run(units(2), &BatchControl::new(), work)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Internal(_)));
    }

    #[tokio::test]
    async fn empty_batch() {
        let work = Arc::new(|u: &PageUnit| -> Work { Ok(echo(u)) });
        let out = BatchExecutor::new(4, RetryPolicy::none())
            .run(Vec::new(), &BatchControl::new(), work)
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
