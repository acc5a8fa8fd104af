//! Progress tracking and cancellation for batch execution.

use crate::core::task::Family;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// A batch was dispatched to the pool.
    BatchStarted {
        /// Family of the batch.
        family: Family,
        /// Number of tasks dispatched.
        tasks: usize,
    },
    /// A worker picked up a task.
    TaskStarted {
        /// Resolved task id.
        task_id: String,
    },
    /// A task reached a final result.
    TaskFinished {
        /// Resolved task id.
        task_id: String,
        /// Whether the result is a success.
        success: bool,
        /// Time spent in the capability; 0 for timeouts and cancellations.
        duration_ms: u64,
    },
    /// Overall progress across every batch reported to this tracker.
    Progress {
        /// Completion percentage (0-100).
        percent: f32,
        /// Time since the tracker was created.
        elapsed_ms: u64,
    },
    /// A batch passed its fan-in barrier.
    BatchCompleted {
        /// Family of the batch.
        family: Family,
        /// Tasks that succeeded.
        succeeded: usize,
        /// Tasks that failed, timed out or were cancelled.
        failed: usize,
        /// Wall time of the whole batch.
        duration_ms: u64,
    },
    /// Cancellation was requested.
    Cancelled,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Cooperative cancellation flag shared between a caller and the workers
/// of one or more batches.
///
/// Workers check the flag before starting a task; a task already running
/// is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counts task completions and forwards events to an optional callback.
///
/// One tracker may be shared by several batches (the mixed dispatcher does
/// this), so totals accumulate as batches start.
pub struct ProgressTracker {
    total: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    start_time: Instant,
    callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total", &self.total)
            .field("finished", &self.finished)
            .field("failed", &self.failed)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create a tracker with no callback.
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            start_time: Instant::now(),
            callback: None,
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub(crate) fn batch_started(&self, family: Family, tasks: usize) {
        self.total.fetch_add(tasks as u64, Ordering::Relaxed);
        self.send_update(ProgressUpdate::BatchStarted { family, tasks });
    }

    pub(crate) fn task_started(&self, task_id: &str) {
        self.send_update(ProgressUpdate::TaskStarted {
            task_id: task_id.to_string(),
        });
    }

    pub(crate) fn task_finished(&self, task_id: &str, success: bool, duration_ms: u64) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.send_update(ProgressUpdate::TaskFinished {
            task_id: task_id.to_string(),
            success,
            duration_ms,
        });
        self.send_update(ProgressUpdate::Progress {
            percent: self.percent(),
            elapsed_ms: self.elapsed_ms(),
        });
    }

    pub(crate) fn batch_completed(&self, family: Family, succeeded: usize, failed: usize, duration_ms: u64) {
        self.send_update(ProgressUpdate::BatchCompleted {
            family,
            succeeded,
            failed,
            duration_ms,
        });
    }

    pub(crate) fn cancelled(&self) {
        self.send_update(ProgressUpdate::Cancelled);
    }

    /// Number of tasks announced so far.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of tasks with a final result.
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    /// Number of finished tasks that failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Completion percentage (0-100).
    pub fn percent(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (self.finished() as f32 / total as f32) * 100.0
    }

    /// Milliseconds since the tracker was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }
}

/// Cancellation and progress reporting for one run.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    /// Token checked by workers before each task.
    pub cancel: CancellationToken,
    /// Optional progress sink.
    pub progress: Option<Arc<ProgressTracker>>,
}

impl RunControl {
    /// Control with a fresh token and no progress sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report progress to the given tracker.
    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }
}
