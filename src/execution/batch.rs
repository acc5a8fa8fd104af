//! Parallel batch execution.
//!
//! A batch fans out one unit of work per task onto the engine's pool and
//! fans back in through a channel. The collector returns only when every
//! task has a final result: success, failure, timeout or cancellation.
//! Capability errors and panics are contained at the task boundary and
//! never reach the caller.

use crate::capability::{self, VisionCapability};
use crate::core::error::{ValidationError, ValidationReport};
use crate::core::operation::Operation;
use crate::core::task::{BatchOutcome, Family, TaskDescriptor, TaskResult};
use crate::core::types::ImageValue;
use crate::execution::progress::RunControl;
use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A validated task: resolved id plus typed operation.
#[derive(Debug, Clone)]
pub(crate) struct PreparedTask {
    pub id: String,
    pub operation: Operation,
}

/// Validate a task list before anything is dispatched.
///
/// Ids are resolved by position in `tasks`. Every problem is collected so
/// the caller sees the whole list at once.
pub(crate) fn prepare(
    tasks: &[TaskDescriptor],
    family: Option<Family>,
    chain: bool,
) -> Result<Vec<PreparedTask>, ValidationReport> {
    let mut report = ValidationReport::new();
    if tasks.is_empty() {
        report.add_error(ValidationError::EmptyBatch);
        return Err(report);
    }

    let mut seen = HashSet::with_capacity(tasks.len());
    let mut prepared = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        let id = task.resolved_id(index);
        if !seen.insert(id.clone()) {
            report.add_error(ValidationError::DuplicateTaskId(id.clone()));
        }

        if let Some(expected) = family {
            if task.family != expected {
                report.add_error(ValidationError::FamilyMismatch {
                    task_id: id,
                    expected,
                    got: task.family,
                });
                continue;
            }
        }
        if chain && task.family == Family::Feature {
            report.add_error(ValidationError::NotChainable {
                task_id: id,
                family: task.family,
            });
            continue;
        }

        match Operation::parse(&id, task) {
            Ok(operation) => prepared.push(PreparedTask { id, operation }),
            Err(e) => report.add_error(e),
        }
    }

    report.into_result()?;
    Ok(prepared)
}

type Message = (usize, TaskResult, Option<Duration>);

/// Where a dispatched task is. The collector settles a task it gives up on,
/// and a worker that picks up a settled task drops it without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Queued,
    Running(Instant),
    Settled,
}

/// Run prepared tasks of one family on the pool and wait for all of them.
///
/// With a timeout, the deadline of a running task counts from when it
/// started and the deadline of a queued task counts from dispatch, so the
/// call returns within roughly `timeout` even when every worker is held by
/// work abandoned in an earlier batch.
pub(crate) fn execute(
    pool: &ThreadPool,
    capability: &Arc<dyn VisionCapability>,
    base: &ImageValue,
    family: Family,
    tasks: Vec<PreparedTask>,
    timeout: Option<Duration>,
    control: &RunControl,
) -> BatchOutcome {
    let started = Instant::now();
    let total = tasks.len();
    info!("Dispatching {} {} task(s) to {}", total, family, capability.name());
    if let Some(progress) = &control.progress {
        progress.batch_started(family, total);
    }

    let (tx, rx) = channel::unbounded::<Message>();
    let states: Arc<Mutex<Vec<TaskState>>> = Arc::new(Mutex::new(vec![TaskState::Queued; total]));

    for (index, task) in tasks.iter().enumerate() {
        let tx = tx.clone();
        let capability = Arc::clone(capability);
        let image = base.clone();
        let task = task.clone();
        let states = Arc::clone(&states);
        let control = control.clone();

        pool.spawn(move || {
            let began = Instant::now();
            {
                let mut states = states.lock();
                if states[index] != TaskState::Queued {
                    debug!("Task {} was settled before a worker picked it up", task.id);
                    return;
                }
                if control.cancel.is_cancelled() {
                    states[index] = TaskState::Settled;
                    let _ = tx.send((index, TaskResult::Failure("cancelled".to_string()), None));
                    return;
                }
                states[index] = TaskState::Running(began);
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if let Some(progress) = &control.progress {
                    progress.task_started(&task.id);
                }
                debug!("Task {} ({}) started", task.id, task.operation.kind());
                capability::apply(capability.as_ref(), image.image(), &task.operation)
            }));
            let elapsed = began.elapsed();
            let result = match outcome {
                Ok(Ok(payload)) => TaskResult::Success(payload),
                Ok(Err(e)) => {
                    warn!("Task {} ({}) failed: {}", task.id, task.operation.kind(), e);
                    TaskResult::Failure(e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Task {} ({}) panicked: {}", task.id, task.operation.kind(), message);
                    TaskResult::Failure(format!("panicked: {}", message))
                }
            };
            states.lock()[index] = TaskState::Settled;
            // The collector may have stopped listening after a timeout.
            let _ = tx.send((index, result, Some(elapsed)));
        });
    }
    drop(tx);
    let dispatched = Instant::now();

    let mut results: Vec<Option<(TaskResult, Option<Duration>)>> = vec![None; total];
    let mut pending = total;
    // Returns false when the task already had a result; late or duplicate
    // reports are dropped.
    let mut record = |index: usize, result: TaskResult, elapsed: Option<Duration>, pending: &mut usize| -> bool {
        if results[index].is_some() {
            return false;
        }
        if let Some(progress) = &control.progress {
            let ms = elapsed.map(|d| d.as_millis() as u64).unwrap_or(0);
            progress.task_finished(&tasks[index].id, result.is_success(), ms);
        }
        debug!("Task {} finished (success: {})", tasks[index].id, result.is_success());
        results[index] = Some((result, elapsed));
        *pending -= 1;
        true
    };

    match timeout {
        None => {
            while pending > 0 {
                match rx.recv() {
                    Ok((index, result, elapsed)) => {
                        record(index, result, elapsed, &mut pending);
                    }
                    Err(_) => break,
                }
            }
        }
        Some(limit) => {
            let tick = (limit / 4).clamp(Duration::from_millis(1), Duration::from_millis(50));
            while pending > 0 {
                match rx.recv_timeout(tick) {
                    Ok((index, result, elapsed)) => {
                        record(index, result, elapsed, &mut pending);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                let now = Instant::now();
                let expired: Vec<(usize, String)> = states
                    .lock()
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(index, state)| {
                        let message = match *state {
                            TaskState::Running(began) if now.duration_since(began) >= limit => {
                                format!("timed out after {:?}", limit)
                            }
                            TaskState::Queued if now.duration_since(dispatched) >= limit => {
                                "timed out waiting for a worker".to_string()
                            }
                            _ => return None,
                        };
                        *state = TaskState::Settled;
                        Some((index, message))
                    })
                    .collect();
                for (index, message) in expired {
                    warn!("Task {}: {}", tasks[index].id, message);
                    record(index, TaskResult::Failure(message), None, &mut pending);
                }
            }
        }
    }
    drop(record);

    if control.cancel.is_cancelled() {
        if let Some(progress) = &control.progress {
            progress.cancelled();
        }
    }

    let mut outcome = BatchOutcome::empty(family).with_base_shape(base.shape());
    for (task, slot) in tasks.into_iter().zip(results) {
        let (result, elapsed) = slot.unwrap_or_else(|| {
            error!("Task {} never reported a result", task.id);
            (TaskResult::Failure("worker exited without reporting".to_string()), None)
        });
        outcome.insert(task.id, result, elapsed);
    }

    let duration = started.elapsed();
    info!(
        "{} batch finished in {:?}: {} succeeded, {} failed",
        family,
        duration,
        outcome.success_count(),
        outcome.failure_count()
    );
    if let Some(progress) = &control.progress {
        progress.batch_completed(
            family,
            outcome.success_count(),
            outcome.failure_count(),
            duration.as_millis() as u64,
        );
    }
    outcome
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
