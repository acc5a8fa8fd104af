//! Mixed-family dispatch.
//!
//! A mixed request is split by family and each non-empty family runs as its
//! own parallel batch. The three batches share the engine's pool; their
//! coordinators run on scoped threads so waiting never occupies a worker.

use crate::core::error::{EngineResult, ValidationError, ValidationReport};
use crate::core::task::{BatchOutcome, Family, TaskDescriptor};
use crate::core::types::ImageValue;
use crate::execution::batch::{self, PreparedTask};
use crate::execution::engine::Engine;
use crate::execution::progress::RunControl;
use log::{error, info};
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

/// Per-family outcomes of a mixed request.
#[derive(Debug, Clone)]
pub struct MixedOutcome {
    /// Feature-extraction results.
    pub features: BatchOutcome,
    /// Filter results.
    pub filters: BatchOutcome,
    /// Geometric-transform results.
    pub transforms: BatchOutcome,
    /// Wall time of the whole dispatch.
    pub elapsed: Duration,
}

impl MixedOutcome {
    /// Outcome for one family.
    pub fn get(&self, family: Family) -> &BatchOutcome {
        match family {
            Family::Feature => &self.features,
            Family::Filter => &self.filters,
            Family::Transform => &self.transforms,
        }
    }

    /// Total number of task results across families.
    pub fn len(&self) -> usize {
        self.features.len() + self.filters.len() + self.transforms.len()
    }

    /// Whether no family produced any result.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split tasks by family, keeping submission order within each family.
fn partition(tasks: &[TaskDescriptor]) -> [Vec<TaskDescriptor>; 3] {
    let mut groups: [Vec<TaskDescriptor>; 3] = Default::default();
    for task in tasks {
        groups[slot(task.family)].push(task.clone());
    }
    groups
}

fn slot(family: Family) -> usize {
    match family {
        Family::Feature => 0,
        Family::Filter => 1,
        Family::Transform => 2,
    }
}

/// Validate every group before anything runs. Ids are resolved by position
/// within the family, and must be unique across the whole request.
fn prepare_groups(groups: &[Vec<TaskDescriptor>; 3]) -> Result<[Vec<PreparedTask>; 3], ValidationReport> {
    let mut report = ValidationReport::new();
    let mut prepared: [Vec<PreparedTask>; 3] = Default::default();

    for family in Family::ALL {
        let tasks = &groups[slot(family)];
        if tasks.is_empty() {
            continue;
        }
        match batch::prepare(tasks, Some(family), false) {
            Ok(ready) => prepared[slot(family)] = ready,
            Err(group_report) => report.errors.extend(group_report.errors),
        }
    }

    let mut seen = HashSet::new();
    for task in prepared.iter().flatten() {
        if !seen.insert(task.id.as_str()) {
            report.add_error(ValidationError::DuplicateTaskId(task.id.clone()));
        }
    }

    report.into_result()?;
    Ok(prepared)
}

impl Engine {
    /// Run a list of tasks from any families against `base`.
    ///
    /// Every task is validated before any family starts. A family whose
    /// coordinator fails comes back empty; the others are unaffected.
    pub fn run_mixed(&self, base: &ImageValue, tasks: &[TaskDescriptor]) -> EngineResult<MixedOutcome> {
        self.run_mixed_with(base, tasks, &RunControl::default())
    }

    /// [`run_mixed`](Self::run_mixed) with cancellation and progress reporting.
    pub fn run_mixed_with(
        &self,
        base: &ImageValue,
        tasks: &[TaskDescriptor],
        control: &RunControl,
    ) -> EngineResult<MixedOutcome> {
        if tasks.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        let started = Instant::now();
        let groups = partition(tasks);
        let [features, filters, transforms] = prepare_groups(&groups)?;
        info!(
            "Mixed request: {} feature, {} filter, {} transform task(s)",
            features.len(),
            filters.len(),
            transforms.len()
        );

        let (features, filters, transforms) = thread::scope(|scope| {
            let spawn = |family: Family, tasks: Vec<PreparedTask>| {
                if tasks.is_empty() {
                    return None;
                }
                let handle = thread::Builder::new()
                    .name(format!("cvbatch-{}-coordinator", family))
                    .spawn_scoped(scope, move || self.execute_prepared(base, family, tasks, control));
                match handle {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        error!("Could not start {} coordinator: {}", family, e);
                        None
                    }
                }
            };
            let handles = [
                (Family::Feature, spawn(Family::Feature, features)),
                (Family::Filter, spawn(Family::Filter, filters)),
                (Family::Transform, spawn(Family::Transform, transforms)),
            ];

            let [features, filters, transforms] = handles.map(|(family, handle)| {
                let outcome = handle.and_then(|h| match h.join() {
                    Ok(outcome) => Some(outcome),
                    Err(panic) => {
                        error!(
                            "{} coordinator panicked: {}",
                            family,
                            batch::panic_message(panic.as_ref())
                        );
                        None
                    }
                });
                outcome.unwrap_or_else(|| BatchOutcome::empty(family).with_base_shape(base.shape()))
            });
            (features, filters, transforms)
        });

        let elapsed = started.elapsed();
        info!("Mixed request finished in {:?}", elapsed);
        Ok(MixedOutcome {
            features,
            filters,
            transforms,
            elapsed,
        })
    }
}
