//! Sequential chain execution.
//!
//! Steps run in order on the calling thread; each step consumes the image
//! produced by the previous one. The first failing step aborts the chain
//! and nothing is committed.

use crate::capability::{self, VisionCapability};
use crate::core::error::ChainError;
use crate::core::task::TaskDescriptor;
use crate::core::types::ImageValue;
use crate::execution::batch::{panic_message, PreparedTask};
use crate::execution::progress::CancellationToken;
use crate::session::AppliedOperation;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Which session image a chain starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// The image with all committed operations applied
    #[default]
    Current,
    /// The image as uploaded
    Original,
}

/// Options for [`Engine::run_chain`](crate::execution::Engine::run_chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOptions {
    /// Base image for the first step.
    pub source: ImageSource,
    /// Commit the final image and history to the session.
    pub mutate_session: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            source: ImageSource::Current,
            mutate_session: true,
        }
    }
}

impl ChainOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base image.
    pub fn with_source(mut self, source: ImageSource) -> Self {
        self.source = source;
        self
    }

    /// Run without touching the session.
    pub fn dry_run(mut self) -> Self {
        self.mutate_session = false;
        self
    }
}

/// Result of a completed chain.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// Output of the last step.
    pub image: ImageValue,
    /// One record per step, in order.
    pub applied: Vec<AppliedOperation>,
    /// Time spent in each step.
    pub step_durations: Vec<Duration>,
    /// Whether the output was committed to a session.
    pub committed: bool,
}

/// Run prepared steps in order.
pub(crate) fn run(
    capability: &dyn VisionCapability,
    base: &ImageValue,
    descriptors: &[TaskDescriptor],
    steps: Vec<PreparedTask>,
    cancel: &CancellationToken,
) -> Result<ChainOutcome, ChainError> {
    let mut image = base.clone();
    let mut applied = Vec::with_capacity(steps.len());
    let mut step_durations = Vec::with_capacity(steps.len());

    for (index, (step, descriptor)) in steps.into_iter().zip(descriptors).enumerate() {
        if cancel.is_cancelled() {
            warn!("Chain cancelled before step {}", index);
            return Err(ChainError::Cancelled { index });
        }

        let kind = step.operation.kind();
        debug!("Chain step {} ({}) on {}", index, kind, image.shape());
        let began = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            capability::apply_image_op(capability, image.image(), &step.operation)
        }));
        let next = match outcome {
            Ok(Ok(next)) => next,
            Ok(Err(e)) => {
                warn!("Chain step {} ({}) failed: {}", index, kind, e);
                return Err(ChainError::StepFailed {
                    index,
                    operation: kind.to_string(),
                    message: e.to_string(),
                });
            }
            Err(panic) => {
                let message = format!("panicked: {}", panic_message(panic.as_ref()));
                warn!("Chain step {} ({}) {}", index, kind, message);
                return Err(ChainError::StepFailed {
                    index,
                    operation: kind.to_string(),
                    message,
                });
            }
        };
        step_durations.push(began.elapsed());
        image = ImageValue::new(next);
        applied.push(AppliedOperation {
            task_id: step.id,
            family: descriptor.family,
            operation: kind.to_string(),
            parameters: descriptor.parameters.clone(),
        });
    }

    Ok(ChainOutcome {
        image,
        applied,
        step_durations,
        committed: false,
    })
}
