//! # cvbatch - Batch Execution for Computer-Vision Operations
//!
//! cvbatch runs many independent image operations against one uploaded
//! image, compares what they produced, and chains operations into a
//! pipeline that updates a per-upload session.
//!
//! ## Features
//!
//! - **Parallel Batches**: Fan a list of same-family tasks out over a bounded
//!   worker pool and collect one result per task, whatever happens
//! - **Failure Containment**: Capability errors, panics, timeouts and
//!   cancellation become per-task failures instead of aborting the batch
//! - **Sequential Chains**: Apply filters and transforms in order and commit
//!   the result to an [`ImageSession`](session::ImageSession)
//! - **Mixed Dispatch**: Run feature, filter and transform tasks from one
//!   request concurrently, one batch per family
//! - **Comparison**: Summaries of keypoint counts, image statistics and
//!   shape changes across the tasks of a batch
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cvbatch::prelude::*;
//!
//! let engine = Engine::builtin(EngineConfig::default())?;
//! let base = ImageValue::from_path("input.png")?;
//!
//! let tasks = vec![
//!     TaskDescriptor::feature("fast_corners").with_param("threshold", 20),
//!     TaskDescriptor::feature("orb").with_param("n_features", 300),
//!     TaskDescriptor::feature("hog"),
//! ];
//! let outcome = engine.run_batch(&base, Family::Feature, &tasks)?;
//! let comparison = compare_features(&outcome);
//! println!("best: {:?}", comparison.summary.map(|s| s.best_method));
//!
//! let mut session = ImageSession::new(base);
//! let steps = vec![
//!     TaskDescriptor::filter("gaussian_blur").with_param("sigma", 1.5),
//!     TaskDescriptor::transform("rotation").with_param("angle", 15.0),
//! ];
//! engine.run_chain(&mut session, &steps, ChainOptions::default())?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Task descriptors, the typed operation catalog, configuration
//!   and error handling
//! - [`capability`]: The [`VisionCapability`](capability::VisionCapability)
//!   seam every operation is delegated to
//! - [`vision`]: The built-in capability on `image` / `imageproc`
//! - [`execution`]: Batch, chain and mixed executors, progress, comparison
//! - [`session`]: Per-upload image state
//! - [`api`]: Serde request/response types and the session store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod capability;
pub mod core;
pub mod execution;
pub mod session;
pub mod vision;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use cvbatch::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{ImageShape, ImageValue, ParamValue};
    pub use crate::core::param::Parameters;
    pub use crate::core::task::{
        BatchOutcome, DescriptorMatrix, Family, FeatureRecord, Keypoint, TaskDescriptor,
        TaskPayload, TaskResult,
    };
    pub use crate::core::operation::{catalog, Operation, OperationSpec};
    pub use crate::core::config::EngineConfig;

    // Errors
    pub use crate::core::error::{
        CapabilityError, ChainError, ConfigError, EngineError, EngineResult, MatchError,
        SessionError, ValidationError, ValidationReport,
    };
    pub use crate::core::matching::{DescriptorNorm, FeatureMatch, Homography, MatchStatistics};

    // Capability
    pub use crate::capability::VisionCapability;
    pub use crate::vision::BuiltinCapability;

    // Execution
    pub use crate::execution::{
        compare_features, compare_filters, compare_transforms, CancellationToken, ChainOptions,
        ChainOutcome, Engine, ImageSource, MatchOptions, MatchOutcome, MixedOutcome,
        ProgressTracker, ProgressUpdate, RunControl,
    };

    // Sessions
    pub use crate::session::{AppliedOperation, ImageSession};
    pub use crate::api::{RequestHandler, SessionStore};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
