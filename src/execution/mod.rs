//! Execution module.
//!
//! This module runs validated tasks against a capability: parallel batches,
//! sequential chains, mixed-family dispatch, two-image feature matching,
//! progress and cancellation, and the pure comparison summaries over batch
//! outcomes.

mod batch;
pub mod chain;
pub mod compare;
pub mod dispatch;
pub mod engine;
pub mod matching;
pub mod progress;

pub use chain::{ChainOptions, ChainOutcome, ImageSource};
pub use compare::{
    compare_features, compare_filters, compare_transforms, FeatureComparison, FilterComparison,
    TransformComparison,
};
pub use dispatch::MixedOutcome;
pub use engine::Engine;
pub use matching::{MatchOptions, MatchOutcome};
pub use progress::{CancellationToken, ProgressCallback, ProgressTracker, ProgressUpdate, RunControl};
