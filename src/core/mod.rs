//! Core types for the cvbatch engine.
//!
//! This module contains the foundational pieces every other layer builds on:
//! - Value types (parameters, shared images)
//! - Parameter schemas and constraints
//! - Task descriptors and batch outcomes
//! - The typed operation catalog
//! - Feature-matching results
//! - Engine configuration
//! - Error types

pub mod config;
pub mod error;
pub mod matching;
pub mod operation;
pub mod param;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{
    CapabilityError, ChainError, ConfigError, EngineError, EngineResult, MatchError, SessionError,
    ValidationError, ValidationReport,
};
pub use matching::{DescriptorNorm, FeatureMatch, Homography, MatchStatistics};
pub use operation::{
    ColorAdjustment, ColorChannel, ColorMode, FeatureOp, FilterOp, FlipAxis, GeometricOp, Operation,
    OperationSpec, TransformOp,
};
pub use param::{Constraint, ParamKind, ParamSpec, Parameters};
pub use task::{
    BatchOutcome, DescriptorMatrix, Family, FeatureRecord, Keypoint, TaskDescriptor, TaskPayload,
    TaskResult,
};
pub use types::{ImageShape, ImageValue, ParamValue};
