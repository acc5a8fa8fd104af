//! Error types for cvbatch.
//!
//! Uses thiserror for structured errors with context. Errors are designed to:
//! - Be serializable for sending back to a client
//! - Include actionable information (which task, which parameter, what to fix)
//! - Keep task-level failures out of the propagating error path

use crate::core::task::Family;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for cvbatch.
///
/// This enum encompasses all error categories that can reach a caller and
/// enables automatic conversion between specific error types. Task-level
/// failures never appear here; they are recorded in the batch outcome.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The request was rejected before any work ran.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationReport),

    /// A chain stopped at a step.
    #[error("Chain aborted: {0}")]
    Chain(#[from] ChainError),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session lookup failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Two-image matching produced no result.
    #[error("Feature matching failed: {0}")]
    Match(#[from] MatchError),

    /// The worker pool could not be built.
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A data URL was malformed.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<ValidationError> for EngineError {
    fn from(error: ValidationError) -> Self {
        let mut report = ValidationReport::new();
        report.add_error(error);
        EngineError::Validation(report)
    }
}

/// Malformed task descriptors, detected before any work is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    /// The request held no tasks.
    #[error("No tasks provided")]
    EmptyBatch,

    /// The operation kind is not in the family's catalog.
    #[error("Unknown {family} operation '{operation}' in task {task_id}")]
    UnknownOperation {
        /// Offending task.
        task_id: String,
        /// Family searched.
        family: Family,
        /// Kind as submitted.
        operation: String,
    },

    /// A required parameter was absent.
    #[error("Missing required parameter '{parameter}' for task {task_id}")]
    MissingParameter {
        /// Offending task.
        task_id: String,
        /// Parameter name.
        parameter: String,
    },

    /// A parameter had the wrong type or broke its constraint.
    #[error("Invalid parameter '{parameter}' for task {task_id}: {error}")]
    InvalidParameter {
        /// Offending task.
        task_id: String,
        /// Parameter name.
        parameter: String,
        /// What was wrong with the value.
        error: String,
    },

    /// Two tasks share an id.
    #[error("Task id '{0}' is used more than once in the batch")]
    DuplicateTaskId(String),

    /// A task was sent to a batch of another family.
    #[error("Task {task_id} belongs to the {got} family, expected {expected}")]
    FamilyMismatch {
        /// Offending task.
        task_id: String,
        /// Family of the batch.
        expected: Family,
        /// Family of the task.
        got: Family,
    },

    /// A feature task appeared in a chain.
    #[error("Task {task_id}: {family} operations cannot be chained")]
    NotChainable {
        /// Offending task.
        task_id: String,
        /// Its family.
        family: Family,
    },

    /// A chain step's family tag was not recognised.
    #[error("Step {index} names unknown family '{family}'")]
    UnknownFamily {
        /// Position of the step.
        index: usize,
        /// Tag as submitted.
        family: String,
    },
}

impl ValidationError {
    /// Get suggestion for fixing this error.
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ValidationError::EmptyBatch => Some("Submit at least one task".to_string()),
            ValidationError::UnknownOperation { family, .. } => Some(format!(
                "Use one of the {} operations: {}",
                family,
                crate::core::operation::operation_kinds(*family).join(", ")
            )),
            ValidationError::MissingParameter { parameter, .. } => {
                Some(format!("Add a value for '{}'", parameter))
            }
            ValidationError::InvalidParameter {
                parameter, error, ..
            } => Some(format!("Adjust '{}': {}", parameter, error)),
            ValidationError::DuplicateTaskId(id) => Some(format!(
                "Give each task a distinct id, or omit '{}' to have one generated",
                id
            )),
            ValidationError::FamilyMismatch { .. } => {
                Some("Submit mixed families through the mixed dispatcher".to_string())
            }
            ValidationError::NotChainable { .. } => {
                Some("Chains accept filter and transform steps only".to_string())
            }
            ValidationError::UnknownFamily { .. } => {
                Some("Use one of: feature, filter, transform".to_string())
            }
        }
    }

    /// Get the task id this error refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            ValidationError::UnknownOperation { task_id, .. }
            | ValidationError::MissingParameter { task_id, .. }
            | ValidationError::InvalidParameter { task_id, .. }
            | ValidationError::FamilyMismatch { task_id, .. }
            | ValidationError::NotChainable { task_id, .. } => Some(task_id),
            ValidationError::DuplicateTaskId(task_id) => Some(task_id),
            ValidationError::EmptyBatch | ValidationError::UnknownFamily { .. } => None,
        }
    }
}

/// A step of a sequential chain failed; nothing was committed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    /// A step returned an error or panicked.
    #[error("Step {index} ({operation}) failed: {message}")]
    StepFailed {
        /// Zero-based step position.
        index: usize,
        /// Operation kind of the step.
        operation: String,
        /// Failure message.
        message: String,
    },

    /// Cancellation was observed between steps.
    #[error("Chain cancelled before step {index}")]
    Cancelled {
        /// First step that did not run.
        index: usize,
    },
}

impl ChainError {
    /// Index of the step at which the chain stopped.
    pub fn step_index(&self) -> usize {
        match self {
            ChainError::StepFailed { index, .. } | ChainError::Cancelled { index } => *index,
        }
    }
}

/// Error raised by a vision capability for a single operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// The input image cannot be processed by this operation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation failed while running.
    #[error("Processing failed: {0}")]
    Processing(String),
}

/// Feature matching between two images could not produce a result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    /// The detector failed or panicked.
    #[error("Feature detection failed on image {image}: {message}")]
    Detection {
        /// 1 or 2.
        image: usize,
        /// Failure message.
        message: String,
    },

    /// The detector returned no usable descriptors.
    #[error("No keypoints with descriptors found in image {image}")]
    NoFeatures {
        /// 1 or 2.
        image: usize,
    },

    /// Every candidate pair was ambiguous.
    #[error("No matches passed the ratio test")]
    NoGoodMatches,

    /// Not enough correspondences to fit a homography.
    #[error("Homography needs at least {needed} matches, found {found}")]
    TooFewMatches {
        /// Correspondences available.
        found: usize,
        /// Minimum required.
        needed: usize,
    },

    /// Matching, fitting or drawing failed in the capability.
    #[error("{0}")]
    Capability(#[from] CapabilityError),
}

/// Errors while loading engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that was read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`EngineConfig`](crate::core::config::EngineConfig).
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An override had a bad value.
    #[error("Invalid value for {key}: {error}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// What was wrong.
        error: String,
    },
}

/// Errors from the session store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No session has this id.
    #[error("Session '{0}' not found")]
    NotFound(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// ============================================================================
// Validation Report
// ============================================================================

/// Every validation error found in a submitted task list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// List of errors found.
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Whether the task list can be dispatched.
    pub fn can_execute(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a `Result`, failing if any error was recorded.
    pub fn into_result(self) -> Result<(), ValidationReport> {
        if self.can_execute() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            "✓ Tasks are valid".to_string()
        } else {
            format!("✗ Validation failed with {} error(s)", self.errors.len())
        }
    }

    /// Get detailed error messages with suggestions.
    pub fn detailed_errors(&self) -> Vec<String> {
        self.errors
            .iter()
            .enumerate()
            .map(|(i, error)| {
                let mut msg = format!("{}. {}", i + 1, error);
                if let Some(fix) = error.suggested_fix() {
                    msg.push_str(&format!("\n   → Suggestion: {}", fix));
                }
                msg
            })
            .collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "{}", self.summary()),
            [only] => write!(f, "{}", only),
            [first, rest @ ..] => write!(f, "{} (and {} more)", first, rest.len()),
        }
    }
}

impl std::error::Error for ValidationReport {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_suggestions() {
        let error = ValidationError::MissingParameter {
            task_id: "filter_0".to_string(),
            parameter: "sigma".to_string(),
        };
        assert!(error.suggested_fix().unwrap().contains("sigma"));
        assert_eq!(error.task_id(), Some("filter_0"));
    }

    #[test]
    fn test_unknown_operation_lists_known_kinds() {
        let error = ValidationError::UnknownOperation {
            task_id: "t".to_string(),
            family: Family::Filter,
            operation: "sepia".to_string(),
        };
        assert!(error.suggested_fix().unwrap().contains("gaussian_blur"));
    }

    #[test]
    fn test_validation_report() {
        let mut report = ValidationReport::new();
        assert!(report.can_execute());

        report.add_error(ValidationError::EmptyBatch);
        assert!(!report.can_execute());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.to_string(), "No tasks provided");
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_validation_error_converts_to_engine_error() {
        let err: EngineError = ValidationError::DuplicateTaskId("a".to_string()).into();
        assert!(matches!(err, EngineError::Validation(ref r) if r.errors.len() == 1));
    }
}
