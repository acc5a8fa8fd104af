//! Task descriptors and batch results.

use crate::core::param::Parameters;
use crate::core::types::{ImageShape, ImageValue, ParamValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Operation family. Tasks of one family share a capability signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Keypoint / descriptor extraction
    #[serde(alias = "feature_extraction")]
    Feature,
    /// Image-to-image filtering
    #[serde(alias = "image_filtering")]
    Filter,
    /// Geometric transforms and channel adjustment
    #[serde(alias = "geometric_transformation")]
    Transform,
}

impl Family {
    /// All families in dispatch order.
    pub const ALL: [Family; 3] = [Family::Feature, Family::Filter, Family::Transform];

    /// Prefix used for generated task ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Feature => "feature",
            Family::Filter => "filter",
            Family::Transform => "transform",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" | "feature_extraction" => Ok(Family::Feature),
            "filter" | "image_filtering" => Ok(Family::Filter),
            "transform" | "geometric_transformation" => Ok(Family::Transform),
            other => Err(format!("unknown family '{}'", other)),
        }
    }
}

fn default_priority() -> i64 {
    1
}

/// A request to perform one named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Caller-supplied id; generated as `<family>_<index>` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Operation family
    pub family: Family,
    /// Operation kind within the family (e.g. "gaussian_blur")
    pub operation: String,
    /// Operation parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// Informational only; scheduling ignores it.
    #[serde(default = "default_priority")]
    pub priority: i64,
}

impl TaskDescriptor {
    /// Create a descriptor with no id and no parameters.
    pub fn new(family: Family, operation: impl Into<String>) -> Self {
        Self {
            task_id: None,
            family,
            operation: operation.into(),
            parameters: Parameters::new(),
            priority: default_priority(),
        }
    }

    /// Feature-family descriptor.
    pub fn feature(operation: impl Into<String>) -> Self {
        Self::new(Family::Feature, operation)
    }

    /// Filter-family descriptor.
    pub fn filter(operation: impl Into<String>) -> Self {
        Self::new(Family::Filter, operation)
    }

    /// Transform-family descriptor.
    pub fn transform(operation: impl Into<String>) -> Self {
        Self::new(Family::Transform, operation)
    }

    /// Set the task id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    /// Add a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// The id this task will be reported under when it sits at `index` of
    /// the sequence handed to an executor.
    pub fn resolved_id(&self, index: usize) -> String {
        match &self.task_id {
            Some(id) => id.clone(),
            None => format!("{}_{}", self.family, index),
        }
    }
}

/// A detected keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Column in pixels
    pub x: f32,
    /// Row in pixels
    pub y: f32,
    /// Diameter of the meaningful neighbourhood
    pub size: f32,
    /// Orientation in degrees, -1 when not computed
    pub angle: f32,
    /// Detector response strength
    pub response: f32,
    /// Pyramid level
    pub octave: i32,
}

impl Keypoint {
    /// Keypoint at (x, y) with the given size and response.
    pub fn new(x: f32, y: f32, size: f32, response: f32) -> Self {
        Self {
            x,
            y,
            size,
            angle: -1.0,
            response,
            octave: 0,
        }
    }
}

/// Row-major descriptor matrix, one row per keypoint (or one row for
/// whole-image descriptors such as HOG).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorMatrix {
    /// Number of descriptors
    pub rows: usize,
    /// Length of each descriptor
    pub cols: usize,
    /// `rows * cols` values
    pub data: Vec<f32>,
}

impl DescriptorMatrix {
    /// Build from rows of equal length. Returns `None` for ragged input.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Option<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        Some(Self {
            rows: rows.len(),
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// Output of a feature-family operation.
#[derive(Debug, Clone, Default)]
pub struct FeatureRecord {
    /// Visualisation of the detected features, if the capability made one
    pub image: Option<ImageValue>,
    /// Detected keypoints, empty for whole-image descriptors
    pub keypoints: Vec<Keypoint>,
    /// Descriptor rows, when the operation computes them
    pub descriptors: Option<DescriptorMatrix>,
    /// Free-form extra output
    pub metadata: IndexMap<String, ParamValue>,
}

/// Successful task output; shape depends on family.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    /// Feature-family output.
    Features(FeatureRecord),
    /// Filter or transform output.
    Image(ImageValue),
}

impl TaskPayload {
    /// The image carried by this payload, if any.
    pub fn image(&self) -> Option<&ImageValue> {
        match self {
            TaskPayload::Features(record) => record.image.as_ref(),
            TaskPayload::Image(image) => Some(image),
        }
    }

    /// Feature record, for feature-family payloads.
    pub fn features(&self) -> Option<&FeatureRecord> {
        match self {
            TaskPayload::Features(record) => Some(record),
            TaskPayload::Image(_) => None,
        }
    }
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// The task produced a payload.
    Success(TaskPayload),
    /// The task failed, timed out, panicked or was cancelled.
    Failure(String),
}

impl TaskResult {
    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    /// Payload of a successful task.
    pub fn payload(&self) -> Option<&TaskPayload> {
        match self {
            TaskResult::Success(payload) => Some(payload),
            TaskResult::Failure(_) => None,
        }
    }

    /// Error message of a failed task.
    pub fn error(&self) -> Option<&str> {
        match self {
            TaskResult::Success(_) => None,
            TaskResult::Failure(message) => Some(message),
        }
    }
}

/// Results of one batch, keyed by task id.
///
/// Keys iterate in lexicographic order; nothing about execution order can
/// be read from them.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    family: Family,
    results: BTreeMap<String, TaskResult>,
    durations: BTreeMap<String, Duration>,
    base_shape: Option<ImageShape>,
}

impl BatchOutcome {
    /// Create an empty outcome.
    pub fn empty(family: Family) -> Self {
        Self {
            family,
            results: BTreeMap::new(),
            durations: BTreeMap::new(),
            base_shape: None,
        }
    }

    pub(crate) fn with_base_shape(mut self, shape: ImageShape) -> Self {
        self.base_shape = Some(shape);
        self
    }

    pub(crate) fn insert(&mut self, task_id: String, result: TaskResult, elapsed: Option<Duration>) {
        if let Some(elapsed) = elapsed {
            self.durations.insert(task_id.clone(), elapsed);
        }
        self.results.insert(task_id, result);
    }

    /// Family the batch ran in.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Shape of the image the batch ran against.
    pub fn base_shape(&self) -> Option<ImageShape> {
        self.base_shape
    }

    /// Number of entries (always the number of submitted tasks).
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the outcome has no entries.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result for a task id.
    pub fn get(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.get(task_id)
    }

    /// Time the task spent in the capability, when it ran to completion.
    pub fn elapsed(&self, task_id: &str) -> Option<Duration> {
        self.durations.get(task_id).copied()
    }

    /// Iterate over `(task_id, result)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskResult)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Task ids in key order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(|k| k.as_str())
    }

    /// Number of successful tasks.
    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Number of failed tasks.
    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }
}
