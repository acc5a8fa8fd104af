//! Request/response boundary.
//!
//! Serde types for the inbound and outbound messages, and a
//! [`RequestHandler`] that turns requests into engine calls against the
//! sessions in a [`SessionStore`]. Images travel as PNG data URLs.

pub mod encoding;
pub mod store;

pub use encoding::{decode_data_url, encode_png, encode_png_data_url};
pub use store::{SessionStore, SharedSession};

use crate::core::error::{EngineResult, ValidationError, ValidationReport};
use crate::core::matching::{FeatureMatch, Homography, MatchStatistics};
use crate::core::param::Parameters;
use crate::core::task::{BatchOutcome, DescriptorMatrix, Family, Keypoint, TaskDescriptor, TaskResult};
use crate::core::types::{ImageShape, ImageValue, ParamValue};
use crate::execution::chain::{ChainOptions, ImageSource};
use crate::execution::compare::{
    compare_features, compare_filters, compare_transforms, FeatureComparison, FilterComparison,
    TransformComparison,
};
use crate::execution::{Engine, MatchOptions};
use crate::session::AppliedOperation;
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

fn default_priority() -> i64 {
    1
}

fn default_ratio() -> f32 {
    0.75
}

fn default_true() -> bool {
    true
}

/// One task inside a single-family request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-chosen id; generated from the family and position if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Operation kind, matched case-insensitively.
    pub operation: String,
    /// Parameter values by name.
    #[serde(default)]
    pub parameters: Parameters,
    /// Higher runs earlier in a batch.
    #[serde(default = "default_priority")]
    pub priority: i64,
}

impl TaskRequest {
    fn into_descriptor(self, family: Family) -> TaskDescriptor {
        TaskDescriptor {
            task_id: self.task_id,
            family,
            operation: self.operation,
            parameters: self.parameters,
            priority: self.priority,
        }
    }
}

/// A task carrying its own family tag.
///
/// The tag is kept as text so an unrecognised family can be reported (or
/// dropped) instead of failing the whole message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedTaskRequest {
    /// Family name or alias.
    pub family: String,
    /// The task itself.
    #[serde(flatten)]
    pub task: TaskRequest,
}

impl TaggedTaskRequest {
    fn family(&self) -> Option<Family> {
        self.family.parse().ok()
    }
}

/// Run tasks of one family in parallel on a session image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Family every task belongs to.
    pub family: Family,
    /// Tasks to run.
    pub tasks: Vec<TaskRequest>,
    /// Attach a comparison summary to the response.
    #[serde(default)]
    pub compare: bool,
    /// Session image the batch reads.
    #[serde(default)]
    pub source: ImageSource,
}

/// Run filter/transform steps in order on a session image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRequest {
    /// Steps in application order.
    pub steps: Vec<TaggedTaskRequest>,
    /// Session image the first step reads.
    #[serde(default)]
    pub source: ImageSource,
    /// Leave the session untouched.
    #[serde(default)]
    pub dry_run: bool,
}

/// Run tasks of any family on a session image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedRequest {
    /// Tasks of any family.
    pub tasks: Vec<TaggedTaskRequest>,
    /// Attach one comparison per family that ran.
    #[serde(default)]
    pub compare: bool,
    /// Session image every family reads.
    #[serde(default)]
    pub source: ImageSource,
}

/// Match features between the images of two sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    /// Session holding the second image.
    pub other_session_id: Uuid,
    /// Which image of each session to use.
    #[serde(default)]
    pub source: ImageSource,
    /// Feature task run on both images; ORB with 1000 features if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<TaskRequest>,
    /// Lowe ratio-test threshold.
    #[serde(default = "default_ratio")]
    pub ratio_threshold: f32,
    /// Estimate a homography with this reprojection threshold in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ransac_threshold: Option<f32>,
    /// Return a side-by-side rendering of the matches.
    #[serde(default = "default_true")]
    pub draw: bool,
}

/// Outcome of one task, ready for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Whether the task succeeded.
    pub success: bool,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// PNG data URL of the output (or feature visualisation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Detected keypoints, for feature tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<Keypoint>>,
    /// Descriptor rows, for feature tasks that compute them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<DescriptorMatrix>,
    /// Detector-specific extras.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, ParamValue>,
    /// Wall time of the task, when it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl TaskResponse {
    fn failure(message: impl Into<String>, elapsed_ms: Option<u64>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            image: None,
            keypoints: None,
            descriptors: None,
            metadata: IndexMap::new(),
            elapsed_ms,
        }
    }

    fn from_result(task_id: &str, result: &TaskResult, elapsed_ms: Option<u64>) -> Self {
        let payload = match result {
            TaskResult::Failure(message) => return Self::failure(message.clone(), elapsed_ms),
            TaskResult::Success(payload) => payload,
        };
        let image = match payload.image().map(encode_png_data_url).transpose() {
            Ok(image) => image,
            Err(e) => {
                warn!("Task {} produced an image that could not be encoded: {}", task_id, e);
                return Self::failure(e.to_string(), elapsed_ms);
            }
        };
        let features = payload.features();
        Self {
            success: true,
            error: None,
            image,
            keypoints: features.map(|f| f.keypoints.clone()),
            descriptors: features.and_then(|f| f.descriptors.clone()),
            metadata: features.map(|f| f.metadata.clone()).unwrap_or_default(),
            elapsed_ms,
        }
    }
}

fn task_responses(outcome: &BatchOutcome) -> BTreeMap<String, TaskResponse> {
    outcome
        .iter()
        .map(|(task_id, result)| {
            let elapsed = outcome.elapsed(task_id).map(|d| d.as_millis() as u64);
            (task_id.to_string(), TaskResponse::from_result(task_id, result, elapsed))
        })
        .collect()
}

/// Family-specific comparison summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Comparison {
    /// Summary of a feature batch.
    Features(FeatureComparison),
    /// Summary of a filter batch.
    Filters(FilterComparison),
    /// Summary of a transform batch.
    Transforms(TransformComparison),
}

impl Comparison {
    /// Compare an outcome according to its family.
    pub fn of(outcome: &BatchOutcome) -> Self {
        match outcome.family() {
            Family::Feature => Comparison::Features(compare_features(outcome)),
            Family::Filter => Comparison::Filters(compare_filters(outcome)),
            Family::Transform => Comparison::Transforms(compare_transforms(outcome, None)),
        }
    }
}

/// Session summary returned by upload and reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Session id.
    pub session_id: Uuid,
    /// Shape of the current image.
    pub shape: ImageShape,
    /// Commits since upload or the last reset.
    pub revision: u64,
    /// Committed operations.
    pub history_len: usize,
}

/// Result of a [`BatchRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    /// Session id.
    pub session_id: Uuid,
    /// Family of the batch.
    pub family: Family,
    /// One entry per task id.
    pub results: BTreeMap<String, TaskResponse>,
    /// Successful tasks.
    pub succeeded: usize,
    /// Failed tasks.
    pub failed: usize,
    /// Present when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

/// Result of a [`ChainRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResponse {
    /// Session id.
    pub session_id: Uuid,
    /// PNG data URL of the final image.
    pub image: String,
    /// Shape of the final image.
    pub shape: ImageShape,
    /// Steps applied, in order.
    pub applied: Vec<AppliedOperation>,
    /// Wall time of each step.
    pub step_ms: Vec<u64>,
    /// Whether the session now holds the result.
    pub committed: bool,
    /// Session revision after the chain.
    pub revision: u64,
}

/// Result of a [`MixedRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixedResponse {
    /// Session id.
    pub session_id: Uuid,
    /// Feature task results.
    pub features: BTreeMap<String, TaskResponse>,
    /// Filter task results.
    pub filters: BTreeMap<String, TaskResponse>,
    /// Transform task results.
    pub transforms: BTreeMap<String, TaskResponse>,
    /// Tasks dropped because their family was not recognised.
    pub dropped: usize,
    /// Wall time of the whole request.
    pub elapsed_ms: u64,
    /// One entry per family that ran.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub comparisons: BTreeMap<String, Comparison>,
}

/// Result of a [`MatchRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResponse {
    /// Session holding the first image.
    pub session_id: Uuid,
    /// Session holding the second image.
    pub other_session_id: Uuid,
    /// Keypoints of the first image.
    pub keypoints1: Vec<Keypoint>,
    /// Keypoints of the second image.
    pub keypoints2: Vec<Keypoint>,
    /// Accepted matches, closest first.
    pub matches: Vec<FeatureMatch>,
    /// Distance summary and keypoint counts.
    pub statistics: MatchStatistics,
    /// Present when a RANSAC threshold was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homography: Option<Homography>,
    /// PNG data URL of the side-by-side rendering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Wall time of the whole request.
    pub elapsed_ms: u64,
}

/// Turns boundary requests into engine calls.
#[derive(Debug)]
pub struct RequestHandler {
    engine: Engine,
    sessions: SessionStore,
}

impl RequestHandler {
    /// Serve requests with `engine` against `sessions`.
    pub fn new(engine: Engine, sessions: SessionStore) -> Self {
        Self { engine, sessions }
    }

    /// The engine requests run on.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Sessions known to this handler.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Start a session for an image.
    pub fn upload(&self, image: ImageValue) -> SessionResponse {
        let shape = image.shape();
        let session_id = self.sessions.create(image);
        SessionResponse {
            session_id,
            shape,
            revision: 0,
            history_len: 0,
        }
    }

    /// Start a session for an image sent as a data URL.
    pub fn upload_data_url(&self, data_url: &str) -> EngineResult<SessionResponse> {
        Ok(self.upload(decode_data_url(data_url)?))
    }

    /// Discard every committed operation of a session.
    pub fn reset(&self, session_id: Uuid) -> EngineResult<SessionResponse> {
        let shared = self.sessions.get(session_id)?;
        let mut session = shared.lock();
        session.reset();
        Ok(SessionResponse {
            session_id,
            shape: session.current().shape(),
            revision: session.revision(),
            history_len: session.history().len(),
        })
    }

    fn source_image(&self, session_id: Uuid, source: ImageSource) -> EngineResult<ImageValue> {
        let shared = self.sessions.get(session_id)?;
        let session = shared.lock();
        Ok(match source {
            ImageSource::Current => session.current().clone(),
            ImageSource::Original => session.original().clone(),
        })
    }

    /// Run a single-family batch. Sessions are never modified.
    pub fn batch(&self, session_id: Uuid, request: BatchRequest) -> EngineResult<BatchResponse> {
        let base = self.source_image(session_id, request.source)?;
        let family = request.family;
        let tasks: Vec<_> = request.tasks.into_iter().map(|t| t.into_descriptor(family)).collect();
        let outcome = self.engine.run_batch(&base, family, &tasks)?;

        Ok(BatchResponse {
            session_id,
            family,
            results: task_responses(&outcome),
            succeeded: outcome.success_count(),
            failed: outcome.failure_count(),
            comparison: request.compare.then(|| Comparison::of(&outcome)),
        })
    }

    /// Run a chain; unless it is a dry run, the result is committed.
    ///
    /// Steps with an unrecognised family fail validation.
    pub fn chain(&self, session_id: Uuid, request: ChainRequest) -> EngineResult<ChainResponse> {
        let mut report = ValidationReport::new();
        let mut steps = Vec::with_capacity(request.steps.len());
        for (index, step) in request.steps.into_iter().enumerate() {
            match step.family() {
                Some(family) => steps.push(step.task.into_descriptor(family)),
                None => report.add_error(ValidationError::UnknownFamily {
                    index,
                    family: step.family,
                }),
            }
        }
        report.into_result()?;

        let mut options = ChainOptions::new().with_source(request.source);
        if request.dry_run {
            options = options.dry_run();
        }

        let shared = self.sessions.get(session_id)?;
        let mut session = shared.lock();
        let outcome = self.engine.run_chain(&mut session, &steps, options)?;
        Ok(ChainResponse {
            session_id,
            image: encode_png_data_url(&outcome.image)?,
            shape: outcome.image.shape(),
            applied: outcome.applied,
            step_ms: outcome.step_durations.iter().map(|d| d.as_millis() as u64).collect(),
            committed: outcome.committed,
            revision: session.revision(),
        })
    }

    /// Run a mixed request. Tasks with an unrecognised family are dropped.
    pub fn mixed(&self, session_id: Uuid, request: MixedRequest) -> EngineResult<MixedResponse> {
        let base = self.source_image(session_id, request.source)?;
        let mut dropped = 0;
        let mut tasks = Vec::with_capacity(request.tasks.len());
        for request_task in request.tasks {
            match request_task.family() {
                Some(family) => tasks.push(request_task.task.into_descriptor(family)),
                None => {
                    warn!(
                        "Dropping task '{}' with unknown family '{}'",
                        request_task.task.operation, request_task.family
                    );
                    dropped += 1;
                }
            }
        }

        if tasks.is_empty() && dropped > 0 {
            return Ok(MixedResponse {
                session_id,
                features: BTreeMap::new(),
                filters: BTreeMap::new(),
                transforms: BTreeMap::new(),
                dropped,
                elapsed_ms: 0,
                comparisons: BTreeMap::new(),
            });
        }

        let outcome = self.engine.run_mixed(&base, &tasks)?;
        let mut comparisons = BTreeMap::new();
        if request.compare {
            for family in Family::ALL {
                let family_outcome = outcome.get(family);
                if !family_outcome.is_empty() {
                    comparisons.insert(family.to_string(), Comparison::of(family_outcome));
                }
            }
        }

        Ok(MixedResponse {
            session_id,
            features: task_responses(&outcome.features),
            filters: task_responses(&outcome.filters),
            transforms: task_responses(&outcome.transforms),
            dropped,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            comparisons,
        })
    }

    /// Match features between the images of two sessions.
    pub fn match_features(&self, session_id: Uuid, request: MatchRequest) -> EngineResult<MatchResponse> {
        let first = self.source_image(session_id, request.source)?;
        let second = self.source_image(request.other_session_id, request.source)?;

        let mut options = MatchOptions::new().with_ratio_threshold(request.ratio_threshold);
        if let Some(detector) = request.detector {
            options = options.with_detector(detector.into_descriptor(Family::Feature));
        }
        if let Some(threshold) = request.ransac_threshold {
            options = options.with_homography(threshold);
        }
        if !request.draw {
            options = options.without_drawing();
        }

        let outcome = self.engine.match_images(&first, &second, &options)?;
        Ok(MatchResponse {
            session_id,
            other_session_id: request.other_session_id,
            image: outcome.image.as_ref().map(encode_png_data_url).transpose()?,
            keypoints1: outcome.first_keypoints,
            keypoints2: outcome.second_keypoints,
            matches: outcome.matches,
            statistics: outcome.statistics,
            homography: outcome.homography,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::core::error::{EngineError, SessionError};
    use crate::vision::fixtures::{block_texture, test_card};

    fn handler() -> (RequestHandler, Uuid) {
        let engine = Engine::builtin(EngineConfig::new().with_max_workers(2)).unwrap();
        let handler = RequestHandler::new(engine, SessionStore::new());
        let session = handler.upload(ImageValue::new(test_card(32, 24)));
        (handler, session.session_id)
    }

    #[test]
    fn test_batch_request_from_json() {
        let json = r#"{
            "family": "feature_extraction",
            "compare": true,
            "tasks": [
                {"operation": "fast_corners", "parameters": {"threshold": 20}},
                {"task_id": "orb", "operation": "ORB"}
            ]
        }"#;
        let request: BatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.family, Family::Feature);
        assert_eq!(request.source, ImageSource::Current);
        assert_eq!(request.tasks[0].priority, 1);

        let (handler, id) = handler();
        let response = handler.batch(id, request).unwrap();
        assert_eq!(response.results.len(), 2);
        assert!(response.results.contains_key("feature_0"));
        assert!(response.results.contains_key("orb"));
        assert!(matches!(response.comparison, Some(Comparison::Features(_))));

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["family"], "feature");
        assert!(value["comparison"]["methods"].is_object());
    }

    #[test]
    fn test_tagged_task_flattens() {
        let json = r#"{"family": "filter", "operation": "gaussian_blur", "parameters": {"sigma": 2.5}}"#;
        let task: TaggedTaskRequest = serde_json::from_str(json).unwrap();
        assert_eq!(task.family(), Some(Family::Filter));
        assert_eq!(task.task.parameters.get("sigma"), Some(&ParamValue::Float(2.5)));

        let back: TaggedTaskRequest = serde_json::from_value(serde_json::to_value(&task).unwrap()).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_chain_request_commits() {
        let (handler, id) = handler();
        let json = r#"{"steps": [
            {"family": "filter", "operation": "grayscale"},
            {"family": "transform", "operation": "resize", "parameters": {"width": 8, "height": 6}}
        ]}"#;
        let response = handler.chain(id, serde_json::from_str(json).unwrap()).unwrap();
        assert!(response.committed);
        assert_eq!(response.revision, 1);
        assert_eq!((response.shape.width, response.shape.height), (8, 6));
        assert!(response.image.starts_with("data:image/png;base64,"));
        let decoded = decode_data_url(&response.image).unwrap();
        assert_eq!(decoded.shape(), response.shape);

        let reset = handler.reset(id).unwrap();
        assert_eq!((reset.revision, reset.history_len), (0, 0));
        assert_eq!((reset.shape.width, reset.shape.height), (32, 24));
    }

    #[test]
    fn test_chain_unknown_family_is_rejected() {
        let (handler, id) = handler();
        let request = ChainRequest {
            steps: vec![TaggedTaskRequest {
                family: "audio".to_string(),
                task: TaskRequest {
                    task_id: None,
                    operation: "echo".to_string(),
                    parameters: Parameters::new(),
                    priority: 1,
                },
            }],
            source: ImageSource::Current,
            dry_run: false,
        };
        match handler.chain(id, request).unwrap_err() {
            EngineError::Validation(report) => assert!(matches!(
                report.errors[0],
                ValidationError::UnknownFamily { index: 0, .. }
            )),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_mixed_request_drops_unknown_family() {
        let (handler, id) = handler();
        let json = r#"{"compare": true, "tasks": [
            {"family": "feature", "operation": "fast_corners"},
            {"family": "filter", "operation": "sobel"},
            {"family": "hologram", "operation": "project"},
            {"family": "transform", "operation": "crop",
             "parameters": {"x": 0, "y": 0, "width": 500, "height": 4}}
        ]}"#;
        let response = handler.mixed(id, serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(response.dropped, 1);
        assert_eq!(response.features.len(), 1);
        assert_eq!(response.filters.len(), 1);
        let crop = &response.transforms["transform_0"];
        assert!(!crop.success);
        assert!(crop.error.is_some());
        assert_eq!(response.comparisons.len(), 3);
    }

    #[test]
    fn test_mixed_request_with_only_unknown_families() {
        let (handler, id) = handler();
        let json = r#"{"compare": true, "tasks": [
            {"family": "hologram", "operation": "project"},
            {"family": "audio", "operation": "echo"}
        ]}"#;
        let response = handler.mixed(id, serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(response.dropped, 2);
        assert!(response.features.is_empty());
        assert!(response.filters.is_empty());
        assert!(response.transforms.is_empty());
        assert!(response.comparisons.is_empty());

        let err = handler
            .mixed(id, MixedRequest { tasks: vec![], compare: false, source: ImageSource::Current })
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_match_request_between_sessions() {
        let (handler, _) = handler();
        let first = handler.upload(ImageValue::new(block_texture(160, 120, (0, 0))));
        let second = handler.upload(ImageValue::new(block_texture(160, 120, (7, 5))));
        let json = format!(
            r#"{{"other_session_id": "{}", "ransac_threshold": 2.0}}"#,
            second.session_id
        );
        let request: MatchRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.ratio_threshold, 0.75);
        assert!(request.draw);
        assert!(request.detector.is_none());

        let response = handler.match_features(first.session_id, request).unwrap();
        assert_eq!(response.statistics.total_matches, response.matches.len());
        assert_eq!(response.statistics.keypoints_image2, response.keypoints2.len());
        assert!(response.homography.is_some());
        let image = decode_data_url(response.image.as_deref().unwrap()).unwrap();
        assert_eq!((image.shape().width, image.shape().height), (320, 120));

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statistics"]["norm"], "hamming");
        assert_eq!(value["statistics"]["matching_method"], "orb");
    }

    #[test]
    fn test_match_request_reports_missing_session() {
        let (handler, id) = handler();
        let request = MatchRequest {
            other_session_id: Uuid::new_v4(),
            source: ImageSource::Current,
            detector: None,
            ratio_threshold: 0.75,
            ransac_threshold: None,
            draw: false,
        };
        let err = handler.match_features(id, request).unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::NotFound(_))));
    }

    #[test]
    fn test_unknown_session() {
        let (handler, _) = handler();
        let request = BatchRequest {
            family: Family::Filter,
            tasks: vec![],
            compare: false,
            source: ImageSource::Original,
        };
        let err = handler.batch(Uuid::new_v4(), request).unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::NotFound(_))));
    }

    #[test]
    fn test_task_response_serialization() {
        let response = TaskResponse::failure("timed out after 5ms", None);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, serde_json::json!({"success": false, "error": "timed out after 5ms"}));
    }
}
