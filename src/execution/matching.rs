//! Feature matching between two images.
//!
//! Both images go through the same feature detector concurrently on the
//! engine's pool; the descriptor sets are then matched with a ratio test,
//! and optionally a homography is estimated from the surviving pairs.
//! Unlike batches, a matching run has one result, so any failure is
//! returned as an error.

use crate::core::error::{EngineError, EngineResult, MatchError, ValidationError};
use crate::core::matching::{DescriptorNorm, FeatureMatch, Homography, MatchStatistics};
use crate::core::operation::{FeatureOp, Operation};
use crate::core::task::{DescriptorMatrix, Family, FeatureRecord, Keypoint, TaskDescriptor};
use crate::core::types::ImageValue;
use crate::execution::batch;
use crate::execution::engine::Engine;
use log::{debug, info};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

const MATCH_TASK: &str = "match";

/// Fewest correspondences a homography can be estimated from.
pub const MIN_HOMOGRAPHY_MATCHES: usize = 4;

/// How to match two images.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Feature-family task run on both images. It must produce descriptors.
    pub detector: TaskDescriptor,
    /// Keep a match when its distance is below this fraction of the
    /// runner-up's.
    pub ratio_threshold: f32,
    /// Estimate a homography with this reprojection threshold in pixels.
    pub ransac_threshold: Option<f32>,
    /// Render the matches side by side.
    pub draw: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            detector: TaskDescriptor::feature("orb").with_param("n_features", 1000),
            ratio_threshold: 0.75,
            ransac_threshold: None,
            draw: true,
        }
    }
}

impl MatchOptions {
    /// ORB with 1000 features, ratio 0.75, no homography, drawing on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different detector.
    pub fn with_detector(mut self, detector: TaskDescriptor) -> Self {
        self.detector = detector;
        self
    }

    /// Set the ratio-test threshold.
    pub fn with_ratio_threshold(mut self, ratio: f32) -> Self {
        self.ratio_threshold = ratio;
        self
    }

    /// Also estimate a homography.
    pub fn with_homography(mut self, ransac_threshold: f32) -> Self {
        self.ransac_threshold = Some(ransac_threshold);
        self
    }

    /// Skip the visualisation.
    pub fn without_drawing(mut self) -> Self {
        self.draw = false;
        self
    }
}

/// Result of matching two images.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Keypoints of the first image; `FeatureMatch::query` indexes these.
    pub first_keypoints: Vec<Keypoint>,
    /// Keypoints of the second image; `FeatureMatch::train` indexes these.
    pub second_keypoints: Vec<Keypoint>,
    /// Accepted matches, closest first.
    pub matches: Vec<FeatureMatch>,
    /// Summary of `matches`.
    pub statistics: MatchStatistics,
    /// Set when a RANSAC threshold was requested.
    pub homography: Option<Homography>,
    /// Side-by-side rendering, when drawing was requested.
    pub image: Option<ImageValue>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

fn invalid(parameter: &str, error: String) -> EngineError {
    ValidationError::InvalidParameter {
        task_id: MATCH_TASK.to_string(),
        parameter: parameter.to_string(),
        error,
    }
    .into()
}

fn check_ransac(threshold: f32) -> EngineResult<()> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(invalid("ransac_threshold", format!("Value {} must be greater than 0", threshold)))
    }
}

/// Descriptors whose rows line up with the keypoints, or `NoFeatures`.
fn descriptors(record: &FeatureRecord, image: usize) -> Result<&DescriptorMatrix, MatchError> {
    record
        .descriptors
        .as_ref()
        .filter(|d| d.rows > 0 && d.rows == record.keypoints.len())
        .ok_or(MatchError::NoFeatures { image })
}

impl Engine {
    /// Detect features on both images and match them.
    pub fn match_images(
        &self,
        first: &ImageValue,
        second: &ImageValue,
        options: &MatchOptions,
    ) -> EngineResult<MatchOutcome> {
        let started = Instant::now();
        let ratio = options.ratio_threshold;
        if !(ratio.is_finite() && ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid("ratio_threshold", format!("Value {} is out of range (0, 1]", ratio)));
        }
        if let Some(threshold) = options.ransac_threshold {
            check_ransac(threshold)?;
        }
        let detector = options.detector.clone().with_id(MATCH_TASK);
        let prepared = batch::prepare(std::slice::from_ref(&detector), Some(Family::Feature), false)?;
        let op = match prepared.into_iter().next().map(|task| task.operation) {
            Some(Operation::Feature(op)) => op,
            _ => return Err(EngineError::Other("detector did not resolve to a feature operation".to_string())),
        };

        let capability = self.capability();
        let detect = |image: usize, value: &ImageValue| -> Result<FeatureRecord, MatchError> {
            match catch_unwind(AssertUnwindSafe(|| capability.extract_features(value.image(), &op))) {
                Ok(Ok(record)) => Ok(record),
                Ok(Err(e)) => Err(MatchError::Detection {
                    image,
                    message: e.to_string(),
                }),
                Err(panic) => Err(MatchError::Detection {
                    image,
                    message: format!("panicked: {}", batch::panic_message(panic.as_ref())),
                }),
            }
        };
        let (a, b) = self.pool().join(|| detect(1, first), || detect(2, second));
        let (a, b) = (a?, b?);
        debug!("Detected {} and {} keypoints with {}", a.keypoints.len(), b.keypoints.len(), op.kind());

        let norm = match op {
            FeatureOp::Orb { .. } => DescriptorNorm::Hamming,
            _ => DescriptorNorm::L2,
        };
        let matches = capability
            .match_descriptors(descriptors(&a, 1)?, descriptors(&b, 2)?, norm, ratio)
            .map_err(MatchError::from)?;
        let statistics = MatchStatistics::compute(&matches, op.kind(), norm, (a.keypoints.len(), b.keypoints.len()))
            .ok_or(MatchError::NoGoodMatches)?;

        let mut outcome = MatchOutcome {
            first_keypoints: a.keypoints,
            second_keypoints: b.keypoints,
            matches,
            statistics,
            homography: None,
            image: None,
            elapsed: Duration::ZERO,
        };
        if let Some(threshold) = options.ransac_threshold {
            outcome.homography = Some(self.estimate_homography(&outcome, threshold)?);
        }
        if options.draw {
            let drawn = capability
                .draw_matches(
                    first.image(),
                    second.image(),
                    (&outcome.first_keypoints, &outcome.second_keypoints),
                    &outcome.matches,
                )
                .map_err(MatchError::from)?;
            outcome.image = Some(ImageValue::new(drawn));
        }
        outcome.elapsed = started.elapsed();
        info!(
            "Matched {} pair(s) with {} in {:?}",
            outcome.matches.len(),
            op.kind(),
            outcome.elapsed
        );
        Ok(outcome)
    }

    /// Estimate the homography taking the first image of `outcome` onto
    /// the second from its matched keypoints.
    pub fn estimate_homography(&self, outcome: &MatchOutcome, ransac_threshold: f32) -> EngineResult<Homography> {
        check_ransac(ransac_threshold)?;
        let (src, dst): (Vec<_>, Vec<_>) = outcome
            .matches
            .iter()
            .filter_map(|m| {
                let q = outcome.first_keypoints.get(m.query)?;
                let t = outcome.second_keypoints.get(m.train)?;
                Some(((q.x, q.y), (t.x, t.y)))
            })
            .unzip();
        if src.len() < MIN_HOMOGRAPHY_MATCHES {
            return Err(MatchError::TooFewMatches {
                found: src.len(),
                needed: MIN_HOMOGRAPHY_MATCHES,
            }
            .into());
        }
        let homography = self
            .capability()
            .find_homography(&src, &dst, ransac_threshold)
            .map_err(MatchError::from)?;
        info!("Homography fitted with {}/{} inlier(s)", homography.inliers, src.len());
        Ok(homography)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{Script, ScriptedCapability};
    use crate::core::config::EngineConfig;
    use crate::vision::fixtures::block_texture;
    use image::GenericImageView;
    use std::sync::Arc;

    fn blocks(width: u32, height: u32, dx: u32, dy: u32) -> ImageValue {
        ImageValue::new(block_texture(width, height, (dx, dy)))
    }

    fn scripted(cap: ScriptedCapability) -> Engine {
        Engine::new(Arc::new(cap), EngineConfig::new().with_max_workers(2)).unwrap()
    }

    #[test]
    fn test_translated_views_match() {
        let engine = Engine::builtin(EngineConfig::new().with_max_workers(2)).unwrap();
        let first = blocks(160, 120, 0, 0);
        let second = blocks(160, 120, 7, 5);
        let outcome = engine
            .match_images(&first, &second, &MatchOptions::new().with_homography(2.0))
            .unwrap();

        assert!(outcome.matches.len() >= 8);
        assert_eq!(outcome.statistics.total_matches, outcome.matches.len());
        assert_eq!(outcome.statistics.matching_method, "orb");
        assert_eq!(outcome.statistics.norm, DescriptorNorm::Hamming);
        assert_eq!(outcome.statistics.keypoints_image1, outcome.first_keypoints.len());
        assert!(outcome
            .matches
            .windows(2)
            .all(|w| w[0].distance <= w[1].distance));

        let exact = outcome
            .matches
            .iter()
            .filter(|m| {
                let (q, t) = (&outcome.first_keypoints[m.query], &outcome.second_keypoints[m.train]);
                (q.x - t.x - 7.0).abs() < 0.5 && (q.y - t.y - 5.0).abs() < 0.5
            })
            .count();
        assert!(exact * 2 >= outcome.matches.len());

        let homography = outcome.homography.as_ref().unwrap();
        assert!(homography.inliers >= exact.min(4));
        let (x, y) = homography.map(80.0, 60.0).unwrap();
        assert!((x - 73.0).abs() < 1.0 && (y - 55.0).abs() < 1.0);

        assert_eq!(outcome.image.as_ref().unwrap().image().dimensions(), (320, 120));
    }

    #[test]
    fn test_homography_needs_four_matches() {
        let engine = scripted(ScriptedCapability::new());
        let outcome = MatchOutcome {
            first_keypoints: vec![Keypoint::new(1.0, 1.0, 3.0, 1.0); 3],
            second_keypoints: vec![Keypoint::new(2.0, 2.0, 3.0, 1.0); 3],
            matches: (0..3)
                .map(|i| FeatureMatch {
                    query: i,
                    train: i,
                    distance: 0.0,
                })
                .collect(),
            statistics: MatchStatistics::compute(
                &[FeatureMatch {
                    query: 0,
                    train: 0,
                    distance: 0.0,
                }],
                "orb",
                DescriptorNorm::Hamming,
                (3, 3),
            )
            .unwrap(),
            homography: None,
            image: None,
            elapsed: Duration::ZERO,
        };
        let err = engine.estimate_homography(&outcome, 3.0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Match(MatchError::TooFewMatches { found: 3, needed: 4 })
        ));

        let err = engine.estimate_homography(&outcome, 0.0).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_detector_without_descriptors() {
        let engine = scripted(ScriptedCapability::new());
        let image = blocks(32, 32, 0, 0);
        let options = MatchOptions::new().with_detector(TaskDescriptor::feature("fast_corners"));
        let err = engine.match_images(&image, &image, &options).unwrap_err();
        assert!(matches!(err, EngineError::Match(MatchError::NoFeatures { image: 1 })));
    }

    #[test]
    fn test_detector_panic_is_reported() {
        let engine = scripted(ScriptedCapability::new().on(40, Script::Panic));
        let image = blocks(32, 32, 0, 0);
        let detector = TaskDescriptor::feature("fast_corners").with_param("threshold", 40);
        let err = engine
            .match_images(&image, &image, &MatchOptions::new().with_detector(detector))
            .unwrap_err();
        match err {
            EngineError::Match(MatchError::Detection { image, message }) => {
                assert_eq!(image, 1);
                assert!(message.starts_with("panicked"));
            }
            other => panic!("unexpected error: {}", other),
        }

        // The pool is still usable.
        let again = engine
            .run_batch(&image, Family::Feature, &[TaskDescriptor::feature("fast_corners")])
            .unwrap();
        assert_eq!(again.success_count(), 1);
    }

    #[test]
    fn test_options_are_validated_first() {
        let cap = Arc::new(ScriptedCapability::new());
        let engine = Engine::new(cap.clone(), EngineConfig::default()).unwrap();
        let image = blocks(16, 16, 0, 0);

        let err = engine
            .match_images(&image, &image, &MatchOptions::new().with_ratio_threshold(1.5))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ref r) if matches!(
                r.errors[0],
                ValidationError::InvalidParameter { ref parameter, .. } if parameter == "ratio_threshold"
            )
        ));

        let err = engine
            .match_images(
                &image,
                &image,
                &MatchOptions::new().with_detector(TaskDescriptor::filter("sobel")),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(cap.calls.lock().is_empty());
    }
}
