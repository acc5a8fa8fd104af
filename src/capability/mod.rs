//! The vision capability interface.
//!
//! The engine never implements image algorithms itself. Every operation is
//! delegated to a [`VisionCapability`], which the engine treats as an
//! opaque, already-correct set of functions. Capabilities:
//! - receive the input image by shared reference and never mutate it
//! - hold no per-image state between calls
//! - may be called from many worker threads at once

use crate::core::error::CapabilityError;
use crate::core::matching::{DescriptorNorm, FeatureMatch, Homography};
use crate::core::operation::{ColorAdjustment, FeatureOp, FilterOp, GeometricOp, Operation, TransformOp};
use crate::core::task::{DescriptorMatrix, FeatureRecord, Keypoint, TaskPayload};
use crate::core::types::ImageValue;
use image::DynamicImage;

/// Result type alias for capability calls.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Opaque vision primitives, one method per operation family.
///
/// Implementations must be thread-safe: a single instance is shared by every
/// worker of the engine's pool.
pub trait VisionCapability: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "capability"
    }

    /// Detect keypoints and/or compute descriptors.
    fn extract_features(&self, image: &DynamicImage, op: &FeatureOp) -> CapabilityResult<FeatureRecord>;

    /// Produce a filtered copy of the image.
    fn apply_filter(&self, image: &DynamicImage, op: &FilterOp) -> CapabilityResult<DynamicImage>;

    /// Produce a geometrically transformed copy of the image.
    fn warp(&self, image: &DynamicImage, op: &GeometricOp) -> CapabilityResult<DynamicImage>;

    /// Add to, overwrite or scale one or all color channels.
    fn adjust_color_channel(
        &self,
        image: &DynamicImage,
        adjustment: &ColorAdjustment,
    ) -> CapabilityResult<DynamicImage>;

    /// Pair each `query` row with its nearest `train` row, keeping pairs
    /// that pass the ratio test.
    fn match_descriptors(
        &self,
        query: &DescriptorMatrix,
        train: &DescriptorMatrix,
        norm: DescriptorNorm,
        ratio: f32,
    ) -> CapabilityResult<Vec<FeatureMatch>>;

    /// Robustly estimate the homography taking `src` onto `dst`.
    fn find_homography(
        &self,
        src: &[(f32, f32)],
        dst: &[(f32, f32)],
        ransac_threshold: f32,
    ) -> CapabilityResult<Homography>;

    /// Visualise matches between two images.
    fn draw_matches(
        &self,
        first: &DynamicImage,
        second: &DynamicImage,
        keypoints: (&[Keypoint], &[Keypoint]),
        matches: &[FeatureMatch],
    ) -> CapabilityResult<DynamicImage>;
}

/// Run one typed operation through a capability.
pub fn apply(
    capability: &dyn VisionCapability,
    image: &DynamicImage,
    operation: &Operation,
) -> CapabilityResult<TaskPayload> {
    match operation {
        Operation::Feature(op) => capability
            .extract_features(image, op)
            .map(TaskPayload::Features),
        Operation::Filter(op) => capability
            .apply_filter(image, op)
            .map(|out| TaskPayload::Image(ImageValue::new(out))),
        Operation::Transform(TransformOp::Geometric(op)) => capability
            .warp(image, op)
            .map(|out| TaskPayload::Image(ImageValue::new(out))),
        Operation::Transform(TransformOp::ColorAdjustment(adjustment)) => capability
            .adjust_color_channel(image, adjustment)
            .map(|out| TaskPayload::Image(ImageValue::new(out))),
    }
}

/// Run an image-producing operation, returning the image directly.
///
/// Feature operations have no next image and are rejected.
pub fn apply_image_op(
    capability: &dyn VisionCapability,
    image: &DynamicImage,
    operation: &Operation,
) -> CapabilityResult<DynamicImage> {
    match operation {
        Operation::Feature(op) => Err(CapabilityError::InvalidInput(format!(
            "{} does not produce an image",
            op.kind()
        ))),
        Operation::Filter(op) => capability.apply_filter(image, op),
        Operation::Transform(TransformOp::Geometric(op)) => capability.warp(image, op),
        Operation::Transform(TransformOp::ColorAdjustment(adjustment)) => {
            capability.adjust_color_channel(image, adjustment)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted capability for executor tests.

    use super::*;
    use crate::vision::BuiltinCapability;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// What a scripted call should do.
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Succeed; features report this many keypoints.
        Ok(usize),
        /// Return a capability error.
        Fail(String),
        /// Panic inside the capability.
        Panic,
        /// Sleep, then succeed.
        Sleep(Duration, usize),
    }

    /// Capability whose behaviour is keyed by a float parameter value.
    ///
    /// Filter calls use `gaussian_blur` sigma, feature calls use
    /// `fast_corners` threshold, so tests can address individual tasks.
    /// Image-producing calls return a copy of the input.
    #[derive(Default)]
    pub struct ScriptedCapability {
        scripts: Mutex<HashMap<u64, Script>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedCapability {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, key: u64, script: Script) -> Self {
            self.scripts.lock().insert(key, script);
            self
        }

        fn run(&self, key: u64, label: String) -> CapabilityResult<usize> {
            self.calls.lock().push(label);
            let script = self.scripts.lock().get(&key).cloned().unwrap_or(Script::Ok(1));
            match script {
                Script::Ok(n) => Ok(n),
                Script::Fail(msg) => Err(CapabilityError::Processing(msg)),
                Script::Panic => panic!("scripted panic for key {}", key),
                Script::Sleep(d, n) => {
                    std::thread::sleep(d);
                    Ok(n)
                }
            }
        }
    }

    impl VisionCapability for ScriptedCapability {
        fn name(&self) -> &str {
            "scripted"
        }

        fn extract_features(&self, _image: &DynamicImage, op: &FeatureOp) -> CapabilityResult<FeatureRecord> {
            let key = match op {
                FeatureOp::FastCorners { threshold, .. } => *threshold as u64,
                _ => 0,
            };
            let n = self.run(key, op.kind().to_string())?;
            Ok(FeatureRecord {
                keypoints: (0..n).map(|i| Keypoint::new(i as f32, 0.0, 3.0, 1.0)).collect(),
                ..FeatureRecord::default()
            })
        }

        fn apply_filter(&self, image: &DynamicImage, op: &FilterOp) -> CapabilityResult<DynamicImage> {
            let key = match op {
                FilterOp::GaussianBlur { sigma } => *sigma as u64,
                _ => 0,
            };
            self.run(key, op.kind().to_string())?;
            Ok(image.clone())
        }

        fn warp(&self, image: &DynamicImage, op: &GeometricOp) -> CapabilityResult<DynamicImage> {
            self.run(0, op.kind().to_string())?;
            Ok(image.clone())
        }

        fn adjust_color_channel(
            &self,
            image: &DynamicImage,
            adjustment: &ColorAdjustment,
        ) -> CapabilityResult<DynamicImage> {
            self.run(0, adjustment.kind().to_string())?;
            Ok(image.clone())
        }

        fn match_descriptors(
            &self,
            query: &DescriptorMatrix,
            train: &DescriptorMatrix,
            norm: DescriptorNorm,
            ratio: f32,
        ) -> CapabilityResult<Vec<FeatureMatch>> {
            self.calls.lock().push("match_descriptors".to_string());
            BuiltinCapability.match_descriptors(query, train, norm, ratio)
        }

        fn find_homography(
            &self,
            src: &[(f32, f32)],
            dst: &[(f32, f32)],
            ransac_threshold: f32,
        ) -> CapabilityResult<Homography> {
            self.calls.lock().push("find_homography".to_string());
            BuiltinCapability.find_homography(src, dst, ransac_threshold)
        }

        fn draw_matches(
            &self,
            first: &DynamicImage,
            _second: &DynamicImage,
            _keypoints: (&[Keypoint], &[Keypoint]),
            _matches: &[FeatureMatch],
        ) -> CapabilityResult<DynamicImage> {
            Ok(first.clone())
        }
    }
}
