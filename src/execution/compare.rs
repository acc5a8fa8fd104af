//! Result comparison.
//!
//! Pure summaries over a [`BatchOutcome`]. Failed tasks are reported, never
//! raised; summaries are recomputed on every call.

use crate::core::task::{BatchOutcome, TaskResult};
use crate::core::types::{ImageShape, ImageValue};
use image::{ColorType, DynamicImage};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-task feature statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStats {
    /// 0 for failed tasks and tasks with no keypoints.
    pub num_keypoints: usize,
    /// `(rows, cols)` of the descriptor matrix, if one was produced.
    pub descriptor_shape: Option<(usize, usize)>,
    /// Whether the task succeeded.
    pub success: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate over every task of a feature batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSummary {
    /// Most keypoints of any task.
    pub max_keypoints: usize,
    /// Fewest keypoints of any task.
    pub min_keypoints: usize,
    /// Mean over every task, failed ones counting 0.
    pub avg_keypoints: f64,
    /// Task with the most keypoints. Ties go to the lexicographically
    /// smallest task id.
    pub best_method: String,
}

/// Comparison of a feature batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureComparison {
    /// Statistics per task id.
    pub methods: BTreeMap<String, FeatureStats>,
    /// Tasks in the batch.
    pub total_methods: usize,
    /// Successful tasks.
    pub succeeded: usize,
    /// Failed tasks.
    pub failed: usize,
    /// Absent when the batch is empty or every task failed.
    pub summary: Option<FeatureSummary>,
}

/// Compare the tasks of a feature batch.
///
/// Failed tasks count as zero keypoints in the min/avg/max figures.
pub fn compare_features(outcome: &BatchOutcome) -> FeatureComparison {
    let mut methods = BTreeMap::new();
    for (task_id, result) in outcome.iter() {
        let stats = match result {
            TaskResult::Success(payload) => {
                let record = payload.features();
                FeatureStats {
                    num_keypoints: record.map(|r| r.keypoints.len()).unwrap_or(0),
                    descriptor_shape: record.and_then(|r| r.descriptors.as_ref()).map(|d| d.shape()),
                    success: true,
                    error: None,
                }
            }
            TaskResult::Failure(message) => FeatureStats {
                num_keypoints: 0,
                descriptor_shape: None,
                success: false,
                error: Some(message.clone()),
            },
        };
        methods.insert(task_id.to_string(), stats);
    }

    let succeeded = outcome.success_count();
    let summary = (succeeded > 0).then(|| summarize(&methods));
    FeatureComparison {
        total_methods: methods.len(),
        succeeded,
        failed: outcome.failure_count(),
        methods,
        summary,
    }
}

fn summarize(methods: &BTreeMap<String, FeatureStats>) -> FeatureSummary {
    let mut best: Option<(&str, usize)> = None;
    let mut min = usize::MAX;
    let mut sum = 0usize;
    // Key order is lexicographic; strict `>` keeps the first of equal maxima.
    for (task_id, stats) in methods {
        let n = stats.num_keypoints;
        if best.map_or(true, |(_, max)| n > max) {
            best = Some((task_id, n));
        }
        min = min.min(n);
        sum += n;
    }
    let (best_method, max) = best.unwrap_or(("", 0));
    FeatureSummary {
        max_keypoints: max,
        min_keypoints: if methods.is_empty() { 0 } else { min },
        avg_keypoints: if methods.is_empty() {
            0.0
        } else {
            sum as f64 / methods.len() as f64
        },
        best_method: best_method.to_string(),
    }
}

/// Per-task statistics of a filtered image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageStats {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel.
    pub channels: u8,
    /// Pixel layout, e.g. `rgb8`.
    pub color_type: String,
    /// Mean over every sample of every channel.
    pub mean_intensity: f64,
    /// Population standard deviation over the same samples.
    pub std_intensity: f64,
}

/// Comparison of a filter batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterComparison {
    /// Statistics per successful task id.
    pub filters: BTreeMap<String, ImageStats>,
    /// Ids of failed tasks.
    pub failed: Vec<String>,
}

/// Compare the tasks of a filter batch.
pub fn compare_filters(outcome: &BatchOutcome) -> FilterComparison {
    let mut filters = BTreeMap::new();
    let mut failed = Vec::new();
    for (task_id, result) in outcome.iter() {
        match result.payload().and_then(|p| p.image()) {
            Some(image) => {
                filters.insert(task_id.to_string(), image_stats(image));
            }
            None => failed.push(task_id.to_string()),
        }
    }
    FilterComparison { filters, failed }
}

/// Shape change of a transformed image relative to the base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeChange {
    /// Output width minus base width.
    pub width_delta: i64,
    /// Output height minus base height.
    pub height_delta: i64,
    /// Output area over base area.
    pub area_ratio: f64,
}

/// Per-task statistics of a transformed image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStats {
    /// Output shape.
    pub shape: ImageShape,
    /// Absent when the base shape is unknown.
    pub size_change: Option<SizeChange>,
}

/// Comparison of a transform batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformComparison {
    /// Shape of the image the batch ran on.
    pub base_shape: Option<ImageShape>,
    /// Statistics per successful task id.
    pub transforms: BTreeMap<String, TransformStats>,
    /// Ids of failed tasks.
    pub failed: Vec<String>,
}

/// Compare the tasks of a transform batch against the base image shape.
///
/// `base_shape` defaults to the shape recorded in the outcome.
pub fn compare_transforms(outcome: &BatchOutcome, base_shape: Option<ImageShape>) -> TransformComparison {
    let base_shape = base_shape.or_else(|| outcome.base_shape());
    let mut transforms = BTreeMap::new();
    let mut failed = Vec::new();
    for (task_id, result) in outcome.iter() {
        match result.payload().and_then(|p| p.image()) {
            Some(image) => {
                let shape = image.shape();
                let size_change = base_shape.map(|base| SizeChange {
                    width_delta: shape.width as i64 - base.width as i64,
                    height_delta: shape.height as i64 - base.height as i64,
                    area_ratio: area(shape) / area(base).max(1.0),
                });
                transforms.insert(task_id.to_string(), TransformStats { shape, size_change });
            }
            None => failed.push(task_id.to_string()),
        }
    }
    TransformComparison {
        base_shape,
        transforms,
        failed,
    }
}

fn area(shape: ImageShape) -> f64 {
    shape.width as f64 * shape.height as f64
}

/// Shape and intensity statistics of an image.
pub fn image_stats(image: &ImageValue) -> ImageStats {
    let shape = image.shape();
    let (mean, std) = match image.image() {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => mean_std(image.image().as_bytes()),
        other => mean_std(other.to_rgba8().as_raw()),
    };
    ImageStats {
        width: shape.width,
        height: shape.height,
        channels: shape.channels,
        color_type: color_name(image.color_type()).to_string(),
        mean_intensity: mean,
        std_intensity: std,
    }
}

fn mean_std(samples: &[u8]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = samples.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn color_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "gray8",
        ColorType::La8 => "gray_alpha8",
        ColorType::Rgb8 => "rgb8",
        ColorType::Rgba8 => "rgba8",
        ColorType::L16 => "gray16",
        ColorType::La16 => "gray_alpha16",
        ColorType::Rgb16 => "rgb16",
        ColorType::Rgba16 => "rgba16",
        ColorType::Rgb32F => "rgb32f",
        ColorType::Rgba32F => "rgba32f",
        _ => "other",
    }
}
