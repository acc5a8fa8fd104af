//! Typed operation catalog.
//!
//! Operation kinds arrive as strings on task descriptors. They are parsed
//! once, during validation, into the closed enums below; executors and
//! capabilities only ever see the typed form and match on it exhaustively.

use crate::core::error::{ValidationError, ValidationResult};
use crate::core::param::{Constraint, ParamKind, ParamReader, ParamSpec};
use crate::core::task::{Family, TaskDescriptor};
use serde::Serialize;

/// Catalog entry for one operation kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OperationSpec {
    /// Kind string used in task descriptors
    pub kind: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Declared parameters
    pub params: &'static [ParamSpec],
}

// ============================================================================
// Feature family
// ============================================================================

const FAST_THRESHOLD: ParamSpec = ParamSpec::integer(
    "threshold",
    10,
    Constraint::Range { min: 1.0, max: 255.0 },
    "Intensity difference for a pixel to count as brighter/darker",
);
const MAX_KEYPOINTS: ParamSpec = ParamSpec::optional(
    "max_keypoints",
    ParamKind::Integer,
    Constraint::Range { min: 1.0, max: 100_000.0 },
    "Keep only the strongest N keypoints",
);
const ORB_FEATURES: ParamSpec = ParamSpec::integer(
    "n_features",
    500,
    Constraint::Range { min: 1.0, max: 10_000.0 },
    "Maximum number of keypoints to retain",
);
const ORB_FAST_THRESHOLD: ParamSpec = ParamSpec::integer(
    "fast_threshold",
    20,
    Constraint::Range { min: 1.0, max: 255.0 },
    "FAST threshold used for detection",
);
const ORB_PATCH_SIZE: ParamSpec = ParamSpec::integer(
    "patch_size",
    31,
    Constraint::Range { min: 7.0, max: 63.0 },
    "Side of the square patch sampled for each descriptor",
);
const HOG_ORIENTATIONS: ParamSpec = ParamSpec::integer(
    "orientations",
    9,
    Constraint::Range { min: 2.0, max: 36.0 },
    "Number of orientation bins",
);
const HOG_CELL_SIDE: ParamSpec = ParamSpec::integer(
    "cell_side",
    8,
    Constraint::Range { min: 2.0, max: 64.0 },
    "Cell side in pixels",
);
const HOG_BLOCK_SIDE: ParamSpec = ParamSpec::integer(
    "block_side",
    2,
    Constraint::Range { min: 1.0, max: 8.0 },
    "Block side in cells",
);
const HOG_BLOCK_STRIDE: ParamSpec = ParamSpec::integer(
    "block_stride",
    1,
    Constraint::Range { min: 1.0, max: 8.0 },
    "Block stride in cells",
);
const HOG_SIGNED: ParamSpec = ParamSpec::boolean("signed", false, "Use signed gradients");
const BLOB_SIGMA: ParamSpec = ParamSpec::float(
    "sigma",
    1.6,
    Constraint::Range { min: 0.3, max: 20.0 },
    "Sigma of the finer Gaussian",
);
const BLOB_K: ParamSpec = ParamSpec::float(
    "k",
    1.6,
    Constraint::Range { min: 1.05, max: 4.0 },
    "Ratio between the coarser and finer sigma",
);
const BLOB_THRESHOLD: ParamSpec = ParamSpec::integer(
    "threshold",
    10,
    Constraint::Range { min: 1.0, max: 255.0 },
    "Minimum difference-of-Gaussians response",
);
const BLOB_MIN_DISTANCE: ParamSpec = ParamSpec::integer(
    "min_distance",
    3,
    Constraint::Range { min: 1.0, max: 50.0 },
    "Non-maximum suppression radius",
);

const FEATURE_CATALOG: &[OperationSpec] = &[
    OperationSpec {
        kind: "fast_corners",
        description: "FAST-9 corner detection",
        params: &[FAST_THRESHOLD, MAX_KEYPOINTS],
    },
    OperationSpec {
        kind: "orb",
        description: "FAST keypoints with binary patch descriptors",
        params: &[ORB_FEATURES, ORB_FAST_THRESHOLD, ORB_PATCH_SIZE],
    },
    OperationSpec {
        kind: "hog",
        description: "Histogram of oriented gradients over the whole image",
        params: &[HOG_ORIENTATIONS, HOG_CELL_SIDE, HOG_BLOCK_SIDE, HOG_BLOCK_STRIDE, HOG_SIGNED],
    },
    OperationSpec {
        kind: "log_dog_blob",
        description: "Difference-of-Gaussians blob detection",
        params: &[BLOB_SIGMA, BLOB_K, BLOB_THRESHOLD, BLOB_MIN_DISTANCE],
    },
];

/// A feature-family operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOp {
    /// FAST-9 corners.
    FastCorners {
        /// Intensity difference for a circle pixel to count.
        threshold: u8,
        /// Keep only the strongest corners.
        max_keypoints: Option<usize>,
    },
    /// Oriented FAST keypoints with rotated BRIEF descriptors.
    Orb {
        /// Keypoints to keep.
        n_features: usize,
        /// FAST threshold used for detection.
        fast_threshold: u8,
        /// Side of the descriptor patch.
        patch_size: u32,
    },
    /// Histogram of oriented gradients; one descriptor row, no keypoints.
    Hog {
        /// Gradient orientation bins.
        orientations: usize,
        /// Cell side in pixels.
        cell_side: usize,
        /// Block side in cells.
        block_side: usize,
        /// Block stride in cells.
        block_stride: usize,
        /// Use the full 360 degree range.
        signed: bool,
    },
    /// Difference-of-Gaussians blobs.
    LogDogBlob {
        /// Sigma of the finer Gaussian.
        sigma: f32,
        /// Ratio between the two sigmas.
        k: f32,
        /// Minimum response.
        threshold: u8,
        /// Minimum spacing between blobs.
        min_distance: u32,
    },
}

impl FeatureOp {
    /// Kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            FeatureOp::FastCorners { .. } => "fast_corners",
            FeatureOp::Orb { .. } => "orb",
            FeatureOp::Hog { .. } => "hog",
            FeatureOp::LogDogBlob { .. } => "log_dog_blob",
        }
    }

    fn parse(kind: &str, r: &ParamReader<'_>) -> ValidationResult<Option<Self>> {
        let op = match kind {
            "fast_corners" => FeatureOp::FastCorners {
                threshold: r.integer(&FAST_THRESHOLD)? as u8,
                max_keypoints: r.opt_integer(&MAX_KEYPOINTS)?.map(|n| n as usize),
            },
            "orb" => FeatureOp::Orb {
                n_features: r.integer(&ORB_FEATURES)? as usize,
                fast_threshold: r.integer(&ORB_FAST_THRESHOLD)? as u8,
                patch_size: r.integer(&ORB_PATCH_SIZE)? as u32,
            },
            "hog" => FeatureOp::Hog {
                orientations: r.integer(&HOG_ORIENTATIONS)? as usize,
                cell_side: r.integer(&HOG_CELL_SIDE)? as usize,
                block_side: r.integer(&HOG_BLOCK_SIDE)? as usize,
                block_stride: r.integer(&HOG_BLOCK_STRIDE)? as usize,
                signed: r.boolean(&HOG_SIGNED)?,
            },
            "log_dog_blob" => FeatureOp::LogDogBlob {
                sigma: r.float(&BLOB_SIGMA)? as f32,
                k: r.float(&BLOB_K)? as f32,
                threshold: r.integer(&BLOB_THRESHOLD)? as u8,
                min_distance: r.integer(&BLOB_MIN_DISTANCE)? as u32,
            },
            _ => return Ok(None),
        };
        Ok(Some(op))
    }
}

// ============================================================================
// Filter family
// ============================================================================

const GAUSSIAN_SIGMA: ParamSpec = ParamSpec::float(
    "sigma",
    1.0,
    Constraint::Range { min: 0.1, max: 100.0 },
    "Blur intensity (standard deviation)",
);
const MEDIAN_RADIUS: ParamSpec = ParamSpec::integer(
    "radius",
    2,
    Constraint::Range { min: 1.0, max: 25.0 },
    "Neighbourhood radius",
);
const BOX_RADIUS_X: ParamSpec = ParamSpec::integer(
    "radius_x",
    3,
    Constraint::Range { min: 1.0, max: 50.0 },
    "Horizontal blur radius",
);
const BOX_RADIUS_Y: ParamSpec = ParamSpec::integer(
    "radius_y",
    3,
    Constraint::Range { min: 1.0, max: 50.0 },
    "Vertical blur radius",
);
const CANNY_LOW: ParamSpec = ParamSpec::float(
    "low_threshold",
    100.0,
    Constraint::Range { min: 0.0, max: 2000.0 },
    "Lower hysteresis threshold",
);
const CANNY_HIGH: ParamSpec = ParamSpec::float(
    "high_threshold",
    200.0,
    Constraint::Range { min: 0.0, max: 2000.0 },
    "Upper hysteresis threshold",
);
const GAMMA: ParamSpec = ParamSpec::float(
    "gamma",
    1.0,
    Constraint::Range { min: 0.1, max: 10.0 },
    "Gamma exponent (values above 1 brighten)",
);
const THRESHOLD_VALUE: ParamSpec = ParamSpec::integer(
    "threshold",
    127,
    Constraint::Range { min: 0.0, max: 255.0 },
    "Cut-off intensity",
);
const THRESHOLD_MAX: ParamSpec = ParamSpec::integer(
    "max_value",
    255,
    Constraint::Range { min: 0.0, max: 255.0 },
    "Value assigned to pixels above the cut-off",
);
const THRESHOLD_INVERSE: ParamSpec = ParamSpec::boolean("inverse", false, "Swap foreground and background");

const FILTER_CATALOG: &[OperationSpec] = &[
    OperationSpec {
        kind: "gaussian_blur",
        description: "Gaussian blur",
        params: &[GAUSSIAN_SIGMA],
    },
    OperationSpec {
        kind: "median_blur",
        description: "Median filter",
        params: &[MEDIAN_RADIUS],
    },
    OperationSpec {
        kind: "box_blur",
        description: "Separable box blur",
        params: &[BOX_RADIUS_X, BOX_RADIUS_Y],
    },
    OperationSpec {
        kind: "sobel",
        description: "Sobel gradient magnitude",
        params: &[],
    },
    OperationSpec {
        kind: "canny",
        description: "Canny edge detection",
        params: &[CANNY_LOW, CANNY_HIGH],
    },
    OperationSpec {
        kind: "laplacian",
        description: "Absolute 4-neighbour Laplacian",
        params: &[],
    },
    OperationSpec {
        kind: "gamma",
        description: "Gamma correction",
        params: &[GAMMA],
    },
    OperationSpec {
        kind: "threshold",
        description: "Binary threshold on luminance",
        params: &[THRESHOLD_VALUE, THRESHOLD_MAX, THRESHOLD_INVERSE],
    },
    OperationSpec {
        kind: "grayscale",
        description: "Convert to single-channel luminance",
        params: &[],
    },
];

/// A filter-family operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Gaussian smoothing.
    GaussianBlur {
        /// Standard deviation in pixels.
        sigma: f32,
    },
    /// Median of a square window.
    MedianBlur {
        /// Window half-width.
        radius: u32,
    },
    /// Mean of a rectangular window.
    BoxBlur {
        /// Horizontal half-width.
        radius_x: u32,
        /// Vertical half-width.
        radius_y: u32,
    },
    /// Gradient magnitude.
    Sobel,
    /// Edge map with hysteresis thresholds.
    Canny {
        /// Weak edge threshold.
        low: f32,
        /// Strong edge threshold.
        high: f32,
    },
    /// Second-derivative response.
    Laplacian,
    /// Power-law intensity curve.
    Gamma {
        /// Exponent.
        gamma: f64,
    },
    /// Binary threshold.
    Threshold {
        /// Cut-off intensity.
        threshold: u8,
        /// Level written for pixels above the cut-off.
        max_value: u8,
        /// Swap the two output levels.
        inverse: bool,
    },
    /// Single-channel luminance.
    Grayscale,
}

impl FilterOp {
    /// Kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterOp::GaussianBlur { .. } => "gaussian_blur",
            FilterOp::MedianBlur { .. } => "median_blur",
            FilterOp::BoxBlur { .. } => "box_blur",
            FilterOp::Sobel => "sobel",
            FilterOp::Canny { .. } => "canny",
            FilterOp::Laplacian => "laplacian",
            FilterOp::Gamma { .. } => "gamma",
            FilterOp::Threshold { .. } => "threshold",
            FilterOp::Grayscale => "grayscale",
        }
    }

    fn parse(kind: &str, r: &ParamReader<'_>, task_id: &str) -> ValidationResult<Option<Self>> {
        let op = match kind {
            "gaussian_blur" => FilterOp::GaussianBlur {
                sigma: r.float(&GAUSSIAN_SIGMA)? as f32,
            },
            "median_blur" => FilterOp::MedianBlur {
                radius: r.integer(&MEDIAN_RADIUS)? as u32,
            },
            "box_blur" => FilterOp::BoxBlur {
                radius_x: r.integer(&BOX_RADIUS_X)? as u32,
                radius_y: r.integer(&BOX_RADIUS_Y)? as u32,
            },
            "sobel" => FilterOp::Sobel,
            "canny" => {
                let low = r.float(&CANNY_LOW)? as f32;
                let high = r.float(&CANNY_HIGH)? as f32;
                if low > high {
                    return Err(ValidationError::InvalidParameter {
                        task_id: task_id.to_string(),
                        parameter: CANNY_LOW.name.to_string(),
                        error: format!("low threshold {} exceeds high threshold {}", low, high),
                    });
                }
                FilterOp::Canny { low, high }
            }
            "laplacian" => FilterOp::Laplacian,
            "gamma" => FilterOp::Gamma {
                gamma: r.float(&GAMMA)?,
            },
            "threshold" => FilterOp::Threshold {
                threshold: r.integer(&THRESHOLD_VALUE)? as u8,
                max_value: r.integer(&THRESHOLD_MAX)? as u8,
                inverse: r.boolean(&THRESHOLD_INVERSE)?,
            },
            "grayscale" => FilterOp::Grayscale,
            _ => return Ok(None),
        };
        Ok(Some(op))
    }
}

// ============================================================================
// Transform family
// ============================================================================

const TRANSLATE_TX: ParamSpec = ParamSpec::required(
    "tx",
    ParamKind::Integer,
    Constraint::Range { min: -100_000.0, max: 100_000.0 },
    "Horizontal shift in pixels",
);
const TRANSLATE_TY: ParamSpec = ParamSpec::required(
    "ty",
    ParamKind::Integer,
    Constraint::Range { min: -100_000.0, max: 100_000.0 },
    "Vertical shift in pixels",
);
const ROTATE_ANGLE: ParamSpec = ParamSpec::required(
    "angle",
    ParamKind::Float,
    Constraint::Range { min: -360.0, max: 360.0 },
    "Counter-clockwise angle in degrees",
);
const ROTATE_SCALE: ParamSpec = ParamSpec::float(
    "scale",
    1.0,
    Constraint::Range { min: 0.01, max: 10.0 },
    "Isotropic scale applied with the rotation",
);
const SCALE_FX: ParamSpec = ParamSpec::required(
    "fx",
    ParamKind::Float,
    Constraint::Range { min: 0.01, max: 10.0 },
    "Horizontal scale factor",
);
const SCALE_FY: ParamSpec = ParamSpec::optional(
    "fy",
    ParamKind::Float,
    Constraint::Range { min: 0.01, max: 10.0 },
    "Vertical scale factor (defaults to fx)",
);
const SHEAR_X: ParamSpec = ParamSpec::float(
    "shx",
    0.0,
    Constraint::Range { min: -5.0, max: 5.0 },
    "Horizontal shear factor",
);
const SHEAR_Y: ParamSpec = ParamSpec::float(
    "shy",
    0.0,
    Constraint::Range { min: -5.0, max: 5.0 },
    "Vertical shear factor",
);
const AFFINE_SRC: ParamSpec =
    ParamSpec::required("src_points", ParamKind::Points, Constraint::PointCount(3), "Three source points");
const AFFINE_DST: ParamSpec = ParamSpec::required(
    "dst_points",
    ParamKind::Points,
    Constraint::PointCount(3),
    "Three destination points",
);
const PERSPECTIVE_SRC: ParamSpec =
    ParamSpec::required("src_points", ParamKind::Points, Constraint::PointCount(4), "Four source points");
const PERSPECTIVE_DST: ParamSpec = ParamSpec::required(
    "dst_points",
    ParamKind::Points,
    Constraint::PointCount(4),
    "Four destination points",
);
const FLIP_CODE: ParamSpec = ParamSpec::integer(
    "flip_code",
    1,
    Constraint::Range { min: -1.0, max: 1.0 },
    "1 horizontal, 0 vertical, -1 both",
);
const CROP_X: ParamSpec = ParamSpec::required(
    "x",
    ParamKind::Integer,
    Constraint::Range { min: 0.0, max: 100_000.0 },
    "Left edge",
);
const CROP_Y: ParamSpec = ParamSpec::required(
    "y",
    ParamKind::Integer,
    Constraint::Range { min: 0.0, max: 100_000.0 },
    "Top edge",
);
const CROP_WIDTH: ParamSpec = ParamSpec::required(
    "width",
    ParamKind::Integer,
    Constraint::Range { min: 1.0, max: 100_000.0 },
    "Crop width",
);
const CROP_HEIGHT: ParamSpec = ParamSpec::required(
    "height",
    ParamKind::Integer,
    Constraint::Range { min: 1.0, max: 100_000.0 },
    "Crop height",
);
const RESIZE_WIDTH: ParamSpec = ParamSpec::required(
    "width",
    ParamKind::Integer,
    Constraint::Range { min: 1.0, max: 16_384.0 },
    "Target width",
);
const RESIZE_HEIGHT: ParamSpec = ParamSpec::required(
    "height",
    ParamKind::Integer,
    Constraint::Range { min: 1.0, max: 16_384.0 },
    "Target height",
);
const COLOR_CHANNEL: ParamSpec = ParamSpec::string(
    "channel",
    "all",
    Constraint::OneOf(&["all", "red", "green", "blue"]),
    "Channel to adjust",
);
const COLOR_VALUE: ParamSpec = ParamSpec::required(
    "value",
    ParamKind::Integer,
    Constraint::Range { min: -255.0, max: 255.0 },
    "Delta added to the channel",
);
const COLOR_SET_VALUE: ParamSpec = ParamSpec::required(
    "value",
    ParamKind::Integer,
    Constraint::Range { min: 0.0, max: 255.0 },
    "Value written to the channel",
);
const COLOR_FACTOR: ParamSpec = ParamSpec::required(
    "factor",
    ParamKind::Float,
    Constraint::GreaterThan(0.0),
    "Positive factor the channel is multiplied by",
);

const TRANSFORM_CATALOG: &[OperationSpec] = &[
    OperationSpec {
        kind: "translation",
        description: "Shift the image, keeping its size",
        params: &[TRANSLATE_TX, TRANSLATE_TY],
    },
    OperationSpec {
        kind: "rotation",
        description: "Rotate about the centre, growing the canvas to fit",
        params: &[ROTATE_ANGLE, ROTATE_SCALE],
    },
    OperationSpec {
        kind: "scaling",
        description: "Scale by per-axis factors",
        params: &[SCALE_FX, SCALE_FY],
    },
    OperationSpec {
        kind: "shear",
        description: "Shear along x and y",
        params: &[SHEAR_X, SHEAR_Y],
    },
    OperationSpec {
        kind: "affine",
        description: "Affine warp from three point correspondences",
        params: &[AFFINE_SRC, AFFINE_DST],
    },
    OperationSpec {
        kind: "perspective",
        description: "Perspective warp from four point correspondences",
        params: &[PERSPECTIVE_SRC, PERSPECTIVE_DST],
    },
    OperationSpec {
        kind: "flip",
        description: "Mirror horizontally, vertically or both",
        params: &[FLIP_CODE],
    },
    OperationSpec {
        kind: "crop",
        description: "Cut a rectangle out of the image",
        params: &[CROP_X, CROP_Y, CROP_WIDTH, CROP_HEIGHT],
    },
    OperationSpec {
        kind: "resize",
        description: "Resize to exact dimensions",
        params: &[RESIZE_WIDTH, RESIZE_HEIGHT],
    },
    OperationSpec {
        kind: "color_adjustment",
        description: "Add a delta to one or all color channels",
        params: &[COLOR_CHANNEL, COLOR_VALUE],
    },
    OperationSpec {
        kind: "set_color_channel",
        description: "Overwrite one or all color channels with a constant",
        params: &[COLOR_CHANNEL, COLOR_SET_VALUE],
    },
    OperationSpec {
        kind: "multiply_color_channel",
        description: "Scale one or all color channels, saturating at 255",
        params: &[COLOR_CHANNEL, COLOR_FACTOR],
    },
];

/// Flip direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipAxis {
    /// Mirror left to right.
    Horizontal,
    /// Mirror top to bottom.
    Vertical,
    /// Both axes, a half turn.
    Both,
}

/// A matrix-style geometric transform.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometricOp {
    /// Shift by whole pixels, keeping the canvas size.
    Translation {
        /// Horizontal shift.
        tx: i32,
        /// Vertical shift.
        ty: i32,
    },
    /// Rotate about the centre, degrees counter-clockwise.
    Rotation {
        /// Angle in degrees.
        angle: f32,
        /// Isotropic scale applied with the rotation.
        scale: f32,
    },
    /// Per-axis scale factors.
    Scaling {
        /// Horizontal factor.
        fx: f32,
        /// Vertical factor.
        fy: f32,
    },
    /// Shear factors.
    Shear {
        /// Horizontal shear.
        shx: f32,
        /// Vertical shear.
        shy: f32,
    },
    /// Affine warp from three correspondences.
    Affine {
        /// Points in the input image.
        src: [(f32, f32); 3],
        /// Where they land in the output.
        dst: [(f32, f32); 3],
    },
    /// Perspective warp from four correspondences.
    Perspective {
        /// Points in the input image.
        src: [(f32, f32); 4],
        /// Where they land in the output.
        dst: [(f32, f32); 4],
    },
    /// Mirror the image.
    Flip(FlipAxis),
    /// Cut out a rectangle that must lie inside the image.
    Crop {
        /// Left edge.
        x: u32,
        /// Top edge.
        y: u32,
        /// Rectangle width.
        width: u32,
        /// Rectangle height.
        height: u32,
    },
    /// Resize to exact dimensions.
    Resize {
        /// Target width.
        width: u32,
        /// Target height.
        height: u32,
    },
}

impl GeometricOp {
    /// Kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            GeometricOp::Translation { .. } => "translation",
            GeometricOp::Rotation { .. } => "rotation",
            GeometricOp::Scaling { .. } => "scaling",
            GeometricOp::Shear { .. } => "shear",
            GeometricOp::Affine { .. } => "affine",
            GeometricOp::Perspective { .. } => "perspective",
            GeometricOp::Flip(_) => "flip",
            GeometricOp::Crop { .. } => "crop",
            GeometricOp::Resize { .. } => "resize",
        }
    }
}

/// Color channel selector. Channels are named, not indexed, so the
/// pixel layout of the image does not leak into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChannel {
    /// Every color channel; alpha is never touched.
    All,
    /// Red only.
    Red,
    /// Green only.
    Green,
    /// Blue only.
    Blue,
}

/// What a color adjustment does to the selected channels. Results
/// saturate to `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorMode {
    /// Add a signed delta.
    Add(i16),
    /// Overwrite with a constant.
    Set(u8),
    /// Multiply by a positive factor.
    Multiply(f32),
}

/// Per-channel color adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAdjustment {
    /// Channels affected.
    pub channel: ColorChannel,
    /// Operation applied to them.
    pub mode: ColorMode,
}

impl ColorAdjustment {
    /// Kind string.
    pub fn kind(&self) -> &'static str {
        match self.mode {
            ColorMode::Add(_) => "color_adjustment",
            ColorMode::Set(_) => "set_color_channel",
            ColorMode::Multiply(_) => "multiply_color_channel",
        }
    }
}

/// A transform-family operation.
///
/// Color adjustments are their own variant: they go through the
/// capability's channel method, not the geometric one.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOp {
    /// Matrix-style transform.
    Geometric(GeometricOp),
    /// Channel adjustment.
    ColorAdjustment(ColorAdjustment),
}

impl TransformOp {
    /// Kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            TransformOp::Geometric(op) => op.kind(),
            TransformOp::ColorAdjustment(adjustment) => adjustment.kind(),
        }
    }

    fn parse(kind: &str, r: &ParamReader<'_>) -> ValidationResult<Option<Self>> {
        let op = match kind {
            "translation" => GeometricOp::Translation {
                tx: r.integer(&TRANSLATE_TX)? as i32,
                ty: r.integer(&TRANSLATE_TY)? as i32,
            },
            "rotation" => GeometricOp::Rotation {
                angle: r.float(&ROTATE_ANGLE)? as f32,
                scale: r.float(&ROTATE_SCALE)? as f32,
            },
            "scaling" => {
                let fx = r.float(&SCALE_FX)? as f32;
                let fy = r.opt_float(&SCALE_FY)?.map(|v| v as f32).unwrap_or(fx);
                GeometricOp::Scaling { fx, fy }
            }
            "shear" => GeometricOp::Shear {
                shx: r.float(&SHEAR_X)? as f32,
                shy: r.float(&SHEAR_Y)? as f32,
            },
            "affine" => {
                let src = r.points(&AFFINE_SRC)?;
                let dst = r.points(&AFFINE_DST)?;
                GeometricOp::Affine {
                    src: [src[0], src[1], src[2]],
                    dst: [dst[0], dst[1], dst[2]],
                }
            }
            "perspective" => {
                let src = r.points(&PERSPECTIVE_SRC)?;
                let dst = r.points(&PERSPECTIVE_DST)?;
                GeometricOp::Perspective {
                    src: [src[0], src[1], src[2], src[3]],
                    dst: [dst[0], dst[1], dst[2], dst[3]],
                }
            }
            "flip" => GeometricOp::Flip(match r.integer(&FLIP_CODE)? {
                0 => FlipAxis::Vertical,
                1 => FlipAxis::Horizontal,
                _ => FlipAxis::Both,
            }),
            "crop" => GeometricOp::Crop {
                x: r.integer(&CROP_X)? as u32,
                y: r.integer(&CROP_Y)? as u32,
                width: r.integer(&CROP_WIDTH)? as u32,
                height: r.integer(&CROP_HEIGHT)? as u32,
            },
            "resize" => GeometricOp::Resize {
                width: r.integer(&RESIZE_WIDTH)? as u32,
                height: r.integer(&RESIZE_HEIGHT)? as u32,
            },
            "color_adjustment" | "set_color_channel" | "multiply_color_channel" => {
                let channel = match r.string(&COLOR_CHANNEL)?.as_str() {
                    "red" => ColorChannel::Red,
                    "green" => ColorChannel::Green,
                    "blue" => ColorChannel::Blue,
                    _ => ColorChannel::All,
                };
                let mode = match kind {
                    "set_color_channel" => ColorMode::Set(r.integer(&COLOR_SET_VALUE)? as u8),
                    "multiply_color_channel" => ColorMode::Multiply(r.float(&COLOR_FACTOR)? as f32),
                    _ => ColorMode::Add(r.integer(&COLOR_VALUE)? as i16),
                };
                return Ok(Some(TransformOp::ColorAdjustment(ColorAdjustment { channel, mode })));
            }
            _ => return Ok(None),
        };
        Ok(Some(TransformOp::Geometric(op)))
    }
}

// ============================================================================
// Operation
// ============================================================================

/// A validated, typed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Produces a feature record.
    Feature(FeatureOp),
    /// Produces an image of the same size.
    Filter(FilterOp),
    /// Produces an image of possibly different size.
    Transform(TransformOp),
}

impl Operation {
    /// Family of this operation.
    pub fn family(&self) -> Family {
        match self {
            Operation::Feature(_) => Family::Feature,
            Operation::Filter(_) => Family::Filter,
            Operation::Transform(_) => Family::Transform,
        }
    }

    /// Kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Feature(op) => op.kind(),
            Operation::Filter(op) => op.kind(),
            Operation::Transform(op) => op.kind(),
        }
    }

    /// Whether the operation produces an image that a following chain step
    /// can consume.
    pub fn is_chainable(&self) -> bool {
        !matches!(self, Operation::Feature(_))
    }

    /// Parse a descriptor into a typed operation.
    ///
    /// `task_id` is the resolved id, used for error reporting.
    pub fn parse(task_id: &str, task: &TaskDescriptor) -> ValidationResult<Self> {
        let unknown = || ValidationError::UnknownOperation {
            task_id: task_id.to_string(),
            family: task.family,
            operation: task.operation.clone(),
        };
        let kind = task.operation.trim().to_ascii_lowercase();
        let spec = catalog(task.family)
            .iter()
            .find(|s| s.kind == kind)
            .ok_or_else(unknown)?;

        let reader = ParamReader::new(task_id, &task.parameters);
        reader.reject_unknown(spec.params)?;

        let parsed = match task.family {
            Family::Feature => FeatureOp::parse(&kind, &reader)?.map(Operation::Feature),
            Family::Filter => FilterOp::parse(&kind, &reader, task_id)?.map(Operation::Filter),
            Family::Transform => TransformOp::parse(&kind, &reader)?.map(Operation::Transform),
        };
        parsed.ok_or_else(unknown)
    }
}

/// Catalog of operation kinds for a family.
pub fn catalog(family: Family) -> &'static [OperationSpec] {
    match family {
        Family::Feature => FEATURE_CATALOG,
        Family::Filter => FILTER_CATALOG,
        Family::Transform => TRANSFORM_CATALOG,
    }
}

/// Kind strings of a family, in catalog order.
pub fn operation_kinds(family: Family) -> Vec<&'static str> {
    catalog(family).iter().map(|s| s.kind).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(task: TaskDescriptor) -> ValidationResult<Operation> {
        Operation::parse("t0", &task)
    }

    #[test]
    fn test_every_catalog_kind_parses_with_defaults_or_reports_missing() {
        for family in Family::ALL {
            for spec in catalog(family) {
                let result = parse(TaskDescriptor::new(family, spec.kind));
                match result {
                    Ok(op) => {
                        assert_eq!(op.kind(), spec.kind);
                        assert_eq!(op.family(), family);
                    }
                    Err(ValidationError::MissingParameter { .. }) => {}
                    Err(other) => panic!("{} failed unexpectedly: {}", spec.kind, other),
                }
            }
        }
    }

    #[test]
    fn test_unknown_operation() {
        let err = parse(TaskDescriptor::feature("sift")).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownOperation { ref operation, .. } if operation == "sift"));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let err = parse(TaskDescriptor::filter("gaussian_blur").with_param("kernel", 5)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { ref parameter, .. } if parameter == "kernel"));
    }

    #[test]
    fn test_kind_is_case_insensitive() {
        let op = parse(TaskDescriptor::filter("Gaussian_Blur").with_param("sigma", 2.0)).unwrap();
        assert_eq!(op, Operation::Filter(FilterOp::GaussianBlur { sigma: 2.0 }));
    }

    #[test]
    fn test_color_adjustment_is_its_own_variant() {
        let op = parse(
            TaskDescriptor::transform("color_adjustment")
                .with_param("channel", "RED")
                .with_param("value", -40),
        )
        .unwrap();
        assert_eq!(
            op,
            Operation::Transform(TransformOp::ColorAdjustment(ColorAdjustment {
                channel: ColorChannel::Red,
                mode: ColorMode::Add(-40)
            }))
        );
    }

    #[test]
    fn test_set_and_multiply_channel_kinds() {
        let set = parse(
            TaskDescriptor::transform("set_color_channel")
                .with_param("channel", "blue")
                .with_param("value", 255),
        )
        .unwrap();
        assert_eq!(set.kind(), "set_color_channel");
        assert_eq!(
            set,
            Operation::Transform(TransformOp::ColorAdjustment(ColorAdjustment {
                channel: ColorChannel::Blue,
                mode: ColorMode::Set(255)
            }))
        );

        let multiply = parse(TaskDescriptor::transform("multiply_color_channel").with_param("factor", 1.5)).unwrap();
        assert_eq!(multiply.kind(), "multiply_color_channel");
        assert!(matches!(
            multiply,
            Operation::Transform(TransformOp::ColorAdjustment(ColorAdjustment {
                channel: ColorChannel::All,
                mode: ColorMode::Multiply(f)
            })) if (f - 1.5).abs() < 1e-6
        ));

        let err = parse(TaskDescriptor::transform("multiply_color_channel").with_param("factor", 0.0)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { ref parameter, .. } if parameter == "factor"));
        let err = parse(TaskDescriptor::transform("set_color_channel").with_param("value", 300)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { ref parameter, .. } if parameter == "value"));
    }

    #[test]
    fn test_scaling_fy_defaults_to_fx() {
        let op = parse(TaskDescriptor::transform("scaling").with_param("fx", 0.5)).unwrap();
        assert_eq!(
            op,
            Operation::Transform(TransformOp::Geometric(GeometricOp::Scaling { fx: 0.5, fy: 0.5 }))
        );
    }

    #[test]
    fn test_canny_threshold_order() {
        let err = parse(
            TaskDescriptor::filter("canny")
                .with_param("low_threshold", 300.0)
                .with_param("high_threshold", 100.0),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { .. }));
    }

    #[test]
    fn test_crop_requires_all_edges() {
        let err = parse(TaskDescriptor::transform("crop").with_param("x", 0).with_param("y", 0)).unwrap_err();
        assert!(matches!(err, ValidationError::MissingParameter { ref parameter, .. } if parameter == "width"));
    }

    #[test]
    fn test_feature_ops_are_not_chainable() {
        let op = parse(TaskDescriptor::feature("fast_corners")).unwrap();
        assert!(!op.is_chainable());
        let op = parse(TaskDescriptor::filter("sobel")).unwrap();
        assert!(op.is_chainable());
    }
}
