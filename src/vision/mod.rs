//! Built-in vision capability on top of `image` and `imageproc`.
//!
//! Operations keep the pixel layout of their input where the underlying
//! primitive allows it: 8-bit gray and RGB stay as they are, anything else
//! is processed as 8-bit RGBA. Edge detectors and other inherently
//! single-channel operations return 8-bit gray.

mod features;
mod filters;
mod matching;
mod transforms;

use crate::capability::{CapabilityResult, VisionCapability};
use crate::core::matching::{DescriptorNorm, FeatureMatch, Homography};
use crate::core::operation::{ColorAdjustment, FeatureOp, FilterOp, GeometricOp};
use crate::core::task::{DescriptorMatrix, FeatureRecord, Keypoint};
use image::DynamicImage;

/// Apply an expression to the image buffer in its native 8-bit layout.
///
/// `$buf` is bound to `&GrayImage`, `&RgbImage` or `&RgbaImage`; `$body`
/// must produce an owned buffer of the same pixel type.
macro_rules! map_layout {
    ($image:expr, |$buf:ident| $body:expr) => {
        match $image {
            image::DynamicImage::ImageLuma8($buf) => image::DynamicImage::ImageLuma8($body),
            image::DynamicImage::ImageRgb8($buf) => image::DynamicImage::ImageRgb8($body),
            other => {
                let $buf = &other.to_rgba8();
                image::DynamicImage::ImageRgba8($body)
            }
        }
    };
}
pub(crate) use map_layout;

/// The default capability, backed by `image` / `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCapability;

impl BuiltinCapability {
    /// Create the capability; it holds no state.
    pub fn new() -> Self {
        Self
    }
}

impl VisionCapability for BuiltinCapability {
    fn name(&self) -> &str {
        "builtin"
    }

    fn extract_features(&self, image: &DynamicImage, op: &FeatureOp) -> CapabilityResult<FeatureRecord> {
        features::extract(image, op)
    }

    fn apply_filter(&self, image: &DynamicImage, op: &FilterOp) -> CapabilityResult<DynamicImage> {
        filters::apply(image, op)
    }

    fn warp(&self, image: &DynamicImage, op: &GeometricOp) -> CapabilityResult<DynamicImage> {
        transforms::warp(image, op)
    }

    fn adjust_color_channel(
        &self,
        image: &DynamicImage,
        adjustment: &ColorAdjustment,
    ) -> CapabilityResult<DynamicImage> {
        Ok(transforms::adjust_color(image, adjustment))
    }

    fn match_descriptors(
        &self,
        query: &DescriptorMatrix,
        train: &DescriptorMatrix,
        norm: DescriptorNorm,
        ratio: f32,
    ) -> CapabilityResult<Vec<FeatureMatch>> {
        matching::ratio_match(query, train, norm, ratio)
    }

    fn find_homography(
        &self,
        src: &[(f32, f32)],
        dst: &[(f32, f32)],
        ransac_threshold: f32,
    ) -> CapabilityResult<Homography> {
        matching::find_homography(src, dst, ransac_threshold)
    }

    fn draw_matches(
        &self,
        first: &DynamicImage,
        second: &DynamicImage,
        keypoints: (&[Keypoint], &[Keypoint]),
        matches: &[FeatureMatch],
    ) -> CapabilityResult<DynamicImage> {
        Ok(matching::draw_matches(first, second, keypoints, matches))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

    /// RGB test card: dark background with a few bright squares, so corner
    /// and blob detectors have something to find.
    pub fn test_card(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([20, 30, 40]));
        let side = (width.min(height) / 6).max(3);
        let origins = [
            (width / 8, height / 8),
            (width / 2, height / 4),
            (width / 4, height / 2),
            (width * 5 / 8, height * 5 / 8),
        ];
        for (ox, oy) in origins {
            for y in oy..(oy + side).min(height) {
                for x in ox..(ox + side).min(width) {
                    img.put_pixel(x, y, Rgb([230, 220, 200]));
                }
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    /// 8x8 blocks of hashed intensity sampled at `offset`, so two calls
    /// give translated views of one surface.
    pub fn block_texture(width: u32, height: u32, offset: (u32, u32)) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            let (bx, by) = ((x + offset.0) / 8, (y + offset.1) / 8);
            let mut h = bx.wrapping_mul(0x9E37_79B1) ^ by.wrapping_mul(0x85EB_CA77);
            h ^= h >> 15;
            h = h.wrapping_mul(0x2C1B_3C6D);
            h ^= h >> 12;
            Luma([(h % 256) as u8])
        }))
    }
}
