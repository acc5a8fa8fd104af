//! Feature family: corner, blob and gradient-histogram extraction.

use crate::capability::CapabilityResult;
use crate::core::error::CapabilityError;
use crate::core::operation::FeatureOp;
use crate::core::task::{DescriptorMatrix, FeatureRecord, Keypoint};
use crate::core::types::{ImageValue, ParamValue};
use image::{DynamicImage, GrayImage, Luma, Rgb};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::drawing::draw_hollow_circle_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hog::{hog, HogOptions};
use indexmap::IndexMap;

/// Diameter of the FAST-9 Bresenham circle.
const FAST_DIAMETER: f32 = 7.0;

/// Number of binary tests per ORB descriptor (32 bytes).
const ORB_BITS: usize = 256;

pub(super) fn extract(image: &DynamicImage, op: &FeatureOp) -> CapabilityResult<FeatureRecord> {
    match *op {
        FeatureOp::FastCorners {
            threshold,
            max_keypoints,
        } => Ok(fast(image, threshold, max_keypoints)),
        FeatureOp::Orb {
            n_features,
            fast_threshold,
            patch_size,
        } => Ok(orb(image, n_features, fast_threshold, patch_size)),
        FeatureOp::Hog {
            orientations,
            cell_side,
            block_side,
            block_stride,
            signed,
        } => hog_descriptor(
            image,
            HogOptions::new(orientations, signed, cell_side, block_side, block_stride),
        ),
        FeatureOp::LogDogBlob {
            sigma,
            k,
            threshold,
            min_distance,
        } => Ok(dog_blobs(image, sigma, k, threshold, min_distance)),
    }
}

/// Strongest corners first; ties broken by position so output is stable.
fn strongest(mut corners: Vec<Corner>, limit: Option<usize>) -> Vec<Corner> {
    corners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    if let Some(limit) = limit {
        corners.truncate(limit);
    }
    corners
}

fn fast(image: &DynamicImage, threshold: u8, max_keypoints: Option<usize>) -> FeatureRecord {
    let gray = image.to_luma8();
    let corners = strongest(corners_fast9(&gray, threshold), max_keypoints);
    let keypoints: Vec<Keypoint> = corners
        .iter()
        .map(|c| Keypoint::new(c.x as f32, c.y as f32, FAST_DIAMETER, c.score))
        .collect();

    let mut metadata = IndexMap::new();
    metadata.insert("threshold".to_string(), ParamValue::Integer(threshold as i64));
    FeatureRecord {
        image: Some(annotate(image, &keypoints)),
        keypoints,
        descriptors: None,
        metadata,
    }
}

fn orb(image: &DynamicImage, n_features: usize, fast_threshold: u8, patch_size: u32) -> FeatureRecord {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    let half = patch_size / 2;

    let candidates = corners_fast9(&gray, fast_threshold)
        .into_iter()
        .filter(|c| c.x >= half && c.y >= half && c.x + half < w && c.y + half < h)
        .collect();
    let corners = strongest(candidates, Some(n_features));

    // Binary tests are taken on a smoothed image so single-pixel noise does
    // not flip bits.
    let smooth = gaussian_blur_f32(&gray, 2.0);
    let pattern = sample_pattern(half.saturating_sub(1) as f32);

    let mut keypoints = Vec::with_capacity(corners.len());
    let mut rows = Vec::with_capacity(corners.len());
    for corner in &corners {
        let angle = patch_orientation(&gray, corner.x, corner.y, half);
        let mut kp = Keypoint::new(corner.x as f32, corner.y as f32, patch_size as f32, corner.score);
        kp.angle = angle.to_degrees().rem_euclid(360.0);
        keypoints.push(kp);
        rows.push(steered_brief(&smooth, corner.x, corner.y, angle, &pattern));
    }

    let mut metadata = IndexMap::new();
    metadata.insert("n_features".to_string(), ParamValue::Integer(n_features as i64));
    metadata.insert("patch_size".to_string(), ParamValue::Integer(patch_size as i64));
    FeatureRecord {
        image: Some(annotate(image, &keypoints)),
        descriptors: if rows.is_empty() {
            None
        } else {
            DescriptorMatrix::from_rows(rows)
        },
        keypoints,
        metadata,
    }
}

/// Orientation of the intensity centroid of a square patch, in radians.
fn patch_orientation(gray: &GrayImage, cx: u32, cy: u32, half: u32) -> f32 {
    let (mut m01, mut m10) = (0f32, 0f32);
    for y in (cy - half)..=(cy + half) {
        for x in (cx - half)..=(cx + half) {
            let v = gray.get_pixel(x, y)[0] as f32;
            m10 += (x as f32 - cx as f32) * v;
            m01 += (y as f32 - cy as f32) * v;
        }
    }
    m01.atan2(m10)
}

/// Fixed pseudo-random point pairs inside a disc of the given radius.
fn sample_pattern(radius: f32) -> Vec<[(f32, f32); 2]> {
    let mut state: u32 = 0x9E37_79B9;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state as f32 / u32::MAX as f32
    };
    let mut point = move || loop {
        let x = next() * 2.0 - 1.0;
        let y = next() * 2.0 - 1.0;
        if x * x + y * y <= 1.0 {
            return (x * radius, y * radius);
        }
    };
    (0..ORB_BITS).map(|_| [point(), point()]).collect()
}

/// Rotated BRIEF: binary intensity comparisons packed into bytes.
fn steered_brief(smooth: &GrayImage, cx: u32, cy: u32, angle: f32, pattern: &[[(f32, f32); 2]]) -> Vec<f32> {
    let (sin, cos) = angle.sin_cos();
    let sample = |(dx, dy): (f32, f32)| -> u8 {
        let x = cx as f32 + dx * cos - dy * sin;
        let y = cy as f32 + dx * sin + dy * cos;
        smooth.get_pixel(x.round() as u32, y.round() as u32)[0]
    };
    pattern
        .chunks(8)
        .map(|tests| {
            tests
                .iter()
                .enumerate()
                .fold(0u8, |byte, (bit, [a, b])| {
                    if sample(*a) < sample(*b) {
                        byte | (1 << bit)
                    } else {
                        byte
                    }
                }) as f32
        })
        .collect()
}

fn hog_descriptor(image: &DynamicImage, options: HogOptions) -> CapabilityResult<FeatureRecord> {
    let gray = image.to_luma8();
    let width = usable_extent(gray.width() as usize, &options).ok_or_else(|| too_small(&gray, &options))?;
    let height = usable_extent(gray.height() as usize, &options).ok_or_else(|| too_small(&gray, &options))?;
    let cropped = image::imageops::crop_imm(&gray, 0, 0, width as u32, height as u32).to_image();

    let values = hog(&cropped, options).map_err(CapabilityError::Processing)?;

    let mut metadata = IndexMap::new();
    metadata.insert("feature_length".to_string(), ParamValue::Integer(values.len() as i64));
    metadata.insert(
        "window".to_string(),
        ParamValue::Array(vec![ParamValue::Integer(width as i64), ParamValue::Integer(height as i64)]),
    );
    Ok(FeatureRecord {
        image: None,
        keypoints: Vec::new(),
        descriptors: DescriptorMatrix::from_rows(vec![values]),
        metadata,
    })
}

/// Largest extent not exceeding `pixels` that tiles exactly into cells and
/// block strides.
fn usable_extent(pixels: usize, options: &HogOptions) -> Option<usize> {
    let cells = pixels / options.cell_side;
    if cells < options.block_side {
        return None;
    }
    let strides = (cells - options.block_side) / options.block_stride;
    Some((options.block_side + strides * options.block_stride) * options.cell_side)
}

fn too_small(gray: &GrayImage, options: &HogOptions) -> CapabilityError {
    CapabilityError::InvalidInput(format!(
        "{}x{} image is smaller than one HOG block ({} px)",
        gray.width(),
        gray.height(),
        options.block_side * options.cell_side
    ))
}

fn dog_blobs(image: &DynamicImage, sigma: f32, k: f32, threshold: u8, min_distance: u32) -> FeatureRecord {
    let gray = image.to_luma8();
    let fine = gaussian_blur_f32(&gray, sigma);
    let coarse = gaussian_blur_f32(&gray, sigma * k);
    let dog = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let d = fine.get_pixel(x, y)[0] as i16 - coarse.get_pixel(x, y)[0] as i16;
        Luma([d.unsigned_abs().min(255) as u8])
    });

    let peaks = imageproc::suppress::suppress_non_maximum(&dog, min_distance);
    let size = 2.0 * std::f32::consts::SQRT_2 * sigma;
    let mut keypoints: Vec<Keypoint> = peaks
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] >= threshold)
        .map(|(x, y, p)| Keypoint::new(x as f32, y as f32, size, p[0] as f32))
        .collect();
    keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));

    let mut metadata = IndexMap::new();
    metadata.insert("sigma".to_string(), ParamValue::Float(sigma as f64));
    metadata.insert("k".to_string(), ParamValue::Float(k as f64));
    FeatureRecord {
        image: Some(annotate(image, &keypoints)),
        keypoints,
        descriptors: None,
        metadata,
    }
}

/// Copy of the image with a circle drawn around every keypoint.
fn annotate(image: &DynamicImage, keypoints: &[Keypoint]) -> ImageValue {
    let mut canvas = image.to_rgb8();
    for kp in keypoints {
        let radius = (kp.size / 2.0).round().max(1.0) as i32;
        draw_hollow_circle_mut(
            &mut canvas,
            (kp.x.round() as i32, kp.y.round() as i32),
            radius,
            Rgb([0, 255, 0]),
        );
    }
    ImageValue::new(DynamicImage::ImageRgb8(canvas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::fixtures::test_card;
    use image::RgbImage;

    #[test]
    fn test_fast_finds_square_corners() {
        let img = test_card(96, 96);
        let record = extract(&img, &FeatureOp::FastCorners { threshold: 40, max_keypoints: None }).unwrap();
        assert!(!record.keypoints.is_empty());
        assert!(record.descriptors.is_none());
        assert_eq!(record.image.as_ref().unwrap().width(), 96);
    }

    #[test]
    fn test_fast_respects_limit_and_orders_by_response() {
        let img = test_card(96, 96);
        let record = extract(&img, &FeatureOp::FastCorners { threshold: 20, max_keypoints: Some(3) }).unwrap();
        assert!(record.keypoints.len() <= 3);
        assert!(record.keypoints.windows(2).all(|w| w[0].response >= w[1].response));
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let record = extract(&img, &FeatureOp::Orb { n_features: 100, fast_threshold: 20, patch_size: 31 }).unwrap();
        assert!(record.keypoints.is_empty());
        assert!(record.descriptors.is_none());
    }

    #[test]
    fn test_orb_descriptor_rows_match_keypoints() {
        let img = test_card(128, 128);
        let record = extract(&img, &FeatureOp::Orb { n_features: 50, fast_threshold: 20, patch_size: 15 }).unwrap();
        let descriptors = record.descriptors.expect("descriptors for a textured image");
        assert_eq!(descriptors.shape(), (record.keypoints.len(), ORB_BITS / 8));
        assert!(record.keypoints.len() <= 50);
    }

    #[test]
    fn test_hog_crops_to_block_grid() {
        let img = test_card(70, 50);
        let record = extract(
            &img,
            &FeatureOp::Hog { orientations: 9, cell_side: 8, block_side: 2, block_stride: 1, signed: false },
        )
        .unwrap();
        let descriptors = record.descriptors.unwrap();
        assert_eq!(descriptors.rows, 1);
        // 64x48 window: 8x6 cells, 7x5 blocks of 2x2 cells with 9 bins each
        assert_eq!(descriptors.cols, 7 * 5 * 2 * 2 * 9);
    }

    #[test]
    fn test_hog_rejects_tiny_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(6, 6));
        let err = extract(
            &img,
            &FeatureOp::Hog { orientations: 9, cell_side: 8, block_side: 2, block_stride: 1, signed: false },
        )
        .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInput(_)));
    }

    #[test]
    fn test_dog_blobs_on_test_card() {
        let img = test_card(96, 96);
        let record = extract(&img, &FeatureOp::LogDogBlob { sigma: 2.0, k: 1.6, threshold: 5, min_distance: 4 }).unwrap();
        assert!(!record.keypoints.is_empty());
    }
}
