//! Filter family: blurs, edge detectors and intensity mappings.

use super::map_layout;
use crate::capability::CapabilityResult;
use crate::core::error::CapabilityError;
use crate::core::operation::FilterOp;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter, separable_filter};

pub(super) fn apply(image: &DynamicImage, op: &FilterOp) -> CapabilityResult<DynamicImage> {
    let out = match *op {
        FilterOp::GaussianBlur { sigma } => {
            if sigma <= 0.0 {
                return Err(CapabilityError::InvalidInput("sigma must be positive".to_string()));
            }
            map_layout!(image, |buf| gaussian_blur_f32(buf, sigma))
        }
        FilterOp::MedianBlur { radius } => map_layout!(image, |buf| median_filter(buf, radius, radius)),
        FilterOp::BoxBlur { radius_x, radius_y } => {
            let h_kernel = box_kernel(radius_x);
            let v_kernel = box_kernel(radius_y);
            map_layout!(image, |buf| separable_filter(buf, &h_kernel, &v_kernel))
        }
        FilterOp::Sobel => DynamicImage::ImageLuma8(sobel(&image.to_luma8())),
        FilterOp::Canny { low, high } => {
            DynamicImage::ImageLuma8(imageproc::edges::canny(&image.to_luma8(), low, high))
        }
        FilterOp::Laplacian => DynamicImage::ImageLuma8(laplacian(&image.to_luma8())),
        FilterOp::Gamma { gamma } => apply_lut(image, &gamma_lut(gamma)),
        FilterOp::Threshold {
            threshold,
            max_value,
            inverse,
        } => {
            let (above, below) = if inverse { (0, max_value) } else { (max_value, 0) };
            let mut gray = image.to_luma8();
            for p in gray.pixels_mut() {
                p[0] = if p[0] > threshold { above } else { below };
            }
            DynamicImage::ImageLuma8(gray)
        }
        FilterOp::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
    };
    Ok(out)
}

fn box_kernel(radius: u32) -> Vec<f32> {
    let size = (2 * radius + 1) as usize;
    vec![1.0 / size as f32; size]
}

/// Gradient magnitude, saturated to 8 bits.
fn sobel(gray: &GrayImage) -> GrayImage {
    let gradients = imageproc::gradients::sobel_gradients(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([gradients.get_pixel(x, y)[0].min(255) as u8])
    })
}

/// Absolute response of the 4-neighbour Laplacian, with clamped borders.
fn laplacian(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let at = |x: i64, y: i64| -> i32 {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        gray.get_pixel(x, y)[0] as i32
    };
    GrayImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let response = 4 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1);
        Luma([response.unsigned_abs().min(255) as u8])
    })
}

/// Lookup table for `out = 255 * (in / 255) ^ (1 / gamma)`.
fn gamma_lut(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = ((i as f64 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Map every color channel through a table. Alpha is left alone.
fn apply_lut(image: &DynamicImage, lut: &[u8; 256]) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut out = gray.clone();
            for p in out.pixels_mut() {
                p[0] = lut[p[0] as usize];
            }
            DynamicImage::ImageLuma8(out)
        }
        DynamicImage::ImageRgb8(rgb) => {
            let mut out = rgb.clone();
            for p in out.pixels_mut() {
                for c in 0..3 {
                    p[c] = lut[p[c] as usize];
                }
            }
            DynamicImage::ImageRgb8(out)
        }
        other => {
            let mut out = other.to_rgba8();
            for p in out.pixels_mut() {
                for c in 0..3 {
                    p[c] = lut[p[c] as usize];
                }
            }
            DynamicImage::ImageRgba8(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::fixtures::test_card;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_blurs_keep_layout_and_size() {
        let img = test_card(40, 30);
        for op in [
            FilterOp::GaussianBlur { sigma: 1.5 },
            FilterOp::MedianBlur { radius: 2 },
            FilterOp::BoxBlur { radius_x: 2, radius_y: 1 },
        ] {
            let out = apply(&img, &op).unwrap();
            assert_eq!(out.dimensions(), (40, 30), "{:?}", op);
            assert_eq!(out.color(), img.color(), "{:?}", op);
        }
    }

    #[test]
    fn test_rgba_input_stays_rgba() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));
        let out = apply(&img, &FilterOp::GaussianBlur { sigma: 1.0 }).unwrap();
        assert_eq!(out.color(), image::ColorType::Rgba8);
    }

    #[test]
    fn test_edge_filters_return_gray() {
        let img = test_card(32, 32);
        for op in [FilterOp::Sobel, FilterOp::Canny { low: 50.0, high: 100.0 }, FilterOp::Laplacian] {
            let out = apply(&img, &op).unwrap();
            assert_eq!(out.color(), image::ColorType::L8, "{:?}", op);
            assert_eq!(out.dimensions(), (32, 32));
        }
    }

    #[test]
    fn test_laplacian_of_flat_image_is_zero() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([90, 90, 90])));
        let out = apply(&img, &FilterOp::Laplacian).unwrap().to_luma8();
        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([64])));
        let out = apply(&img, &FilterOp::Gamma { gamma: 2.0 }).unwrap().to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 128);

        let same = apply(&img, &FilterOp::Gamma { gamma: 1.0 }).unwrap().to_luma8();
        assert_eq!(same.get_pixel(0, 0)[0], 64);
    }

    #[test]
    fn test_threshold_and_inverse() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(0, 0, Luma([10]));
        gray.put_pixel(1, 0, Luma([200]));
        let img = DynamicImage::ImageLuma8(gray);

        let out = apply(&img, &FilterOp::Threshold { threshold: 127, max_value: 255, inverse: false })
            .unwrap()
            .to_luma8();
        assert_eq!((out.get_pixel(0, 0)[0], out.get_pixel(1, 0)[0]), (0, 255));

        let out = apply(&img, &FilterOp::Threshold { threshold: 127, max_value: 100, inverse: true })
            .unwrap()
            .to_luma8();
        assert_eq!((out.get_pixel(0, 0)[0], out.get_pixel(1, 0)[0]), (100, 0));
    }

    #[test]
    fn test_input_is_untouched() {
        let img = test_card(16, 16);
        let before = img.clone();
        apply(&img, &FilterOp::BoxBlur { radius_x: 3, radius_y: 3 }).unwrap();
        assert_eq!(img.as_bytes(), before.as_bytes());
    }
}
