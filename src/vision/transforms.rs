//! Transform family: geometric warps and per-channel color adjustment.

use super::map_layout;
use crate::capability::CapabilityResult;
use crate::core::error::CapabilityError;
use crate::core::operation::{ColorAdjustment, ColorChannel, ColorMode, FlipAxis, GeometricOp};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};
use imageproc::geometric_transformations::{translate, warp_into, Interpolation, Projection};

pub(super) fn warp(image: &DynamicImage, op: &GeometricOp) -> CapabilityResult<DynamicImage> {
    let (w, h) = image.dimensions();
    let out = match *op {
        GeometricOp::Translation { tx, ty } => map_layout!(image, |buf| translate(buf, (tx, ty))),
        GeometricOp::Rotation { angle, scale } => rotate(image, angle, scale)?,
        GeometricOp::Scaling { fx, fy } => {
            let nw = scaled(w, fx)?;
            let nh = scaled(h, fy)?;
            image.resize_exact(nw, nh, FilterType::Triangle)
        }
        GeometricOp::Resize { width, height } => image.resize_exact(width, height, FilterType::Triangle),
        GeometricOp::Shear { shx, shy } => shear(image, shx, shy)?,
        GeometricOp::Affine { src, dst } => {
            let matrix = affine_from_points(&src, &dst).ok_or_else(|| {
                CapabilityError::InvalidInput("affine source points are collinear".to_string())
            })?;
            let projection = Projection::from_matrix(matrix)
                .ok_or_else(|| CapabilityError::InvalidInput("affine matrix is not invertible".to_string()))?;
            warp_dynamic(image, &projection, w, h)
        }
        GeometricOp::Perspective { src, dst } => {
            let projection = Projection::from_control_points(src, dst).ok_or_else(|| {
                CapabilityError::InvalidInput("perspective control points are degenerate".to_string())
            })?;
            warp_dynamic(image, &projection, w, h)
        }
        GeometricOp::Flip(axis) => match axis {
            FlipAxis::Horizontal => image.fliph(),
            FlipAxis::Vertical => image.flipv(),
            FlipAxis::Both => image.rotate180(),
        },
        GeometricOp::Crop { x, y, width, height } => {
            let fits = x.checked_add(width).is_some_and(|right| right <= w)
                && y.checked_add(height).is_some_and(|bottom| bottom <= h);
            if !fits {
                return Err(CapabilityError::InvalidInput(format!(
                    "crop {}x{}+{}+{} exceeds {}x{} image",
                    width, height, x, y, w, h
                )));
            }
            image.crop_imm(x, y, width, height)
        }
    };
    Ok(out)
}

fn scaled(extent: u32, factor: f32) -> CapabilityResult<u32> {
    canvas_extent(extent as f32 * factor)
}

/// Round a computed canvas extent, rejecting anything under one pixel.
fn canvas_extent(value: f32) -> CapabilityResult<u32> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < 1.0 {
        return Err(CapabilityError::InvalidInput(format!(
            "output extent {} is less than one pixel",
            value
        )));
    }
    Ok(rounded as u32)
}

/// Rotate counter-clockwise about the centre. The canvas grows to hold the
/// whole rotated (and scaled) image.
fn rotate(image: &DynamicImage, angle: f32, scale: f32) -> CapabilityResult<DynamicImage> {
    let (w, h) = image.dimensions();
    let theta = angle.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let nw = canvas_extent((w as f32 * cos + h as f32 * sin) * scale)?;
    let nh = canvas_extent((w as f32 * sin + h as f32 * cos) * scale)?;

    let projection = Projection::translate(-(w as f32) / 2.0, -(h as f32) / 2.0)
        .and_then(Projection::rotate(-theta))
        .and_then(Projection::scale(scale, scale))
        .and_then(Projection::translate(nw as f32 / 2.0, nh as f32 / 2.0));
    Ok(warp_dynamic(image, &projection, nw, nh))
}

/// Shear with the canvas widened so nothing is cut off.
fn shear(image: &DynamicImage, shx: f32, shy: f32) -> CapabilityResult<DynamicImage> {
    let (w, h) = image.dimensions();
    let nw = canvas_extent(w as f32 + shx.abs() * h as f32)?;
    let nh = canvas_extent(h as f32 + shy.abs() * w as f32)?;
    let tx = if shx < 0.0 { -shx * h as f32 } else { 0.0 };
    let ty = if shy < 0.0 { -shy * w as f32 } else { 0.0 };
    let projection = Projection::from_matrix([1.0, shx, tx, shy, 1.0, ty, 0.0, 0.0, 1.0])
        .ok_or_else(|| CapabilityError::InvalidInput(format!("shear ({}, {}) is not invertible", shx, shy)))?;
    Ok(warp_dynamic(image, &projection, nw, nh))
}

/// Row-major 3x3 matrix of the affine map taking `src[i]` to `dst[i]`.
fn affine_from_points(src: &[(f32, f32); 3], dst: &[(f32, f32); 3]) -> Option<[f32; 9]> {
    let [(x0, y0), (x1, y1), (x2, y2)] = src.map(|(x, y)| (x as f64, y as f64));
    let det = x0 * (y1 - y2) - y0 * (x1 - x2) + (x1 * y2 - x2 * y1);
    if det.abs() < 1e-9 {
        return None;
    }

    // Cramer's rule for [x y 1] * [a b c]^T = target, once per output axis.
    let solve = |t: [f64; 3]| -> [f64; 3] {
        let a = (t[0] * (y1 - y2) - y0 * (t[1] - t[2]) + (t[1] * y2 - t[2] * y1)) / det;
        let b = (x0 * (t[1] - t[2]) - t[0] * (x1 - x2) + (x1 * t[2] - x2 * t[1])) / det;
        let c = (x0 * (y1 * t[2] - y2 * t[1]) - y0 * (x1 * t[2] - x2 * t[1]) + t[0] * (x1 * y2 - x2 * y1)) / det;
        [a, b, c]
    };
    let [a, b, c] = solve(dst.map(|(x, _)| x as f64));
    let [d, e, f] = solve(dst.map(|(_, y)| y as f64));
    Some([a, b, c, d, e, f, 0.0, 0.0, 1.0].map(|v| v as f32))
}

fn warp_buffer<P>(src: &ImageBuffer<P, Vec<u8>>, projection: &Projection, width: u32, height: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + Send + Sync + 'static,
{
    let zeros = [0u8; 4];
    let background = *P::from_slice(&zeros[..P::CHANNEL_COUNT as usize]);
    let mut out = ImageBuffer::from_pixel(width, height, background);
    warp_into(src, projection, Interpolation::Bilinear, background, &mut out);
    out
}

/// Warp into a `width` x `height` canvas, keeping the native layout.
fn warp_dynamic(image: &DynamicImage, projection: &Projection, width: u32, height: u32) -> DynamicImage {
    map_layout!(image, |buf| warp_buffer(buf, projection, width, height))
}

/// Add `value` to the selected channel(s), saturating at 0 and 255.
///
/// Gray images adjusted on a single named channel are promoted to RGB first.
pub(super) fn adjust_color(image: &DynamicImage, adjustment: &ColorAdjustment) -> DynamicImage {
    let shift = |v: u8| -> u8 {
        match adjustment.mode {
            ColorMode::Add(delta) => (v as i32 + delta as i32).clamp(0, 255) as u8,
            ColorMode::Set(value) => value,
            ColorMode::Multiply(factor) => (v as f32 * factor).round().clamp(0.0, 255.0) as u8,
        }
    };
    let channels: &[usize] = match adjustment.channel {
        ColorChannel::All => &[0, 1, 2],
        ColorChannel::Red => &[0],
        ColorChannel::Green => &[1],
        ColorChannel::Blue => &[2],
    };

    match image {
        DynamicImage::ImageLuma8(gray) if adjustment.channel == ColorChannel::All => {
            let mut out = gray.clone();
            for p in out.pixels_mut() {
                p[0] = shift(p[0]);
            }
            DynamicImage::ImageLuma8(out)
        }
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => {
            let mut out = image.to_rgb8();
            for p in out.pixels_mut() {
                for &c in channels {
                    p[c] = shift(p[c]);
                }
            }
            DynamicImage::ImageRgb8(out)
        }
        other => {
            let mut out = other.to_rgba8();
            for p in out.pixels_mut() {
                for &c in channels {
                    p[c] = shift(p[c]);
                }
            }
            DynamicImage::ImageRgba8(out)
        }
    }
}
