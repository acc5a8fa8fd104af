//! Descriptor matching, robust homography estimation and match drawing.

use crate::capability::CapabilityResult;
use crate::core::error::CapabilityError;
use crate::core::matching::{DescriptorNorm, FeatureMatch, Homography};
use crate::core::task::{DescriptorMatrix, Keypoint};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use imageproc::geometric_transformations::Projection;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Hypotheses drawn before RANSAC gives up.
const MAX_ITERATIONS: usize = 2000;

/// Probability that at least one all-inlier sample was drawn.
const CONFIDENCE: f64 = 0.995;

/// Fixed seed, so the same correspondences always give the same model.
const RANSAC_SEED: u64 = 0x5eed_cafe;

/// Nearest-neighbour matching with a ratio test.
///
/// A query row is matched to its nearest train row when that distance is
/// below `ratio` times the distance to the second nearest. Query rows with
/// fewer than two candidates are skipped. Matches come back sorted by
/// distance.
pub(super) fn ratio_match(
    query: &DescriptorMatrix,
    train: &DescriptorMatrix,
    norm: DescriptorNorm,
    ratio: f32,
) -> CapabilityResult<Vec<FeatureMatch>> {
    if query.cols != train.cols {
        return Err(CapabilityError::InvalidInput(format!(
            "descriptor widths differ: {} vs {}",
            query.cols, train.cols
        )));
    }
    if query.rows == 0 || train.rows == 0 || query.cols == 0 {
        return Err(CapabilityError::InvalidInput("empty descriptor set".to_string()));
    }

    fn row(m: &DescriptorMatrix, i: usize) -> &[f32] {
        &m.data[i * m.cols..(i + 1) * m.cols]
    }
    let mut matches = Vec::new();
    for q in 0..query.rows {
        let qrow = row(query, q);
        let (mut best, mut second) = ((usize::MAX, f32::INFINITY), f32::INFINITY);
        for t in 0..train.rows {
            let d = distance(qrow, row(train, t), norm);
            if d < best.1 {
                second = best.1;
                best = (t, d);
            } else if d < second {
                second = d;
            }
        }
        if train.rows >= 2 && best.1 < ratio * second {
            matches.push(FeatureMatch {
                query: q,
                train: best.0,
                distance: best.1,
            });
        }
    }
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.query.cmp(&b.query)));
    Ok(matches)
}

fn distance(a: &[f32], b: &[f32], norm: DescriptorNorm) -> f32 {
    match norm {
        DescriptorNorm::Hamming => a
            .iter()
            .zip(b)
            .map(|(x, y)| ((*x as u8) ^ (*y as u8)).count_ones())
            .sum::<u32>() as f32,
        DescriptorNorm::L2 => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

/// RANSAC homography from point correspondences.
///
/// Each hypothesis is fitted to four random correspondences; the one with
/// the most points inside `threshold` pixels of reprojection error is refitted
/// on all of its inliers.
pub(super) fn find_homography(
    src: &[(f32, f32)],
    dst: &[(f32, f32)],
    threshold: f32,
) -> CapabilityResult<Homography> {
    if src.len() != dst.len() {
        return Err(CapabilityError::InvalidInput(format!(
            "{} source points but {} destination points",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < 4 {
        return Err(CapabilityError::InvalidInput(format!(
            "a homography needs 4 correspondences, got {}",
            src.len()
        )));
    }
    if threshold.is_nan() || threshold <= 0.0 {
        return Err(CapabilityError::InvalidInput("RANSAC threshold must be positive".to_string()));
    }

    let n = src.len();
    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
    let mut best: Option<Vec<bool>> = None;
    let mut best_count = 0;
    let mut iterations = MAX_ITERATIONS;
    let mut i = 0;
    while i < iterations {
        i += 1;
        let sample: Vec<usize> = if n == 4 {
            (0..4).collect()
        } else {
            index::sample(&mut rng, n, 4).into_vec()
        };
        let model = if degenerate(&sample, src) || degenerate(&sample, dst) {
            None
        } else {
            fit(&sample, src, dst).and_then(projection)
        };
        let Some(model) = model else {
            if n == 4 {
                break;
            }
            continue;
        };
        let mask = inliers(&model, src, dst, threshold);
        let count = mask.iter().filter(|m| **m).count();
        if count > best_count {
            best_count = count;
            best = Some(mask);
            iterations = iterations.min(required_iterations(count, n));
        }
        if n == 4 {
            break;
        }
    }

    let Some(mask) = best.filter(|_| best_count >= 4) else {
        return Err(CapabilityError::Processing(
            "no consistent homography found among the correspondences".to_string(),
        ));
    };
    let members: Vec<usize> = (0..n).filter(|&i| mask[i]).collect();
    let matrix = fit(&members, src, dst)
        .ok_or_else(|| CapabilityError::Processing("homography refit was degenerate".to_string()))?;
    // The refit may move points across the threshold; report the final model.
    let mask = match projection(matrix) {
        Some(model) => inliers(&model, src, dst, threshold),
        None => mask,
    };
    Ok(Homography {
        matrix: [
            [matrix[0], matrix[1], matrix[2]],
            [matrix[3], matrix[4], matrix[5]],
            [matrix[6], matrix[7], matrix[8]],
        ],
        inliers: mask.iter().filter(|m| **m).count(),
        inlier_mask: mask,
    })
}

/// Whether any three of the four sampled points are (nearly) collinear.
fn degenerate(sample: &[usize], points: &[(f32, f32)]) -> bool {
    let p = |i: usize| (points[sample[i]].0 as f64, points[sample[i]].1 as f64);
    [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)].iter().any(|&(a, b, c)| {
        let (a, b, c) = (p(a), p(b), p(c));
        let (ux, uy, vx, vy) = (b.0 - a.0, b.1 - a.1, c.0 - a.0, c.1 - a.1);
        let cross = (ux * vy - uy * vx).abs();
        cross <= 1e-6 * (ux.hypot(uy) * vx.hypot(vy))
    })
}

fn required_iterations(inliers: usize, total: usize) -> usize {
    let ratio = inliers as f64 / total as f64;
    let all_inliers = ratio.powi(4);
    if all_inliers >= 1.0 {
        return 1;
    }
    if all_inliers <= f64::EPSILON {
        return MAX_ITERATIONS;
    }
    let k = (1.0 - CONFIDENCE).ln() / (1.0 - all_inliers).ln();
    (k.ceil() as usize).clamp(1, MAX_ITERATIONS)
}

fn projection(matrix: [f64; 9]) -> Option<Projection> {
    Projection::from_matrix(matrix.map(|v| v as f32))
}

fn inliers(model: &Projection, src: &[(f32, f32)], dst: &[(f32, f32)], threshold: f32) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&s, &(dx, dy))| {
            let (px, py) = *model * s;
            let err = ((px - dx).powi(2) + (py - dy).powi(2)).sqrt();
            err.is_finite() && err <= threshold
        })
        .collect()
}

/// Least-squares DLT fit over the selected correspondences, on
/// normalised coordinates. `None` for degenerate point sets.
fn fit(selected: &[usize], src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<[f64; 9]> {
    if selected.len() < 4 {
        return None;
    }
    let from: Vec<(f64, f64)> = selected.iter().map(|&i| (src[i].0 as f64, src[i].1 as f64)).collect();
    let to: Vec<(f64, f64)> = selected.iter().map(|&i| (dst[i].0 as f64, dst[i].1 as f64)).collect();
    let (ts, from) = normalise(&from)?;
    let (td, to) = normalise(&to)?;

    // Normal equations of the 2n x 8 system with h33 fixed to 1.
    let mut ata = [[0f64; 8]; 8];
    let mut atb = [0f64; 8];
    for (&(x, y), &(u, v)) in from.iter().zip(&to) {
        let rows = [
            ([x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y], u),
            ([0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y], v),
        ];
        for (a, b) in rows {
            for r in 0..8 {
                atb[r] += a[r] * b;
                for c in 0..8 {
                    ata[r][c] += a[r] * a[c];
                }
            }
        }
    }
    let h = solve(ata, atb)?;
    let hn = [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0];

    // Undo the normalisation: H = Td^-1 * Hn * Ts.
    let td_inv = [1.0 / td[0], 0.0, -td[1] / td[0], 0.0, 1.0 / td[0], -td[2] / td[0], 0.0, 0.0, 1.0];
    let ts_m = [ts[0], 0.0, ts[1], 0.0, ts[0], ts[2], 0.0, 0.0, 1.0];
    let m = mul3(&mul3(&td_inv, &hn), &ts_m);
    if m[8].abs() < 1e-12 || m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(m.map(|v| v / m[8]))
}

/// Translate to the centroid and scale to a mean distance of sqrt(2).
/// Returns `[scale, tx, ty]` and the mapped points.
fn normalise(points: &[(f64, f64)]) -> Option<([f64; 3], Vec<(f64, f64)>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean = points.iter().map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()).sum::<f64>() / n;
    if mean < 1e-9 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean;
    let mapped = points.iter().map(|p| ((p.0 - cx) * s, (p.1 - cy) * s)).collect();
    Some(([s, -cx * s, -cy * s], mapped))
}

fn mul3(a: &[f64; 9], b: &[f64; 9]) -> [f64; 9] {
    let mut out = [0f64; 9];
    for r in 0..3 {
        for c in 0..3 {
            out[r * 3 + c] = (0..3).map(|k| a[r * 3 + k] * b[k * 3 + c]).sum();
        }
    }
    out
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: [[f64; 8]; 8], mut b: [f64; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..8 {
            let f = a[row][col] / a[col][col];
            for k in col..8 {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0f64; 8];
    for row in (0..8).rev() {
        let tail: f64 = ((row + 1)..8).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Both images side by side, with a line per match and a circle on every
/// keypoint.
pub(super) fn draw_matches(
    first: &DynamicImage,
    second: &DynamicImage,
    keypoints: (&[Keypoint], &[Keypoint]),
    matches: &[FeatureMatch],
) -> DynamicImage {
    let (a, b) = (first.to_rgb8(), second.to_rgb8());
    let offset = a.width();
    let mut canvas = RgbImage::new(a.width() + b.width(), a.height().max(b.height()));
    imageops::replace(&mut canvas, &a, 0, 0);
    imageops::replace(&mut canvas, &b, offset as i64, 0);

    let point = |kp: &Keypoint, dx: u32| (kp.x + dx as f32, kp.y);
    for (kps, dx) in [(keypoints.0, 0), (keypoints.1, offset)] {
        for kp in kps {
            let (x, y) = point(kp, dx);
            draw_hollow_circle_mut(&mut canvas, (x.round() as i32, y.round() as i32), 3, Rgb([255, 0, 0]));
        }
    }
    for m in matches {
        let (Some(q), Some(t)) = (keypoints.0.get(m.query), keypoints.1.get(m.train)) else {
            continue;
        };
        draw_line_segment_mut(&mut canvas, point(q, 0), point(t, offset), Rgb([0, 255, 0]));
    }
    DynamicImage::ImageRgb8(canvas)
}
