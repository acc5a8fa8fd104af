//! Feature matching between two images.
//!
//! Matching pairs the descriptors of two feature records: each row of the
//! first set is compared against every row of the second, and a pair is
//! kept only when its nearest neighbour is clearly closer than the runner
//! up (the ratio test).

use serde::{Deserialize, Serialize};

/// Distance used to compare descriptor rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorNorm {
    /// Bit differences between byte-valued rows (binary descriptors).
    Hamming,
    /// Euclidean distance between float rows.
    L2,
}

/// One accepted correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatch {
    /// Row (and keypoint) index in the first image's features.
    pub query: usize,
    /// Row (and keypoint) index in the second image's features.
    pub train: usize,
    /// Descriptor distance under the chosen norm.
    pub distance: f32,
}

/// Projective mapping from the first image onto the second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    /// Row-major 3x3 matrix, normalised so the bottom-right entry is 1.
    pub matrix: [[f64; 3]; 3],
    /// Number of correspondences within the reprojection threshold.
    pub inliers: usize,
    /// Per-correspondence inlier flags, in match order.
    pub inlier_mask: Vec<bool>,
}

impl Homography {
    /// Map a point of the first image into the second. `None` when the
    /// point maps to infinity.
    pub fn map(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.matrix;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < f64::EPSILON {
            return None;
        }
        Some((
            (m[0][0] * x + m[0][1] * y + m[0][2]) / w,
            (m[1][0] * x + m[1][1] * y + m[1][2]) / w,
        ))
    }
}

/// Summary of an accepted match set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStatistics {
    /// Accepted matches.
    pub total_matches: usize,
    /// Smallest descriptor distance.
    pub min_distance: f32,
    /// Largest descriptor distance.
    pub max_distance: f32,
    /// Mean descriptor distance.
    pub avg_distance: f32,
    /// Detector operation kind.
    pub matching_method: String,
    /// Norm the descriptors were compared with.
    pub norm: DescriptorNorm,
    /// Keypoints found in the first image.
    pub keypoints_image1: usize,
    /// Keypoints found in the second image.
    pub keypoints_image2: usize,
}

impl MatchStatistics {
    /// Summarise `matches`; `None` for an empty set.
    pub fn compute(
        matches: &[FeatureMatch],
        method: &str,
        norm: DescriptorNorm,
        keypoints: (usize, usize),
    ) -> Option<Self> {
        if matches.is_empty() {
            return None;
        }
        let (mut min, mut max, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0f64);
        for m in matches {
            min = min.min(m.distance);
            max = max.max(m.distance);
            sum += m.distance as f64;
        }
        Some(Self {
            total_matches: matches.len(),
            min_distance: min,
            max_distance: max,
            avg_distance: (sum / matches.len() as f64) as f32,
            matching_method: method.to_string(),
            norm,
            keypoints_image1: keypoints.0,
            keypoints_image2: keypoints.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(distance: f32) -> FeatureMatch {
        FeatureMatch {
            query: 0,
            train: 0,
            distance,
        }
    }

    #[test]
    fn test_statistics() {
        let stats = MatchStatistics::compute(&[m(2.0), m(4.0), m(9.0)], "orb", DescriptorNorm::Hamming, (10, 12))
            .unwrap();
        assert_eq!(stats.total_matches, 3);
        assert_eq!(stats.min_distance, 2.0);
        assert_eq!(stats.max_distance, 9.0);
        assert!((stats.avg_distance - 5.0).abs() < 1e-6);
        assert_eq!((stats.keypoints_image1, stats.keypoints_image2), (10, 12));
        assert!(MatchStatistics::compute(&[], "orb", DescriptorNorm::Hamming, (0, 0)).is_none());
    }

    #[test]
    fn test_homography_maps_points() {
        let h = Homography {
            matrix: [[2.0, 0.0, 1.0], [0.0, 2.0, -1.0], [0.0, 0.0, 1.0]],
            inliers: 0,
            inlier_mask: Vec::new(),
        };
        assert_eq!(h.map(3.0, 4.0), Some((7.0, 7.0)));

        let vanishing = Homography {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
            inliers: 0,
            inlier_mask: Vec::new(),
        };
        assert_eq!(vanishing.map(0.0, 5.0), None);
    }

    #[test]
    fn test_norm_serializes_snake_case() {
        assert_eq!(serde_json::to_value(DescriptorNorm::Hamming).unwrap(), "hamming");
        assert_eq!(serde_json::to_value(DescriptorNorm::L2).unwrap(), "l2");
    }
}
