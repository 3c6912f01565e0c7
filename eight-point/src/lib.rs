//! Fundamental matrix estimation from pixel correspondences.
//!
//! [`EightPoint`] implements the normalized eight-point algorithm by Richard Hartley. It fits a
//! [`FundamentalMatrix`] to eight or more correspondences, and it is also a
//! [`sample_consensus::Estimator`](cv_core::sample_consensus::Estimator) so it can be driven by any
//! consensus algorithm. [`LeastMedianSquares`] is the consensus algorithm provided here; it draws minimal
//! subsets from a [`SubsetSampler`], which is either random and seedable ([`RandomSubsets`]) or a fixed
//! sequence ([`FixedSubsets`]).
//!
//! [`EightPoint::estimate_robust`] combines the two: least median of squares over random subsets
//! followed by a refit on every inlier.

mod lmeds;
mod sampler;

pub use lmeds::*;
pub use sampler::*;

use cv_core::{
    nalgebra::{DMatrix, Matrix3, Point2},
    sample_consensus::{Estimator, Model},
    FeatureMatch, ImagePoint, KeyPointsMatch,
};
use cv_pinhole::FundamentalMatrix;
use log::*;
use thiserror::Error;

/// The number of correspondences the eight-point algorithm needs.
pub const MIN_CORRESPONDENCES: usize = 8;

/// The reasons a fundamental matrix could not be estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FundamentalError {
    #[error("at least {required} correspondences are required, but {actual} were given")]
    InsufficientCorrespondences { required: usize, actual: usize },
    #[error("the correspondences do not determine a unique fundamental matrix")]
    DegenerateConfiguration,
}

/// A robustly estimated fundamental matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalEstimate {
    pub fundamental: FundamentalMatrix,
    /// The inlier mask, index-aligned with the correspondences.
    pub inliers: Vec<bool>,
    /// The median residual (squared pixels) of the consensus model.
    pub median: f64,
}

impl FundamentalEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }
}

/// Computes the similarity transform that moves the centroid of the points to the origin
/// and makes their mean distance from the origin `sqrt(2)`.
///
/// Returns `None` if all of the points coincide.
fn hartley_normalization(points: impl Iterator<Item = Point2<f64>> + Clone) -> Option<Matrix3<f64>> {
    let count = points.clone().count() as f64;
    let centroid = points.clone().map(|p| p.coords).sum::<cv_core::nalgebra::Vector2<f64>>() / count;
    let mean_distance = points.map(|p| (p.coords - centroid).norm()).sum::<f64>() / count;
    if !mean_distance.is_finite() || mean_distance <= f64::EPSILON * (1.0 + centroid.norm()) {
        return None;
    }
    let scale = std::f64::consts::SQRT_2 / mean_distance;
    #[rustfmt::skip]
    let transform = Matrix3::new(
        scale,  0.0,    -scale * centroid.x,
        0.0,    scale,  -scale * centroid.y,
        0.0,    0.0,    1.0,
    );
    Some(transform)
}

/// Builds the design matrix of the epipolar constraint `transpose(b) * F * a = 0` with `F` flattened
/// in row-major order. It is padded with zero rows to at least nine rows so that the full right singular
/// basis is available.
fn encode_epipolar_equation(
    matches: impl Iterator<Item = KeyPointsMatch>,
    count: usize,
    transform_a: &Matrix3<f64>,
    transform_b: &Matrix3<f64>,
) -> DMatrix<f64> {
    let mut design = DMatrix::zeros(count.max(9), 9);
    for (mut row, FeatureMatch(a, b)) in design.row_iter_mut().zip(matches) {
        let a = transform_a * a.image_point().to_homogeneous();
        let b = transform_b * b.image_point().to_homogeneous();
        for i in 0..3 {
            for j in 0..3 {
                row[3 * i + j] = b[i] * a[j];
            }
        }
    }
    design
}

/// Performs the normalized
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman to estimate a [`FundamentalMatrix`].
///
/// The points of each image are first translated and scaled so that their centroid is at the origin
/// and their mean distance to it is `sqrt(2)`. The least squares solution of the linear epipolar constraint
/// is then forced to rank 2 and transformed back to pixels. The result has unit frobenius norm.
///
/// ```
/// use cv_core::{FeatureMatch, KeyPoint};
/// use cv_core::nalgebra::Point2;
/// use eight_point::{EightPoint, FundamentalError};
/// // Every point lies on the same line, so the epipolar geometry is undetermined.
/// let matches = (0..10).map(|i| {
///     let x = i as f64;
///     FeatureMatch(KeyPoint(Point2::new(x, 2.0 * x + 1.0)), KeyPoint(Point2::new(x + 3.0, 2.0 * x)))
/// });
/// assert_eq!(EightPoint::new().from_matches(matches), Err(FundamentalError::DegenerateConfiguration));
/// ```
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
    /// The second smallest singular value of the design matrix relative to the largest
    /// below which the solution is not unique.
    pub degeneracy_threshold: f64,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fits a fundamental matrix to all of the given correspondences.
    pub fn from_matches<I>(&self, data: I) -> Result<FundamentalMatrix, FundamentalError>
    where
        I: Iterator<Item = KeyPointsMatch> + Clone,
    {
        let count = data.clone().count();
        if count < MIN_CORRESPONDENCES {
            return Err(FundamentalError::InsufficientCorrespondences {
                required: MIN_CORRESPONDENCES,
                actual: count,
            });
        }
        let degenerate = FundamentalError::DegenerateConfiguration;
        let transform_a = hartley_normalization(data.clone().map(|FeatureMatch(a, _)| a.image_point()))
            .ok_or(degenerate)?;
        let transform_b = hartley_normalization(data.clone().map(|FeatureMatch(_, b)| b.image_point()))
            .ok_or(degenerate)?;

        let design = encode_epipolar_equation(data, count, &transform_a, &transform_b);
        let svd = design
            .try_svd(false, true, self.epsilon, self.iterations)
            .ok_or(degenerate)?;
        // Singular values are sorted in descending order. A one dimensional null space
        // requires every singular value but the last to be significant.
        let singular_values = &svd.singular_values;
        if !(singular_values[7] > self.degeneracy_threshold * singular_values[0]) {
            return Err(degenerate);
        }
        let v_t = svd.v_t.ok_or(degenerate)?;
        // The null vector is in row-major order, but `from_iterator` fills columns first.
        let normalized = FundamentalMatrix(Matrix3::from_iterator(v_t.row(8).iter().copied()).transpose());

        let normalized = normalized
            .enforce_rank(self.epsilon, self.iterations)
            .ok_or(degenerate)?;
        FundamentalMatrix(transform_b.transpose() * normalized.0 * transform_a)
            .normalize()
            .ok_or(degenerate)
    }

    /// Estimates the fundamental matrix with least median of squares and refits it on the inliers.
    ///
    /// With exactly eight correspondences there is nothing to be robust against, so the matrix is fit
    /// directly and every correspondence is an inlier.
    pub fn estimate_robust<S>(
        &self,
        matches: &[KeyPointsMatch],
        consensus: &mut LeastMedianSquares<S>,
    ) -> Result<FundamentalEstimate, FundamentalError>
    where
        S: SubsetSampler,
    {
        if matches.len() < MIN_CORRESPONDENCES {
            return Err(FundamentalError::InsufficientCorrespondences {
                required: MIN_CORRESPONDENCES,
                actual: matches.len(),
            });
        }
        if matches.len() == MIN_CORRESPONDENCES {
            let fundamental = self.from_matches(matches.iter().copied())?;
            let mut residuals: Vec<f64> = matches.iter().map(|m| fundamental.residual(m)).collect();
            residuals.sort_unstable_by_key(|&r| float_ord::FloatOrd(r));
            return Ok(FundamentalEstimate {
                fundamental,
                inliers: vec![true; matches.len()],
                median: residuals[residuals.len() / 2],
            });
        }

        let fit = consensus
            .fit(self, matches)
            .ok_or(FundamentalError::DegenerateConfiguration)?;
        let inlier_count = fit.inlier_count();
        info!(
            "least median of squares kept {} of {} correspondences with median residual {}",
            inlier_count,
            matches.len(),
            fit.median
        );

        let mut fundamental = fit.model;
        if inlier_count >= MIN_CORRESPONDENCES {
            let inliers = matches
                .iter()
                .zip(&fit.inliers)
                .filter(|&(_, &inlier)| inlier)
                .map(|(&m, _)| m);
            match self.from_matches(inliers) {
                Ok(refined) => fundamental = refined,
                Err(e) => debug!("keeping the consensus model since the inlier refit failed: {}", e),
            }
        }
        Ok(FundamentalEstimate {
            fundamental,
            inliers: fit.inliers,
            median: fit.median,
        })
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
            degeneracy_threshold: 1e-8,
        }
    }
}

impl Estimator<KeyPointsMatch> for EightPoint {
    type Model = FundamentalMatrix;
    type ModelIter = Option<FundamentalMatrix>;
    const MIN_SAMPLES: usize = MIN_CORRESPONDENCES;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = KeyPointsMatch> + Clone,
    {
        self.from_matches(data)
            .map_err(|e| trace!("skipping sample: {}", e))
            .ok()
    }
}
