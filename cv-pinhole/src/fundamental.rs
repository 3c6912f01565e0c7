use crate::{CameraIntrinsics, EssentialMatrix};
use cv_core::{
    nalgebra::{Matrix3, Point2, Vector3},
    sample_consensus::Model,
    FeatureMatch, ImagePoint, KeyPointsMatch,
};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};

/// This stores a fundamental matrix, which is satisfied by the following constraint:
///
/// transpose(x') * F * x = 0
///
/// Where `x'` and `x` are homogeneous pixel coordinates in image B and image A respectively.
/// Unlike the [`EssentialMatrix`], the fundamental matrix works directly on pixels, so it
/// absorbs the intrinsic matrices of both cameras:
///
/// ```text
/// F = inverse(transpose(K')) * E * inverse(K)
/// ```
///
/// `F * x` is the epipolar line in image B on which `x'` must lie, and `transpose(F) * x'`
/// is the epipolar line in image A on which `x` must lie. A valid fundamental matrix has rank 2.
/// It is only defined up to scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct FundamentalMatrix(pub Matrix3<f64>);

impl FundamentalMatrix {
    /// Computes the fundamental matrix that corresponds to an essential matrix between two cameras.
    ///
    /// ```
    /// use cv_core::{CameraToCamera, Pose};
    /// use cv_core::nalgebra::{Rotation3, Vector3, Vector2, Point2};
    /// use cv_pinhole::{CameraIntrinsics, EssentialMatrix, FundamentalMatrix};
    /// let intrinsics = CameraIntrinsics::identity()
    ///     .focals(Vector2::new(700.0, 650.0))
    ///     .principal_point(Point2::new(320.0, 240.0));
    /// let pose = CameraToCamera::from_parts(Vector3::new(0.3, -0.1, 0.2), Rotation3::new(Vector3::new(0.05, 0.1, 0.0)));
    /// let essential = EssentialMatrix::from(pose);
    /// let fundamental = FundamentalMatrix::from_essential(essential, &intrinsics, &intrinsics);
    /// let recovered = fundamental.essential(&intrinsics, &intrinsics);
    /// assert!((recovered.0 - essential.0).norm() < 1e-9);
    /// ```
    pub fn from_essential(
        essential: EssentialMatrix,
        intrinsics_a: &CameraIntrinsics,
        intrinsics_b: &CameraIntrinsics,
    ) -> Self {
        Self(intrinsics_b.inverse_matrix().transpose() * essential.0 * intrinsics_a.inverse_matrix())
    }

    /// Computes the essential matrix `E = transpose(K') * F * K` between the two cameras.
    pub fn essential(
        &self,
        intrinsics_a: &CameraIntrinsics,
        intrinsics_b: &CameraIntrinsics,
    ) -> EssentialMatrix {
        EssentialMatrix(intrinsics_b.matrix().transpose() * self.0 * intrinsics_a.matrix())
    }

    /// Evaluates `transpose(b) * F * a`, which is zero for a perfect correspondence.
    pub fn epipolar_constraint(&self, a: impl ImagePoint, b: impl ImagePoint) -> f64 {
        let a = a.image_point().to_homogeneous();
        let b = b.image_point().to_homogeneous();
        (b.transpose() * self.0 * a)[0]
    }

    /// The epipolar line `F * a` in image B as `(l0, l1, l2)` with `l0 x + l1 y + l2 = 0`.
    pub fn epipolar_line_b(&self, a: impl ImagePoint) -> Vector3<f64> {
        self.0 * a.image_point().to_homogeneous()
    }

    /// The epipolar line `transpose(F) * b` in image A.
    pub fn epipolar_line_a(&self, b: impl ImagePoint) -> Vector3<f64> {
        self.0.transpose() * b.image_point().to_homogeneous()
    }

    /// Squared distances of `a` to its epipolar line in image A and of `b` to its epipolar line
    /// in image B, in that order, in squared pixels.
    ///
    /// If the line is undefined (the point lies on an epipole) the distance is infinite.
    pub fn squared_epipolar_distances(&self, a: impl ImagePoint, b: impl ImagePoint) -> [f64; 2] {
        let a = a.image_point();
        let b = b.image_point();
        let line_a = self.epipolar_line_a(b);
        let line_b = self.epipolar_line_b(a);
        [
            squared_line_distance(line_a, a),
            squared_line_distance(line_b, b),
        ]
    }

    /// Forces the matrix to have rank 2 by zeroing its smallest singular value.
    ///
    /// Returns `None` if the singular value decomposition did not converge.
    pub fn enforce_rank(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.0.try_svd(true, true, epsilon, max_iterations)?;
        // Singular values are sorted in descending order.
        svd.singular_values[2] = 0.0;
        svd.recompose().ok().map(Self)
    }

    /// Scales the matrix to unit frobenius norm, flipping its sign so that the
    /// largest magnitude entry is positive.
    ///
    /// Returns `None` for the zero matrix.
    pub fn normalize(self) -> Option<Self> {
        let norm = self.0.norm();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }
        let largest = self
            .0
            .iter()
            .copied()
            .max_by_key(|n| float_ord::FloatOrd(n.abs()))?;
        Some(Self(self.0 * (largest.signum() / norm)))
    }

    /// Retrieves the smallest singular value relative to the largest.
    ///
    /// This is `0.0` for a rank-2 matrix.
    pub fn rank_deficiency(&self, epsilon: f64, max_iterations: usize) -> Option<f64> {
        let singular_values = self.0.try_svd(false, false, epsilon, max_iterations)?.singular_values;
        Some(singular_values[2] / singular_values[0])
    }
}

fn squared_line_distance(line: Vector3<f64>, point: Point2<f64>) -> f64 {
    let normal = line.xy().norm_squared();
    if normal == 0.0 {
        return f64::INFINITY;
    }
    let algebraic = line.dot(&point.to_homogeneous());
    algebraic * algebraic / normal
}

/// The residual of a pixel correspondence is the larger of the two squared
/// point-to-epipolar-line distances, so it is in squared pixels.
impl Model<KeyPointsMatch> for FundamentalMatrix {
    fn residual(&self, data: &KeyPointsMatch) -> f64 {
        let &FeatureMatch(a, b) = data;
        let [da, db] = self.squared_epipolar_distances(a, b);
        da.max(db)
    }
}
