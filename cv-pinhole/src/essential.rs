use crate::{CameraIntrinsics, FundamentalMatrix, NormalizedKeyPoint};
use cv_core::{
    nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3},
    sample_consensus::Model,
    Bearing, CameraToCamera, FeatureMatch, Pose, Projective, TriangulatorRelative,
};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use log::*;
use thiserror::Error;

/// This stores an essential matrix, which is satisfied by the following constraint:
///
/// transpose(x') * E * x = 0
///
/// Where `x'` and `x` are homogeneous normalized image coordinates. You can get a
/// homogeneous normalized image coordinate by appending `1.0` to a `NormalizedKeyPoint`.
///
/// The essential matrix embodies the epipolar constraint between two calibrated images.
/// Every point along the ray out of camera A through `x` projects onto a single line on the
/// virtual image plane of camera B, the epipolar line. `E * x` is the normal of the plane
/// spanned by that ray and the baseline, so any `x'` on the epipolar line is perpendicular to it:
///
/// ```text
/// dot(transpose(E * x), x') = 0
/// ```
///
/// For a relative pose `x' = R * x + t` the essential matrix is `E = [t]x * R`. It has rank 2 and its two
/// non-zero singular values are equal. It is only defined up to scale, so the translation recovered from it
/// is only a direction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Computes `E = transpose(K') * F * K` from a fundamental matrix and the intrinsics of both cameras.
    pub fn from_fundamental(
        fundamental: &FundamentalMatrix,
        intrinsics_a: &CameraIntrinsics,
        intrinsics_b: &CameraIntrinsics,
    ) -> Self {
        fundamental.essential(intrinsics_a, intrinsics_b)
    }

    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This replaces the singular values with `(1, 1, 0)`, which gives an essential matrix
    /// with the same singular vectors and a fixed scale.
    ///
    /// ```
    /// use cv_core::nalgebra::Matrix3;
    /// use cv_pinhole::EssentialMatrix;
    /// let essential = EssentialMatrix(Matrix3::new(
    ///     0.2, -3.0, 0.1,
    ///     2.9, 0.3, -0.8,
    ///     -0.1, 0.9, 0.05,
    /// ));
    /// let conditioned = essential.recondition(1e-12, 1000).unwrap();
    /// let mut singular_values: Vec<f64> = conditioned.0.singular_values().iter().copied().collect();
    /// singular_values.sort_by(|a, b| b.partial_cmp(a).unwrap());
    /// assert!((singular_values[0] - 1.0).abs() < 1e-9);
    /// assert!((singular_values[1] - 1.0).abs() < 1e-9);
    /// assert!(singular_values[2].abs() < 1e-9);
    /// ```
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        // Singular values are sorted in descending order.
        svd.singular_values = Vector3::new(1.0, 1.0, 0.0);
        svd.recompose().ok().map(Self)
    }

    /// Returns two possible rotations for the essential matrix along with a translation
    /// bearing of arbitrary length. The translation is the left null vector of the
    /// essential matrix, so its sign is unknown and must be solved for by using a prior.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition is considered
    /// complete. Making this smaller may improve the precision. It is recommended to
    /// set this to no higher than `1e-6`.
    ///
    /// `max_iterations` is the maximum number of iterations that singular value decomposition
    /// will run on this matrix. Use this in soft realtime systems to cap the execution time.
    /// A `max_iterations` of `0` may execute indefinitely and is not recommended.
    ///
    /// ```
    /// use cv_core::CameraToCamera;
    /// use cv_core::nalgebra::{IsometryMatrix3, Rotation3, UnitQuaternion, Vector3};
    /// use cv_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// // Get the possible poses for the essential matrix created from `pose`.
    /// let (rot_a, rot_b, t) = EssentialMatrix::from(pose).possible_rotations_unscaled_translation(1e-6, 50).unwrap();
    /// // Compute residual rotations.
    /// let truth = UnitQuaternion::from(pose.0.rotation);
    /// let a_res = UnitQuaternion::from(rot_a).angle_to(&truth);
    /// let b_res = UnitQuaternion::from(rot_b).angle_to(&truth);
    /// // At least one rotation is correct.
    /// assert!(a_res < 1e-4 || b_res < 1e-4);
    /// // The translation points in the same (or reverse) direction
    /// let t_res = 1.0 - t.normalize().dot(&pose.0.translation.vector.normalize()).abs();
    /// assert!(t_res < 1e-4);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        let svd = self.0.try_svd(true, true, epsilon, max_iterations)?;
        let (mut u, mut v_t) = (svd.u?, svd.v_t?);
        // Last column of U is undetermined since d = (a a 0).
        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        // Last row of Vt is undetermined since d = (a a 0).
        if v_t.determinant() < 0.0 {
            v_t.row_mut(2).neg_mut();
        }
        Some((
            orthonormalize(u * w * v_t),
            orthonormalize(u * wt * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// See [`EssentialMatrix::possible_rotations_unscaled_translation`].
    ///
    /// This returns the four candidate poses `(R1, t)`, `(R2, t)`, `(R1, -t)` and `(R2, -t)`.
    /// Exactly one of them places the observed points in front of both cameras.
    ///
    /// ```
    /// use cv_core::CameraToCamera;
    /// use cv_core::nalgebra::{IsometryMatrix3, Rotation3, UnitQuaternion, Vector3};
    /// use cv_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// let rbs = EssentialMatrix::from(pose).possible_unscaled_poses(1e-6, 50).unwrap();
    /// let one_correct = rbs.iter().any(|&upose| {
    ///     let angle_residual = UnitQuaternion::from(upose.0.rotation)
    ///         .angle_to(&UnitQuaternion::from(pose.0.rotation));
    ///     let translation_residual =
    ///         1.0 - upose.0.translation.vector.normalize()
    ///                    .dot(&pose.0.translation.vector.normalize());
    ///     angle_residual < 1e-4 && translation_residual < 1e-4
    /// });
    /// assert!(one_correct);
    /// ```
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }

    /// Creates a [`PoseSolver`] that recovers the relative pose encoded by this essential matrix.
    pub fn pose_solver<T: TriangulatorRelative>(&self, triangulator: T) -> PoseSolver<T> {
        PoseSolver::new(*self, triangulator)
    }
}

/// Generates an essential matrix corresponding to this relative camera pose.
///
/// If a point `a` is transformed using [`Pose::transform`] into
/// a point `b`, then the essential matrix returned by this method will
/// give a residual of approximately `0.0` when you call
/// `essential.residual(&FeatureMatch(a, b))`.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.0.translation.vector.cross_matrix() * *pose.0.rotation.matrix())
    }
}

impl Model<FeatureMatch<NormalizedKeyPoint>> for EssentialMatrix {
    fn residual(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        // The result is a 1x1 matrix which we must get element 0 from.
        (b.bearing_unnormalized().transpose() * self.0 * a.bearing_unnormalized())[0]
            .abs()
    }
}

/// The reasons the relative pose could not be recovered from an essential matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoseRecoveryError {
    #[error("singular value decomposition of the essential matrix failed")]
    Decomposition,
    #[error("no correspondences were given to test the candidate poses")]
    NoCorrespondences,
    #[error("no candidate pose puts a majority of points in front of both cameras (best was {passing} of {total})")]
    Cheirality { passing: usize, total: usize },
}

/// How many correspondences one candidate pose places in front of both cameras.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub pose: CameraToCamera,
    pub passing: usize,
    pub total: usize,
}

impl CandidateScore {
    /// The fraction of correspondences that passed.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passing as f64 / self.total as f64
        }
    }
}

/// Resolves the four-fold ambiguity of an [`EssentialMatrix`] decomposition with the cheirality test.
///
/// Every correspondence is triangulated under each candidate pose. A correspondence votes for a
/// candidate if the triangulated point has positive depth in both cameras. The candidate with
/// the most votes wins, but only if it has a strict majority of the correspondences.
/// [`PoseSolver::max_depth`] optionally withholds the votes of distant points.
///
/// ```
/// use cv_core::{CameraPoint, CameraToCamera, FeatureMatch, Pose, Projective};
/// use cv_core::nalgebra::{Point3, Rotation3, UnitQuaternion, Vector3};
/// use cv_geom::triangulation::DltTriangulator;
/// use cv_pinhole::{EssentialMatrix, NormalizedKeyPoint};
///
/// let pose = CameraToCamera::from_parts(Vector3::new(-1.0, 0.1, 0.2), Rotation3::new(Vector3::new(0.0, 0.1, 0.0)));
/// let matches: Vec<_> = [(0.3, 0.2, 4.0), (-0.5, 0.1, 5.0), (0.2, -0.4, 3.0), (0.0, 0.0, 6.0)]
///     .iter()
///     .map(|&(x, y, z)| {
///         let a = CameraPoint::from_point(Point3::new(x, y, z));
///         let b = pose.transform(a);
///         FeatureMatch(
///             NormalizedKeyPoint::from_camera_point(a).unwrap(),
///             NormalizedKeyPoint::from_camera_point(b).unwrap(),
///         )
///     })
///     .collect();
/// let recovered = EssentialMatrix::from(pose)
///     .pose_solver(DltTriangulator::new())
///     .solve_unscaled(&matches)
///     .unwrap();
/// let residual = UnitQuaternion::from(recovered.0.rotation).angle_to(&UnitQuaternion::from(pose.0.rotation));
/// assert!(residual < 1e-6);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct PoseSolver<T> {
    essential: EssentialMatrix,
    triangulator: T,
    epsilon: f64,
    max_iterations: usize,
    consensus_ratio: f64,
    max_depth: f64,
}

impl<T> PoseSolver<T>
where
    T: TriangulatorRelative,
{
    /// Creates a solver with default settings.
    pub fn new(essential: EssentialMatrix, triangulator: T) -> Self {
        Self {
            essential,
            triangulator,
            epsilon: 1e-12,
            max_iterations: 1000,
            consensus_ratio: 0.5,
            max_depth: f64::INFINITY,
        }
    }

    /// Set the epsilon used in the singular value decomposition.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the singular value decomposition.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// The fraction of correspondences the winning candidate must strictly exceed.
    ///
    /// Default is `0.5`.
    #[must_use]
    pub fn consensus_ratio(self, consensus_ratio: f64) -> Self {
        Self {
            consensus_ratio,
            ..self
        }
    }

    /// Points at or beyond this depth (in baseline units, the baseline has length `1.0`) do not vote.
    ///
    /// Default is `f64::INFINITY`, so every point with positive depth in both cameras votes.
    #[must_use]
    pub fn max_depth(self, max_depth: f64) -> Self {
        Self { max_depth, ..self }
    }

    /// The four candidate poses of the reconditioned essential matrix.
    pub fn candidates(&self) -> Option<[CameraToCamera; 4]> {
        Self::candidates_of(self.essential, self.epsilon, self.max_iterations)
    }

    fn candidates_of(
        essential: EssentialMatrix,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        essential
            .recondition(epsilon, max_iterations)?
            .possible_unscaled_poses(epsilon, max_iterations)
    }

    /// Counts how many of the correspondences each candidate pose places in front of both cameras.
    pub fn score_candidates(
        &self,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Option<[CandidateScore; 4]> {
        self.candidates().map(|poses| poses.map(|pose| self.score(pose, matches)))
    }

    fn score(
        &self,
        pose: CameraToCamera,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> CandidateScore {
        let passing = matches
            .iter()
            .filter(|&&m| self.in_front(pose, m))
            .count();
        CandidateScore {
            pose,
            passing,
            total: matches.len(),
        }
    }

    fn in_front(&self, pose: CameraToCamera, FeatureMatch(a, b): FeatureMatch<NormalizedKeyPoint>) -> bool {
        self.triangulator
            .triangulate_relative(pose, a, b)
            .map(|point_a| {
                let depth_a = point_a.depth();
                let depth_b = pose.transform(point_a).depth();
                // NaN depths fail every comparison.
                depth_a > 0.0
                    && depth_b > 0.0
                    && depth_a < self.max_depth
                    && depth_b < self.max_depth
            })
            .unwrap_or(false)
    }

    /// Recovers the relative pose with a unit length translation.
    ///
    /// If the winning rotation turns out to be a reflection, the essential matrix is negated
    /// and the selection is performed once more.
    pub fn solve_unscaled(
        &self,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Result<CameraToCamera, PoseRecoveryError> {
        self.solve_scored(matches).map(|score| score.pose)
    }

    /// Same as [`PoseSolver::solve_unscaled`], but also reports how many correspondences voted for the pose.
    pub fn solve_scored(
        &self,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Result<CandidateScore, PoseRecoveryError> {
        if matches.is_empty() {
            return Err(PoseRecoveryError::NoCorrespondences);
        }
        let best = self.select(self.essential, matches)?;
        // The decomposition fixes det U = det V = +1, so a reflection only shows up here if that
        // normalization is bypassed.
        if is_proper(&best.pose) {
            return Ok(best);
        }
        debug!("winning rotation is a reflection, retrying with the negated essential matrix");
        let best = self.select(EssentialMatrix(-self.essential.0), matches)?;
        if is_proper(&best.pose) {
            Ok(best)
        } else {
            Err(PoseRecoveryError::Decomposition)
        }
    }

    fn select(
        &self,
        essential: EssentialMatrix,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Result<CandidateScore, PoseRecoveryError> {
        let candidates = Self::candidates_of(essential, self.epsilon, self.max_iterations)
            .ok_or(PoseRecoveryError::Decomposition)?;
        let scores = candidates.map(|pose| self.score(pose, matches));
        for (ix, score) in scores.iter().enumerate() {
            debug!(
                "candidate {} has {} of {} points in front of both cameras",
                ix, score.passing, score.total
            );
        }
        // The first candidate wins ties.
        let best = scores
            .iter()
            .skip(1)
            .fold(scores[0], |best, &score| {
                if score.passing > best.passing {
                    score
                } else {
                    best
                }
            });
        if best.passing as f64 > self.consensus_ratio * best.total as f64 {
            Ok(best)
        } else {
            Err(PoseRecoveryError::Cheirality {
                passing: best.passing,
                total: best.total,
            })
        }
    }
}

fn is_proper(pose: &CameraToCamera) -> bool {
    pose.0.rotation.matrix().determinant() > 0.0
}

/// Rounding leaves `U * W * Vt` slightly off orthonormal.
fn orthonormalize(matrix: Matrix3<f64>) -> Rotation3<f64> {
    let quaternion = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(matrix));
    UnitQuaternion::new_normalize(quaternion.into_inner()).to_rotation_matrix()
}
