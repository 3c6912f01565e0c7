//! Two-view structure from motion.
//!
//! [`TwoView`] recovers the relative pose of two calibrated cameras and the sparse structure they observe
//! from pixel correspondences. It runs a single forward pass through these stages:
//!
//! 1. Validate the intrinsics and the correspondences.
//! 2. Estimate the fundamental matrix with the normalized eight-point algorithm under least median of squares.
//! 3. Derive the essential matrix and pick the one of its four poses that passes the cheirality test.
//! 4. Triangulate every correspondence and reproject it into both images.
//!
//! Any stage failure is terminal and reported as a [`ReconstructionError`] that names the [`Stage`].
//! A correspondence that can not be triangulated does not fail the reconstruction; its entry in
//! [`Reconstruction::points`] is a [`DegeneratePoint`] instead.
//!
//! The translation is only known up to scale, so the pose has a unit length translation and the points
//! are in units of the baseline.

mod export;
mod settings;

pub use export::*;
pub use settings::*;

use cv_core::nalgebra::{Matrix3, Matrix3x4, Point2, Point3, UnitQuaternion};
use cv_core::{CameraModel, CameraToCamera, FeatureMatch, KeyPoint, KeyPointsMatch, Pose};
use cv_geom::triangulation::{DegeneratePoint, DltTriangulator, ProjectionMatrix, TriangulatedPoint};
use cv_pinhole::{
    CameraIntrinsics, CameraIntrinsicsDistortion, EssentialMatrix, FundamentalMatrix,
    IntrinsicsError, NormalizedKeyPoint, PoseRecoveryError,
};
use eight_point::{
    EightPoint, FundamentalError, LeastMedianSquares, RandomSubsets, SubsetSampler,
    MIN_CORRESPONDENCES,
};
use log::*;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use thiserror::Error;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The stages of the reconstruction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Stage {
    Input,
    Estimation,
    Recovery,
    Triangulation,
}

/// The input of a reconstruction was malformed.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InputError {
    #[error("image 1 has {first} points, but image 2 has {second}")]
    MismatchedLengths { first: usize, second: usize },
    #[error("at least {required} correspondences are required, but {actual} were given")]
    InsufficientCorrespondences { required: usize, actual: usize },
    #[error("correspondence {index} has a coordinate that is not finite")]
    NonFinite { index: usize },
    #[error("the intrinsics of camera {camera} are invalid")]
    Intrinsics {
        camera: usize,
        #[source]
        source: IntrinsicsError,
    },
}

/// A reconstruction failed, and no pose or structure is available.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ReconstructionError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("fundamental matrix estimation failed: {0}")]
    Estimation(#[from] FundamentalError),
    #[error("pose recovery failed: {0}")]
    Recovery(#[from] PoseRecoveryError),
    #[error("none of the {total} correspondences could be triangulated")]
    Triangulation { total: usize },
}

impl ReconstructionError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidInput(_) => Stage::Input,
            Self::Estimation(_) => Stage::Estimation,
            Self::Recovery(_) => Stage::Recovery,
            Self::Triangulation { .. } => Stage::Triangulation,
        }
    }
}

/// A point triangulated from one correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructedPoint {
    /// The point in the frame of camera 1.
    pub point: Point3<f64>,
    /// The reprojection of the point into image 1 and image 2 in (distorted) pixels.
    pub reprojections: [Point2<f64>; 2],
    /// The pixel distance between each observation and its reprojection.
    pub reprojection_errors: [f64; 2],
}

impl ReconstructedPoint {
    /// The mean of the reprojection errors in both images.
    pub fn mean_reprojection_error(&self) -> f64 {
        0.5 * (self.reprojection_errors[0] + self.reprojection_errors[1])
    }
}

/// The result of a two-view reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// The fundamental matrix in pixels, with unit frobenius norm.
    pub fundamental: FundamentalMatrix,
    /// The essential matrix `transpose(K2) * F * K1`.
    pub essential: EssentialMatrix,
    /// The pose that maps points from camera 1 into camera 2, with a unit length translation.
    pub pose: CameraToCamera,
    /// The correspondences least median of squares kept, index-aligned with the input.
    pub inliers: Vec<bool>,
    /// The pixel projection matrices `K1 * [I | 0]` and `K2 * [R | t]`.
    pub projections: [ProjectionMatrix; 2],
    /// One entry per correspondence, index-aligned with the input.
    pub points: Vec<Result<ReconstructedPoint, DegeneratePoint>>,
}

impl Reconstruction {
    /// The `[R | t]` matrix of the pose.
    pub fn pose_matrix(&self) -> Matrix3x4<f64> {
        self.pose.extrinsic_matrix()
    }

    /// The triangulated points, with `None` for the degenerate ones.
    pub fn point_cloud(&self) -> Vec<Option<Point3<f64>>> {
        self.points
            .iter()
            .map(|point| point.as_ref().ok().map(|p| p.point))
            .collect()
    }

    /// Whether each correspondence was triangulated.
    pub fn validity(&self) -> Vec<bool> {
        self.points.iter().map(Result::is_ok).collect()
    }

    /// The indices of the correspondences that could not be triangulated.
    pub fn degenerate_points(&self) -> Vec<usize> {
        self.points
            .iter()
            .filter_map(|point| point.err().map(|DegeneratePoint { index }| index))
            .collect()
    }

    /// The mean pixel reprojection error over both images of every triangulated point.
    ///
    /// Returns `None` if no point was triangulated.
    pub fn mean_reprojection_error(&self) -> Option<f64> {
        let errors: Vec<f64> = self
            .points
            .iter()
            .filter_map(|point| point.as_ref().ok())
            .map(ReconstructedPoint::mean_reprojection_error)
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.iter().sum::<f64>() / errors.len() as f64)
        }
    }
}

/// Reconstructs two views with the default settings and no lens distortion.
///
/// `cam1` and `cam2` are the intrinsic matrices of the cameras. `points1` and `points2` are
/// index-aligned pixel coordinates in image 1 and image 2.
///
/// ```
/// use cv_core::nalgebra::{Matrix3, Point2};
/// use cv_sfm::{reconstruct, InputError, ReconstructionError, Stage};
/// let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
/// let points = [Point2::new(10.0, 20.0); 7];
/// let error = reconstruct(&k, &k, &points, &points).unwrap_err();
/// assert_eq!(error.stage(), Stage::Input);
/// assert_eq!(
///     error,
///     ReconstructionError::InvalidInput(InputError::InsufficientCorrespondences { required: 8, actual: 7 }),
/// );
/// ```
pub fn reconstruct(
    cam1: &Matrix3<f64>,
    cam2: &Matrix3<f64>,
    points1: &[Point2<f64>],
    points2: &[Point2<f64>],
) -> Result<Reconstruction, ReconstructionError> {
    TwoView::default().reconstruct(cam1, cam2, points1, points2)
}

/// Reconstructs the relative pose and structure of two views.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TwoView {
    pub settings: TwoViewSettings,
}

impl TwoView {
    pub fn new(settings: TwoViewSettings) -> Self {
        Self { settings }
    }

    /// Reconstructs from intrinsic matrices and index-aligned pixel coordinates without lens distortion.
    pub fn reconstruct(
        &self,
        cam1: &Matrix3<f64>,
        cam2: &Matrix3<f64>,
        points1: &[Point2<f64>],
        points2: &[Point2<f64>],
    ) -> Result<Reconstruction, ReconstructionError> {
        let camera_a = intrinsics(1, cam1)?;
        let camera_b = intrinsics(2, cam2)?;
        if points1.len() != points2.len() {
            return Err(InputError::MismatchedLengths {
                first: points1.len(),
                second: points2.len(),
            }
            .into());
        }
        let matches: Vec<KeyPointsMatch> = points1
            .iter()
            .zip(points2)
            .map(|(&a, &b)| FeatureMatch(KeyPoint(a), KeyPoint(b)))
            .collect();
        self.reconstruct_cameras(
            &CameraIntrinsicsDistortion::from(camera_a),
            &CameraIntrinsicsDistortion::from(camera_b),
            &matches,
        )
    }

    /// Reconstructs from two camera models and pixel correspondences.
    ///
    /// Subsets are drawn at random from a generator seeded with [`TwoViewSettings::consensus_seed`],
    /// so the result is reproducible.
    pub fn reconstruct_cameras(
        &self,
        camera_a: &CameraIntrinsicsDistortion,
        camera_b: &CameraIntrinsicsDistortion,
        matches: &[KeyPointsMatch],
    ) -> Result<Reconstruction, ReconstructionError> {
        let sampler = RandomSubsets::new(Pcg64::seed_from_u64(self.settings.consensus_seed));
        self.reconstruct_with_sampler(camera_a, camera_b, matches, sampler)
    }

    /// Reconstructs from two camera models and pixel correspondences, drawing the subsets of the robust
    /// fundamental matrix estimation from `sampler`.
    pub fn reconstruct_with_sampler<S>(
        &self,
        camera_a: &CameraIntrinsicsDistortion,
        camera_b: &CameraIntrinsicsDistortion,
        matches: &[KeyPointsMatch],
        sampler: S,
    ) -> Result<Reconstruction, ReconstructionError>
    where
        S: SubsetSampler,
    {
        intrinsics(1, &camera_a.simple_intrinsics.matrix())?;
        intrinsics(2, &camera_b.simple_intrinsics.matrix())?;
        validate_matches(matches)?;
        info!("reconstructing from {} correspondences", matches.len());

        let settings = &self.settings;
        let normalized: Vec<FeatureMatch<NormalizedKeyPoint>> = matches
            .iter()
            .map(|&FeatureMatch(a, b)| FeatureMatch(camera_a.calibrate(a), camera_b.calibrate(b)))
            .collect();

        // The epipolar geometry of the pixels only holds once the lens distortion is removed.
        let pixels: Vec<KeyPointsMatch> = matches
            .iter()
            .zip(&normalized)
            .map(|(&FeatureMatch(a, b), &FeatureMatch(na, nb))| {
                FeatureMatch(
                    undistorted_pixel(camera_a, a, na),
                    undistorted_pixel(camera_b, b, nb),
                )
            })
            .collect();
        let eight_point = EightPoint {
            epsilon: settings.svd_epsilon,
            iterations: settings.svd_max_iterations,
            degeneracy_threshold: settings.degeneracy_threshold,
        };
        let mut consensus = LeastMedianSquares::new(sampler)
            .with_confidence(settings.consensus_confidence)
            .outlier_ratio(settings.consensus_outlier_ratio)
            .max_iterations(settings.consensus_max_iterations);
        let estimate = eight_point.estimate_robust(&pixels, &mut consensus)?;
        info!(
            "estimated the fundamental matrix with {} of {} inliers and median residual {}",
            estimate.inlier_count(),
            matches.len(),
            estimate.median
        );

        let essential = EssentialMatrix::from_fundamental(
            &estimate.fundamental,
            &camera_a.simple_intrinsics,
            &camera_b.simple_intrinsics,
        );
        let triangulator = DltTriangulator::new()
            .epsilon(settings.svd_epsilon)
            .max_iterations(settings.svd_max_iterations)
            .infinity_threshold(settings.infinity_threshold);
        let inliers: Vec<_> = normalized
            .iter()
            .zip(&estimate.inliers)
            .filter(|&(_, &inlier)| inlier)
            .map(|(&m, _)| m)
            .collect();
        let mut solver = essential
            .pose_solver(triangulator)
            .epsilon(settings.svd_epsilon)
            .max_iterations(settings.svd_max_iterations)
            .consensus_ratio(settings.cheirality_minimum_ratio);
        if let Some(max_depth) = settings.cheirality_max_depth {
            solver = solver.max_depth(max_depth);
        }
        let chosen = solver.solve_scored(&inliers)?;
        let pose = chosen.pose;
        info!(
            "recovered a rotation of {} radians and translation direction {:?} with {} of {} points in front of both cameras",
            UnitQuaternion::from(pose.0.rotation).angle(),
            pose.0.translation.vector.as_slice(),
            chosen.passing,
            chosen.total
        );

        let points: Vec<_> = triangulator
            .triangulate_all(
                &ProjectionMatrix::identity(),
                &ProjectionMatrix::from_pose(&Matrix3::identity(), pose),
                normalized.iter().map(|&FeatureMatch(a, b)| (a.0, b.0)),
            )
            .into_iter()
            .zip(matches)
            .map(|(point, &FeatureMatch(a, b))| {
                point.map(|point| to_pixels(point, camera_a, camera_b, [a.0, b.0]))
            })
            .collect();
        let valid = points.iter().filter(|point| point.is_ok()).count();
        if valid == 0 {
            return Err(ReconstructionError::Triangulation {
                total: points.len(),
            });
        }

        let reconstruction = Reconstruction {
            fundamental: estimate.fundamental,
            essential,
            pose,
            inliers: estimate.inliers,
            projections: [
                ProjectionMatrix::from_pose(
                    &camera_a.simple_intrinsics.matrix(),
                    CameraToCamera::identity(),
                ),
                ProjectionMatrix::from_pose(&camera_b.simple_intrinsics.matrix(), pose),
            ],
            points,
        };
        info!(
            "triangulated {} of {} points with mean reprojection error {:?}",
            valid,
            matches.len(),
            reconstruction.mean_reprojection_error()
        );
        Ok(reconstruction)
    }
}

fn intrinsics(camera: usize, matrix: &Matrix3<f64>) -> Result<CameraIntrinsics, InputError> {
    CameraIntrinsics::from_matrix(*matrix).map_err(|source| InputError::Intrinsics { camera, source })
}

fn validate_matches(matches: &[KeyPointsMatch]) -> Result<(), InputError> {
    if matches.len() < MIN_CORRESPONDENCES {
        return Err(InputError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            actual: matches.len(),
        });
    }
    let finite = |KeyPoint(p): KeyPoint| p.coords.iter().all(|n| n.is_finite());
    match matches
        .iter()
        .position(|&FeatureMatch(a, b)| !finite(a) || !finite(b))
    {
        Some(index) => Err(InputError::NonFinite { index }),
        None => Ok(()),
    }
}

/// Moves a pixel to where it would be seen without lens distortion.
fn undistorted_pixel(
    camera: &CameraIntrinsicsDistortion,
    pixel: KeyPoint,
    normalized: NormalizedKeyPoint,
) -> KeyPoint {
    if camera.distortion.is_zero() {
        pixel
    } else {
        camera.simple_intrinsics.uncalibrate(normalized)
    }
}

/// Maps a point triangulated in normalized image coordinates to pixels.
fn to_pixels(
    point: TriangulatedPoint,
    camera_a: &CameraIntrinsicsDistortion,
    camera_b: &CameraIntrinsicsDistortion,
    observations: [Point2<f64>; 2],
) -> ReconstructedPoint {
    let [a, b] = point.reprojections;
    let reprojections = [
        camera_a.uncalibrate(NormalizedKeyPoint(a)).0,
        camera_b.uncalibrate(NormalizedKeyPoint(b)).0,
    ];
    ReconstructedPoint {
        point: point.point,
        reprojections,
        reprojection_errors: [0, 1].map(|ix| (observations[ix] - reprojections[ix]).norm()),
    }
}
