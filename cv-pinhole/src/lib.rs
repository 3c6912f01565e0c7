//! This crate seamlessly plugs into `cv-core` and provides pinhole camera models with and without distortion correction.
//! It can be used to convert image coordinates into normalized image coordinates (points on the virtual image plane
//! at depth `1.0`) pointing towards where the light came from that hit that pixel. It can also be used to convert
//! backwards from the normalized coordinates to pixels using the `uncalibrate` method from the [`cv_core::CameraModel`] trait.
//!
//! It also contains the two-view epipolar geometry that sits on top of the pinhole model:
//! the [`FundamentalMatrix`] relating pixel coordinates of two cameras, the [`EssentialMatrix`]
//! relating their normalized coordinates, and the [`PoseSolver`] which recovers the relative pose
//! from an essential matrix.

mod distortion;
mod essential;
mod fundamental;

pub use distortion::*;
pub use essential::*;
pub use fundamental::*;

use cv_core::nalgebra::{Matrix3, Point2, Vector2, Vector3};
use cv_core::{Bearing, CameraModel, CameraPoint, ImagePoint, KeyPoint, Projective};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use thiserror::Error;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates. This keypoint has been corrected
/// for distortion and normalized based on the camrea intrinsic matrix.
/// Please note that the intrinsic matrix accounts for the natural focal length
/// and any magnification to the image. Ultimately, the key points must be
/// represented by their position on the camera sensor and normalized to the
/// focal length of the camera.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// Tries to convert the [`CameraPoint`] into a [`NormalizedKeyPoint`], but it may fail
    /// in extreme conditions, in which case `None` is returned.
    pub fn from_camera_point(point: CameraPoint) -> Option<Self> {
        Point2::from_homogeneous(point.bearing_unnormalized()).map(Self)
    }
}

impl Bearing for NormalizedKeyPoint {
    fn bearing_unnormalized(&self) -> Vector3<f64> {
        self.0.coords.push(1.0)
    }
}

/// The reasons a 3x3 matrix can not be used as a pinhole intrinsic matrix.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IntrinsicsError {
    #[error("intrinsic matrix contains a non-finite entry")]
    NonFinite,
    #[error("intrinsic matrix is not upper triangular")]
    NotUpperTriangular,
    #[error("intrinsic matrix is singular")]
    Singular,
}

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// For a high quality camera, this may be sufficient to normalize image coordinates.
/// Undistortion may also be necessary to normalize image coordinates, see [`CameraIntrinsicsDistortion`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    /// Extracts the intrinsics from a 3x3 intrinsic matrix of the form
    ///
    /// ```text
    /// fx  s   cx
    /// 0   fy  cy
    /// 0   0   w
    /// ```
    ///
    /// The matrix is divided by `w` first, so any non-zero scale is accepted.
    ///
    /// ```
    /// use cv_core::nalgebra::Matrix3;
    /// use cv_pinhole::{CameraIntrinsics, IntrinsicsError};
    /// let k = Matrix3::new(
    ///     1000.0, 0.0, 640.0,
    ///     0.0, 1000.0, 360.0,
    ///     0.0, 0.0, 2.0,
    /// );
    /// let intrinsics = CameraIntrinsics::from_matrix(k).unwrap();
    /// assert_eq!(intrinsics.focals.x, 500.0);
    /// assert_eq!(intrinsics.principal_point.y, 180.0);
    /// assert_eq!(intrinsics.matrix(), k / 2.0);
    ///
    /// let singular = Matrix3::new(
    ///     0.0, 0.0, 640.0,
    ///     0.0, 1000.0, 360.0,
    ///     0.0, 0.0, 1.0,
    /// );
    /// assert_eq!(CameraIntrinsics::from_matrix(singular), Err(IntrinsicsError::Singular));
    /// ```
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self, IntrinsicsError> {
        if !matrix.iter().all(|n| n.is_finite()) {
            return Err(IntrinsicsError::NonFinite);
        }
        let scale = matrix.amax();
        let tolerance = scale * 1e-12;
        if matrix[(1, 0)].abs() > tolerance
            || matrix[(2, 0)].abs() > tolerance
            || matrix[(2, 1)].abs() > tolerance
        {
            return Err(IntrinsicsError::NotUpperTriangular);
        }
        // The matrix is triangular, so the determinant is the product of the diagonal.
        let diagonal = matrix.diagonal();
        if diagonal.iter().any(|&n| n.abs() <= tolerance) {
            return Err(IntrinsicsError::Singular);
        }
        let matrix = matrix / matrix[(2, 2)];
        Ok(Self {
            focals: Vector2::new(matrix[(0, 0)], matrix[(1, 1)]),
            principal_point: Point2::new(matrix[(0, 2)], matrix[(1, 2)]),
            skew: matrix[(0, 1)],
        })
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// The inverse of [`CameraIntrinsics::matrix`], which maps homogeneous pixels to
    /// homogeneous normalized image coordinates.
    #[rustfmt::skip]
    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        let (fx, fy) = (self.focals.x, self.focals.y);
        let (cx, cy) = (self.principal_point.x, self.principal_point.y);
        let s = self.skew;
        Matrix3::new(
            1.0 / fx,   -s / (fx * fy), (s * cy - cx * fy) / (fx * fy),
            0.0,        1.0 / fy,       -cy / fy,
            0.0,        0.0,            1.0,
        )
    }
}

impl CameraModel for CameraIntrinsics {
    type Projection = NormalizedKeyPoint;

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to a [`NormalizedKeyPoint`].
    ///
    /// ```
    /// use cv_core::{KeyPoint, CameraModel};
    /// use cv_pinhole::{NormalizedKeyPoint, CameraIntrinsics};
    /// use cv_core::nalgebra::{Vector2, Vector3, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let calibration_matrix = intrinsics.matrix();
    /// let distance = (kp.to_homogeneous() - calibration_matrix * nkp.to_homogeneous()).norm();
    /// assert!(distance < 0.1);
    /// ```
    fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let centered = point.image_point() - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(Point2::new(x, y))
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates.
    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let y = projection.y * self.focals.y;
        let x = projection.x * self.focals.x + self.skew * projection.y;
        let centered = Point2::new(x, y);
        KeyPoint(centered + self.principal_point.coords)
    }
}

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// This also performs undistortion by applying the radial and tangential [`Distortion`] model.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsicsDistortion {
    pub simple_intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
}

impl CameraIntrinsicsDistortion {
    /// Creates the camera intrinsics using simple intrinsics with no distortion and a distortion model.
    pub fn new(simple_intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            simple_intrinsics,
            distortion,
        }
    }
}

impl From<CameraIntrinsics> for CameraIntrinsicsDistortion {
    fn from(simple_intrinsics: CameraIntrinsics) -> Self {
        Self::new(simple_intrinsics, Distortion::zero())
    }
}

impl CameraModel for CameraIntrinsicsDistortion {
    type Projection = NormalizedKeyPoint;

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to an undistorted [`NormalizedKeyPoint`].
    ///
    /// ```
    /// use cv_core::{KeyPoint, CameraModel};
    /// use cv_pinhole::{CameraIntrinsics, CameraIntrinsicsDistortion, Distortion};
    /// use cv_core::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let distortion = Distortion::from_opencv([-0.164624, 0.02, 0.001, -0.0005, 0.0]);
    /// let intrinsics = CameraIntrinsicsDistortion::new(intrinsics, distortion);
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let ukp = intrinsics.uncalibrate(nkp);
    /// assert!((kp.0 - ukp.0).norm() < 1e-6, "{:?}", (kp.0 - ukp.0).norm());
    /// ```
    fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let NormalizedKeyPoint(distorted) = self.simple_intrinsics.calibrate(point);
        NormalizedKeyPoint(self.distortion.undistort(distorted.coords).into())
    }

    /// Converts an undistorted [`NormalizedKeyPoint`] back into distorted pixel coordinates.
    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let NormalizedKeyPoint(undistorted) = projection;
        self.simple_intrinsics.uncalibrate(NormalizedKeyPoint(
            self.distortion.distort(undistorted.coords).into(),
        ))
    }
}
