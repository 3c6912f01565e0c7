use cv_core::{
    nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, RowVector4, Vector3, Vector4},
    Bearing, CameraPoint, CameraToCamera, Pose, TriangulatorRelative,
};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use thiserror::Error;

/// A 3x4 camera projection matrix `P = K * [R | t]`.
///
/// It maps homogeneous points in the reference frame into homogeneous image coordinates.
/// If `K` is the identity, the image coordinates are normalized image coordinates. Otherwise
/// they are pixels.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct ProjectionMatrix(pub Matrix3x4<f64>);

impl ProjectionMatrix {
    /// The canonical camera `[I | 0]`.
    pub fn identity() -> Self {
        Self(Matrix3x4::identity())
    }

    /// Creates `K * [R | t]` from an intrinsic matrix and the pose that maps reference points into the camera.
    ///
    /// ```
    /// use cv_core::{CameraToCamera, Pose};
    /// use cv_core::nalgebra::{Matrix3, Point3, Rotation3, Vector3};
    /// use cv_geom::triangulation::ProjectionMatrix;
    /// let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
    /// let pose = CameraToCamera::from_parts(Vector3::new(0.0, 0.0, 1.0), Rotation3::identity());
    /// let projection = ProjectionMatrix::from_pose(&k, pose);
    /// let pixel = projection.project(&Point3::new(0.2, -0.2, 1.0)).unwrap();
    /// assert!((pixel.x - 370.0).abs() < 1e-9);
    /// assert!((pixel.y - 190.0).abs() < 1e-9);
    /// ```
    pub fn from_pose(intrinsics: &Matrix3<f64>, pose: CameraToCamera) -> Self {
        Self(intrinsics * pose.extrinsic_matrix())
    }

    /// Projects a point into the image.
    ///
    /// Returns `None` if the point lies on the plane through the optical center
    /// parallel to the image plane, where it has no image.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        self.project_homogeneous(&point.to_homogeneous())
    }

    fn project_homogeneous(&self, point: &Vector4<f64>) -> Option<Point2<f64>> {
        let image = self.0 * point;
        if image.z == 0.0 {
            return None;
        }
        Point2::from_homogeneous(image).filter(|p| p.coords.iter().all(|n| n.is_finite()))
    }

    /// The depth of a point along the camera's optical axis, scaled by the norm of the third row of `K`.
    pub fn depth(&self, point: &Point3<f64>) -> f64 {
        (self.0 * point.to_homogeneous()).z
    }
}

/// The point for this correspondence could not be triangulated.
///
/// This happens when the two rays are parallel (the point is at infinity) or when the
/// triangulated point has no image in one of the cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("correspondence {index} could not be triangulated")]
pub struct DegeneratePoint {
    pub index: usize,
}

/// A triangulated point along with its reprojection into both images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangulatedPoint {
    pub point: Point3<f64>,
    pub observations: [Point2<f64>; 2],
    pub reprojections: [Point2<f64>; 2],
}

impl TriangulatedPoint {
    /// The distance between each observation and its reprojection.
    pub fn reprojection_errors(&self) -> [f64; 2] {
        [0, 1].map(|ix| (self.observations[ix] - self.reprojections[ix]).norm())
    }
}

/// Triangulates points with the direct linear transform by Hartley and Zisserman.
///
/// Each observation `x = P * X` gives two equations from `cross(x, P * X) = 0`:
///
/// ```text
/// x * P_3 - P_1
/// y * P_3 - P_2
/// ```
///
/// Two observations give a 4x4 system whose null vector, found with a singular value decomposition,
/// is the homogeneous point. The method minimizes an algebraic error and not the reprojection error,
/// but it is exact for noiseless data and works for points at any depth, including behind the cameras.
///
/// ```
/// use cv_core::nalgebra::{Vector3, Point3, Rotation3};
/// use cv_core::{TriangulatorRelative, CameraToCamera, CameraPoint, Pose, Projective};
/// use cv_geom::triangulation::DltTriangulator;
///
/// let point = CameraPoint::from_point(Point3::new(0.3, 0.1, 2.0));
/// let pose = CameraToCamera::from_parts(Vector3::new(0.1, 0.1, 0.1), Rotation3::new(Vector3::new(0.1, 0.1, 0.1)));
/// let bearing_a = point.bearing();
/// let bearing_b = pose.transform(point).bearing();
/// let triangulated = DltTriangulator::new().triangulate_relative(pose, bearing_a, bearing_b).unwrap();
/// let distance = (point.point().unwrap().coords - triangulated.point().unwrap().coords).norm();
/// assert!(distance < 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct DltTriangulator {
    epsilon: f64,
    max_iterations: usize,
    infinity_threshold: f64,
}

impl DltTriangulator {
    /// Creates a `DltTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
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

    /// Set the magnitude below which the homogeneous `w` of the unit length solution
    /// is considered to be zero, putting the point at infinity.
    ///
    /// Default is `1e-10`.
    #[must_use]
    pub fn infinity_threshold(self, infinity_threshold: f64) -> Self {
        Self {
            infinity_threshold,
            ..self
        }
    }

    /// Solves for the unit length homogeneous point with non-negative `w` seen along
    /// `a` by projection `pa` and along `b` by projection `pb`.
    ///
    /// The observations are homogeneous image coordinates, so they may have any non-zero scale.
    fn solve(
        &self,
        pa: &Matrix3x4<f64>,
        a: Vector3<f64>,
        pb: &Matrix3x4<f64>,
        b: Vector3<f64>,
    ) -> Option<Vector4<f64>> {
        let row = |p: &Matrix3x4<f64>, x: &Vector3<f64>, axis: usize| -> RowVector4<f64> {
            p.row(2) * x[axis] - p.row(axis) * x.z
        };
        let design = Matrix4::from_rows(&[
            row(pa, &a, 0),
            row(pa, &a, 1),
            row(pb, &b, 0),
            row(pb, &b, 1),
        ]);
        let svd = design.try_svd(false, true, self.epsilon, self.max_iterations)?;
        // Singular values are sorted in descending order, so the null vector is the last row.
        let mut homogeneous = svd.v_t?.row(3).transpose();
        if homogeneous.w.abs() < self.infinity_threshold {
            return None;
        }
        if homogeneous.w < 0.0 {
            homogeneous.neg_mut();
        }
        Some(homogeneous)
    }

    /// Triangulates a single correspondence between image coordinates `a` seen by `pa` and `b` seen by `pb`.
    ///
    /// Returns `None` if the point is at infinity.
    pub fn triangulate(
        &self,
        pa: &ProjectionMatrix,
        pb: &ProjectionMatrix,
        a: Point2<f64>,
        b: Point2<f64>,
    ) -> Option<Point3<f64>> {
        self.solve(&pa.0, a.to_homogeneous(), &pb.0, b.to_homogeneous())
            .and_then(Point3::from_homogeneous)
    }

    /// Triangulates every correspondence and reprojects the result into both images.
    ///
    /// The output is index-aligned with the input. A correspondence that can not be triangulated,
    /// or whose point can not be reprojected, yields a [`DegeneratePoint`] in its place without
    /// affecting the others.
    ///
    /// ```
    /// use cv_core::{CameraToCamera, Pose};
    /// use cv_core::nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
    /// use cv_geom::triangulation::{DltTriangulator, ProjectionMatrix};
    /// let pa = ProjectionMatrix::identity();
    /// let pb = ProjectionMatrix::from_pose(
    ///     &Matrix3::identity(),
    ///     CameraToCamera::from_parts(Vector3::new(-1.0, 0.0, 0.0), Rotation3::identity()),
    /// );
    /// let point = Point3::new(0.5, 0.25, 4.0);
    /// let a = pa.project(&point).unwrap();
    /// let b = pb.project(&point).unwrap();
    /// // The second correspondence has parallel rays.
    /// let results = DltTriangulator::new().triangulate_all(&pa, &pb, [(a, b), (a, a)]);
    /// let first = results[0].as_ref().unwrap();
    /// assert!((first.point - point).norm() < 1e-9);
    /// assert!(first.reprojection_errors().iter().all(|&e| e < 1e-9));
    /// assert_eq!(results[1].unwrap_err().index, 1);
    /// ```
    pub fn triangulate_all(
        &self,
        pa: &ProjectionMatrix,
        pb: &ProjectionMatrix,
        correspondences: impl IntoIterator<Item = (Point2<f64>, Point2<f64>)>,
    ) -> Vec<Result<TriangulatedPoint, DegeneratePoint>> {
        correspondences
            .into_iter()
            .enumerate()
            .map(|(index, (a, b))| {
                let point = self
                    .triangulate(pa, pb, a, b)
                    .ok_or(DegeneratePoint { index })?;
                let reproject = |p: &ProjectionMatrix| p.project(&point).ok_or(DegeneratePoint { index });
                Ok(TriangulatedPoint {
                    point,
                    observations: [a, b],
                    reprojections: [reproject(pa)?, reproject(pb)?],
                })
            })
            .collect()
    }
}

impl Default for DltTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
            infinity_threshold: 1e-10,
        }
    }
}

impl TriangulatorRelative for DltTriangulator {
    fn triangulate_relative<A: Bearing, B: Bearing>(
        &self,
        relative_pose: CameraToCamera,
        a: A,
        b: B,
    ) -> Option<CameraPoint> {
        self.solve(
            &Matrix3x4::identity(),
            a.bearing_unnormalized(),
            &relative_pose.extrinsic_matrix(),
            b.bearing_unnormalized(),
        )
        .map(CameraPoint)
    }
}
