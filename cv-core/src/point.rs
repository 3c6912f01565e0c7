use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point3, Unit, Vector3, Vector4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented for homogeneous projective 3d coordinate.
pub trait Projective: From<Vector4<f64>> + Clone + Copy {
    /// Retrieve the homogeneous vector.
    ///
    /// No constraints are put on this vector. All components can move freely and it is not normalized.
    /// However, this vector may be normalized if desired and it will still be equivalent to the original.
    /// You may wish to normalize it if you want to avoid floating point precision issues, for instance.
    fn homogeneous(self) -> Vector4<f64>;

    /// Create the projective coordinate from a homogeneous vector.
    fn from_homogeneous(point: Vector4<f64>) -> Self {
        point.into()
    }

    /// Retrieve the euclidean 3d point by normalizing the homogeneous coordinate.
    ///
    /// This may fail, as a homogeneous coordinate can exist at near-infinity (like a star in the sky),
    /// whereas a 3d euclidean point cannot (it would overflow).
    fn point(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.homogeneous())
    }

    /// Convert the euclidean 3d point into homogeneous coordinates.
    fn from_point(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }

    /// Retrieve the normalized bearing of the coordinate.
    fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Retrieve the unnormalized bearing of the coordinate.
    ///
    /// Use this when you know that you do not need the bearing to be normalized,
    /// and it may increase performance. Otherwise use [`Projective::bearing`].
    fn bearing_unnormalized(self) -> Vector3<f64> {
        let homogeneous = self.homogeneous();
        if homogeneous.w < 0.0 {
            -homogeneous.xyz()
        } else {
            homogeneous.xyz()
        }
    }

    /// Retrieve the signed depth of the coordinate along the `z` axis.
    ///
    /// The sign of the homogeneous `w` component is taken into account, so a point whose homogeneous
    /// vector was negated still reports the same depth. Points at infinity produce a non-finite depth.
    ///
    /// ```
    /// use cv_core::{CameraPoint, Projective};
    /// use cv_core::nalgebra::Vector4;
    /// let point = CameraPoint(Vector4::new(0.2, 0.4, -6.0, -2.0));
    /// assert_eq!(point.depth(), 3.0);
    /// ```
    fn depth(self) -> f64 {
        let homogeneous = self.homogeneous();
        homogeneous.z / homogeneous.w
    }
}

/// A 3d point which is relative to the camera's optical center and orientation where
/// the positive X axis is right, positive Y axis is down, and positive Z axis is forwards
/// from the optical center of the camera. The unit of distance of a `CameraPoint` is
/// unspecified and relative to the current reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraPoint(pub Vector4<f64>);

impl Projective for CameraPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}
