use cv_core::nalgebra::Vector2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Maximum number of fixed-point iterations used by [`Distortion::undistort`].
const UNDISTORT_ITERATIONS: usize = 64;
/// [`Distortion::undistort`] stops once the distorted estimate is this close to the input.
const UNDISTORT_TOLERANCE: f64 = 1e-14;

/// The Brown-Conrady lens distortion model with three radial (`k1`, `k2`, `k3`)
/// and two tangential (`p1`, `p2`) coefficients.
///
/// This is the same five coefficient model that OpenCV uses, and it operates on
/// normalized image coordinates (after the intrinsic matrix has been removed).
///
/// ```text
/// r² = x² + y²
/// x' = x (1 + k1 r² + k2 r⁴ + k3 r⁶) + 2 p1 x y + p2 (r² + 2 x²)
/// y' = y (1 + k1 r² + k2 r⁴ + k3 r⁶) + p1 (r² + 2 y²) + 2 p2 x y
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// No distortion at all.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Creates the model from coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
    pub fn from_opencv([k1, k2, p1, p2, k3]: [f64; 5]) -> Self {
        Self { k1, k2, p1, p2, k3 }
    }

    /// Retrieves the coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
    pub fn opencv(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.opencv().iter().all(|&c| c == 0.0)
    }

    fn radial(&self, r2: f64) -> f64 {
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3))
    }

    fn tangential(&self, point: Vector2<f64>, r2: f64) -> Vector2<f64> {
        let Self { p1, p2, .. } = *self;
        let xy = point.x * point.y;
        Vector2::new(
            2.0 * p1 * xy + p2 * (r2 + 2.0 * point.x * point.x),
            p1 * (r2 + 2.0 * point.y * point.y) + 2.0 * p2 * xy,
        )
    }

    /// Applies distortion to an undistorted normalized image coordinate.
    pub fn distort(&self, point: Vector2<f64>) -> Vector2<f64> {
        let r2 = point.norm_squared();
        point * self.radial(r2) + self.tangential(point, r2)
    }

    /// Removes distortion from a distorted normalized image coordinate.
    ///
    /// The forward model has no closed-form inverse, so this iterates
    /// `x = (x_d - tangential(x)) / radial(x)` until [`Distortion::distort`]
    /// reproduces the input or the iteration limit is reached.
    ///
    /// ```
    /// use cv_core::nalgebra::Vector2;
    /// use cv_pinhole::Distortion;
    /// let distortion = Distortion::from_opencv([-0.28, 0.07, 0.0002, 0.00002, 0.0]);
    /// let point = Vector2::new(0.31, -0.22);
    /// let undistorted = distortion.undistort(distortion.distort(point));
    /// assert!((undistorted - point).norm() < 1e-10);
    /// ```
    pub fn undistort(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return distorted;
        }
        let mut point = distorted;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = point.norm_squared();
            point = (distorted - self.tangential(point, r2)) / self.radial(r2);
            if (self.distort(point) - distorted).norm() < UNDISTORT_TOLERANCE {
                break;
            }
        }
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_distortion_is_identity() {
        let point = Vector2::new(0.5, -0.25);
        let distortion = Distortion::zero();
        assert!(distortion.is_zero());
        assert_eq!(distortion.distort(point), point);
        assert_eq!(distortion.undistort(point), point);
    }

    #[test]
    fn undistort_inverts_distort() {
        let distortion = Distortion::from_opencv([-0.2, 0.05, 0.001, -0.002, 0.01]);
        for &(x, y) in &[(0.0, 0.0), (0.1, 0.2), (-0.35, 0.15), (0.4, -0.3)] {
            let point = Vector2::new(x, y);
            let distorted = distortion.distort(point);
            assert_relative_eq!(distortion.undistort(distorted), point, epsilon = 1e-9);
        }
    }

    #[test]
    fn opencv_order() {
        let coefficients = [0.1, 0.2, 0.3, 0.4, 0.5];
        let distortion = Distortion::from_opencv(coefficients);
        assert_eq!(distortion.k3, 0.5);
        assert_eq!(distortion.p1, 0.3);
        assert_eq!(distortion.opencv(), coefficients);
    }
}
