use crate::KeyPoint;

/// A match between a feature in image A and the same feature in image B.
///
/// The first point always belongs to camera A and the second to camera B.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureMatch<P>(pub P, pub P);

/// A match between two pixel coordinates, neither undistorted nor normalized.
pub type KeyPointsMatch = FeatureMatch<KeyPoint>;
