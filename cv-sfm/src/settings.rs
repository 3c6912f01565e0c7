#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for two-view reconstruction.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TwoViewSettings {
    /// The probability that least median of squares draws at least one subset free of outliers
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_confidence")
    )]
    pub consensus_confidence: f64,
    /// The fraction of correspondences expected to be outliers
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_outlier_ratio")
    )]
    pub consensus_outlier_ratio: f64,
    /// The maximum number of subsets least median of squares draws
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_max_iterations")
    )]
    pub consensus_max_iterations: usize,
    /// The seed of the random subset sampler
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_consensus_seed"))]
    pub consensus_seed: u64,
    /// The ratio of the two extreme singular values of the eight-point design matrix below which a fit is degenerate
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_degeneracy_threshold")
    )]
    pub degeneracy_threshold: f64,
    /// The epsilon of every singular value decomposition
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_svd_epsilon"))]
    pub svd_epsilon: f64,
    /// The maximum iterations of every singular value decomposition
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_svd_max_iterations")
    )]
    pub svd_max_iterations: usize,
    /// The depth in baselines at or beyond which a point does not vote in the cheirality test, if any
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_cheirality_max_depth")
    )]
    pub cheirality_max_depth: Option<f64>,
    /// The fraction of votes the winning candidate pose must strictly exceed
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_cheirality_minimum_ratio")
    )]
    pub cheirality_minimum_ratio: f64,
    /// The homogeneous `w` of a unit length triangulation below which the point is at infinity
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_infinity_threshold")
    )]
    pub infinity_threshold: f64,
}

impl Default for TwoViewSettings {
    fn default() -> Self {
        Self {
            consensus_confidence: default_consensus_confidence(),
            consensus_outlier_ratio: default_consensus_outlier_ratio(),
            consensus_max_iterations: default_consensus_max_iterations(),
            consensus_seed: default_consensus_seed(),
            degeneracy_threshold: default_degeneracy_threshold(),
            svd_epsilon: default_svd_epsilon(),
            svd_max_iterations: default_svd_max_iterations(),
            cheirality_max_depth: default_cheirality_max_depth(),
            cheirality_minimum_ratio: default_cheirality_minimum_ratio(),
            infinity_threshold: default_infinity_threshold(),
        }
    }
}

fn default_consensus_confidence() -> f64 {
    0.99
}

fn default_consensus_outlier_ratio() -> f64 {
    0.45
}

fn default_consensus_max_iterations() -> usize {
    2000
}

fn default_consensus_seed() -> u64 {
    0
}

fn default_degeneracy_threshold() -> f64 {
    1e-8
}

fn default_svd_epsilon() -> f64 {
    1e-12
}

fn default_svd_max_iterations() -> usize {
    1000
}

fn default_cheirality_max_depth() -> Option<f64> {
    None
}

fn default_cheirality_minimum_ratio() -> f64 {
    0.5
}

fn default_infinity_threshold() -> f64 {
    1e-10
}
