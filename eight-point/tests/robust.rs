use cv_core::{
    nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector2, Vector3},
    sample_consensus::{Consensus, Model},
    CameraModel, CameraPoint, CameraToCamera, FeatureMatch, KeyPoint, KeyPointsMatch, Pose,
    Projective,
};
use cv_pinhole::{CameraIntrinsics, EssentialMatrix, FundamentalMatrix, NormalizedKeyPoint};
use eight_point::{EightPoint, FixedSubsets, FundamentalError, LeastMedianSquares, RandomSubsets};
use rand::{rngs::SmallRng, Rng, SeedableRng};

const INLIERS: usize = 40;
const OUTLIER_STRIDE: usize = 5;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(700.0, 700.0))
        .principal_point(Point2::new(320.0, 240.0))
}

fn pose() -> CameraToCamera {
    CameraToCamera::from_parts(
        Vector3::new(-0.9, 0.2, 0.1),
        Rotation3::from_euler_angles(0.03, 0.15, -0.02),
    )
}

fn expected_fundamental() -> Matrix3<f64> {
    let fundamental =
        FundamentalMatrix::from_essential(EssentialMatrix::from(pose()), &intrinsics(), &intrinsics());
    fundamental.0 / fundamental.0.norm()
}

fn same_up_to_sign(a: &FundamentalMatrix, b: &Matrix3<f64>) -> bool {
    (a.0 - b).norm().min((a.0 + b).norm()) < 1e-6
}

fn project(point: CameraPoint) -> KeyPoint {
    intrinsics().uncalibrate(NormalizedKeyPoint::from_camera_point(point).unwrap())
}

/// Noiseless correspondences of random points in front of both cameras.
fn inliers(rng: &mut SmallRng, count: usize) -> Vec<KeyPointsMatch> {
    (0..count)
        .map(|_| {
            let a = CameraPoint::from_point(Point3::new(
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(4.0..7.0),
            ));
            FeatureMatch(project(a), project(pose().transform(a)))
        })
        .collect()
}

/// Puts a correspondence with a random pixel in image B in front of every fourth inlier.
fn with_outliers(rng: &mut SmallRng, inliers: &[KeyPointsMatch]) -> (Vec<KeyPointsMatch>, Vec<bool>) {
    let mut matches = vec![];
    let mut mask = vec![];
    for (ix, &m) in inliers.iter().enumerate() {
        if ix % (OUTLIER_STRIDE - 1) == 0 {
            let outlier = KeyPoint(Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)));
            matches.push(FeatureMatch(m.0, outlier));
            mask.push(false);
        }
        matches.push(m);
        mask.push(true);
    }
    (matches, mask)
}

#[test]
fn lmeds_rejects_outliers() {
    let mut rng = SmallRng::seed_from_u64(3);
    let clean = inliers(&mut rng, INLIERS);
    let (matches, mask) = with_outliers(&mut rng, &clean);
    assert_eq!(matches.len(), 50);

    let mut lmeds = LeastMedianSquares::new(RandomSubsets::new(SmallRng::seed_from_u64(42)));
    let estimate = EightPoint::new()
        .estimate_robust(&matches, &mut lmeds)
        .unwrap();
    assert_eq!(estimate.inliers, mask);
    assert_eq!(estimate.inlier_count(), INLIERS);
    assert!(estimate.median < 1e-12);
    assert!(same_up_to_sign(&estimate.fundamental, &expected_fundamental()));
    for m in &clean {
        assert!(estimate.fundamental.residual(m) < 1e-10);
    }
}

#[test]
fn seeded_estimation_is_reproducible() {
    let mut rng = SmallRng::seed_from_u64(9);
    let clean = inliers(&mut rng, INLIERS);
    let (matches, _) = with_outliers(&mut rng, &clean);
    let run = || {
        let mut lmeds = LeastMedianSquares::new(RandomSubsets::new(SmallRng::seed_from_u64(5)));
        EightPoint::new().estimate_robust(&matches, &mut lmeds).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn injected_subsets_decide_the_model() {
    let mut rng = SmallRng::seed_from_u64(11);
    let clean = inliers(&mut rng, INLIERS);
    let (matches, mask) = with_outliers(&mut rng, &clean);
    let outlier = mask.iter().position(|&inlier| !inlier).unwrap();
    let inlier_indices: Vec<usize> = (0..matches.len()).filter(|&ix| mask[ix]).collect();

    // The first subset is contaminated by an outlier, the second is too short and the third is clean.
    let contaminated: Vec<usize> = std::iter::once(outlier)
        .chain(inlier_indices.iter().copied().take(7))
        .collect();
    let subsets = vec![contaminated, vec![1, 2, 3], inlier_indices[8..16].to_vec()];
    let mut lmeds = LeastMedianSquares::new(FixedSubsets::new(subsets));
    let estimate = EightPoint::new()
        .estimate_robust(&matches, &mut lmeds)
        .unwrap();
    assert_eq!(estimate.inliers, mask);
    assert!(same_up_to_sign(&estimate.fundamental, &expected_fundamental()));
}

#[test]
fn exactly_eight_correspondences() {
    let mut rng = SmallRng::seed_from_u64(1);
    let matches = inliers(&mut rng, 8);
    let mut lmeds = LeastMedianSquares::new(RandomSubsets::new(SmallRng::seed_from_u64(0)));
    let estimate = EightPoint::new()
        .estimate_robust(&matches, &mut lmeds)
        .unwrap();
    assert_eq!(estimate.inliers, vec![true; 8]);
    assert!(same_up_to_sign(&estimate.fundamental, &expected_fundamental()));
    let rank = estimate.fundamental.rank_deficiency(1e-12, 1000).unwrap();
    assert!(rank < 1e-10);
}

#[test]
fn fewer_than_eight_correspondences() {
    let mut rng = SmallRng::seed_from_u64(1);
    let matches = inliers(&mut rng, 7);
    let mut lmeds = LeastMedianSquares::new(RandomSubsets::new(SmallRng::seed_from_u64(0)));
    assert_eq!(
        EightPoint::new().estimate_robust(&matches, &mut lmeds),
        Err(FundamentalError::InsufficientCorrespondences {
            required: 8,
            actual: 7
        })
    );
}

#[test]
fn collinear_correspondences_are_degenerate() {
    for count in [8, 12] {
        let matches: Vec<_> = (0..count)
            .map(|i| {
                let t = i as f64 * 13.0;
                FeatureMatch(
                    KeyPoint(Point2::new(50.0 + t, 80.0 + 0.5 * t)),
                    KeyPoint(Point2::new(90.0 + 1.1 * t, 300.0 - 0.25 * t)),
                )
            })
            .collect();
        let mut lmeds = LeastMedianSquares::new(RandomSubsets::new(SmallRng::seed_from_u64(0)));
        assert_eq!(
            EightPoint::new().estimate_robust(&matches, &mut lmeds),
            Err(FundamentalError::DegenerateConfiguration)
        );
    }
}

#[test]
fn drives_consensus_trait() {
    let mut rng = SmallRng::seed_from_u64(21);
    let clean = inliers(&mut rng, INLIERS);
    let (matches, mask) = with_outliers(&mut rng, &clean);
    let mut lmeds = LeastMedianSquares::new(RandomSubsets::new(SmallRng::seed_from_u64(8)));
    let (fundamental, inliers) = lmeds
        .model_inliers(&EightPoint::new(), matches.iter().copied())
        .unwrap();
    let expected: Vec<usize> = (0..matches.len()).filter(|&ix| mask[ix]).collect();
    assert_eq!(inliers, expected);
    assert!(same_up_to_sign(&fundamental, &expected_fundamental()));
}
