use approx::assert_relative_eq;
use cv_core::nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use cv_core::sample_consensus::Model;
use cv_core::{CameraModel, CameraPoint, CameraToCamera, FeatureMatch, KeyPoint, KeyPointsMatch, Pose, Projective};
use cv_pinhole::{CameraIntrinsics, CameraIntrinsicsDistortion, Distortion, IntrinsicsError, NormalizedKeyPoint};
use cv_sfm::{
    reconstruct, InputError, Reconstruction, ReconstructionError, Stage, TwoView, TwoViewSettings,
};
use eight_point::{FixedSubsets, FundamentalError};
use log::*;
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn init_logger() {
    let _ = pretty_env_logger::formatted_builder().is_test(true).try_init();
}

fn k_matrix(focal: f64, cx: f64, cy: f64) -> Matrix3<f64> {
    Matrix3::new(focal, 0.0, cx, 0.0, focal, cy, 0.0, 0.0, 1.0)
}

fn camera(focal: f64, cx: f64, cy: f64) -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(focal, focal))
        .principal_point(Point2::new(cx, cy))
}

fn true_pose() -> CameraToCamera {
    CameraToCamera::from_parts(
        Vector3::new(-1.0, 0.1, 0.2),
        Rotation3::from_euler_angles(0.02, 0.2, -0.05),
    )
}

fn scene(rng: &mut SmallRng, count: usize) -> Vec<Point3<f64>> {
    (0..count)
        .map(|_| {
            Point3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(5.0..9.0),
            )
        })
        .collect()
}

fn observe<C>(camera: &C, point: CameraPoint) -> KeyPoint
where
    C: CameraModel<Projection = NormalizedKeyPoint>,
{
    camera.uncalibrate(NormalizedKeyPoint::from_camera_point(point).unwrap())
}

fn project<C>(camera_a: &C, camera_b: &C, pose: CameraToCamera, points: &[Point3<f64>]) -> Vec<KeyPointsMatch>
where
    C: CameraModel<Projection = NormalizedKeyPoint>,
{
    points
        .iter()
        .map(|&point| {
            let a = CameraPoint::from_point(point);
            FeatureMatch(observe(camera_a, a), observe(camera_b, pose.transform(a)))
        })
        .collect()
}

fn split(matches: &[KeyPointsMatch]) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
    matches.iter().map(|&FeatureMatch(a, b)| (a.0, b.0)).unzip()
}

fn assert_pose(reconstruction: &Reconstruction, truth: CameraToCamera, tolerance: f64) {
    let rotation = reconstruction.pose.0.rotation;
    let deviation = (rotation.matrix() - truth.0.rotation.matrix()).amax();
    assert!(deviation < tolerance, "rotation is off by {}", deviation);
    let direction = truth.0.translation.vector.normalize();
    let translation = reconstruction.pose.0.translation.vector;
    assert_relative_eq!(translation.norm(), 1.0, epsilon = 1e-9);
    assert!(
        (translation - direction).norm() < tolerance,
        "translation {:?} is not {:?}",
        translation.as_slice(),
        direction.as_slice()
    );
    // The rotation must be proper.
    let r = rotation.matrix();
    assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-9);
    assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
}

fn assert_structure(reconstruction: &Reconstruction, truth: &[Point3<f64>], scale: f64, tolerance: f64) {
    assert_eq!(reconstruction.points.len(), truth.len());
    for (point, expected) in reconstruction.point_cloud().iter().zip(truth) {
        let point = point.expect("the point should be triangulated");
        let distance = (point.coords * scale - expected.coords).norm();
        assert!(distance < tolerance, "point is off by {}", distance);
    }
}

#[test]
fn perpendicular_rig() {
    init_logger();
    // Camera 2 sits at (5, 0, 5) and looks back along -x at the points around (0, 0, 5).
    #[rustfmt::skip]
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::new(
        0.0, 0.0, 1.0,
        0.0, 1.0, 0.0,
        -1.0, 0.0, 0.0,
    ));
    let pose = CameraToCamera::from_parts(Vector3::new(-5.0, 0.0, 5.0), rotation);
    let points = [
        Point3::new(-1.0, -0.8, 4.2),
        Point3::new(0.9, -0.6, 5.3),
        Point3::new(-0.4, 0.7, 5.9),
        Point3::new(0.6, 0.9, 4.6),
        Point3::new(0.1, -0.2, 5.0),
        Point3::new(-0.8, 0.3, 5.5),
        Point3::new(0.7, 0.1, 4.4),
        Point3::new(-0.2, -0.9, 5.7),
    ];
    let identity = CameraIntrinsics::identity();
    let (points1, points2) = split(&project(&identity, &identity, pose, &points));

    let reconstruction =
        reconstruct(&Matrix3::identity(), &Matrix3::identity(), &points1, &points2).unwrap();
    assert_pose(&reconstruction, pose, 1e-3);
    assert_structure(&reconstruction, &points, pose.0.translation.vector.norm(), 1e-3);
    assert_eq!(reconstruction.inliers, vec![true; 8]);
    assert!(reconstruction.mean_reprojection_error().unwrap() < 1e-9);
}

#[test]
fn pixel_round_trip() {
    init_logger();
    let mut rng = SmallRng::seed_from_u64(0);
    let points = scene(&mut rng, 30);
    let (camera_a, camera_b) = (camera(500.0, 320.0, 240.0), camera(520.0, 310.0, 250.0));
    let matches = project(&camera_a, &camera_b, true_pose(), &points);
    let (points1, points2) = split(&matches);

    let reconstruction = reconstruct(
        &k_matrix(500.0, 320.0, 240.0),
        &k_matrix(520.0, 310.0, 250.0),
        &points1,
        &points2,
    )
    .unwrap();
    info!("pose matrix: {}", reconstruction.pose_matrix());
    assert_pose(&reconstruction, true_pose(), 1e-6);
    assert_structure(
        &reconstruction,
        &points,
        true_pose().0.translation.vector.norm(),
        1e-6,
    );
    assert!(reconstruction.validity().iter().all(|&valid| valid));
    assert!(reconstruction.degenerate_points().is_empty());
    assert!(reconstruction.mean_reprojection_error().unwrap() < 1e-6);

    // The fundamental matrix has rank 2 and satisfies the epipolar constraint.
    let fundamental = reconstruction.fundamental;
    assert!(fundamental.rank_deficiency(1e-12, 1000).unwrap() < 1e-10);
    for m in &matches {
        assert!(fundamental.residual(m) < 1e-10);
    }

    // The pixel projection matrices reproduce the observations up to the scale of the baseline.
    let [pa, pb] = reconstruction.projections;
    for (point, FeatureMatch(a, b)) in reconstruction.point_cloud().iter().zip(&matches) {
        let point = point.unwrap();
        assert!((pa.project(&point).unwrap() - a.0).norm() < 1e-6);
        assert!((pb.project(&point).unwrap() - b.0).norm() < 1e-6);
    }
}

#[test]
fn small_baseline() {
    init_logger();
    // The scene is 40 to 80 baselines away from the cameras.
    let pose = CameraToCamera::from_parts(
        Vector3::new(-0.1, 0.005, 0.0),
        Rotation3::from_euler_angles(0.0, 0.02, 0.0),
    );
    let mut rng = SmallRng::seed_from_u64(5);
    let points: Vec<_> = (0..20)
        .map(|_| {
            Point3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(4.0..8.0),
            )
        })
        .collect();
    let intrinsics = camera(500.0, 320.0, 240.0);
    let (points1, points2) = split(&project(&intrinsics, &intrinsics, pose, &points));

    let k = k_matrix(500.0, 320.0, 240.0);
    let reconstruction = reconstruct(&k, &k, &points1, &points2).unwrap();
    assert_pose(&reconstruction, pose, 1e-4);
    assert_structure(&reconstruction, &points, pose.0.translation.vector.norm(), 1e-3);
    assert!(reconstruction.validity().iter().all(|&valid| valid));

    // Capping the vote at a depth the whole scene lies beyond leaves no candidate with a majority.
    let capped = TwoView::new(TwoViewSettings {
        cheirality_max_depth: Some(30.0),
        ..Default::default()
    });
    let error = capped.reconstruct(&k, &k, &points1, &points2).unwrap_err();
    assert_eq!(error.stage(), Stage::Recovery);
}

#[test]
fn exactly_eight_correspondences() {
    let mut rng = SmallRng::seed_from_u64(1);
    let points = scene(&mut rng, 8);
    let k = camera(500.0, 320.0, 240.0);
    let (points1, points2) = split(&project(&k, &k, true_pose(), &points));
    let reconstruction = reconstruct(
        &k_matrix(500.0, 320.0, 240.0),
        &k_matrix(500.0, 320.0, 240.0),
        &points1,
        &points2,
    )
    .unwrap();
    assert_pose(&reconstruction, true_pose(), 1e-6);
    assert_eq!(reconstruction.points.len(), 8);
}

#[test]
fn gross_outliers_are_rejected() {
    init_logger();
    let mut rng = SmallRng::seed_from_u64(2);
    let points = scene(&mut rng, 40);
    let camera_a = CameraIntrinsicsDistortion::from(camera(600.0, 320.0, 240.0));
    let mut matches = project(&camera_a, &camera_a, true_pose(), &points);
    let mut mask = vec![true; matches.len()];
    // Replace every fifth correspondence with a random pixel in image 2.
    for ix in (0..matches.len()).step_by(5) {
        matches[ix].1 = KeyPoint(Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)));
        mask[ix] = false;
    }

    let reconstruction = TwoView::default()
        .reconstruct_cameras(&camera_a, &camera_a, &matches)
        .unwrap();
    assert_eq!(reconstruction.inliers, mask);
    assert_pose(&reconstruction, true_pose(), 1e-6);
    // Outliers are still triangulated, but they do not reproject onto their observations.
    assert_eq!(reconstruction.points.len(), 40);
    for (point, &inlier) in reconstruction.points.iter().zip(&mask) {
        if let (Ok(point), true) = (point, inlier) {
            assert!(point.mean_reprojection_error() < 1e-6);
        }
    }
}

#[test]
fn injected_subsets_are_deterministic() {
    let mut rng = SmallRng::seed_from_u64(3);
    let points = scene(&mut rng, 20);
    let camera_a = CameraIntrinsicsDistortion::from(camera(500.0, 320.0, 240.0));
    let mut matches = project(&camera_a, &camera_a, true_pose(), &points);
    matches[0].1 = KeyPoint(Point2::new(10.0, 470.0));
    matches[1].1 = KeyPoint(Point2::new(630.0, 15.0));

    let run = || {
        let subsets = vec![(0..8).collect::<Vec<usize>>(), (2..10).collect(), (10..18).collect()];
        TwoView::default()
            .reconstruct_with_sampler(&camera_a, &camera_a, &matches, FixedSubsets::new(subsets))
            .unwrap()
    };
    let first = run();
    assert_eq!(first, run());
    let mut mask = vec![true; 20];
    mask[0] = false;
    mask[1] = false;
    assert_eq!(first.inliers, mask);
    assert_pose(&first, true_pose(), 1e-6);
}

#[test]
fn seeded_runs_are_reproducible() {
    let mut rng = SmallRng::seed_from_u64(4);
    let points = scene(&mut rng, 25);
    let k = camera(500.0, 320.0, 240.0);
    let mut matches = project(&k, &k, true_pose(), &points);
    matches[7].1 = KeyPoint(Point2::new(100.0, 100.0));
    let (points1, points2) = split(&matches);
    let settings = TwoViewSettings {
        consensus_seed: 1234,
        ..Default::default()
    };
    let run = || {
        TwoView::new(settings)
            .reconstruct(
                &k_matrix(500.0, 320.0, 240.0),
                &k_matrix(500.0, 320.0, 240.0),
                &points1,
                &points2,
            )
            .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn lens_distortion() {
    init_logger();
    let mut rng = SmallRng::seed_from_u64(5);
    let points = scene(&mut rng, 30);
    let camera_a = CameraIntrinsicsDistortion::new(
        camera(500.0, 320.0, 240.0),
        Distortion::from_opencv([-0.12, 0.03, 0.001, -0.0005, 0.0]),
    );
    let camera_b = CameraIntrinsicsDistortion::new(
        camera(520.0, 330.0, 230.0),
        Distortion::from_opencv([0.05, -0.01, -0.0008, 0.0004, 0.001]),
    );
    let matches = project(&camera_a, &camera_b, true_pose(), &points);

    let reconstruction = TwoView::default()
        .reconstruct_cameras(&camera_a, &camera_b, &matches)
        .unwrap();
    assert_pose(&reconstruction, true_pose(), 1e-6);
    assert_structure(
        &reconstruction,
        &points,
        true_pose().0.translation.vector.norm(),
        1e-5,
    );
    // Reprojections pass through the distortion model, so they land on the observed pixels.
    assert!(reconstruction.mean_reprojection_error().unwrap() < 1e-6);
}

#[test]
fn point_at_infinity_is_degenerate() {
    init_logger();
    let mut rng = SmallRng::seed_from_u64(6);
    let points = scene(&mut rng, 20);
    let k = CameraIntrinsicsDistortion::from(camera(500.0, 320.0, 240.0));
    let mut matches = project(&k, &k, true_pose(), &points);
    // A direction is seen along parallel rays from both cameras.
    let direction = CameraPoint(Vector3::new(0.1, -0.05, 1.0).push(0.0));
    matches.insert(
        11,
        FeatureMatch(observe(&k, direction), observe(&k, true_pose().transform(direction))),
    );

    let settings = TwoViewSettings {
        infinity_threshold: 1e-8,
        ..Default::default()
    };
    let reconstruction = TwoView::new(settings)
        .reconstruct_cameras(&k, &k, &matches)
        .unwrap();
    assert_eq!(reconstruction.points.len(), 21);
    assert_eq!(reconstruction.degenerate_points(), [11]);
    assert!(reconstruction.inliers[11]);
    assert_pose(&reconstruction, true_pose(), 1e-6);
    assert!(reconstruction.mean_reprojection_error().unwrap() < 1e-6);
}

#[test]
fn fewer_than_eight_correspondences() {
    let points = [Point2::new(1.0, 2.0); 7];
    let error = reconstruct(&Matrix3::identity(), &Matrix3::identity(), &points, &points).unwrap_err();
    assert_eq!(error.stage(), Stage::Input);
    assert_eq!(
        error,
        ReconstructionError::InvalidInput(InputError::InsufficientCorrespondences {
            required: 8,
            actual: 7
        })
    );
}

#[test]
fn mismatched_lengths() {
    let points1 = [Point2::new(1.0, 2.0); 9];
    let points2 = [Point2::new(1.0, 2.0); 10];
    assert_eq!(
        reconstruct(&Matrix3::identity(), &Matrix3::identity(), &points1, &points2),
        Err(ReconstructionError::InvalidInput(
            InputError::MismatchedLengths {
                first: 9,
                second: 10
            }
        ))
    );
}

#[test]
fn singular_intrinsics() {
    let points = [Point2::new(1.0, 2.0); 9];
    let singular = Matrix3::new(500.0, 0.0, 320.0, 0.0, 0.0, 240.0, 0.0, 0.0, 1.0);
    assert_eq!(
        reconstruct(&Matrix3::identity(), &singular, &points, &points),
        Err(ReconstructionError::InvalidInput(InputError::Intrinsics {
            camera: 2,
            source: IntrinsicsError::Singular
        }))
    );
}

#[test]
fn collinear_correspondences() {
    let (points1, points2): (Vec<_>, Vec<_>) = (0..12)
        .map(|i| {
            let t = i as f64 * 17.0;
            (
                Point2::new(40.0 + t, 30.0 + 0.8 * t),
                Point2::new(70.0 + 0.9 * t, 400.0 - 0.3 * t),
            )
        })
        .unzip();
    let k = k_matrix(500.0, 320.0, 240.0);
    let error = reconstruct(&k, &k, &points1, &points2).unwrap_err();
    assert_eq!(error.stage(), Stage::Estimation);
    assert_eq!(
        error,
        ReconstructionError::Estimation(FundamentalError::DegenerateConfiguration)
    );
}
