use li_calib_core::synthetic::{ReferenceMotion, SurfelScene, imu_samples};
use li_calib_core::{CalibParams, ImuSample, Iso3, SplineTrajectory, Vec3};
use li_calib_optim::{ParamKey, TerminationType, TrajectoryEstimator};

fn truth() -> (SplineTrajectory, CalibParams) {
    let spline = ReferenceMotion::default()
        .to_spline(4, 0.1, 0.0, 1.2)
        .unwrap();
    let mut calib = CalibParams {
        gyro_bias: Vec3::new(0.01, -0.02, 0.005),
        accel_bias: Vec3::new(0.05, 0.02, -0.03),
        ..CalibParams::default()
    };
    calib.set_lidar_to_imu(&Iso3::new(
        Vec3::new(0.1, 0.05, -0.02),
        Vec3::new(0.0, 0.05, 0.1),
    ));
    (spline, calib)
}

#[test]
fn gyro_stage_adds_one_block_per_sample_and_fixes_the_gauge() {
    let (truth_spline, truth_calib) = truth();
    let samples = imu_samples(&truth_spline, &truth_calib, 0.0, 1.0, 50.0, false).unwrap();

    let mut spline = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
    let mut calib = CalibParams::default();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
    estimator.add_gyro_measurements(&samples, 1.0).unwrap();

    assert_eq!(estimator.num_residual_blocks(), samples.len());
    assert!(estimator.residual_dims().iter().all(|&d| d == 3));
    assert!(estimator.is_constant(ParamKey::GyroBias));
    assert!(estimator.is_constant(ParamKey::RotationKnot(0)));
    assert!(!estimator.is_constant(ParamKey::RotationKnot(1)));
    assert!(estimator.param_id(ParamKey::TranslationKnot(0)).is_none());

    // Each residual binds `order` rotation knots plus the bias.
    let bias = estimator.param_id(ParamKey::GyroBias).unwrap();
    for i in 0..samples.len() {
        let params = estimator.residual_params(i).unwrap();
        assert_eq!(params.len(), 5);
        assert_eq!(params[4], bias);
    }
    assert!(estimator.trajectory().max_time() > 0.98);
}

#[test]
fn accel_stage_keeps_biases_free() {
    let (truth_spline, truth_calib) = truth();
    let samples = imu_samples(&truth_spline, &truth_calib, 0.0, 1.0, 50.0, true).unwrap();

    let mut spline = truth_spline.clone();
    let mut calib = CalibParams::default();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
    estimator.add_accel_measurements(&samples, 1.0, 1.0).unwrap();

    assert_eq!(estimator.num_residual_blocks(), samples.len());
    assert!(estimator.residual_dims().iter().all(|&d| d == 6));
    assert!(!estimator.is_constant(ParamKey::GyroBias));
    assert!(!estimator.is_constant(ParamKey::AccelBias));
    assert!(estimator.is_constant(ParamKey::RotationKnot(0)));
    assert!(estimator.is_constant(ParamKey::TranslationKnot(0)));
    assert_eq!(estimator.residual_params(0).unwrap().len(), 10);
}

#[test]
fn surfel_points_sharing_a_plane_share_its_block() {
    let (truth_spline, truth_calib) = truth();
    let scene = SurfelScene::default();
    let association = scene
        .observe(&truth_spline, &truth_calib, 0.3, &[0.3, 0.6, 0.9])
        .unwrap();

    let mut spline = truth_spline.clone();
    let mut calib = truth_calib.clone();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
    estimator.add_surfel_measurements(&association, 1.0).unwrap();

    assert_eq!(estimator.num_residual_blocks(), association.points().len());
    assert!(estimator.residual_dims().iter().all(|&d| d == 1));
    assert_eq!(estimator.calib().plane_params, association.plane_parameters());

    for (i, point) in association.points().iter().enumerate() {
        let params = estimator.residual_params(i).unwrap();
        let n = params.len();
        assert_eq!(
            Some(params[n - 1]),
            estimator.param_id(ParamKey::Plane(point.plane_id))
        );
        assert_eq!(
            Some(params[n - 2]),
            estimator.param_id(ParamKey::ExtrinsicRotation)
        );
        assert_eq!(
            Some(params[n - 3]),
            estimator.param_id(ParamKey::ExtrinsicTranslation)
        );
    }

    let plane_blocks = (0..scene.planes.len())
        .filter(|&id| estimator.param_id(ParamKey::Plane(id)).is_some())
        .count();
    assert_eq!(plane_blocks, scene.planes.len());
    // Windows start at the map time, so the anchor is the first knot bound there.
    let (anchor, _) = estimator.trajectory().time_to_index(0.3).unwrap();
    assert!(estimator.param_id(ParamKey::RotationKnot(anchor - 1)).is_none());
    assert!(estimator.is_constant(ParamKey::RotationKnot(anchor)));
    assert!(estimator.is_constant(ParamKey::TranslationKnot(anchor)));
    assert!(!estimator.is_constant(ParamKey::RotationKnot(anchor + 1)));
    assert!(!estimator.is_constant(ParamKey::ExtrinsicRotation));
}

#[test]
fn overlapping_windows_register_each_knot_once() {
    let mut spline = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
    let mut calib = CalibParams::default();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);

    let samples = [
        ImuSample::gyro_only(0.05, Vec3::zeros()),
        ImuSample::gyro_only(0.12, Vec3::zeros()),
        ImuSample::gyro_only(0.15, Vec3::zeros()),
    ];
    estimator.add_gyro_measurements(&samples, 1.0).unwrap();

    // Knots 0..=4 touched by three windows, plus the bias.
    assert_eq!(estimator.num_param_blocks(), 6);
    let first = estimator.residual_params(1).unwrap();
    let second = estimator.residual_params(2).unwrap();
    assert_eq!(first, second);
}

#[test]
fn problem_at_ground_truth_has_zero_cost() {
    let (truth_spline, truth_calib) = truth();
    let imu = imu_samples(&truth_spline, &truth_calib, 0.0, 1.0, 50.0, true).unwrap();
    let association = SurfelScene::default()
        .observe(&truth_spline, &truth_calib, 0.3, &[0.3, 0.6, 0.9])
        .unwrap();

    let mut spline = truth_spline.clone();
    let mut calib = truth_calib.clone();
    {
        let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
        estimator.add_accel_measurements(&imu, 1.0, 1.0).unwrap();
        estimator.add_surfel_measurements(&association, 1.0).unwrap();
        let summary = estimator.solve(10, false, 1).unwrap();

        assert_eq!(summary.termination, TerminationType::Convergence);
        assert!(summary.initial_cost < 1e-14);
        assert_eq!(summary.iterations, 0);
    }
    assert!(calib.q_lidar_to_imu.angle_to(&truth_calib.q_lidar_to_imu) < 1e-12);
    assert!((calib.p_lidar_in_imu - truth_calib.p_lidar_in_imu).norm() < 1e-12);
}

#[test]
fn single_gyro_sample_builds_one_block() {
    let mut spline = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
    let mut calib = CalibParams::default();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);

    let samples = [ImuSample::gyro_only(0.0, Vec3::new(0.1, 0.0, 0.0))];
    estimator.add_gyro_measurements(&samples, 1.0).unwrap();

    assert_eq!(estimator.num_residual_blocks(), 1);
    assert_eq!(estimator.residual_dims(), vec![3]);
    assert!(estimator.is_constant(ParamKey::GyroBias));
    assert!(estimator.is_constant(ParamKey::RotationKnot(0)));

    let summary = estimator.solve(20, false, 1).unwrap();
    assert!(summary.iterations <= 20);
    assert!(summary.initial_cost > 0.0);
    drop(estimator);

    // Constant blocks come back untouched.
    assert_eq!(calib.gyro_bias, Vec3::zeros());
    assert!(spline.knot_rotation(0).unwrap().angle() < 1e-15);
}
