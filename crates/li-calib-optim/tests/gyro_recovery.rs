use std::sync::{Arc, Mutex};

use li_calib_core::synthetic::{ReferenceMotion, imu_samples};
use li_calib_core::{CalibParams, SplineTrajectory, Vec3};
use li_calib_optim::{
    CallbackReturn, EstimatorState, IterationCallback, IterationSummary, TerminationType,
    TrajectoryEstimator,
};

fn constant_rate_samples() -> (Vec3, Vec<li_calib_core::ImuSample>) {
    let motion = ReferenceMotion {
        angular_velocity: Vec3::new(0.3, -0.2, 0.5),
        amplitude: Vec3::zeros(),
        ..ReferenceMotion::default()
    };
    let truth = motion.to_spline(4, 0.1, 0.0, 1.0).unwrap();
    let samples = imu_samples(&truth, &CalibParams::default(), 0.0, 1.0, 100.0, false).unwrap();
    (motion.angular_velocity, samples)
}

#[test]
fn recovers_constant_angular_velocity() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (omega, samples) = constant_rate_samples();

    let mut spline = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
    let mut calib = CalibParams::default();
    let summary = {
        let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
        estimator.add_gyro_measurements(&samples, 1.0).unwrap();
        estimator.solve(50, true, 2).unwrap()
    };

    assert!(summary.is_usable(), "solve failed: {summary:?}");
    assert!(summary.initial_cost > 1.0);
    assert!(summary.final_cost < 1e-8, "final cost {}", summary.final_cost);
    for sample in &samples {
        let w = spline.angular_velocity(sample.timestamp).unwrap();
        assert!((w - omega).norm() < 1e-4, "t = {}: {w}", sample.timestamp);
    }
    // Rotation knots stay unit quaternions after the write-back.
    for i in 0..spline.num_knots() {
        let q = spline.knot_rotation(i).unwrap();
        assert!((q.quaternion().norm() - 1.0).abs() < 1e-12);
    }
}

struct AbortAfter(usize);

impl IterationCallback for AbortAfter {
    fn on_iteration(
        &mut self,
        summary: &IterationSummary,
        _state: Option<EstimatorState<'_>>,
    ) -> CallbackReturn {
        if summary.iteration >= self.0 {
            CallbackReturn::Abort
        } else {
            CallbackReturn::Continue
        }
    }
}

#[test]
fn callback_abort_stops_the_solve() {
    let (_, samples) = constant_rate_samples();
    let mut spline = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
    let mut calib = CalibParams::default();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
    estimator.add_gyro_measurements(&samples, 1.0).unwrap();
    estimator.add_callback(AbortAfter(1));

    let summary = estimator.solve(50, false, 1).unwrap();
    assert_eq!(summary.termination, TerminationType::UserFailure);
    assert_eq!(summary.iterations, 1);
    assert!(!summary.is_usable());
}

struct RecordState {
    seen: Arc<Mutex<Vec<(usize, f64)>>>,
}

impl IterationCallback for RecordState {
    fn on_iteration(
        &mut self,
        summary: &IterationSummary,
        state: Option<EstimatorState<'_>>,
    ) -> CallbackReturn {
        if let Some(state) = state {
            let w = state.trajectory.angular_velocity(0.5).unwrap_or_else(|_| Vec3::zeros());
            self.seen.lock().unwrap().push((summary.iteration, w.norm()));
        }
        CallbackReturn::Continue
    }

    fn needs_state(&self) -> bool {
        true
    }
}

#[test]
fn state_callbacks_see_intermediate_estimates() {
    let (omega, samples) = constant_rate_samples();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut spline = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
    let mut calib = CalibParams::default();
    let mut estimator = TrajectoryEstimator::new(&mut spline, &mut calib);
    estimator.add_gyro_measurements(&samples, 1.0).unwrap();
    estimator.add_callback(RecordState { seen: seen.clone() });
    let summary = estimator.solve(50, false, 1).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), summary.iterations);
    assert!(seen.iter().enumerate().all(|(i, (iter, _))| *iter == i + 1));
    // The first step already moves the spline away from the identity initialization.
    assert!(seen[0].1 > 0.1 * omega.norm());
}
