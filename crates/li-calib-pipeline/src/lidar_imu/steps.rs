//! Step functions for staged LiDAR-IMU calibration.

use anyhow::{Context, Result, anyhow, bail, ensure};
use li_calib_core::{ImuSample, SplineTrajectory};
use li_calib_optim::{SolveSummary, TrajectoryEstimator};

use crate::session::CalibrationSession;

use super::problem::{CalibrationStage, LidarImuOutput, LidarImuProblem};

// ─────────────────────────────────────────────────────────────────────────────
// Step Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options for rotation initialization.
#[derive(Debug, Clone, Default)]
pub struct RotationInitOptions {
    /// Override the iteration budget.
    pub max_iters: Option<usize>,
}

/// Options for one refinement pass.
#[derive(Debug, Clone, Default)]
pub struct RefineOptions {
    /// Override the iteration budget.
    pub max_iters: Option<usize>,
}

fn summary_notes(summary: &SolveSummary) -> String {
    format!(
        "{:?} after {} iters, cost {:.3e} -> {:.3e}",
        summary.termination, summary.iterations, summary.initial_cost, summary.final_cost
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Fit the rotation spline to the gyroscope with the bias held at zero.
///
/// Requires [`CalibrationStage::Initialized`]. Builds the spline from the
/// config and extends it over every IMU sample.
pub fn step_rotation_init(
    session: &mut CalibrationSession<LidarImuProblem>,
    opts: Option<RotationInitOptions>,
) -> Result<()> {
    session.validate()?;
    ensure!(
        session.state.stage == CalibrationStage::Initialized,
        "rotation already initialized (stage {:?}); reset the session state to rerun",
        session.state.stage
    );
    let input = session.require_input()?;
    let config = &session.config;
    let max_iters = opts
        .unwrap_or_default()
        .max_iters
        .unwrap_or(config.rotation_max_iters);

    let start = match config.start_time {
        Some(t) => t,
        None => input
            .imu
            .first()
            .map(|s| s.timestamp)
            .ok_or_else(|| anyhow!("no IMU samples"))?,
    };
    let mut trajectory =
        SplineTrajectory::new(config.spline_order, config.knot_spacing, start)
            .context("invalid spline configuration")?;
    let mut calib = config.initial_calib();

    let summary = {
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);
        estimator.add_gyro_measurements(&input.imu, config.weights.gyro)?;
        estimator.solve(max_iters, config.show_progress, config.num_threads)?
    };

    if !summary.is_usable() {
        let notes = summary_notes(&summary);
        session.log_failure("rotation_init", notes.clone());
        bail!("rotation initialization failed: {notes}");
    }

    log::info!(
        "rotation initialized over {} knots: {}",
        trajectory.num_knots(),
        summary_notes(&summary)
    );
    session.state.stage = CalibrationStage::RotationCalibrated;
    session.state.trajectory = Some(trajectory);
    session.state.calib = Some(calib);
    session.state.rotation_summary = Some(summary);
    session.state.refine_summary = None;
    session.log_success_with_notes("rotation_init", summary_notes(&summary));
    Ok(())
}

/// Jointly refine trajectory, biases, extrinsic and map planes.
///
/// Requires a rotation-initialized session and surfel associations. Can be run
/// repeatedly; every pass starts from the previous estimate.
pub fn step_refine(
    session: &mut CalibrationSession<LidarImuProblem>,
    opts: Option<RefineOptions>,
) -> Result<()> {
    session.validate()?;
    ensure!(
        matches!(
            session.state.stage,
            CalibrationStage::RotationCalibrated | CalibrationStage::FullyCalibrated
        ),
        "rotation initialization required before refinement (stage {:?})",
        session.state.stage
    );
    let input = session.require_input()?;
    let surfels = input
        .surfels
        .as_ref()
        .ok_or_else(|| anyhow!("refinement needs surfel associations"))?;
    let config = &session.config;
    let max_iters = opts
        .unwrap_or_default()
        .max_iters
        .unwrap_or(config.refine_max_iters);

    let mut trajectory = session
        .state
        .trajectory
        .clone()
        .ok_or_else(|| anyhow!("session state has no trajectory"))?;
    let mut calib = session
        .state
        .calib
        .clone()
        .ok_or_else(|| anyhow!("session state has no calibration"))?;

    // Later passes continue from the refined planes.
    let mut surfels = surfels.clone();
    if calib.plane_params.len() == surfels.planes.len() {
        surfels.planes = calib.plane_params.clone();
    }

    let accel: Vec<ImuSample> = input
        .imu
        .iter()
        .filter(|s| s.accel.is_some())
        .copied()
        .collect();
    if accel.is_empty() {
        log::warn!("no accelerometer samples; biases and translation rely on surfels only");
    }

    let summary = {
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);
        estimator.add_accel_measurements(&accel, config.weights.gyro, config.weights.accel)?;
        estimator
            .add_surfel_measurements(&surfels, config.weights.lidar)
            .context("surfel points must lie inside the IMU time span")?;
        estimator.solve(max_iters, config.show_progress, config.num_threads)?
    };

    if !summary.is_usable() {
        let notes = summary_notes(&summary);
        session.log_failure("refine", notes.clone());
        bail!("refinement failed: {notes}");
    }

    let t = calib.p_lidar_in_imu;
    log::info!(
        "refined extrinsic: p = [{:.4}, {:.4}, {:.4}], angle = {:.4} rad",
        t.x,
        t.y,
        t.z,
        calib.q_lidar_to_imu.angle()
    );
    session.state.stage = CalibrationStage::FullyCalibrated;
    session.state.trajectory = Some(trajectory.clone());
    session.state.calib = Some(calib.clone());
    session.state.refine_summary = Some(summary);
    session.state.refine_passes += 1;
    session.set_output(LidarImuOutput {
        trajectory,
        calib,
        summary,
    });
    session.log_success_with_notes("refine", summary_notes(&summary));
    Ok(())
}

/// Rotation initialization followed by one refinement pass.
pub fn run_calibration(session: &mut CalibrationSession<LidarImuProblem>) -> Result<()> {
    step_rotation_init(session, None)?;
    step_refine(session, None)?;
    Ok(())
}
