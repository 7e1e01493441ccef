//! [`ProblemType`] implementation for LiDAR-IMU calibration.

use anyhow::{Result, bail, ensure};
use li_calib_core::{
    CalibParams, ImuSample, Iso3, MeasurementWeights, SplineTrajectory, SurfelAssociation, Vec3,
    calib::DEFAULT_GRAVITY,
};
use li_calib_optim::SolveSummary;
use serde::{Deserialize, Serialize};

use crate::session::{InvalidationPolicy, ProblemType};

/// Continuous-time LiDAR-IMU extrinsic calibration.
#[derive(Debug)]
pub struct LidarImuProblem;

/// Measurements for one calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarImuInput {
    /// IMU samples in time order. Samples without an accelerometer reading only
    /// contribute to rotation initialization.
    pub imu: Vec<ImuSample>,
    /// Surfel association produced by the LiDAR front end. Required for refinement.
    pub surfels: Option<SurfelAssociation>,
}

impl LidarImuInput {
    pub fn new(imu: Vec<ImuSample>, surfels: Option<SurfelAssociation>) -> Self {
        Self { imu, surfels }
    }
}

/// Configuration for LiDAR-IMU calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarImuConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Trajectory
    // ─────────────────────────────────────────────────────────────────────────
    /// Spline order (degree + 1).
    pub spline_order: usize,
    /// Knot spacing in seconds.
    pub knot_spacing: f64,
    /// Spline start time. `None` starts at the first IMU sample.
    pub start_time: Option<f64>,

    // ─────────────────────────────────────────────────────────────────────────
    // Model
    // ─────────────────────────────────────────────────────────────────────────
    pub weights: MeasurementWeights,
    /// World gravity, held fixed.
    pub gravity: Vec3,
    /// Initial LiDAR-to-IMU transform.
    pub initial_lidar_to_imu: Iso3,

    // ─────────────────────────────────────────────────────────────────────────
    // Solver
    // ─────────────────────────────────────────────────────────────────────────
    /// Iteration budget of the rotation initialization solve.
    pub rotation_max_iters: usize,
    /// Iteration budget of each refinement solve.
    pub refine_max_iters: usize,
    /// Solver threads; `0` uses the hardware concurrency.
    pub num_threads: usize,
    /// Log every solver iteration.
    pub show_progress: bool,
}

impl Default for LidarImuConfig {
    fn default() -> Self {
        Self {
            spline_order: 4,
            knot_spacing: 0.1,
            start_time: None,
            weights: MeasurementWeights::default(),
            gravity: Vec3::from(DEFAULT_GRAVITY),
            initial_lidar_to_imu: Iso3::identity(),
            rotation_max_iters: 50,
            refine_max_iters: 50,
            num_threads: 0,
            show_progress: false,
        }
    }
}

impl LidarImuConfig {
    /// Calibration parameters before any solve.
    pub fn initial_calib(&self) -> CalibParams {
        let mut calib = CalibParams {
            gravity: self.gravity,
            weights: self.weights,
            ..CalibParams::default()
        };
        calib.set_lidar_to_imu(&self.initial_lidar_to_imu);
        calib
    }
}

/// Progress of the staged estimation.
///
/// Rotation initialization moves `Initialized` to `RotationCalibrated`;
/// refinement moves either later stage to `FullyCalibrated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationStage {
    #[default]
    Initialized,
    RotationCalibrated,
    FullyCalibrated,
}

/// Intermediate results carried between steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LidarImuState {
    pub stage: CalibrationStage,
    pub trajectory: Option<SplineTrajectory>,
    pub calib: Option<CalibParams>,
    pub rotation_summary: Option<SolveSummary>,
    pub refine_summary: Option<SolveSummary>,
    /// Number of completed refinement passes.
    pub refine_passes: usize,
}

/// Refined trajectory and calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarImuOutput {
    pub trajectory: SplineTrajectory,
    pub calib: CalibParams,
    pub summary: SolveSummary,
}

/// Calibration result for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarImuExport {
    pub lidar_to_imu: Iso3,
    pub gyro_bias: Vec3,
    pub accel_bias: Vec3,
    /// Map planes in the LiDAR frame at the reference map time.
    pub planes: Vec<Vec3>,
    pub final_cost: f64,
    pub converged: bool,
}

impl ProblemType for LidarImuProblem {
    type Config = LidarImuConfig;
    type Input = LidarImuInput;
    type State = LidarImuState;
    type Output = LidarImuOutput;
    type Export = LidarImuExport;

    fn name() -> &'static str {
        "lidar_imu_v1"
    }

    fn validate_input(input: &Self::Input) -> Result<()> {
        ensure!(!input.imu.is_empty(), "need at least one IMU sample");
        for (i, pair) in input.imu.windows(2).enumerate() {
            ensure!(
                pair[0].timestamp <= pair[1].timestamp,
                "IMU samples out of order at index {} ({} > {})",
                i + 1,
                pair[0].timestamp,
                pair[1].timestamp
            );
        }
        ensure!(
            input.imu.iter().all(|s| s.timestamp.is_finite()),
            "IMU timestamps must be finite"
        );
        if let Some(surfels) = &input.surfels {
            if let Some(point) = surfels.first_invalid_point() {
                bail!(
                    "surfel point {} references plane {}, but only {} planes exist",
                    point,
                    surfels.points()[point].plane_id,
                    surfels.plane_parameters().len()
                );
            }
        }
        Ok(())
    }

    fn validate_config(config: &Self::Config) -> Result<()> {
        ensure!(config.spline_order >= 2, "spline_order must be at least 2");
        ensure!(
            config.knot_spacing.is_finite() && config.knot_spacing > 0.0,
            "knot_spacing must be positive"
        );
        ensure!(config.rotation_max_iters > 0, "rotation_max_iters must be positive");
        ensure!(config.refine_max_iters > 0, "refine_max_iters must be positive");
        let w = config.weights;
        ensure!(
            w.gyro > 0.0 && w.accel > 0.0 && w.lidar > 0.0,
            "measurement weights must be positive"
        );
        Ok(())
    }

    fn validate_input_config(input: &Self::Input, config: &Self::Config) -> Result<()> {
        if let (Some(start), Some(first)) = (config.start_time, input.imu.first()) {
            ensure!(
                start <= first.timestamp,
                "spline start {} is after the first IMU sample at {}",
                start,
                first.timestamp
            );
        }
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn export(output: &Self::Output, _config: &Self::Config) -> Result<Self::Export> {
        Ok(LidarImuExport {
            lidar_to_imu: output.calib.lidar_to_imu(),
            gyro_bias: output.calib.gyro_bias,
            accel_bias: output.calib.accel_bias,
            planes: output.calib.plane_params.clone(),
            final_cost: output.summary.final_cost,
            converged: output.summary.is_converged(),
        })
    }
}
