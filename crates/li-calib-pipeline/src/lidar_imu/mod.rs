//! Staged LiDAR-IMU calibration.
//!
//! Rotation initialization fits the rotation spline to the gyroscope alone.
//! Refinement then adds accelerometer and surfel residuals in one problem and
//! estimates the full trajectory, both IMU biases, the LiDAR-IMU extrinsic and
//! the map planes.

mod problem;
mod steps;

pub use problem::{
    CalibrationStage, LidarImuConfig, LidarImuExport, LidarImuInput, LidarImuOutput,
    LidarImuProblem, LidarImuState,
};
pub use steps::{
    RefineOptions, RotationInitOptions, run_calibration, step_refine, step_rotation_init,
};
