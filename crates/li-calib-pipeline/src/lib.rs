//! Staged calibration pipelines built on the LiDAR-IMU problem builder.
//!
//! ```no_run
//! use li_calib_pipeline::lidar_imu::{LidarImuProblem, step_refine, step_rotation_init};
//! use li_calib_pipeline::session::CalibrationSession;
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//!
//! let mut session = CalibrationSession::<LidarImuProblem>::new();
//! session.set_input(input)?;
//!
//! step_rotation_init(&mut session, None)?;
//! step_refine(&mut session, None)?;
//!
//! let export = session.export()?;
//! # Ok(())
//! # }
//! ```

pub mod lidar_imu;
pub mod session;

pub use crate::lidar_imu::{
    CalibrationStage, LidarImuConfig, LidarImuExport, LidarImuInput, LidarImuProblem,
    run_calibration,
};
pub use crate::session::{CalibrationSession, ExportRecord, InvalidationPolicy, ProblemType};
