//! Session container for staged calibration.
//!
//! A session owns the configuration, the input measurements, the intermediate
//! state and the final output of one calibration problem. Step functions take
//! `&mut CalibrationSession<P>` and advance it in place.
//!
//! ```no_run
//! use li_calib_pipeline::lidar_imu::{LidarImuProblem, run_calibration};
//! use li_calib_pipeline::session::CalibrationSession;
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//!
//! let mut session = CalibrationSession::<LidarImuProblem>::new();
//! session.set_input(input)?;
//! run_calibration(&mut session)?;
//!
//! let export = session.export()?;
//! # Ok(())
//! # }
//! ```

pub mod calibsession;
pub mod problem_type;
pub mod types;

pub use calibsession::CalibrationSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{ExportRecord, LogEntry, SessionMetadata, current_timestamp};
