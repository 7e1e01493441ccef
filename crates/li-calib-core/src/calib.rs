//! Shared calibration unknowns.

use serde::{Deserialize, Serialize};

use crate::math::{Iso3, Quat, Vec3};

/// Standard gravity in the world frame (z up).
pub const DEFAULT_GRAVITY: [f64; 3] = [0.0, 0.0, -9.81];

/// Scalar weights applied uniformly per measurement type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementWeights {
    pub gyro: f64,
    pub accel: f64,
    pub lidar: f64,
}

impl Default for MeasurementWeights {
    fn default() -> Self {
        Self {
            gyro: 1.0,
            accel: 1.0,
            lidar: 1.0,
        }
    }
}

/// Calibration parameters refined alongside the trajectory.
///
/// The optimizer reads the current values when a solve starts and writes the
/// refined values back in place when it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibParams {
    /// Gyroscope bias (rad/s), subtracted from raw measurements.
    pub gyro_bias: Vec3,
    /// Accelerometer bias (m/s²), subtracted from raw measurements.
    pub accel_bias: Vec3,
    /// Rotation taking LiDAR-frame vectors into the IMU frame.
    pub q_lidar_to_imu: Quat,
    /// LiDAR origin expressed in the IMU frame.
    pub p_lidar_in_imu: Vec3,
    /// Closest-point plane parameters indexed by plane id.
    pub plane_params: Vec<Vec3>,
    /// Gravity in the world frame, held fixed.
    pub gravity: Vec3,
    pub weights: MeasurementWeights,
}

impl Default for CalibParams {
    fn default() -> Self {
        Self {
            gyro_bias: Vec3::zeros(),
            accel_bias: Vec3::zeros(),
            q_lidar_to_imu: Quat::identity(),
            p_lidar_in_imu: Vec3::zeros(),
            plane_params: Vec::new(),
            gravity: Vec3::from(DEFAULT_GRAVITY),
            weights: MeasurementWeights::default(),
        }
    }
}

impl CalibParams {
    /// LiDAR-to-IMU rigid transform.
    pub fn lidar_to_imu(&self) -> Iso3 {
        Iso3::from_parts(self.p_lidar_in_imu.into(), self.q_lidar_to_imu)
    }

    pub fn set_lidar_to_imu(&mut self, extrinsic: &Iso3) {
        self.q_lidar_to_imu = extrinsic.rotation;
        self.p_lidar_in_imu = extrinsic.translation.vector;
    }
}
