//! Measurement containers consumed by the estimator.

use serde::{Deserialize, Serialize};

use crate::math::{Real, Vec3};

/// One inertial sample.
///
/// Gyro-only streams leave `accel` empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Sample time (seconds).
    pub timestamp: Real,
    /// Angular velocity in the IMU frame (rad/s).
    pub gyro: Vec3,
    /// Specific force in the IMU frame (m/s²).
    pub accel: Option<Vec3>,
}

impl ImuSample {
    pub fn gyro_only(timestamp: Real, gyro: Vec3) -> Self {
        Self {
            timestamp,
            gyro,
            accel: None,
        }
    }

    pub fn new(timestamp: Real, gyro: Vec3, accel: Vec3) -> Self {
        Self {
            timestamp,
            gyro,
            accel: Some(accel),
        }
    }
}

/// LiDAR point associated with a map plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfelPoint {
    /// Capture time of the point (seconds).
    pub timestamp: Real,
    /// Index into [`SurfelAssociation::plane_parameters`].
    pub plane_id: usize,
    /// Point in the LiDAR frame at capture time.
    pub point: Vec3,
}

/// Point-to-plane associations produced by map segmentation.
///
/// Planes use the closest-point encoding `Π = n * d` in the LiDAR frame at
/// `map_time`, where `n` is the unit normal and `d` the distance from the origin.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SurfelAssociation {
    pub points: Vec<SurfelPoint>,
    pub planes: Vec<Vec3>,
    pub map_time: Real,
}

impl SurfelAssociation {
    pub fn new(points: Vec<SurfelPoint>, planes: Vec<Vec3>, map_time: Real) -> Self {
        Self {
            points,
            planes,
            map_time,
        }
    }

    pub fn points(&self) -> &[SurfelPoint] {
        &self.points
    }

    pub fn plane_parameters(&self) -> &[Vec3] {
        &self.planes
    }

    pub fn reference_map_time(&self) -> Real {
        self.map_time
    }

    /// Index of the first point whose `plane_id` has no plane, if any.
    pub fn first_invalid_point(&self) -> Option<usize> {
        self.points
            .iter()
            .position(|p| p.plane_id >= self.planes.len())
    }

    /// Returns `true` if every point references an existing plane.
    pub fn is_consistent(&self) -> bool {
        self.first_invalid_point().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dangling_plane_ids() {
        let mut assoc = SurfelAssociation::new(
            vec![
                SurfelPoint {
                    timestamp: 0.1,
                    plane_id: 0,
                    point: Vec3::new(1.0, 0.0, 0.0),
                },
                SurfelPoint {
                    timestamp: 0.2,
                    plane_id: 1,
                    point: Vec3::new(0.0, 1.0, 0.0),
                },
            ],
            vec![Vec3::new(0.0, 0.0, 2.0)],
            0.0,
        );
        assert_eq!(assoc.first_invalid_point(), Some(1));
        assert!(!assoc.is_consistent());

        assoc.planes.push(Vec3::new(2.0, 0.0, 0.0));
        assert!(assoc.is_consistent());
    }

    #[test]
    fn imu_sample_constructors() {
        let g = ImuSample::gyro_only(0.5, Vec3::new(0.0, 0.0, 1.0));
        assert!(g.accel.is_none());
        let full = ImuSample::new(0.5, Vec3::zeros(), Vec3::new(0.0, 0.0, 9.81));
        assert_eq!(full.accel, Some(Vec3::new(0.0, 0.0, 9.81)));
    }
}
