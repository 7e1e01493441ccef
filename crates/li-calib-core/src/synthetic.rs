//! Deterministic synthetic data generation helpers.
//!
//! Datasets are generated from a ground-truth [`SplineTrajectory`], so a spline with
//! the same order, spacing and start time can reproduce them exactly:
//! - [`ReferenceMotion`] samples a smooth analytic motion into spline knots,
//! - [`imu_samples`] produces ideal gyro/accelerometer readings with biases applied,
//! - [`SurfelScene`] produces LiDAR points on world planes and the matching
//!   closest-point plane parameters in the map LiDAR frame.
//!
//! No random number generator is involved; point layouts follow fixed grids.

use crate::calib::CalibParams;
use crate::math::{Iso3, Quat, Real, Vec3};
use crate::spline::{SplineError, SplineTrajectory};
use crate::types::{ImuSample, SurfelAssociation, SurfelPoint};

/// Analytic body motion: constant angular velocity and per-axis sinusoidal translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceMotion {
    /// Body angular velocity (rad/s).
    pub angular_velocity: Vec3,
    /// Orientation at `t = 0`.
    pub initial_rotation: Quat,
    /// Translation amplitude per axis (m).
    pub amplitude: Vec3,
    /// Translation angular frequency per axis (rad/s).
    pub frequency: Vec3,
}

impl Default for ReferenceMotion {
    fn default() -> Self {
        Self {
            angular_velocity: Vec3::new(0.4, -0.3, 0.6),
            initial_rotation: Quat::identity(),
            amplitude: Vec3::new(0.3, 0.2, 0.1),
            frequency: Vec3::new(2.0, 3.0, 1.5),
        }
    }
}

impl ReferenceMotion {
    /// Body-to-world pose at `t`.
    pub fn pose(&self, t: Real) -> Iso3 {
        let rotation = self.initial_rotation * Quat::from_scaled_axis(self.angular_velocity * t);
        let position = self
            .amplitude
            .component_mul(&self.frequency.map(|f| (f * t).sin()));
        Iso3::from_parts(position.into(), rotation)
    }

    /// Spline whose knots sample this motion at the knot times, covering `[start, end]`.
    pub fn to_spline(
        &self,
        order: usize,
        dt: Real,
        start: Real,
        end: Real,
    ) -> Result<SplineTrajectory, SplineError> {
        let mut spline = SplineTrajectory::new(order, dt, start)?;
        while spline.num_knots() < order || end >= spline.max_time() {
            let t = start + spline.num_knots() as Real * dt;
            spline.push_knot(&self.pose(t));
        }
        Ok(spline)
    }
}

/// Ideal IMU readings along `trajectory` at `rate` Hz over `[start, end)`.
///
/// Biases and gravity are taken from `calib`. With `with_accel = false` only the
/// gyroscope channel is filled.
pub fn imu_samples(
    trajectory: &SplineTrajectory,
    calib: &CalibParams,
    start: Real,
    end: Real,
    rate: Real,
    with_accel: bool,
) -> Result<Vec<ImuSample>, SplineError> {
    let count = ((end - start) * rate).floor().max(0.0) as usize;
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let t = start + i as Real / rate;
        let gyro = trajectory.angular_velocity(t)? + calib.gyro_bias;
        let accel = if with_accel {
            let rotation = trajectory.rotation(t)?;
            let accel_world = trajectory.linear_acceleration(t)?;
            let specific_force = rotation.inverse_transform_vector(&(accel_world - calib.gravity));
            Some(specific_force + calib.accel_bias)
        } else {
            None
        };
        samples.push(ImuSample {
            timestamp: t,
            gyro,
            accel,
        });
    }
    Ok(samples)
}

/// World plane `n · x = d` with unit normal `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPlane {
    pub normal: Vec3,
    pub distance: Real,
}

impl WorldPlane {
    pub fn new(normal: Vec3, distance: Real) -> Self {
        Self {
            normal: normal.normalize(),
            distance,
        }
    }

    fn tangent_basis(&self) -> (Vec3, Vec3) {
        let helper = if self.normal.x.abs() < 0.9 {
            Vec3::x()
        } else {
            Vec3::y()
        };
        let e1 = self.normal.cross(&helper).normalize();
        let e2 = self.normal.cross(&e1);
        (e1, e2)
    }
}

/// Set of world planes observed by the LiDAR.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfelScene {
    pub planes: Vec<WorldPlane>,
    /// Grid spacing of sampled points on each plane (m).
    pub spacing: Real,
    /// Points per plane per scan, laid out on a square-ish grid.
    pub points_per_plane: usize,
}

impl Default for SurfelScene {
    fn default() -> Self {
        Self {
            planes: vec![
                WorldPlane::new(Vec3::new(0.0, 0.0, 1.0), -1.5),
                WorldPlane::new(Vec3::new(1.0, 0.0, 0.0), 4.0),
                WorldPlane::new(Vec3::new(0.0, 1.0, 0.0), 3.0),
                WorldPlane::new(Vec3::new(-0.6, 0.8, 0.0), 5.0),
            ],
            spacing: 0.5,
            points_per_plane: 9,
        }
    }
}

impl SurfelScene {
    /// Observe every plane at each scan time.
    ///
    /// Points are expressed in the LiDAR frame at their capture time; plane
    /// parameters in the LiDAR frame at `map_time`. The LiDAR pose follows
    /// `trajectory` composed with `calib.lidar_to_imu()`.
    pub fn observe(
        &self,
        trajectory: &SplineTrajectory,
        calib: &CalibParams,
        map_time: Real,
        scan_times: &[Real],
    ) -> Result<SurfelAssociation, SplineError> {
        let lidar_to_imu = calib.lidar_to_imu();
        let map_pose = trajectory.pose(map_time)? * lidar_to_imu;

        let planes = self
            .planes
            .iter()
            .map(|plane| {
                let normal = map_pose.rotation.inverse_transform_vector(&plane.normal);
                let distance = plane.distance - plane.normal.dot(&map_pose.translation.vector);
                normal * distance
            })
            .collect();

        let side = (self.points_per_plane as Real).sqrt().ceil().max(1.0) as usize;
        let half = (side as Real - 1.0) * 0.5;

        let mut points =
            Vec::with_capacity(scan_times.len() * self.planes.len() * self.points_per_plane);
        for (scan_idx, &t) in scan_times.iter().enumerate() {
            let lidar_pose = trajectory.pose(t)? * lidar_to_imu;
            // Shift the grid per scan so scans do not observe identical world points.
            let shift = 0.1 * (scan_idx % 5) as Real;
            for (plane_id, plane) in self.planes.iter().enumerate() {
                let (e1, e2) = plane.tangent_basis();
                let origin = plane.normal * plane.distance;
                for k in 0..self.points_per_plane {
                    let a = ((k % side) as Real - half) * self.spacing + shift;
                    let b = ((k / side) as Real - half) * self.spacing - shift;
                    let world = origin + e1 * a + e2 * b;
                    let point = lidar_pose.inverse_transform_point(&world.into()).coords;
                    points.push(SurfelPoint {
                        timestamp: t,
                        plane_id,
                        point,
                    });
                }
            }
        }

        Ok(SurfelAssociation::new(points, planes, map_time))
    }
}
