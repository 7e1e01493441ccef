use li_calib_core::spline::{evaluate_position, evaluate_rotation};
use li_calib_core::Vec3;
use nalgebra::{DVector, RealField, SVector, convert};

use super::{SplineSample, active_positions, active_rotations, lift3, quat_param, vec3_param};

/// LiDAR point constrained to its map plane.
///
/// The point is carried from the LiDAR frame at capture time to the LiDAR frame
/// at the reference map time through the spline and the extrinsic, then
/// compared against the closest-point plane `Π`.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfelPlaneFactor {
    /// Number of rotation knots (and translation knots) bound to the residual.
    pub num_knots: usize,
    /// Spline instant of the reference map time.
    pub map_sample: SplineSample,
    /// Spline instant of the point capture time.
    pub point_sample: SplineSample,
    /// Point in the LiDAR frame at capture time.
    pub point: Vec3,
    pub weight: f64,
}

/// `w (n · p_map - d)` with `n = Π / |Π|` and `d = |Π|`.
///
/// `params` holds rotation knots, translation knots, the extrinsic translation,
/// the extrinsic rotation and the plane.
pub fn surfel_plane_residual_generic<T: RealField>(
    params: &[DVector<T>],
    factor: &SurfelPlaneFactor,
) -> SVector<T, 1> {
    let n = factor.num_knots;
    debug_assert_eq!(
        params.len(),
        2 * n + 3,
        "expected [rot.., pos.., p_lidar_in_imu, q_lidar_to_imu, plane]"
    );

    let rot_knots = &params[..n];
    let pos_knots = &params[n..2 * n];

    let (r_map, _) = evaluate_rotation(
        &active_rotations(rot_knots, &factor.map_sample),
        &factor.map_sample.weights,
    );
    let (p_map, _) = evaluate_position(
        &active_positions(pos_knots, &factor.map_sample),
        &factor.map_sample.weights,
    );
    let (r_point, _) = evaluate_rotation(
        &active_rotations(rot_knots, &factor.point_sample),
        &factor.point_sample.weights,
    );
    let (p_point, _) = evaluate_position(
        &active_positions(pos_knots, &factor.point_sample),
        &factor.point_sample.weights,
    );

    let p_lidar_in_imu = vec3_param(&params[2 * n]);
    let q_lidar_to_imu = quat_param(&params[2 * n + 1]);
    let plane = vec3_param(&params[2 * n + 2]);

    let point_imu =
        q_lidar_to_imu.transform_vector(&lift3::<T>(&factor.point)) + p_lidar_in_imu.clone();
    let point_world = r_point.transform_vector(&point_imu) + p_point;
    let point_map_imu = r_map.inverse_transform_vector(&(point_world - p_map));
    let point_map = q_lidar_to_imu.inverse_transform_vector(&(point_map_imu - p_lidar_in_imu));

    let distance = plane.norm();
    let normal = plane / distance.clone();
    let w: T = convert(factor.weight);

    SVector::<T, 1>::new((normal.dot(&point_map) - distance) * w)
}
