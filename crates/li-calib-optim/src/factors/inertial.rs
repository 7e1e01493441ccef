use li_calib_core::spline::{evaluate_position, evaluate_rotation};
use li_calib_core::Vec3;
use nalgebra::{DVector, RealField, SVector, convert};

use super::{SplineSample, active_positions, active_rotations, lift3, vec3_param};

/// Gyroscope measurement against the rotation spline with a constant bias.
#[derive(Debug, Clone, PartialEq)]
pub struct GyroBiasFactor {
    /// Number of rotation knots bound to the residual.
    pub num_knots: usize,
    pub sample: SplineSample,
    /// Measured angular velocity (rad/s).
    pub gyro: Vec3,
    pub weight: f64,
}

/// Gyroscope and accelerometer measurement against the full pose spline.
#[derive(Debug, Clone, PartialEq)]
pub struct GyroAccelBiasFactor {
    /// Number of rotation knots (and translation knots) bound to the residual.
    pub num_knots: usize,
    pub sample: SplineSample,
    pub gyro: Vec3,
    /// Measured specific force (m/s²).
    pub accel: Vec3,
    /// World-frame gravity.
    pub gravity: Vec3,
    pub gyro_weight: f64,
    pub accel_weight: f64,
}

/// `w (ω(t) - ω_meas + b_g)`.
///
/// `params` holds `num_knots` rotation knots followed by the gyro bias.
pub fn gyro_bias_residual_generic<T: RealField>(
    params: &[DVector<T>],
    factor: &GyroBiasFactor,
) -> SVector<T, 3> {
    let n = factor.num_knots;
    debug_assert_eq!(params.len(), n + 1, "expected [rot.., gyro_bias]");

    let knots = active_rotations(&params[..n], &factor.sample);
    let (_, omega) = evaluate_rotation(&knots, &factor.sample.weights);
    let bias = vec3_param(&params[n]);
    let w: T = convert(factor.weight);

    (omega - lift3::<T>(&factor.gyro) + bias) * w
}

/// `[w_g (ω - ω_meas + b_g); w_a (Rᵀ(a - g) - a_meas + b_a)]`.
///
/// `params` holds rotation knots, translation knots, gyro bias and accel bias.
pub fn gyro_accel_bias_residual_generic<T: RealField>(
    params: &[DVector<T>],
    factor: &GyroAccelBiasFactor,
) -> SVector<T, 6> {
    let n = factor.num_knots;
    debug_assert_eq!(
        params.len(),
        2 * n + 2,
        "expected [rot.., pos.., gyro_bias, accel_bias]"
    );

    let rotations = active_rotations(&params[..n], &factor.sample);
    let positions = active_positions(&params[n..2 * n], &factor.sample);
    let (rotation, omega) = evaluate_rotation(&rotations, &factor.sample.weights);
    let (_, accel_world) = evaluate_position(&positions, &factor.sample.weights);

    let gyro_bias = vec3_param(&params[2 * n]);
    let accel_bias = vec3_param(&params[2 * n + 1]);
    let w_g: T = convert(factor.gyro_weight);
    let w_a: T = convert(factor.accel_weight);

    let r_gyro = (omega - lift3::<T>(&factor.gyro) + gyro_bias) * w_g;
    let specific_force =
        rotation.inverse_transform_vector(&(accel_world - lift3::<T>(&factor.gravity)));
    let r_accel = (specific_force - lift3::<T>(&factor.accel) + accel_bias) * w_a;

    SVector::<T, 6>::new(
        r_gyro.x.clone(),
        r_gyro.y.clone(),
        r_gyro.z.clone(),
        r_accel.x.clone(),
        r_accel.y.clone(),
        r_accel.z.clone(),
    )
}
