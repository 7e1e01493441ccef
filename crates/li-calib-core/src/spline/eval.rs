use nalgebra::{RealField, UnitQuaternion, Vector3, convert};

use super::SplineWeights;
use crate::math::so3;

/// Evaluate the cumulative rotation spline and its body-frame angular velocity.
///
/// `knots` are the `order` consecutive rotation knots of the active segment.
pub fn evaluate_rotation<T: RealField>(
    knots: &[UnitQuaternion<T>],
    weights: &SplineWeights,
) -> (UnitQuaternion<T>, Vector3<T>) {
    debug_assert_eq!(knots.len(), weights.order(), "knot count must match spline order");

    let mut rotation = knots[0].clone();
    let mut angular_velocity = Vector3::<T>::zeros();

    for j in 1..knots.len() {
        let delta = so3::log(&(knots[j - 1].inverse() * knots[j].clone()));
        let k: T = convert(weights.cumulative[j]);
        let k_dot: T = convert(weights.cumulative_dot[j]);

        let step = so3::exp(&(delta.clone() * k));
        rotation = rotation * step.clone();
        angular_velocity = step.inverse_transform_vector(&angular_velocity) + delta * k_dot;
    }

    (rotation, angular_velocity)
}

/// Evaluate the translation spline and its second time derivative.
pub fn evaluate_position<T: RealField>(
    knots: &[Vector3<T>],
    weights: &SplineWeights,
) -> (Vector3<T>, Vector3<T>) {
    debug_assert_eq!(knots.len(), weights.order(), "knot count must match spline order");

    let mut position = Vector3::<T>::zeros();
    let mut acceleration = Vector3::<T>::zeros();
    for (j, knot) in knots.iter().enumerate() {
        let b: T = convert(weights.value[j]);
        let b_ddot: T = convert(weights.value_ddot[j]);
        position += knot * b;
        acceleration += knot * b_ddot;
    }
    (position, acceleration)
}
