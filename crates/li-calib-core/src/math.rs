//! Mathematical utilities and type definitions.
//!
//! Besides the `f64` aliases used throughout the workspace, this module provides
//! SO(3) exponential and logarithm maps written against [`nalgebra::RealField`] so
//! the same code runs on plain floats and on dual numbers inside residuals.

use nalgebra::{Isometry3, Matrix3, Quaternion, RealField, UnitQuaternion, Vector3, convert};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// Unit quaternion with [`Real`] components.
pub type Quat = UnitQuaternion<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// SO(3) maps shared by spline evaluation and residual models.
pub mod so3 {
    use super::*;

    /// Squared angle below which the Taylor expansions are used.
    const SMALL_ANGLE_SQ: f64 = 1.0e-10;

    /// Exponential map from a rotation vector to a unit quaternion.
    pub fn exp<T: RealField>(omega: &Vector3<T>) -> UnitQuaternion<T> {
        let theta_sq = omega.norm_squared();
        let threshold: T = convert(SMALL_ANGLE_SQ);

        let (w, scale) = if theta_sq < threshold {
            let eighth: T = convert(0.125);
            let one_48th: T = convert(1.0 / 48.0);
            let half: T = convert(0.5);
            (
                T::one() - theta_sq.clone() * eighth,
                half - theta_sq * one_48th,
            )
        } else {
            let half: T = convert(0.5);
            let theta = theta_sq.sqrt();
            let half_theta = theta.clone() * half;
            (half_theta.clone().cos(), half_theta.sin() / theta)
        };

        let xyz = omega * scale;
        quat_from_xyzw(xyz.x.clone(), xyz.y.clone(), xyz.z.clone(), w)
    }

    /// Logarithm map from a unit quaternion to a rotation vector.
    ///
    /// The result lies in the ball of radius π.
    pub fn log<T: RealField>(q: &UnitQuaternion<T>) -> Vector3<T> {
        let q = q.quaternion();
        let (w, v) = if q.w < T::zero() {
            (-q.w.clone(), -q.imag())
        } else {
            (q.w.clone(), q.imag())
        };

        let n_sq = v.norm_squared();
        let threshold: T = convert(SMALL_ANGLE_SQ);
        if n_sq < threshold {
            let two: T = convert(2.0);
            let three: T = convert(3.0);
            let w_sq = w.clone() * w.clone();
            let scale = two / w.clone() * (T::one() - n_sq / (three * w_sq));
            v * scale
        } else {
            let n = n_sq.sqrt();
            let two: T = convert(2.0);
            let scale = two * n.clone().atan2(w) / n;
            v * scale
        }
    }

    /// Build a unit quaternion from storage order `[qx, qy, qz, qw]`.
    pub fn quat_from_xyzw<T: RealField>(x: T, y: T, z: T, w: T) -> UnitQuaternion<T> {
        UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
    }

    /// Storage order `[qx, qy, qz, qw]` of a unit quaternion.
    pub fn quat_to_xyzw(q: &super::Quat) -> [f64; 4] {
        [q.i, q.j, q.k, q.w]
    }
}
