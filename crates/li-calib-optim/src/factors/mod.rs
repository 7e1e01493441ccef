//! Residual models shared by all backends.
//!
//! Every residual is written against [`nalgebra::RealField`] so backends can
//! evaluate it on dual numbers for automatic differentiation. Spline weights
//! are fixed per measurement and precomputed when the factor is built.

mod inertial;
mod surfel;

use anyhow::{Result, anyhow};
use li_calib_core::{SplineMeta, SplineWeights, Vec3};
use nalgebra::{DVector, RealField, UnitQuaternion, Vector3, convert};

use li_calib_core::math::so3;

pub use inertial::{
    GyroAccelBiasFactor, GyroBiasFactor, gyro_accel_bias_residual_generic,
    gyro_bias_residual_generic,
};
pub use surfel::{SurfelPlaneFactor, surfel_plane_residual_generic};

/// Where one evaluation instant falls inside a residual's knot list.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineSample {
    /// Local index of the first active knot.
    pub offset: usize,
    /// Blending weights at the instant.
    pub weights: SplineWeights,
}

impl SplineSample {
    /// Locate `t` inside `meta` and precompute the weights.
    pub fn locate(meta: &SplineMeta, dt: f64, t: f64) -> Result<Self> {
        let (offset, u) = meta
            .locate(t)
            .ok_or_else(|| anyhow!("time {t} is not covered by the spline meta"))?;
        Ok(Self {
            offset,
            weights: SplineWeights::new(meta.order(), u, dt),
        })
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.weights.order()
    }
}

pub(crate) fn lift3<T: RealField>(v: &Vec3) -> Vector3<T> {
    Vector3::new(convert(v.x), convert(v.y), convert(v.z))
}

pub(crate) fn vec3_param<T: RealField>(p: &DVector<T>) -> Vector3<T> {
    debug_assert!(p.len() == 3, "vector block must have 3 params");
    Vector3::new(p[0].clone(), p[1].clone(), p[2].clone())
}

pub(crate) fn quat_param<T: RealField>(p: &DVector<T>) -> UnitQuaternion<T> {
    debug_assert!(p.len() == 4, "rotation block must have 4 params");
    so3::quat_from_xyzw(p[0].clone(), p[1].clone(), p[2].clone(), p[3].clone())
}

/// Active rotation knots for `sample`, taken from the rotation slice of a residual.
pub(crate) fn active_rotations<T: RealField>(
    rot_knots: &[DVector<T>],
    sample: &SplineSample,
) -> Vec<UnitQuaternion<T>> {
    rot_knots[sample.range()].iter().map(quat_param).collect()
}

/// Active translation knots for `sample`, taken from the translation slice of a residual.
pub(crate) fn active_positions<T: RealField>(
    pos_knots: &[DVector<T>],
    sample: &SplineSample,
) -> Vec<Vector3<T>> {
    pos_knots[sample.range()].iter().map(vec3_param).collect()
}
