//! Transfer of parameter values between the estimate and solver vectors.

use anyhow::{Context, Result};
use li_calib_core::math::so3;
use li_calib_core::{CalibParams, SplineTrajectory, Vec3};
use nalgebra::DVector;
use std::collections::HashMap;

use super::keys::{BindingError, ParamKey};

/// Current value of the block behind `key`.
pub(crate) fn read_value(
    trajectory: &SplineTrajectory,
    calib: &CalibParams,
    key: ParamKey,
) -> Result<DVector<f64>> {
    let value = match key {
        ParamKey::RotationKnot(i) => {
            DVector::from_row_slice(&so3::quat_to_xyzw(trajectory.knot_rotation(i)?))
        }
        ParamKey::TranslationKnot(i) => vec3_block(trajectory.knot_translation(i)?),
        ParamKey::GyroBias => vec3_block(&calib.gyro_bias),
        ParamKey::AccelBias => vec3_block(&calib.accel_bias),
        ParamKey::ExtrinsicRotation => {
            DVector::from_row_slice(&so3::quat_to_xyzw(&calib.q_lidar_to_imu))
        }
        ParamKey::ExtrinsicTranslation => vec3_block(&calib.p_lidar_in_imu),
        ParamKey::Plane(id) => vec3_block(
            calib
                .plane_params
                .get(id)
                .ok_or_else(|| BindingError::MissingValue(key.name()))?,
        ),
    };
    Ok(value)
}

fn vec3_block(v: &Vec3) -> DVector<f64> {
    DVector::from_row_slice(v.as_slice())
}

fn vec3_from_block(v: &DVector<f64>) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

/// Store `value` into the block behind `key`.
///
/// Rotation blocks are renormalized on the way back.
pub(crate) fn write_value(
    trajectory: &mut SplineTrajectory,
    calib: &mut CalibParams,
    key: ParamKey,
    value: &DVector<f64>,
) -> Result<()> {
    match key {
        ParamKey::RotationKnot(i) => {
            *trajectory.knot_rotation_mut(i)? =
                so3::quat_from_xyzw(value[0], value[1], value[2], value[3]);
        }
        ParamKey::TranslationKnot(i) => {
            *trajectory.knot_translation_mut(i)? = vec3_from_block(value);
        }
        ParamKey::GyroBias => calib.gyro_bias = vec3_from_block(value),
        ParamKey::AccelBias => calib.accel_bias = vec3_from_block(value),
        ParamKey::ExtrinsicRotation => {
            calib.q_lidar_to_imu = so3::quat_from_xyzw(value[0], value[1], value[2], value[3]);
        }
        ParamKey::ExtrinsicTranslation => calib.p_lidar_in_imu = vec3_from_block(value),
        ParamKey::Plane(id) => {
            let plane = calib
                .plane_params
                .get_mut(id)
                .ok_or_else(|| BindingError::MissingValue(key.name()))?;
            *plane = vec3_from_block(value);
        }
    }
    Ok(())
}

/// Store every named block of `params` back into the estimate.
pub(crate) fn write_values(
    trajectory: &mut SplineTrajectory,
    calib: &mut CalibParams,
    keys: &[(String, ParamKey)],
    params: &HashMap<String, DVector<f64>>,
) -> Result<()> {
    for (name, key) in keys {
        let value = params
            .get(name)
            .with_context(|| format!("solver returned no value for {name}"))?;
        write_value(trajectory, calib, *key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use li_calib_core::{Iso3, Quat};

    #[test]
    fn values_roundtrip_through_blocks() {
        let mut trajectory = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
        trajectory.extend_to(0.0).unwrap();
        let mut calib = CalibParams {
            plane_params: vec![Vec3::new(0.0, 0.0, 2.0)],
            ..CalibParams::default()
        };
        calib.set_lidar_to_imu(&Iso3::new(Vec3::new(0.1, 0.2, 0.3), Vec3::new(0.0, 0.2, 0.0)));

        let q = Quat::from_scaled_axis(Vec3::new(0.1, -0.1, 0.3));
        let scaled = DVector::from_row_slice(&so3::quat_to_xyzw(&q)) * 2.0;
        write_value(&mut trajectory, &mut calib, ParamKey::RotationKnot(2), &scaled).unwrap();
        let stored = trajectory.knot_rotation(2).unwrap();
        assert!(stored.angle_to(&q) < 1e-12);
        assert!((stored.norm() - 1.0).abs() < 1e-15);

        let plane = DVector::from_row_slice(&[0.0, 1.0, 0.0]);
        write_value(&mut trajectory, &mut calib, ParamKey::Plane(0), &plane).unwrap();
        assert_eq!(read_value(&trajectory, &calib, ParamKey::Plane(0)).unwrap(), plane);

        let extr = read_value(&trajectory, &calib, ParamKey::ExtrinsicTranslation).unwrap();
        assert_eq!(extr.as_slice(), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn missing_blocks_are_reported() {
        let trajectory = SplineTrajectory::new(4, 0.1, 0.0).unwrap();
        let calib = CalibParams::default();
        assert!(read_value(&trajectory, &calib, ParamKey::RotationKnot(0)).is_err());
        let err = read_value(&trajectory, &calib, ParamKey::Plane(3)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BindingError>(),
            Some(&BindingError::MissingValue("plane/3".to_string()))
        );
    }
}
