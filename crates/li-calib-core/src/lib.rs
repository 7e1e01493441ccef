//! Core types for continuous-time LiDAR-IMU calibration.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec3`, `Iso3`, ...) and generic SO(3) helpers,
//! - a uniform split SE(3) B-spline trajectory with spline-meta queries ([`SplineTrajectory`]),
//! - inertial and surfel measurement types,
//! - the shared calibration parameter container ([`CalibParams`]),
//! - deterministic synthetic data generators for tests and demos.
//!
//! Rotation knots are stored as unit quaternions, translation knots as plain vectors.
//! Optimizers address both through knot indices, which stay stable because knots are
//! only ever appended.

/// Calibration parameter container.
pub mod calib;
/// Linear algebra type aliases and SO(3) helpers.
pub mod math;
/// Uniform B-spline trajectory over SE(3).
pub mod spline;
/// Deterministic synthetic datasets.
pub mod synthetic;
/// Inertial and surfel measurement types.
pub mod types;

pub use calib::{CalibParams, MeasurementWeights};
pub use math::*;
pub use spline::{
    SplineError, SplineMeta, SplineSegment, SplineTrajectory, SplineWeights, blending_matrix,
};
pub use types::{ImuSample, SurfelAssociation, SurfelPoint};
