use thiserror::Error;

use crate::ir::ManifoldKind;

/// Stable handle of a parameter block.
///
/// Knot handles are indices into the index-stable knot sequences of the spline;
/// calibration handles name fields of the calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    RotationKnot(usize),
    TranslationKnot(usize),
    GyroBias,
    AccelBias,
    ExtrinsicRotation,
    ExtrinsicTranslation,
    Plane(usize),
}

impl ParamKey {
    /// Parameter block name used in the IR.
    pub fn name(&self) -> String {
        match self {
            ParamKey::RotationKnot(i) => format!("rot/{i}"),
            ParamKey::TranslationKnot(i) => format!("pos/{i}"),
            ParamKey::GyroBias => "gyro_bias".to_string(),
            ParamKey::AccelBias => "accel_bias".to_string(),
            ParamKey::ExtrinsicRotation => "q_lidar_to_imu".to_string(),
            ParamKey::ExtrinsicTranslation => "p_lidar_in_imu".to_string(),
            ParamKey::Plane(id) => format!("plane/{id}"),
        }
    }

    pub fn manifold(&self) -> ManifoldKind {
        match self {
            ParamKey::RotationKnot(_) | ParamKey::ExtrinsicRotation => ManifoldKind::SO3,
            _ => ManifoldKind::Euclidean,
        }
    }

    /// Ambient dimension of the block.
    pub fn dim(&self) -> usize {
        match self.manifold() {
            ManifoldKind::SO3 => 4,
            ManifoldKind::Euclidean => 3,
        }
    }
}

/// Which knot sequence a control-point binding pass walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnotKind {
    Rotation,
    Translation,
}

impl KnotKind {
    pub fn key(self, index: usize) -> ParamKey {
        match self {
            KnotKind::Rotation => ParamKey::RotationKnot(index),
            KnotKind::Translation => ParamKey::TranslationKnot(index),
        }
    }

    /// Knot index of `key` if it belongs to this sequence.
    pub fn index_of(self, key: ParamKey) -> Option<usize> {
        match (self, key) {
            (KnotKind::Rotation, ParamKey::RotationKnot(i))
            | (KnotKind::Translation, ParamKey::TranslationKnot(i)) => Some(i),
            _ => None,
        }
    }
}

/// Measurement that cannot be bound to parameter blocks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    /// A surfel point references a plane that does not exist.
    #[error("surfel point {point} references plane {plane_id}, but only {num_planes} planes exist")]
    PlaneOutOfRange {
        point: usize,
        plane_id: usize,
        num_planes: usize,
    },
    /// A sample passed to the accelerometer stage has no accelerometer reading.
    #[error("imu sample {index} at t = {timestamp} has no accelerometer reading")]
    MissingAccel { index: usize, timestamp: f64 },
    /// A parameter block has no backing value in the trajectory or calibration.
    #[error("no value for parameter block {0}")]
    MissingValue(String),
}
