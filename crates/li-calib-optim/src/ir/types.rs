use anyhow::{Result, ensure};
use std::collections::BTreeSet;

use crate::factors::{GyroAccelBiasFactor, GyroBiasFactor, SurfelPlaneFactor};

/// Identifier for a parameter block in the IR.
///
/// Stable within a `ProblemIR` instance; residual blocks use it to reference
/// their parameter dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub usize);

/// Supported manifold types for parameter blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldKind {
    /// Standard Euclidean vector space with additive updates.
    Euclidean,
    /// SO(3) rotation stored as quaternion `[qx, qy, qz, qw]`.
    SO3,
}

impl ManifoldKind {
    /// Returns `true` if the given ambient dimension matches the manifold storage.
    pub fn compatible_dim(self, dim: usize) -> bool {
        match self {
            ManifoldKind::Euclidean => dim > 0,
            ManifoldKind::SO3 => dim == 4,
        }
    }
}

/// Fixed parameter mask for a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FixedMask {
    fixed_indices: BTreeSet<usize>,
}

impl FixedMask {
    /// Creates a mask with no fixed indices.
    pub fn all_free() -> Self {
        Self::default()
    }

    /// Creates a mask with all indices fixed.
    pub fn all_fixed(dim: usize) -> Self {
        Self {
            fixed_indices: (0..dim).collect(),
        }
    }

    /// Returns `true` if all indices `[0, dim)` are fixed.
    pub fn is_all_fixed(&self, dim: usize) -> bool {
        (0..dim).all(|idx| self.fixed_indices.contains(&idx))
    }

    /// Iterates over fixed indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }

    /// Returns `true` if no indices are fixed.
    pub fn is_empty(&self) -> bool {
        self.fixed_indices.is_empty()
    }
}

/// Backend-agnostic factor kinds.
///
/// Each kind implies its parameter layout and residual dimension. Spline
/// factors bind a variable number of knots, recorded in the factor data.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Gyroscope residual with a constant bias.
    ///
    /// Parameters: `[rot_0 .. rot_n, gyro_bias]`.
    GyroBias(GyroBiasFactor),
    /// Gyroscope and accelerometer residual with both biases.
    ///
    /// Parameters: `[rot_0 .. rot_n, pos_0 .. pos_n, gyro_bias, accel_bias]`.
    GyroAccelBias(GyroAccelBiasFactor),
    /// Signed distance of a LiDAR point to its associated map plane.
    ///
    /// Parameters: `[rot_0 .. rot_n, pos_0 .. pos_n, p_lidar_in_imu, q_lidar_to_imu, plane]`.
    SurfelPlane(SurfelPlaneFactor),
}

impl FactorKind {
    /// Residual dimension implied by the factor.
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::GyroBias(_) => 3,
            FactorKind::GyroAccelBias(_) => 6,
            FactorKind::SurfelPlane(_) => 1,
        }
    }

    /// Expected `(dim, manifold)` of every bound parameter, in order.
    pub fn param_layout(&self) -> Vec<(usize, ManifoldKind)> {
        let rot = (4, ManifoldKind::SO3);
        let vec3 = (3, ManifoldKind::Euclidean);
        match self {
            FactorKind::GyroBias(f) => {
                let mut layout = vec![rot; f.num_knots];
                layout.push(vec3);
                layout
            }
            FactorKind::GyroAccelBias(f) => {
                let mut layout = vec![rot; f.num_knots];
                layout.extend(std::iter::repeat_n(vec3, f.num_knots));
                layout.extend([vec3, vec3]);
                layout
            }
            FactorKind::SurfelPlane(f) => {
                let mut layout = vec![rot; f.num_knots];
                layout.extend(std::iter::repeat_n(vec3, f.num_knots));
                layout.extend([vec3, rot, vec3]);
                layout
            }
        }
    }
}

/// Parameter block definition in the IR.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub manifold: ManifoldKind,
    pub fixed: FixedMask,
}

/// Residual block definition in the IR.
///
/// The order of `params` must match the factor's expected parameter order.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub factor: FactorKind,
    pub residual_dim: usize,
}

/// Backend-agnostic optimization problem representation.
///
/// Parameter blocks and residual blocks are append-only.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    /// Creates an empty IR.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter block and returns its `ParamId`.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        manifold: ManifoldKind,
        fixed: FixedMask,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            manifold,
            fixed,
        });
        id
    }

    /// Adds a residual block to the IR.
    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    /// Finds a parameter by name.
    pub fn param_by_name(&self, name: &str) -> Option<ParamId> {
        self.params.iter().find(|p| p.name == name).map(|p| p.id)
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                param.manifold.compatible_dim(param.dim),
                "param {} manifold {:?} incompatible with dim {}",
                param.name,
                param.manifold,
                param.dim
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim()
            );
            let layout = residual.factor.param_layout();
            ensure!(
                residual.params.len() == layout.len(),
                "residual {} binds {} params, factor expects {}",
                r_idx,
                residual.params.len(),
                layout.len()
            );
            for (slot, (param, (dim, manifold))) in
                residual.params.iter().zip(layout).enumerate()
            {
                let block = self.params.get(param.0).ok_or_else(|| {
                    anyhow::anyhow!("residual {} references missing param {:?}", r_idx, param)
                })?;
                ensure!(
                    block.dim == dim && block.manifold == manifold,
                    "residual {} slot {} expects {}D {:?}, got {} ({}D {:?})",
                    r_idx,
                    slot,
                    dim,
                    manifold,
                    block.name,
                    block.dim,
                    block.manifold
                );
            }
        }

        Ok(())
    }
}
