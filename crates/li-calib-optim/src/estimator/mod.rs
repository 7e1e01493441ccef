//! Incremental problem builder for continuous-time LiDAR-IMU calibration.
//!
//! [`TrajectoryEstimator`] binds measurement batches to spline knots and
//! calibration unknowns, accumulates residual blocks in a [`ProblemIR`] and
//! drives the solve. Values are read from the borrowed trajectory and
//! calibration at solve time and written back in place afterwards.

mod callback;
mod keys;
mod state;

use anyhow::{Context, Result, ensure};
use li_calib_core::{CalibParams, ImuSample, SplineMeta, SplineTrajectory, SurfelAssociation};
use nalgebra::DVector;
use std::collections::HashMap;

use crate::backend::{
    BackendSolveOptions, IterationObserver, OptimBackend, SolveSummary, TerminationType,
    TinySolverBackend,
};
use crate::factors::{GyroAccelBiasFactor, GyroBiasFactor, SplineSample, SurfelPlaneFactor};
use crate::ir::{FactorKind, FixedMask, ParamId, ProblemIR, ResidualBlock};

pub use callback::{EstimatorState, IterationCallback};
pub use keys::{BindingError, KnotKind, ParamKey};

use callback::CallbackObserver;
use state::{read_value, write_values};

/// Problem builder over a borrowed trajectory and calibration.
///
/// The mutable borrows keep every other actor away from the estimate until the
/// estimator is dropped. Parameter blocks are keyed by [`ParamKey`] and
/// registered at most once; once marked constant a block stays constant.
pub struct TrajectoryEstimator<'a> {
    trajectory: &'a mut SplineTrajectory,
    calib: &'a mut CalibParams,
    ir: ProblemIR,
    param_ids: HashMap<ParamKey, ParamId>,
    keys_by_id: Vec<ParamKey>,
    backend: TinySolverBackend,
    callbacks: Vec<Box<dyn IterationCallback + Send>>,
}

impl<'a> TrajectoryEstimator<'a> {
    pub fn new(trajectory: &'a mut SplineTrajectory, calib: &'a mut CalibParams) -> Self {
        Self {
            trajectory,
            calib,
            ir: ProblemIR::new(),
            param_ids: HashMap::new(),
            keys_by_id: Vec::new(),
            backend: TinySolverBackend::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn trajectory(&self) -> &SplineTrajectory {
        &*self.trajectory
    }

    pub fn calib(&self) -> &CalibParams {
        &*self.calib
    }

    /// Problem assembled so far.
    pub fn ir(&self) -> &ProblemIR {
        &self.ir
    }

    pub fn param_id(&self, key: ParamKey) -> Option<ParamId> {
        self.param_ids.get(&key).copied()
    }

    /// Key of a registered block.
    pub fn param_key(&self, id: ParamId) -> Option<ParamKey> {
        self.keys_by_id.get(id.0).copied()
    }

    pub fn num_param_blocks(&self) -> usize {
        self.ir.params.len()
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.ir.residuals.len()
    }

    /// Output dimension of every residual block, in insertion order.
    pub fn residual_dims(&self) -> Vec<usize> {
        self.ir.residuals.iter().map(|r| r.residual_dim).collect()
    }

    /// Blocks bound to residual `index`, in factor parameter order.
    pub fn residual_params(&self, index: usize) -> Option<&[ParamId]> {
        self.ir.residuals.get(index).map(|r| r.params.as_slice())
    }

    /// Returns `true` if `key` is registered and held constant.
    pub fn is_constant(&self, key: ParamKey) -> bool {
        self.param_id(key)
            .map(|id| {
                let block = &self.ir.params[id.0];
                block.fixed.is_all_fixed(block.dim)
            })
            .unwrap_or(false)
    }

    /// Hold `key` constant for the rest of the session.
    ///
    /// Returns `false` if the block was never registered.
    pub fn set_constant(&mut self, key: ParamKey) -> bool {
        let Some(id) = self.param_id(key) else {
            log::warn!("cannot hold {} constant: block is not registered", key.name());
            return false;
        };
        let block = &mut self.ir.params[id.0];
        block.fixed = FixedMask::all_fixed(block.dim);
        log::debug!("holding {} constant", block.name);
        true
    }

    /// Registers `key` once and returns its id.
    fn register(&mut self, key: ParamKey) -> ParamId {
        if let Some(id) = self.param_ids.get(&key) {
            return *id;
        }
        let id = self.ir.add_param_block(
            key.name(),
            key.dim(),
            key.manifold(),
            FixedMask::all_free(),
        );
        log::debug!("registered {} as {:?} ({:?})", key.name(), id, key.manifold());
        self.param_ids.insert(key, id);
        self.keys_by_id.push(key);
        id
    }

    /// Appends the ids of every knot of `meta` to `out`, registering new ones.
    ///
    /// Knots are visited segment by segment in ascending index order. Repeated
    /// calls append again but never register a knot twice.
    pub fn add_control_points(
        &mut self,
        meta: &SplineMeta,
        out: &mut Vec<ParamId>,
        kind: KnotKind,
    ) -> Result<()> {
        for segment in meta.segments() {
            let start = self.trajectory.segment_start_index(segment)?;
            for index in start..start + segment.n {
                out.push(self.register(kind.key(index)));
            }
        }
        Ok(())
    }

    /// Holds the earliest registered knot of `kind` constant.
    ///
    /// This is knot 0 whenever a window reaches the start of the spline.
    /// Returns the anchored index, or `None` if no knot of `kind` is registered.
    fn anchor_first_knot(&mut self, kind: KnotKind) -> Option<usize> {
        let first = self
            .keys_by_id
            .iter()
            .filter_map(|key| kind.index_of(*key))
            .min()?;
        self.set_constant(kind.key(first));
        Some(first)
    }

    fn push_residual(&mut self, params: Vec<ParamId>, factor: FactorKind) {
        self.ir.add_residual_block(ResidualBlock {
            params,
            residual_dim: factor.residual_dim(),
            factor,
        });
    }

    /// Gyroscope-only residuals for rotation initialization.
    ///
    /// The spline is extended to cover every sample. After the batch the gyro
    /// bias and the earliest bound rotation knot are held constant.
    pub fn add_gyro_measurements(&mut self, samples: &[ImuSample], weight: f64) -> Result<()> {
        if samples.is_empty() {
            log::warn!("empty gyro batch, no residuals added");
            return Ok(());
        }

        for sample in samples {
            let t = sample.timestamp;
            self.trajectory
                .extend_to(t)
                .with_context(|| format!("extending spline to gyro sample at t = {t}"))?;
            let meta = self.trajectory.compute_spline_meta(&[(t, t)])?;

            let mut params = Vec::with_capacity(meta.num_knots() + 1);
            self.add_control_points(&meta, &mut params, KnotKind::Rotation)?;
            let num_knots = params.len();
            params.push(self.register(ParamKey::GyroBias));

            let factor = GyroBiasFactor {
                num_knots,
                sample: SplineSample::locate(&meta, self.trajectory.dt(), t)?,
                gyro: sample.gyro,
                weight,
            };
            self.push_residual(params, FactorKind::GyroBias(factor));
        }

        self.set_constant(ParamKey::GyroBias);
        let anchor = self.anchor_first_knot(KnotKind::Rotation);
        log::info!(
            "added {} gyro residuals, rotation anchored at knot {:?}",
            samples.len(),
            anchor
        );
        Ok(())
    }

    /// Gyroscope and accelerometer residuals with both biases free.
    ///
    /// Every sample must carry an accelerometer reading and lie inside the
    /// current spline. After the batch the earliest bound rotation and
    /// translation knots are held constant.
    pub fn add_accel_measurements(
        &mut self,
        samples: &[ImuSample],
        gyro_weight: f64,
        accel_weight: f64,
    ) -> Result<()> {
        if samples.is_empty() {
            log::warn!("empty accelerometer batch, no residuals added");
            return Ok(());
        }
        if let Some(index) = samples.iter().position(|s| s.accel.is_none()) {
            return Err(BindingError::MissingAccel {
                index,
                timestamp: samples[index].timestamp,
            }
            .into());
        }

        for sample in samples {
            let t = sample.timestamp;
            let Some(accel) = sample.accel else {
                continue;
            };
            let meta = self
                .trajectory
                .compute_spline_meta(&[(t, t)])
                .with_context(|| format!("accelerometer sample at t = {t}"))?;

            let mut params = Vec::with_capacity(2 * meta.num_knots() + 2);
            self.add_control_points(&meta, &mut params, KnotKind::Rotation)?;
            let num_knots = params.len();
            self.add_control_points(&meta, &mut params, KnotKind::Translation)?;
            params.push(self.register(ParamKey::GyroBias));
            params.push(self.register(ParamKey::AccelBias));

            let factor = GyroAccelBiasFactor {
                num_knots,
                sample: SplineSample::locate(&meta, self.trajectory.dt(), t)?,
                gyro: sample.gyro,
                accel,
                gravity: self.calib.gravity,
                gyro_weight,
                accel_weight,
            };
            self.push_residual(params, FactorKind::GyroAccelBias(factor));
        }

        let anchor = self.anchor_first_knot(KnotKind::Rotation);
        self.anchor_first_knot(KnotKind::Translation);
        log::info!(
            "added {} gyro+accel residuals, pose anchored at knot {:?}",
            samples.len(),
            anchor
        );
        Ok(())
    }

    /// Point-to-plane residuals binding the extrinsic and the map planes.
    ///
    /// The plane parameters of `association` become the initial values of the
    /// plane blocks. After the batch the earliest bound rotation and
    /// translation knots are held constant, so a surfel-only problem is
    /// anchored even when no window reaches knot 0.
    pub fn add_surfel_measurements(
        &mut self,
        association: &SurfelAssociation,
        weight: f64,
    ) -> Result<()> {
        let planes = association.plane_parameters();
        if let Some(point) = association.first_invalid_point() {
            return Err(BindingError::PlaneOutOfRange {
                point,
                plane_id: association.points()[point].plane_id,
                num_planes: planes.len(),
            }
            .into());
        }
        if association.points().is_empty() {
            log::warn!("empty surfel association, no residuals added");
            return Ok(());
        }

        self.calib.plane_params = planes.to_vec();
        let map_time = association.reference_map_time();
        let dt = self.trajectory.dt();

        for surfel in association.points() {
            let t = surfel.timestamp;
            let meta = self
                .trajectory
                .compute_spline_meta(&[(map_time, t)])
                .with_context(|| format!("surfel point at t = {t}"))?;

            let mut params = Vec::with_capacity(2 * meta.num_knots() + 3);
            self.add_control_points(&meta, &mut params, KnotKind::Rotation)?;
            let num_knots = params.len();
            self.add_control_points(&meta, &mut params, KnotKind::Translation)?;
            params.push(self.register(ParamKey::ExtrinsicTranslation));
            params.push(self.register(ParamKey::ExtrinsicRotation));
            params.push(self.register(ParamKey::Plane(surfel.plane_id)));

            let factor = SurfelPlaneFactor {
                num_knots,
                map_sample: SplineSample::locate(&meta, dt, map_time)?,
                point_sample: SplineSample::locate(&meta, dt, t)?,
                point: surfel.point,
                weight,
            };
            self.push_residual(params, FactorKind::SurfelPlane(factor));
        }

        let anchor = self.anchor_first_knot(KnotKind::Rotation);
        self.anchor_first_knot(KnotKind::Translation);
        log::info!(
            "added {} surfel residuals over {} planes, pose anchored at knot {:?}",
            association.points().len(),
            planes.len(),
            anchor
        );
        Ok(())
    }

    /// Attach a callback invoked after every solver iteration.
    pub fn add_callback(&mut self, callback: impl IterationCallback + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Levenberg-Marquardt solve with sparse Cholesky steps.
    ///
    /// `num_threads == 0` uses the hardware concurrency.
    pub fn solve(
        &mut self,
        max_iterations: usize,
        show_progress: bool,
        num_threads: usize,
    ) -> Result<SolveSummary> {
        let opts = BackendSolveOptions {
            max_iters: max_iterations,
            num_threads,
            show_progress,
            ..BackendSolveOptions::default()
        };
        self.solve_with_options(&opts)
    }

    /// Solve with explicit backend options and write the result back in place.
    ///
    /// Structural problems are errors; numerical outcomes are reported in the
    /// returned summary.
    pub fn solve_with_options(&mut self, opts: &BackendSolveOptions) -> Result<SolveSummary> {
        if self.ir.residuals.is_empty() {
            log::warn!("nothing to solve: no residual blocks");
            return Ok(SolveSummary {
                termination: TerminationType::Convergence,
                initial_cost: 0.0,
                final_cost: 0.0,
                iterations: 0,
            });
        }
        ensure!(
            self.keys_by_id.len() == self.ir.params.len(),
            "parameter registry out of sync with the problem"
        );

        let keys: Vec<(String, ParamKey)> = self
            .ir
            .params
            .iter()
            .zip(&self.keys_by_id)
            .map(|(block, key)| (block.name.clone(), *key))
            .collect();
        let initial = keys
            .iter()
            .map(|(name, key)| {
                let value = read_value(&*self.trajectory, &*self.calib, *key)?;
                Ok((name.clone(), value))
            })
            .collect::<Result<HashMap<String, DVector<f64>>>>()?;

        let needs_state = self.callbacks.iter().any(|c| c.needs_state());
        let mut observer = if self.callbacks.is_empty() {
            None
        } else {
            Some(CallbackObserver {
                trajectory: &mut *self.trajectory,
                calib: &mut *self.calib,
                keys: &keys,
                callbacks: &mut self.callbacks,
                needs_state,
            })
        };
        let solution = self.backend.solve(
            &self.ir,
            &initial,
            opts,
            observer
                .as_mut()
                .map(|o| o as &mut (dyn IterationObserver + Send)),
        )?;

        write_values(self.trajectory, self.calib, &keys, &solution.params)?;

        let summary = solution.summary;
        log::info!(
            "solve finished: {:?} after {} iterations, cost {:.6e} -> {:.6e}",
            summary.termination,
            summary.iterations,
            summary.initial_cost,
            summary.final_cost
        );
        if !summary.is_converged() {
            log::warn!("solve did not converge ({:?})", summary.termination);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use li_calib_core::{SurfelPoint, Vec3};

    fn spline() -> SplineTrajectory {
        SplineTrajectory::new(4, 0.1, 0.0).unwrap()
    }

    #[test]
    fn control_points_register_once_and_append_twice() {
        let mut trajectory = spline();
        trajectory.extend_to(1.0).unwrap();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);

        let meta = estimator.trajectory().compute_spline_meta(&[(0.25, 0.25)]).unwrap();
        let mut out = Vec::new();
        estimator
            .add_control_points(&meta, &mut out, KnotKind::Rotation)
            .unwrap();
        estimator
            .add_control_points(&meta, &mut out, KnotKind::Rotation)
            .unwrap();

        assert_eq!(out.len(), 8);
        assert_eq!(out[..4], out[4..]);
        assert_eq!(estimator.num_param_blocks(), 4);
        assert_eq!(
            estimator.param_id(ParamKey::RotationKnot(2)),
            Some(out[0])
        );
        assert_eq!(estimator.param_key(out[3]), Some(ParamKey::RotationKnot(5)));
    }

    #[test]
    fn rotation_and_translation_passes_are_independent() {
        let mut trajectory = spline();
        trajectory.extend_to(1.0).unwrap();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);

        let meta = estimator.trajectory().compute_spline_meta(&[(0.0, 0.0)]).unwrap();
        let mut out = Vec::new();
        estimator
            .add_control_points(&meta, &mut out, KnotKind::Rotation)
            .unwrap();
        estimator
            .add_control_points(&meta, &mut out, KnotKind::Translation)
            .unwrap();

        assert_eq!(out.len(), 8);
        assert_eq!(estimator.num_param_blocks(), 8);
        assert_eq!(estimator.ir().params[0].name, "rot/0");
        assert_eq!(estimator.ir().params[4].name, "pos/0");
    }

    #[test]
    fn set_constant_ignores_unregistered_blocks() {
        let mut trajectory = spline();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);
        assert!(!estimator.set_constant(ParamKey::GyroBias));
        assert!(!estimator.is_constant(ParamKey::GyroBias));
        assert_eq!(estimator.num_param_blocks(), 0);
    }

    #[test]
    fn accel_stage_rejects_gyro_only_samples() {
        let mut trajectory = spline();
        trajectory.extend_to(1.0).unwrap();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);

        let samples = [
            ImuSample::new(0.1, Vec3::zeros(), Vec3::new(0.0, 0.0, 9.81)),
            ImuSample::gyro_only(0.2, Vec3::zeros()),
        ];
        let err = estimator
            .add_accel_measurements(&samples, 1.0, 1.0)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BindingError>(),
            Some(&BindingError::MissingAccel {
                index: 1,
                timestamp: 0.2
            })
        );
        assert_eq!(estimator.num_residual_blocks(), 0);
    }

    #[test]
    fn accel_stage_does_not_extend_the_spline() {
        let mut trajectory = spline();
        trajectory.extend_to(0.5).unwrap();
        let knots = trajectory.num_knots();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);

        let samples = [ImuSample::new(5.0, Vec3::zeros(), Vec3::zeros())];
        assert!(estimator.add_accel_measurements(&samples, 1.0, 1.0).is_err());
        assert_eq!(estimator.trajectory().num_knots(), knots);
    }

    #[test]
    fn surfel_stage_rejects_dangling_plane_ids() {
        let mut trajectory = spline();
        trajectory.extend_to(1.0).unwrap();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);

        let association = SurfelAssociation::new(
            vec![SurfelPoint {
                timestamp: 0.3,
                plane_id: 2,
                point: Vec3::new(1.0, 0.0, 0.0),
            }],
            vec![Vec3::new(0.0, 0.0, 1.0)],
            0.0,
        );
        let err = estimator
            .add_surfel_measurements(&association, 1.0)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BindingError>(),
            Some(&BindingError::PlaneOutOfRange {
                point: 0,
                plane_id: 2,
                num_planes: 1
            })
        );
        assert!(estimator.calib().plane_params.is_empty());
    }

    #[test]
    fn surfel_stage_anchors_the_earliest_bound_knot() {
        let mut trajectory = spline();
        trajectory.extend_to(1.0).unwrap();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);

        let association = SurfelAssociation::new(
            vec![
                SurfelPoint {
                    timestamp: 0.55,
                    plane_id: 0,
                    point: Vec3::new(1.0, 0.0, 0.0),
                },
                SurfelPoint {
                    timestamp: 0.75,
                    plane_id: 0,
                    point: Vec3::new(0.0, 1.0, 0.0),
                },
            ],
            vec![Vec3::new(0.0, 0.0, 1.0)],
            0.45,
        );
        estimator.add_surfel_measurements(&association, 1.0).unwrap();

        assert!(estimator.param_id(ParamKey::RotationKnot(0)).is_none());
        assert!(estimator.is_constant(ParamKey::RotationKnot(4)));
        assert!(estimator.is_constant(ParamKey::TranslationKnot(4)));
        assert!(!estimator.is_constant(ParamKey::RotationKnot(5)));
        assert!(!estimator.is_constant(ParamKey::TranslationKnot(5)));
    }

    #[test]
    fn empty_problem_solves_trivially() {
        let mut trajectory = spline();
        let mut calib = CalibParams::default();
        let mut estimator = TrajectoryEstimator::new(&mut trajectory, &mut calib);
        estimator.add_gyro_measurements(&[], 1.0).unwrap();

        let summary = estimator.solve(10, false, 1).unwrap();
        assert_eq!(summary.termination, TerminationType::Convergence);
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.final_cost, 0.0);
    }
}
