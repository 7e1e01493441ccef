use anyhow::{Context, Result, anyhow, ensure};
use nalgebra::{DVector, RealField, convert};
use std::collections::HashMap;
use std::sync::Arc;
use tiny_solver::factors::{Factor, FactorImpl};
use tiny_solver::manifold::so3::QuaternionManifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{LevenbergMarquardtOptimizer, linear::sparse::LinearSolverType};

use crate::backend::{
    BackendSolution, BackendSolveOptions, CallbackReturn, IterationObserver, IterationSummary,
    OptimBackend, SolveSummary, TerminationType,
};
use crate::factors::{
    gyro_accel_bias_residual_generic, gyro_bias_residual_generic, surfel_plane_residual_generic,
};
use crate::ir::{FactorKind, ManifoldKind, ProblemIR};

const MIN_DIAGONAL: f64 = 1e-6;
const MAX_DIAGONAL: f64 = 1e32;
const INITIAL_TRUST_REGION_RADIUS: f64 = 1e4;
const MAX_TRUST_REGION_RADIUS: f64 = 1e16;
const MIN_TRUST_REGION_RADIUS: f64 = 1e-32;

/// tiny-solver backend adapter.
///
/// Holds the single quaternion manifold shared by every SO(3) block it compiles.
#[derive(Clone)]
pub struct TinySolverBackend {
    rotation_manifold: Arc<QuaternionManifold>,
}

impl Default for TinySolverBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A tiny-solver problem over the free blocks of an IR.
///
/// Constant blocks never enter the linear system: their values are baked
/// into the factors that read them.
struct CompiledProblem {
    problem: Problem,
    /// Initial values of the free blocks.
    variables: HashMap<String, DVector<f64>>,
    /// Values of the constant blocks, returned unchanged.
    constants: HashMap<String, DVector<f64>>,
    /// Cost of residual blocks that bind constant blocks only.
    constant_cost: f64,
}

impl CompiledProblem {
    fn cost(&self, variables: &HashMap<String, DVector<f64>>) -> f64 {
        let param_blocks = self.problem.initialize_parameter_blocks(variables);
        let residuals = self.problem.compute_residuals(&param_blocks, true);
        0.5 * residuals.as_ref().squared_norm_l2() + self.constant_cost
    }

    /// Free values joined with the constant ones, keyed by block name.
    fn all_values(
        &self,
        variables: &HashMap<String, DVector<f64>>,
    ) -> HashMap<String, DVector<f64>> {
        let mut values = self.constants.clone();
        values.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }
}

impl TinySolverBackend {
    pub fn new() -> Self {
        Self {
            rotation_manifold: Arc::new(QuaternionManifold),
        }
    }

    fn compile(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
    ) -> Result<CompiledProblem> {
        ir.validate()?;

        let mut problem = Problem::new();
        let mut variables = HashMap::new();
        let mut constants = HashMap::new();

        for param in &ir.params {
            let init = initial.get(&param.name).ok_or_else(|| {
                anyhow!(
                    "initial values missing parameter {} (id {:?})",
                    param.name,
                    param.id
                )
            })?;
            ensure!(
                init.len() == param.dim,
                "initial dimension mismatch for {}: expected {}, got {}",
                param.name,
                param.dim,
                init.len()
            );

            if param.fixed.is_all_fixed(param.dim) {
                constants.insert(param.name.clone(), init.clone());
                continue;
            }
            ensure!(
                param.fixed.is_empty(),
                "tiny-solver backend cannot partially fix {}",
                param.name
            );
            if param.manifold == ManifoldKind::SO3 {
                problem.set_variable_manifold(&param.name, self.rotation_manifold.clone());
            }
            variables.insert(param.name.clone(), init.clone());
        }

        let mut constant_cost = 0.0;
        for residual in &ir.residuals {
            let mut slots = Vec::with_capacity(residual.params.len());
            let mut variable_names = Vec::new();
            for id in &residual.params {
                let name = ir.params[id.0].name.as_str();
                match constants.get(name) {
                    Some(value) => slots.push(Slot::Constant(value.clone())),
                    None => {
                        slots.push(Slot::Variable(variable_names.len()));
                        variable_names.push(name);
                    }
                }
            }
            let factor = BoundFactor {
                kind: residual.factor.clone(),
                slots,
            };

            if variable_names.is_empty() {
                let r = <BoundFactor as Factor<f64>>::residual_func(&factor, &[]);
                constant_cost += 0.5 * r.norm_squared();
                continue;
            }
            let factor: Box<dyn FactorImpl + Send> = Box::new(factor);
            problem.add_residual_block(residual.residual_dim, &variable_names, factor, None);
        }

        log::debug!(
            "compiled {} free and {} constant parameter blocks",
            variables.len(),
            constants.len()
        );
        Ok(CompiledProblem {
            problem,
            variables,
            constants,
            constant_cost,
        })
    }

    fn iterate(
        &self,
        compiled: &CompiledProblem,
        opts: &BackendSolveOptions,
        mut observer: Option<&mut (dyn IterationObserver + Send)>,
    ) -> Result<BackendSolution> {
        let mut current = compiled.variables.clone();
        let initial_cost = compiled.cost(&current);
        let mut cost = initial_cost;
        let mut iterations = 0;
        let mut radius = INITIAL_TRUST_REGION_RADIUS;

        let termination = if !initial_cost.is_finite() {
            log::warn!("initial cost is not finite");
            TerminationType::Failure
        } else if initial_cost <= opts.min_error || current.is_empty() {
            TerminationType::Convergence
        } else {
            let mut termination = TerminationType::NoConvergence;
            while iterations < opts.max_iters {
                // One damped step from `current`; the damping carries over between calls.
                let optimizer =
                    LevenbergMarquardtOptimizer::new(MIN_DIAGONAL, MAX_DIAGONAL, radius);
                let Some(next) =
                    optimizer.optimize(&compiled.problem, &current, Some(step_options()))
                else {
                    log::warn!("linear solve failed at iteration {}", iterations + 1);
                    termination = TerminationType::Failure;
                    break;
                };
                iterations += 1;

                let next_cost = compiled.cost(&next);
                if next_cost.is_nan() {
                    log::warn!("non-finite cost at iteration {iterations}");
                    termination = TerminationType::Failure;
                    break;
                }

                let previous_cost = cost;
                let step_accepted = next_cost < previous_cost;
                if step_accepted {
                    current = next;
                    cost = next_cost;
                    radius = (radius * 3.0).min(MAX_TRUST_REGION_RADIUS);
                } else {
                    radius *= 0.5;
                }
                let summary = IterationSummary {
                    iteration: iterations,
                    cost,
                    cost_change: previous_cost - cost,
                    step_accepted,
                };
                if opts.show_progress {
                    log::info!(
                        "iter {:>4}  cost {:.6e}  change {:.3e}  radius {:.3e}  accepted {}",
                        summary.iteration,
                        summary.cost,
                        summary.cost_change,
                        radius,
                        summary.step_accepted
                    );
                }

                if let Some(observer) = observer.as_deref_mut() {
                    let values = compiled.all_values(&current);
                    match observer.on_iteration(&summary, &values)? {
                        CallbackReturn::Continue => {}
                        CallbackReturn::Abort => {
                            termination = TerminationType::UserFailure;
                            break;
                        }
                        CallbackReturn::TerminateSuccessfully => {
                            termination = TerminationType::UserSuccess;
                            break;
                        }
                    }
                }

                if step_accepted {
                    if cost <= opts.min_error
                        || summary.cost_change <= opts.min_abs_decrease
                        || summary.cost_change <= opts.min_rel_decrease * previous_cost
                    {
                        termination = TerminationType::Convergence;
                        break;
                    }
                } else if radius < MIN_TRUST_REGION_RADIUS {
                    log::debug!("trust region collapsed at iteration {iterations}");
                    termination = TerminationType::Convergence;
                    break;
                }
            }
            termination
        };

        Ok(BackendSolution {
            params: compiled.all_values(&current),
            summary: SolveSummary {
                termination,
                initial_cost,
                final_cost: cost,
                iterations,
            },
        })
    }
}

impl OptimBackend for TinySolverBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
        observer: Option<&mut (dyn IterationObserver + Send)>,
    ) -> Result<BackendSolution> {
        let pool = thread_pool(opts.num_threads)?;
        log::debug!(
            "solving {} residual blocks over {} parameter blocks on {} threads",
            ir.residuals.len(),
            ir.params.len(),
            pool.current_num_threads()
        );
        pool.install(|| {
            let compiled = self.compile(ir, initial)?;
            self.iterate(&compiled, opts, observer)
        })
    }
}

fn thread_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    let threads = if num_threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        num_threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("failed to build solver thread pool")
}

/// Options for a single trust-region step. Termination is decided by the driver.
fn step_options() -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: 1,
        verbosity_level: 0,
        linear_solver_type: LinearSolverType::SparseCholesky,
        min_abs_error_decrease_threshold: 0.0,
        min_rel_error_decrease_threshold: 0.0,
        min_error_threshold: 0.0,
        ..OptimizerOptions::default()
    }
}

/// Source of one factor parameter.
#[derive(Debug, Clone)]
enum Slot {
    /// Index into the free variables handed to the factor.
    Variable(usize),
    /// Value of a constant block.
    Constant(DVector<f64>),
}

/// A spline factor with its constant parameters bound in.
#[derive(Debug, Clone)]
struct BoundFactor {
    kind: FactorKind,
    slots: Vec<Slot>,
}

impl<T: RealField> Factor<T> for BoundFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let full: Vec<DVector<T>> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Variable(idx) => params[*idx].clone(),
                Slot::Constant(value) => value.map(|v| convert::<f64, T>(v)),
            })
            .collect();
        match &self.kind {
            FactorKind::GyroBias(f) => {
                DVector::from_row_slice(gyro_bias_residual_generic(&full, f).as_slice())
            }
            FactorKind::GyroAccelBias(f) => {
                DVector::from_row_slice(gyro_accel_bias_residual_generic(&full, f).as_slice())
            }
            FactorKind::SurfelPlane(f) => {
                DVector::from_row_slice(surfel_plane_residual_generic(&full, f).as_slice())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{GyroBiasFactor, SplineSample};
    use crate::ir::{FixedMask, ResidualBlock};
    use li_calib_core::{SplineWeights, Vec3};

    fn gyro_ir(fix_all: bool) -> (ProblemIR, HashMap<String, DVector<f64>>) {
        let mut ir = ProblemIR::new();
        let mut initial = HashMap::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let fixed = if i == 0 || fix_all {
                FixedMask::all_fixed(4)
            } else {
                FixedMask::all_free()
            };
            let name = format!("rot/{i}");
            ids.push(ir.add_param_block(&name, 4, ManifoldKind::SO3, fixed));
            initial.insert(name, DVector::from_row_slice(&[0.0, 0.0, 0.0, 1.0]));
        }
        ids.push(ir.add_param_block(
            "gyro_bias",
            3,
            ManifoldKind::Euclidean,
            FixedMask::all_fixed(3),
        ));
        initial.insert("gyro_bias".to_string(), DVector::zeros(3));
        ir.add_residual_block(ResidualBlock {
            params: ids,
            factor: FactorKind::GyroBias(GyroBiasFactor {
                num_knots: 4,
                sample: SplineSample {
                    offset: 0,
                    weights: SplineWeights::new(4, 0.5, 0.1),
                },
                gyro: Vec3::new(0.2, 0.0, 0.0),
                weight: 1.0,
            }),
            residual_dim: 3,
        });
        (ir, initial)
    }

    #[test]
    fn constant_blocks_stay_out_of_the_linear_system() {
        let (ir, initial) = gyro_ir(false);
        let compiled = TinySolverBackend::new().compile(&ir, &initial).unwrap();
        assert_eq!(compiled.variables.len(), 3);
        assert_eq!(compiled.constants.len(), 2);
        assert!(!compiled.variables.contains_key("rot/0"));
        assert_eq!(compiled.constant_cost, 0.0);
        // 0.5 * |0.2|^2 from the unexplained rate.
        assert!((compiled.cost(&compiled.variables) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn fully_constant_residuals_keep_their_cost() {
        let (ir, initial) = gyro_ir(true);
        let backend = TinySolverBackend::new();
        let compiled = backend.compile(&ir, &initial).unwrap();
        assert!(compiled.variables.is_empty());
        assert!((compiled.constant_cost - 0.02).abs() < 1e-12);

        let solution = backend
            .solve(&ir, &initial, &BackendSolveOptions::default(), None)
            .unwrap();
        assert_eq!(solution.summary.iterations, 0);
        assert_eq!(solution.params.len(), 5);
        assert_eq!(solution.params["rot/2"], initial["rot/2"]);
    }

    #[test]
    fn solve_returns_constant_blocks_unchanged() {
        let (ir, initial) = gyro_ir(false);
        let solution = TinySolverBackend::new()
            .solve(&ir, &initial, &BackendSolveOptions::default(), None)
            .unwrap();
        assert_eq!(solution.params["rot/0"], initial["rot/0"]);
        assert_eq!(solution.params["gyro_bias"], initial["gyro_bias"]);
        assert!(solution.summary.final_cost < solution.summary.initial_cost);
    }
}
