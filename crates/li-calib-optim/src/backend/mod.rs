//! Backend adapters that compile the IR into solver-specific problems.
//!
//! Backends translate the IR into solver-native graphs, apply manifolds and
//! fixed masks, run the trust-region iterations and report a [`SolveSummary`].
//! Numerical outcomes (non-convergence, breakdown) are data in the summary;
//! only structural problems with the IR are returned as errors.

mod tiny_solver_backend;

use anyhow::Result;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ir::ProblemIR;

pub use tiny_solver_backend::TinySolverBackend;

/// Backend-agnostic solver options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSolveOptions {
    /// Maximum number of trust-region iterations.
    pub max_iters: usize,
    /// Worker threads for the solve; `0` selects the hardware concurrency.
    pub num_threads: usize,
    /// Log one line per iteration at info level.
    pub show_progress: bool,
    /// Absolute cost decrease below which the solve is converged.
    pub min_abs_decrease: f64,
    /// Relative cost decrease below which the solve is converged.
    pub min_rel_decrease: f64,
    /// Cost below which the solve is converged.
    pub min_error: f64,
}

impl Default for BackendSolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            num_threads: 0,
            show_progress: false,
            min_abs_decrease: 1e-12,
            min_rel_decrease: 1e-8,
            min_error: 1e-14,
        }
    }
}

/// Why the solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationType {
    /// A convergence tolerance was met.
    Convergence,
    /// The iteration budget ran out first.
    NoConvergence,
    /// The backend could not compute a step or produced a non-finite cost.
    Failure,
    /// A callback requested a successful early stop.
    UserSuccess,
    /// A callback aborted the solve.
    UserFailure,
}

/// Outcome of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    pub termination: TerminationType,
    /// `0.5 * |r|²` at the initial parameters.
    pub initial_cost: f64,
    /// `0.5 * |r|²` at the returned parameters.
    pub final_cost: f64,
    /// Trust-region iterations performed.
    pub iterations: usize,
}

impl SolveSummary {
    /// Returns `true` if the returned parameters are a usable estimate.
    pub fn is_usable(&self) -> bool {
        matches!(
            self.termination,
            TerminationType::Convergence
                | TerminationType::NoConvergence
                | TerminationType::UserSuccess
        )
    }

    pub fn is_converged(&self) -> bool {
        matches!(
            self.termination,
            TerminationType::Convergence | TerminationType::UserSuccess
        )
    }
}

/// Progress report handed to observers after every iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationSummary {
    /// One-based iteration index.
    pub iteration: usize,
    /// Cost after the iteration.
    pub cost: f64,
    /// Cost decrease achieved by the iteration.
    pub cost_change: f64,
    /// Whether the step was accepted.
    pub step_accepted: bool,
}

/// Observer verdict after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackReturn {
    #[default]
    Continue,
    /// Stop and report [`TerminationType::UserFailure`].
    Abort,
    /// Stop and report [`TerminationType::UserSuccess`].
    TerminateSuccessfully,
}

/// Receives the current parameter values after every iteration.
pub trait IterationObserver {
    fn on_iteration(
        &mut self,
        summary: &IterationSummary,
        params: &HashMap<String, DVector<f64>>,
    ) -> Result<CallbackReturn>;
}

/// Solver output from a backend.
///
/// The `params` map uses the IR parameter block names.
#[derive(Debug, Clone)]
pub struct BackendSolution {
    /// Optimized parameter vectors keyed by block name.
    pub params: HashMap<String, DVector<f64>>,
    pub summary: SolveSummary,
}

/// Backend interface implemented by solver adapters.
pub trait OptimBackend {
    /// Solve a compiled IR starting from `initial`.
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
        observer: Option<&mut (dyn IterationObserver + Send)>,
    ) -> Result<BackendSolution>;
}
