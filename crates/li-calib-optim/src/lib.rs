//! Problem building and non-linear optimization for continuous-time LiDAR-IMU calibration.
//!
//! Measurements are bound to spline knots and calibration unknowns through
//! [`TrajectoryEstimator`], lowered into a backend-independent [`ir::ProblemIR`]
//! and solved with tiny-solver's Levenberg-Marquardt optimizer.

pub mod backend;
pub mod estimator;
pub mod factors;
pub mod ir;

pub use backend::{
    BackendSolveOptions, CallbackReturn, IterationSummary, SolveSummary,
    TerminationType,
};
pub use estimator::{
    BindingError, EstimatorState, IterationCallback, KnotKind, ParamKey, TrajectoryEstimator,
};
pub use ir::ParamId;
