//! Uniform cumulative B-spline over SE(3), split into SO(3) and R³ parts.
//!
//! Knot `i` sits at `t0 + i * dt`. A spline of order `N` (degree `N - 1`) evaluated at
//! time `t` touches the `N` consecutive knots starting at `floor((t - t0) / dt)`.
//! Rotation uses the cumulative (Lie group) formulation, translation the plain one.

mod basis;
mod eval;
mod meta;
mod trajectory;

use thiserror::Error;

pub use basis::{SplineWeights, blending_matrix};
pub use eval::{evaluate_position, evaluate_rotation};
pub use meta::{SplineMeta, SplineSegment};
pub use trajectory::{MAX_KNOTS, SplineTrajectory};

/// Errors raised by spline construction and queries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SplineError {
    /// Spline order must be at least 2.
    #[error("spline order must be >= 2, got {0}")]
    InvalidOrder(usize),
    /// Knot spacing must be positive and finite.
    #[error("knot spacing must be positive, got {0}")]
    InvalidSpacing(f64),
    /// Query time is not covered by the current knots.
    #[error("time {time} outside spline range [{min}, {max})")]
    TimeOutOfRange { time: f64, min: f64, max: f64 },
    /// Knot index past the end of the knot sequence.
    #[error("knot index {index} out of range (num_knots = {num_knots})")]
    KnotIndexOutOfRange { index: usize, num_knots: usize },
    /// Spline meta requested without any time window.
    #[error("spline meta requires at least one time window")]
    EmptyWindows,
    /// Covering a time would grow the spline past [`MAX_KNOTS`].
    #[error("covering the requested time needs {required} knots (limit {limit})")]
    TooManyKnots { required: usize, limit: usize },
}
