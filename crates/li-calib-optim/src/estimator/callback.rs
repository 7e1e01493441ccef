use anyhow::Result;
use li_calib_core::{CalibParams, SplineTrajectory};
use nalgebra::DVector;
use std::collections::HashMap;

use super::keys::ParamKey;
use super::state::write_values;
use crate::backend::{CallbackReturn, IterationObserver, IterationSummary};

/// Read-only view of the estimate after an iteration.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorState<'s> {
    pub trajectory: &'s SplineTrajectory,
    pub calib: &'s CalibParams,
}

/// User hook invoked after every solver iteration.
pub trait IterationCallback {
    /// `state` is present when any registered callback asked for it.
    fn on_iteration(
        &mut self,
        summary: &IterationSummary,
        state: Option<EstimatorState<'_>>,
    ) -> CallbackReturn;

    /// Request the trajectory and calibration to be refreshed every iteration.
    fn needs_state(&self) -> bool {
        false
    }
}

/// Bridges backend iterations to estimator callbacks.
pub(crate) struct CallbackObserver<'s> {
    pub(crate) trajectory: &'s mut SplineTrajectory,
    pub(crate) calib: &'s mut CalibParams,
    pub(crate) keys: &'s [(String, ParamKey)],
    pub(crate) callbacks: &'s mut [Box<dyn IterationCallback + Send>],
    pub(crate) needs_state: bool,
}

impl IterationObserver for CallbackObserver<'_> {
    fn on_iteration(
        &mut self,
        summary: &IterationSummary,
        params: &HashMap<String, DVector<f64>>,
    ) -> Result<CallbackReturn> {
        if self.needs_state {
            write_values(self.trajectory, self.calib, self.keys, params)?;
        }
        for callback in self.callbacks.iter_mut() {
            let state = if self.needs_state {
                Some(EstimatorState {
                    trajectory: &*self.trajectory,
                    calib: &*self.calib,
                })
            } else {
                None
            };
            let verdict = callback.on_iteration(summary, state);
            if verdict != CallbackReturn::Continue {
                return Ok(verdict);
            }
        }
        Ok(CallbackReturn::Continue)
    }
}
