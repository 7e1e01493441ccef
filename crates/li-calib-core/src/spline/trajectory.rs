use serde::{Deserialize, Serialize};

use super::eval::{evaluate_position, evaluate_rotation};
use super::{SplineError, SplineMeta, SplineSegment, SplineWeights};
use crate::math::{Iso3, Quat, Vec3};

/// Epsilon added to a segment start before index lookup.
///
/// Segment start times are reconstructed as `t0 + i * dt`; the offset keeps the
/// floor on the correct side of the knot boundary.
const SEGMENT_TIME_EPS: f64 = 1.0e-9;

/// Upper bound on the number of knots a spline may grow to.
pub const MAX_KNOTS: usize = 1 << 24;

/// Uniform split SE(3) B-spline.
///
/// Rotation and translation knots are stored in separate index-stable sequences.
/// Knots are only appended, so a knot index stays valid for the lifetime of the spline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineTrajectory {
    order: usize,
    dt: f64,
    start_time: f64,
    rotations: Vec<Quat>,
    translations: Vec<Vec3>,
}

impl SplineTrajectory {
    /// Creates an empty spline of `order` (degree + 1) with knot spacing `dt`.
    pub fn new(order: usize, dt: f64, start_time: f64) -> Result<Self, SplineError> {
        if order < 2 {
            return Err(SplineError::InvalidOrder(order));
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SplineError::InvalidSpacing(dt));
        }
        Ok(Self {
            order,
            dt,
            start_time,
            rotations: Vec::new(),
            translations: Vec::new(),
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn num_knots(&self) -> usize {
        self.rotations.len()
    }

    /// First evaluable time.
    pub fn min_time(&self) -> f64 {
        self.start_time
    }

    /// End (exclusive) of the evaluable interval.
    pub fn max_time(&self) -> f64 {
        let span = (self.num_knots() + 1).saturating_sub(self.order);
        self.start_time + span as f64 * self.dt
    }

    /// Appends a knot at the tail.
    pub fn push_knot(&mut self, pose: &Iso3) {
        self.rotations.push(pose.rotation);
        self.translations.push(pose.translation.vector);
    }

    /// Appends knots until the spline covers `t`.
    ///
    /// New knots copy the last knot, or identity on an empty spline.
    /// Returns the number of knots added.
    pub fn extend_to(&mut self, t: f64) -> Result<usize, SplineError> {
        let (segment, _) = self.locate(t)?;
        let required = segment + self.order;
        if required > MAX_KNOTS {
            return Err(SplineError::TooManyKnots {
                required,
                limit: MAX_KNOTS,
            });
        }
        let init = self.last_knot();
        let before = self.num_knots();
        while self.num_knots() < required {
            self.push_knot(&init);
        }
        Ok(self.num_knots() - before)
    }

    fn last_knot(&self) -> Iso3 {
        match (self.rotations.last(), self.translations.last()) {
            (Some(q), Some(p)) => Iso3::from_parts((*p).into(), *q),
            _ => Iso3::identity(),
        }
    }

    /// Segment index and normalized offset of `t`.
    ///
    /// The `order` knots starting at the returned index carry the spline at `t`.
    pub fn time_to_index(&self, t: f64) -> Result<(usize, f64), SplineError> {
        let (segment, u) = self.locate(t)?;
        if segment + self.order > self.num_knots() {
            return Err(self.out_of_range(t));
        }
        Ok((segment, u))
    }

    /// Segment index and offset of `t`, regardless of the current knot count.
    ///
    /// Shared by [`Self::extend_to`] and [`Self::time_to_index`] so both agree on
    /// which segment a time falls into.
    fn locate(&self, t: f64) -> Result<(usize, f64), SplineError> {
        if !t.is_finite() || t < self.start_time {
            return Err(self.out_of_range(t));
        }
        let st = (t - self.start_time) / self.dt;
        if !st.is_finite() || st >= MAX_KNOTS as f64 {
            return Err(self.out_of_range(t));
        }
        let segment = st.floor() as usize;
        let u = (st - segment as f64).clamp(0.0, 1.0);
        Ok((segment, u))
    }

    fn out_of_range(&self, t: f64) -> SplineError {
        SplineError::TimeOutOfRange {
            time: t,
            min: self.min_time(),
            max: self.max_time(),
        }
    }

    /// Knot runs needed to evaluate the spline over every window.
    ///
    /// Windows are normalized to `(min, max)` and processed in ascending start
    /// order; a window overlapping the previous run extends it instead of opening
    /// a new one.
    pub fn compute_spline_meta(&self, windows: &[(f64, f64)]) -> Result<SplineMeta, SplineError> {
        if windows.is_empty() {
            return Err(SplineError::EmptyWindows);
        }
        let mut sorted: Vec<(f64, f64)> = windows
            .iter()
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut meta = SplineMeta {
            order: self.order,
            segments: Vec::new(),
        };
        let mut segment_start = 0usize;
        let mut segment_end = 0usize;

        for (t_begin, t_end) in sorted {
            let (mut i1, _) = self.time_to_index(t_begin)?;
            let (i2, _) = self.time_to_index(t_end)?;

            if let Some(seg) = meta.segments.last_mut().filter(|_| i1 <= segment_end) {
                i1 = segment_end + 1;
                let last = i2 + self.order;
                if last > i1 {
                    seg.n += last - i1;
                    segment_end = segment_start + seg.n - 1;
                }
                continue;
            }

            let n = i2 + self.order - i1;
            meta.segments.push(SplineSegment {
                t0: self.start_time + i1 as f64 * self.dt,
                dt: self.dt,
                n,
            });
            segment_start = i1;
            segment_end = i1 + n - 1;
        }
        Ok(meta)
    }

    /// Global index of the first knot of a meta segment.
    pub fn segment_start_index(&self, segment: &SplineSegment) -> Result<usize, SplineError> {
        let st = (segment.t0 + SEGMENT_TIME_EPS - self.start_time) / self.dt;
        if !(0.0..MAX_KNOTS as f64).contains(&st) {
            return Err(self.out_of_range(segment.t0));
        }
        let start = st.floor() as usize;
        match start.checked_add(segment.n) {
            Some(end) if end <= self.num_knots() => Ok(start),
            _ => Err(SplineError::KnotIndexOutOfRange {
                index: start.saturating_add(segment.n).saturating_sub(1),
                num_knots: self.num_knots(),
            }),
        }
    }

    pub fn knot_rotation(&self, index: usize) -> Result<&Quat, SplineError> {
        let num_knots = self.num_knots();
        self.rotations
            .get(index)
            .ok_or(SplineError::KnotIndexOutOfRange { index, num_knots })
    }

    pub fn knot_rotation_mut(&mut self, index: usize) -> Result<&mut Quat, SplineError> {
        let num_knots = self.num_knots();
        self.rotations
            .get_mut(index)
            .ok_or(SplineError::KnotIndexOutOfRange { index, num_knots })
    }

    pub fn knot_translation(&self, index: usize) -> Result<&Vec3, SplineError> {
        let num_knots = self.num_knots();
        self.translations
            .get(index)
            .ok_or(SplineError::KnotIndexOutOfRange { index, num_knots })
    }

    pub fn knot_translation_mut(&mut self, index: usize) -> Result<&mut Vec3, SplineError> {
        let num_knots = self.num_knots();
        self.translations
            .get_mut(index)
            .ok_or(SplineError::KnotIndexOutOfRange { index, num_knots })
    }

    fn active_knots(&self, t: f64) -> Result<(usize, SplineWeights), SplineError> {
        let (s, u) = self.time_to_index(t)?;
        Ok((s, SplineWeights::new(self.order, u, self.dt)))
    }

    /// Orientation of the body in the world frame at `t`.
    pub fn rotation(&self, t: f64) -> Result<Quat, SplineError> {
        let (s, weights) = self.active_knots(t)?;
        Ok(evaluate_rotation(&self.rotations[s..s + self.order], &weights).0)
    }

    /// Body-frame angular velocity at `t`.
    pub fn angular_velocity(&self, t: f64) -> Result<Vec3, SplineError> {
        let (s, weights) = self.active_knots(t)?;
        Ok(evaluate_rotation(&self.rotations[s..s + self.order], &weights).1)
    }

    /// Position of the body in the world frame at `t`.
    pub fn position(&self, t: f64) -> Result<Vec3, SplineError> {
        let (s, weights) = self.active_knots(t)?;
        Ok(evaluate_position(&self.translations[s..s + self.order], &weights).0)
    }

    /// World-frame linear acceleration at `t`.
    pub fn linear_acceleration(&self, t: f64) -> Result<Vec3, SplineError> {
        let (s, weights) = self.active_knots(t)?;
        Ok(evaluate_position(&self.translations[s..s + self.order], &weights).1)
    }

    /// Body-to-world pose at `t`.
    pub fn pose(&self, t: f64) -> Result<Iso3, SplineError> {
        let (s, weights) = self.active_knots(t)?;
        let (rotation, _) = evaluate_rotation(&self.rotations[s..s + self.order], &weights);
        let (position, _) = evaluate_position(&self.translations[s..s + self.order], &weights);
        Ok(Iso3::from_parts(position.into(), rotation))
    }
}
