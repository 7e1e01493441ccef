use serde::{Deserialize, Serialize};

/// Tolerance used when mapping a query time back into a segment.
const LOCATE_EPS: f64 = 1.0e-9;

/// Contiguous run of knots needed by a set of query times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplineSegment {
    /// Time of the first knot in the run.
    pub t0: f64,
    /// Knot spacing.
    pub dt: f64,
    /// Number of knots in the run.
    pub n: usize,
}

impl SplineSegment {
    /// First time the segment can evaluate.
    pub fn min_time(&self) -> f64 {
        self.t0
    }

    /// End (exclusive) of the evaluable interval for a spline of `order`.
    pub fn max_time(&self, order: usize) -> f64 {
        self.t0 + (self.n + 1).saturating_sub(order) as f64 * self.dt
    }
}

/// Knot ranges touched by one or more query windows.
///
/// Segments are ordered by time and never overlap. The knots of all segments,
/// flattened in order, form the local knot list a residual binds to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SplineMeta {
    pub(crate) order: usize,
    pub(crate) segments: Vec<SplineSegment>,
}

impl SplineMeta {
    /// Spline order the meta was computed for.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Segments in ascending time order.
    pub fn segments(&self) -> &[SplineSegment] {
        &self.segments
    }

    /// Total number of distinct knots touched.
    pub fn num_knots(&self) -> usize {
        self.segments.iter().map(|seg| seg.n).sum()
    }

    /// Map a query time to `(local knot offset, u)`.
    ///
    /// The offset indexes the flattened knot list of all segments; the `order`
    /// knots starting there carry the spline at `t`.
    pub fn locate(&self, t: f64) -> Option<(usize, f64)> {
        let mut offset = 0;
        for seg in &self.segments {
            let span = (seg.n + 1).saturating_sub(self.order);
            if span > 0 {
                let st = (t - seg.t0) / seg.dt;
                if st >= -LOCATE_EPS && st < span as f64 + LOCATE_EPS {
                    let s = (st.max(0.0).floor() as usize).min(span - 1);
                    let u = (st - s as f64).clamp(0.0, 1.0);
                    return Some((offset + s, u));
                }
            }
            offset += seg.n;
        }
        None
    }
}
