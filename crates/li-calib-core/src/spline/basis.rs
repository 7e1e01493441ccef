use nalgebra::{DMatrix, DVector};

fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, i| acc * i as f64)
}

/// Uniform B-spline blending matrix of the given order.
///
/// Entry `(j, i)` is the coefficient of `u^i` in the basis function of knot `j`
/// within one segment. With `cumulative = true` row `i` holds the sum of rows `i..order`,
/// which is the form used for Lie group splines.
pub fn blending_matrix(order: usize, cumulative: bool) -> DMatrix<f64> {
    let n = order;
    let degree = n - 1;
    let mut m = DMatrix::<f64>::zeros(n, n);

    for j in 0..n {
        for i in 0..n {
            let mut sum = 0.0;
            for s in j..n {
                let sign = if (s - j) % 2 == 0 { 1.0 } else { -1.0 };
                sum += sign * binomial(n, s - j) * ((n - s - 1) as f64).powi((degree - i) as i32);
            }
            m[(j, i)] = binomial(degree, degree - i) * sum;
        }
    }
    m /= factorial(degree);

    if cumulative {
        for i in 0..n {
            for j in (i + 1)..n {
                let row = m.row(j).clone_owned();
                let mut target = m.row_mut(i);
                target += row;
            }
        }
    }
    m
}

/// Coefficients of `d^derivative/du^derivative` of `[1, u, u^2, ...]`.
fn power_basis(order: usize, u: f64, derivative: usize) -> DVector<f64> {
    DVector::from_fn(order, |j, _| {
        if j < derivative {
            0.0
        } else {
            let falling = ((j - derivative + 1)..=j).fold(1.0, |acc, k| acc * k as f64);
            falling * u.powi((j - derivative) as i32)
        }
    })
}

/// Per-knot blending weights for one evaluation instant.
///
/// Rotation evaluation consumes the cumulative weights and their first time derivative;
/// translation evaluation consumes the plain weights and their second time derivative.
/// Derivative weights are already divided by the matching power of `dt`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineWeights {
    /// Cumulative weights, one per knot.
    pub cumulative: Vec<f64>,
    /// First time derivative of the cumulative weights.
    pub cumulative_dot: Vec<f64>,
    /// Plain B-spline weights, one per knot.
    pub value: Vec<f64>,
    /// Second time derivative of the plain weights.
    pub value_ddot: Vec<f64>,
}

impl SplineWeights {
    /// Weights for normalized segment time `u ∈ [0, 1)` and knot spacing `dt`.
    pub fn new(order: usize, u: f64, dt: f64) -> Self {
        let plain = blending_matrix(order, false);
        let cumulative = blending_matrix(order, true);

        let p0 = power_basis(order, u, 0);
        let p1 = power_basis(order, u, 1) / dt;
        let p2 = power_basis(order, u, 2) / (dt * dt);

        Self {
            cumulative: (&cumulative * &p0).as_slice().to_vec(),
            cumulative_dot: (&cumulative * &p1).as_slice().to_vec(),
            value: (&plain * &p0).as_slice().to_vec(),
            value_ddot: (&plain * &p2).as_slice().to_vec(),
        }
    }

    /// Number of knots the weights apply to.
    pub fn order(&self) -> usize {
        self.value.len()
    }
}
