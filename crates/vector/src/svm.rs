//! RBF-kernel support vector machines solved with SMO
//!
//! Both classifiers reduce to the same dual problem
//!
//! ```text
//! min 1/2 a'Qa + p'a   s.t.  y'a = const,  0 <= a_i <= C
//! ```
//!
//! - one-class: `Q = K`, `p = 0`, `y = 1`, `C = 1`, `sum(a) = nu * l`
//! - binary C-SVC: `Q_ij = y_i y_j K_ij`, `p = -1`, `y` in {-1, +1}
//!
//! and share [`solve`], which uses first-order maximal-violating-pair
//! working set selection.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::warn;

/// Kernel width policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gamma {
    /// `1 / (n_features * var(training))`, 1.0 for zero variance
    Scale,
    /// Fixed width
    Fixed(f64),
}

impl Gamma {
    fn resolve(self, training: ArrayView2<'_, f32>) -> f64 {
        match self {
            Gamma::Fixed(gamma) => gamma,
            Gamma::Scale => {
                let n = training.len();
                if n == 0 {
                    return 1.0;
                }
                let mean = training.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
                let var = training
                    .iter()
                    .map(|&v| (v as f64 - mean).powi(2))
                    .sum::<f64>()
                    / n as f64;
                if var > 0.0 {
                    1.0 / (training.ncols() as f64 * var)
                } else {
                    1.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RbfKernel {
    gamma: f64,
}

impl RbfKernel {
    fn eval(&self, a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
        let dist: f64 = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| {
                let d = x as f64 - y as f64;
                d * d
            })
            .sum();
        (-self.gamma * dist).exp()
    }

    fn gram(&self, x: ArrayView2<'_, f32>) -> Array2<f64> {
        let l = x.nrows();
        let mut k = Array2::<f64>::zeros((l, l));
        for i in 0..l {
            k[[i, i]] = 1.0;
            for j in (i + 1)..l {
                let v = self.eval(x.row(i), x.row(j));
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
        }
        k
    }
}

/// Solver tuning shared by both classifiers
#[derive(Debug, Clone, Copy)]
pub(crate) struct SolverOptions {
    pub gamma: Gamma,
    pub tolerance: f64,
    pub max_iterations: usize,
}

/// Fitted decision function `f(x) = sum_i coef_i K(sv_i, x) - rho`
#[derive(Debug, Clone)]
pub(crate) struct SvmModel {
    support: Array2<f32>,
    coef: Array1<f64>,
    rho: f64,
    kernel: RbfKernel,
}

impl SvmModel {
    /// Signed decision value for each row of `x`
    pub fn decision_function(&self, x: ArrayView2<'_, f32>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| {
                self.support
                    .axis_iter(Axis(0))
                    .zip(self.coef.iter())
                    .map(|(sv, &c)| c * self.kernel.eval(sv, row))
                    .sum::<f64>()
                    - self.rho
            })
            .collect()
    }

    #[cfg(test)]
    pub fn support_len(&self) -> usize {
        self.support.nrows()
    }
}

/// Fit a nu one-class SVM on `x`
pub(crate) fn fit_one_class(x: ArrayView2<'_, f32>, nu: f64, options: SolverOptions) -> SvmModel {
    let l = x.nrows();
    let kernel = RbfKernel {
        gamma: options.gamma.resolve(x),
    };
    let q = kernel.gram(x);

    // Feasible start: the first floor(nu * l) multipliers at the bound, the
    // remainder of nu * l on the next one.
    let total = nu * l as f64;
    let full = (total as usize).min(l);
    let mut alpha = vec![0.0; l];
    for a in alpha.iter_mut().take(full) {
        *a = 1.0;
    }
    if full < l {
        alpha[full] = total - full as f64;
    }

    let y = vec![1.0; l];
    let p = vec![0.0; l];
    let solution = solve(&q, &p, &y, 1.0, alpha, options);

    build_model(x, &y, solution, kernel)
}

/// Fit a binary C-SVC; `labels` are +1 (relevant) or -1 (irrelevant)
pub(crate) fn fit_binary(
    x: ArrayView2<'_, f32>,
    labels: &[f64],
    c: f64,
    options: SolverOptions,
) -> SvmModel {
    let l = x.nrows();
    let kernel = RbfKernel {
        gamma: options.gamma.resolve(x),
    };
    let mut q = kernel.gram(x);
    for i in 0..l {
        for j in 0..l {
            q[[i, j]] *= labels[i] * labels[j];
        }
    }

    let p = vec![-1.0; l];
    let solution = solve(&q, &p, labels, c, vec![0.0; l], options);

    build_model(x, labels, solution, kernel)
}

fn build_model(x: ArrayView2<'_, f32>, y: &[f64], solution: Solution, kernel: RbfKernel) -> SvmModel {
    let support_rows: Vec<usize> = (0..solution.alpha.len())
        .filter(|&i| solution.alpha[i] > 0.0)
        .collect();
    let coef: Array1<f64> = support_rows
        .iter()
        .map(|&i| solution.alpha[i] * y[i])
        .collect();

    SvmModel {
        support: x.select(Axis(0), &support_rows),
        coef,
        rho: solution.rho,
        kernel,
    }
}

struct Solution {
    alpha: Vec<f64>,
    rho: f64,
}

fn solve(
    q: &Array2<f64>,
    p: &[f64],
    y: &[f64],
    c: f64,
    mut alpha: Vec<f64>,
    options: SolverOptions,
) -> Solution {
    let l = alpha.len();

    // G = Q a + p
    let mut grad = p.to_vec();
    for i in 0..l {
        if alpha[i] != 0.0 {
            for k in 0..l {
                grad[k] += q[[k, i]] * alpha[i];
            }
        }
    }

    let max_iterations = options.max_iterations.max(100 * l);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        let Some((i, j)) = select_working_set(&alpha, &grad, y, c, options.tolerance) else {
            converged = true;
            break;
        };
        iterations += 1;

        let (old_i, old_j) = (alpha[i], alpha[j]);
        if y[i] != y[j] {
            let quad = positive_curvature(q[[i, i]] + q[[j, j]] + 2.0 * q[[i, j]]);
            let delta = (-grad[i] - grad[j]) / quad;
            let diff = alpha[i] - alpha[j];
            alpha[i] += delta;
            alpha[j] += delta;

            if diff > 0.0 {
                if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = diff;
                }
                if alpha[i] > c {
                    alpha[i] = c;
                    alpha[j] = c - diff;
                }
            } else {
                if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            }
        } else {
            let quad = positive_curvature(q[[i, i]] + q[[j, j]] - 2.0 * q[[i, j]]);
            let delta = (grad[i] - grad[j]) / quad;
            let sum = alpha[i] + alpha[j];
            alpha[i] -= delta;
            alpha[j] += delta;

            if sum > c {
                if alpha[i] > c {
                    alpha[i] = c;
                    alpha[j] = sum - c;
                }
                if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = sum - c;
                }
            } else {
                if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = sum;
                }
                if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = sum;
                }
            }
        }

        let (delta_i, delta_j) = (alpha[i] - old_i, alpha[j] - old_j);
        for k in 0..l {
            grad[k] += q[[k, i]] * delta_i + q[[k, j]] * delta_j;
        }
    }

    if !converged {
        warn!(
            "SMO stopped after {} iterations without reaching tolerance {}",
            iterations, options.tolerance
        );
    }

    let rho = compute_rho(&alpha, &grad, y, c);
    Solution { alpha, rho }
}

fn positive_curvature(quad: f64) -> f64 {
    if quad > 0.0 {
        quad
    } else {
        1e-12
    }
}

/// Maximal violating pair, or `None` once the KKT gap is below `tolerance`
fn select_working_set(
    alpha: &[f64],
    grad: &[f64],
    y: &[f64],
    c: f64,
    tolerance: f64,
) -> Option<(usize, usize)> {
    let mut gmax = f64::NEG_INFINITY;
    let mut gmax2 = f64::NEG_INFINITY;
    let mut best_i = None;
    let mut best_j = None;

    for t in 0..alpha.len() {
        let up = if y[t] > 0.0 { alpha[t] < c } else { alpha[t] > 0.0 };
        if up && -y[t] * grad[t] >= gmax {
            gmax = -y[t] * grad[t];
            best_i = Some(t);
        }

        let low = if y[t] > 0.0 { alpha[t] > 0.0 } else { alpha[t] < c };
        if low && y[t] * grad[t] >= gmax2 {
            gmax2 = y[t] * grad[t];
            best_j = Some(t);
        }
    }

    match (best_i, best_j) {
        (Some(i), Some(j)) if i != j && gmax + gmax2 >= tolerance => Some((i, j)),
        _ => None,
    }
}

fn compute_rho(alpha: &[f64], grad: &[f64], y: &[f64], c: f64) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_count = 0usize;
    let mut free_sum = 0.0;

    for t in 0..alpha.len() {
        let yg = y[t] * grad[t];
        if alpha[t] >= c {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if alpha[t] <= 0.0 {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            free_count += 1;
            free_sum += yg;
        }
    }

    if free_count > 0 {
        free_sum / free_count as f64
    } else {
        match (upper.is_finite(), lower.is_finite()) {
            (true, true) => (upper + lower) / 2.0,
            (true, false) => upper,
            (false, true) => lower,
            (false, false) => 0.0,
        }
    }
}
