//! Levenberg–Marquardt nonlinear least squares.
//!
//! Minimises `‖f(x)‖²` for a residual function `f: Rⁿ → Rᵐ` using a
//! forward-difference Jacobian. Only steps that strictly reduce the cost are
//! accepted, so the returned cost never exceeds the cost at `x0`.

use nalgebra::{DMatrix, DVector};

/// Solver tolerances.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Maximum outer iterations. Default 200.
    pub max_iterations: usize,
    /// Stop when an accepted step reduces the cost by less than this fraction. Default 1e-15.
    pub f_tol: f64,
    /// Stop when an accepted step is smaller than this, relative to ‖x‖. Default 1e-12.
    pub x_tol: f64,
    /// Stop when the largest gradient component falls below this. Default 1e-14.
    pub g_tol: f64,
    /// Relative step for the finite-difference Jacobian. Default 1e-8.
    pub eps: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            f_tol: 1e-15,
            x_tol: 1e-12,
            g_tol: 1e-14,
            eps: 1e-8,
        }
    }
}

/// Outcome of a least-squares solve.
#[derive(Debug, Clone)]
pub struct LeastSquaresResult {
    pub x: Vec<f64>,
    /// Sum of squared residuals at `x`.
    pub cost: f64,
    /// Sum of squared residuals at the initial guess.
    pub initial_cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
const LAMBDA_MAX: f64 = 1e16;
const DIAG_FLOOR: f64 = 1e-12;

fn jacobian<F>(f: &F, x: &DVector<f64>, fx: &DVector<f64>, eps: f64) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let n = x.len();
    let mut jac = DMatrix::<f64>::zeros(fx.len(), n);
    let mut xh = x.clone();
    for j in 0..n {
        let h = eps * x[j].abs().max(1.0);
        xh[j] = x[j] + h;
        let fh = f(xh.as_slice());
        jac.set_column(j, &((fh - fx) / h));
        xh[j] = x[j];
    }
    jac
}

/// Minimise `‖f(x)‖²` starting from `x0`.
pub fn levenberg_marquardt<F>(f: F, x0: &[f64], options: &FitOptions) -> LeastSquaresResult
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let mut x = DVector::from_column_slice(x0);
    let mut fx = f(x.as_slice());
    let mut cost = fx.norm_squared();
    let initial_cost = cost;
    let mut lambda = LAMBDA_INIT;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;

        if cost == 0.0 {
            converged = true;
            break;
        }

        let jac = jacobian(&f, &x, &fx, options.eps);
        let jtj = jac.transpose() * &jac;
        let grad = jac.transpose() * &fx;

        if grad.amax() < options.g_tol {
            converged = true;
            break;
        }

        // Marquardt damping: scale the diagonal rather than adding a constant
        let mut a = jtj.clone();
        for i in 0..a.nrows() {
            a[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
        }
        let dx = match a.cholesky() {
            Some(ch) => ch.solve(&(-&grad)),
            None => {
                lambda *= LAMBDA_UP;
                if lambda > LAMBDA_MAX {
                    break;
                }
                continue;
            }
        };

        let x_new = &x + &dx;
        let fx_new = f(x_new.as_slice());
        let cost_new = fx_new.norm_squared();

        if cost_new < cost {
            let reduction = cost - cost_new;
            let small_step = dx.norm() <= options.x_tol * (x.norm() + options.x_tol);
            let small_reduction = reduction <= options.f_tol * cost;

            x = x_new;
            fx = fx_new;
            cost = cost_new;
            lambda = (lambda * LAMBDA_DOWN).max(DIAG_FLOOR);

            if small_step || small_reduction {
                converged = true;
                break;
            }
        } else {
            lambda *= LAMBDA_UP;
            if lambda > LAMBDA_MAX {
                // No descent direction left at this precision.
                converged = true;
                break;
            }
        }
    }

    LeastSquaresResult {
        x: x.as_slice().to_vec(),
        cost,
        initial_cost,
        iterations,
        converged,
    }
}
