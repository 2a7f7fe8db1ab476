//! Weighted alignment of corresponding point pairs.
//!
//! Solves for the transform `T · R · S` that maps each source point onto its
//! target, minimising `Σ wᵢ ‖tgtᵢ − (T·R·S)(srcᵢ)‖²`. Solved iteratively with
//! Levenberg–Marquardt rather than in closed form so that anisotropic scaling
//! and arbitrary weights fit the same machinery.

use nalgebra::{DVector, Matrix4};
use tracing::debug;

use crate::transforms::{apply_trans_point, rotation, scaling, translation};
use crate::Vector3;

use super::lm::{levenberg_marquardt, FitOptions};

/// How many scale parameters take part in a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleParams {
    /// Rigid: 3 rotations + 3 translations.
    None,
    /// One scale factor shared by all axes.
    Uniform,
    /// Independent x, y, z scale factors.
    ThreeAxis,
}

impl ScaleParams {
    /// Length of the parameter vector `[rx, ry, rz, tx, ty, tz, scale...]`.
    pub fn n_params(self) -> usize {
        match self {
            ScaleParams::None => 6,
            ScaleParams::Uniform => 7,
            ScaleParams::ThreeAxis => 9,
        }
    }
}

/// Result of a point-correspondence fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Rotation angles about x, y, z (radians).
    pub rotation: Vector3,
    /// Translation (metres).
    pub translation: Vector3,
    /// Fitted scale per axis, `None` for rigid fits.
    pub scale: Option<Vector3>,
    /// Weighted sum of squared distances after the fit.
    pub cost: f64,
    /// Weighted sum of squared distances at the initial guess.
    pub initial_cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Build the `T · R · S` transform for a parameter vector.
pub fn params_to_trans(x: &[f64], scale: ScaleParams) -> Matrix4<f64> {
    assert_eq!(x.len(), scale.n_params(), "wrong number of parameters");
    let rigid = translation(x[3], x[4], x[5]) * rotation(x[0], x[1], x[2]);
    match scale {
        ScaleParams::None => rigid,
        ScaleParams::Uniform => rigid * scaling(x[6], x[6], x[6]),
        ScaleParams::ThreeAxis => rigid * scaling(x[6], x[7], x[8]),
    }
}

/// Fit `src` onto `tgt` with per-point weights, starting from `x0`.
///
/// `weights` defaults to 1 for every pair. The caller guarantees non-empty,
/// equal-length correspondences; mismatched lengths panic.
pub fn fit_matched_points(
    src: &[Vector3],
    tgt: &[Vector3],
    weights: Option<&[f64]>,
    x0: &[f64],
    scale: ScaleParams,
    options: &FitOptions,
) -> FitResult {
    assert_eq!(
        src.len(),
        tgt.len(),
        "source and target must have the same number of points"
    );
    assert!(!src.is_empty(), "at least one correspondence is required");
    assert_eq!(x0.len(), scale.n_params(), "initial guess has the wrong length");

    let sqrt_w: Vec<f64> = match weights {
        Some(w) => {
            assert_eq!(w.len(), src.len(), "one weight per correspondence");
            w.iter().map(|&wi| wi.max(0.0).sqrt()).collect()
        }
        None => vec![1.0; src.len()],
    };

    let residual = |x: &[f64]| {
        let trans = params_to_trans(x, scale);
        let mut r = DVector::<f64>::zeros(3 * src.len());
        for (i, (s, t)) in src.iter().zip(tgt).enumerate() {
            let d = (t - apply_trans_point(&trans, s)) * sqrt_w[i];
            r[3 * i] = d.x;
            r[3 * i + 1] = d.y;
            r[3 * i + 2] = d.z;
        }
        r
    };

    let ls = levenberg_marquardt(residual, x0, options);
    let x = &ls.x;

    debug!(
        "Matched-point fit ({:?} scale, {} pairs): cost {:.3e} → {:.3e} in {} iterations",
        scale,
        src.len(),
        ls.initial_cost,
        ls.cost,
        ls.iterations
    );

    FitResult {
        rotation: Vector3::new(x[0], x[1], x[2]),
        translation: Vector3::new(x[3], x[4], x[5]),
        scale: match scale {
            ScaleParams::None => None,
            ScaleParams::Uniform => Some(Vector3::new(x[6], x[6], x[6])),
            ScaleParams::ThreeAxis => Some(Vector3::new(x[6], x[7], x[8])),
        },
        cost: ls.cost,
        initial_cost: ls.initial_cost,
        iterations: ls.iterations,
        converged: ls.converged,
    }
}
