//! Point-correspondence fitting.
//!
//! - [`levenberg_marquardt`]: generic nonlinear least squares
//! - [`fit_matched_points`]: weighted rigid/similarity alignment of paired points
//! - [`PointIndex`] / [`compute_nearest`]: nearest-neighbour correspondence for ICP

mod lm;
mod matched;
mod nearest;

pub use self::lm::{levenberg_marquardt, FitOptions, LeastSquaresResult};
pub use self::matched::{fit_matched_points, params_to_trans, FitResult, ScaleParams};
pub use self::nearest::{compute_nearest, PointIndex};
