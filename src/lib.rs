//! # coreg
//!
//! Head-to-MRI **coregistration** for MEG/EEG: align an MRI subject's head
//! surface and fiducials with digitized head-shape points and fiducials.
//!
//! Given an MRI subject (low/high resolution head surfaces and the LPA,
//! nasion and RPA landmarks in MRI coordinates) and a digitization from a
//! measurement (head-shape points and the same landmarks in head
//! coordinates), the crate estimates the rotation, translation and optional
//! scaling that map the MRI into the head frame, reports how well the two
//! agree, and can queue the creation of a scaled copy of the MRI subject on a
//! background worker.
//!
//! ## Example
//!
//! ```no_run
//! use coreg::{CoregModel, HeadShape, MriHead, PointSet};
//! use coreg::sources::{load_fiducials, load_points};
//!
//! let surface = load_points("sample/head-dense.xyz")?.into_surface();
//! let mri = MriHead {
//!     subject: "sample".into(),
//!     subjects_dir: "subjects".into(),
//!     high_res: surface.clone(),
//!     low_res: surface,
//!     fiducials: Some(load_fiducials("sample/fiducials.txt")?),
//! };
//! let hsp = HeadShape {
//!     points: PointSet::new(load_points("sample_raw-hsp.txt")?.points),
//!     fiducials: Some(load_fiducials("sample_raw-fid.txt")?),
//!     inst_fname: "sample_raw.fif".into(),
//! };
//!
//! let mut model = CoregModel::new(mri, hsp);
//! model.fit_fiducials()?;
//! model.omit_hsp_points(0.010, false)?;
//! for _ in 0..10 {
//!     model.fit_icp()?;
//! }
//! println!("{}", model.fid_eval_str());
//! println!("{}", model.points_eval_str());
//! model.save_trans("sample-trans.fif")?;
//! # Ok::<(), coreg::CoregError>(())
//! ```
//!
//! ## Overview
//!
//! 1. **Transforms** ([`transforms`]): x-y-z Euler rotations, homogeneous
//!    matrices and transform files
//! 2. **Fitting** ([`fit`]): weighted point-correspondence alignment solved
//!    with Levenberg–Marquardt, plus nearest-neighbour correspondence for ICP
//! 3. **Model** ([`model`]): parameters, cached derived geometry with explicit
//!    invalidation, fits and head-shape filtering
//! 4. **Scaling** ([`scaling`]): a single background worker that creates
//!    scaled MRI subjects and their BEM solutions in submission order
//!
//! Units are metres and radians, except the hair offset which is in
//! millimetres.

pub mod config;
pub mod error;
pub mod fit;
pub mod model;
pub mod points;
pub mod scaling;
pub mod session;
pub mod sources;
pub mod transforms;

pub use config::{ConfigStore, CoregConfig};
pub use error::{CoregError, Result};
pub use fit::{fit_matched_points, FitOptions, FitResult, ScaleParams};
pub use model::{
    Axis, CoregModel, Direction, FiducialWeights, ParameterKind, ParameterSteps,
    RegistrationParameters, ScaleMode,
};
pub use points::{Fiducials, HeadShape, MriHead, PointSet, Surface};
pub use scaling::{JobOutcome, MriScaler, ScalingJob, ScalingQueue};
pub use session::{CloseDecision, CoregSession};
pub use transforms::{CoordFrame, Transform};

// Commonly used types
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;
