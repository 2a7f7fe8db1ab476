//! Background creation of scaled MRI subjects.
//!
//! The actual file work (scaling surfaces, labels and annotations, and
//! computing BEM solutions) is done by an [`MriScaler`] supplied by the
//! caller. This module decides *when* that work runs and reports how it went.

mod job;
mod queue;

use std::path::Path;

pub use self::job::{bem_fname, bem_solution_fname, find_bem_names, validate_subject_to, ScalingJob};
pub use self::queue::{BemOutcome, JobOutcome, ScalingQueue};

/// File operations behind a scaling job.
///
/// Implementations run on the worker thread. Errors and panics are caught
/// per step and reported through the queue status.
pub trait MriScaler: Send + 'static {
    /// In-memory BEM solution passed from computation to writing.
    type Solution;

    /// Create `job.subject_to` as a scaled copy of `job.subject_from`,
    /// overwriting an existing subject of that name.
    fn scale_mri(&mut self, job: &ScalingJob) -> anyhow::Result<()>;

    fn compute_bem_solution(&mut self, bem_path: &Path) -> anyhow::Result<Self::Solution>;

    fn write_bem_solution(&mut self, path: &Path, solution: &Self::Solution) -> anyhow::Result<()>;
}
