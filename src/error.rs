//! Error taxonomy for coregistration.
//!
//! Synchronous operations (loading and saving files, fitting, committing a
//! save) return [`CoregError`] to the caller and leave prior state intact.
//! Background scaling failures never surface here; they are reported through
//! the queue status instead (see [`crate::scaling::ScalingQueue`]).

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoregError {
    /// Required fiducial, surface, or head-shape data is absent.
    #[error("missing data: {0}")]
    DataMissing(String),

    /// A transform, surface, or fiducial file could not be parsed.
    #[error("malformed file {path}: {message}")]
    FileFormat { path: PathBuf, message: String },

    /// No reader is registered for a file extension.
    #[error("unsupported file type ({extension}){}", suggestion_suffix(.suggestion))]
    UnsupportedFormat {
        extension: String,
        suggestion: Option<String>,
    },

    /// Failure while scaling an MRI or computing a BEM solution.
    #[error("scaling {subject} failed: {message}")]
    ScalingJob { subject: String, message: String },

    /// A user-supplied value was rejected before any side effect.
    #[error("invalid value: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(". Try reading a {s} file instead"),
        None => String::new(),
    }
}

impl CoregError {
    pub(crate) fn file_format(path: &Path, message: impl Into<String>) -> Self {
        CoregError::FileFormat {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoregError>;
