//! Scaling job records and the subject directory layout they operate on.

use std::path::{Path, PathBuf};

use crate::error::{CoregError, Result};
use crate::Vector3;

/// Everything the worker needs to create one scaled MRI subject.
///
/// Captured on the calling thread when a save is committed; the worker never
/// reads live model state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingJob {
    pub subjects_dir: PathBuf,
    pub subject_from: String,
    pub subject_to: String,
    /// Scale factor per axis.
    pub scale: Vector3,
    /// Create the new subject without fiducials.
    pub skip_fiducials: bool,
    /// Scale `*.label` files.
    pub scale_labels: bool,
    /// Copy `*.annot` files.
    pub copy_annot: bool,
    /// BEM models to compute solutions for after scaling, e.g.
    /// `"inner_skull-bem"` or `"5120-5120-5120-bem"`.
    pub bem_names: Vec<String>,
}

/// `<subjects_dir>/<subject>/bem/<subject>-<name>.fif`
pub fn bem_fname(subjects_dir: &Path, subject: &str, name: &str) -> PathBuf {
    subjects_dir
        .join(subject)
        .join("bem")
        .join(format!("{subject}-{name}.fif"))
}

/// Solution file next to a BEM model: `x-bem.fif` → `x-bem-sol.fif`.
pub fn bem_solution_fname(bem_file: &Path) -> PathBuf {
    let name = bem_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".fif").unwrap_or(&name);
    bem_file.with_file_name(format!("{stem}-sol.fif"))
}

/// Names of the BEM models saved for `subject`, sorted.
///
/// Matches files named `<subject>-<name>-bem.fif` in the subject's `bem`
/// directory. A missing directory yields no names.
pub fn find_bem_names(subjects_dir: &Path, subject: &str) -> Result<Vec<String>> {
    let bem_dir = subjects_dir.join(subject).join("bem");
    if !bem_dir.is_dir() {
        return Ok(Vec::new());
    }
    let prefix = format!("{subject}-");

    let mut names = Vec::new();
    for entry in std::fs::read_dir(&bem_dir)? {
        let file_name = entry?.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(name) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".fif"))
        else {
            continue;
        };
        if name.len() > "-bem".len() && name.ends_with("-bem") {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Check the name for a new scaled subject before anything is written.
pub fn validate_subject_to(
    subjects_dir: &Path,
    subject_from: &str,
    subject_to: &str,
    overwrite: bool,
) -> Result<()> {
    if subject_to.is_empty() {
        return Err(CoregError::Validation("no subject specified".into()));
    }
    if subject_to == subject_from {
        return Err(CoregError::Validation(
            "must be different from MRI source subject".into(),
        ));
    }
    if !overwrite && subjects_dir.join(subject_to).exists() {
        return Err(CoregError::Validation(format!(
            "subject {subject_to} already exists"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bem_paths() {
        let f = bem_fname(Path::new("/subjects"), "sample", "inner_skull-bem");
        assert_eq!(f, Path::new("/subjects/sample/bem/sample-inner_skull-bem.fif"));
        assert_eq!(
            bem_solution_fname(&f),
            Path::new("/subjects/sample/bem/sample-inner_skull-bem-sol.fif")
        );
    }

    #[test]
    fn test_find_bem_names() {
        let dir = tempfile::tempdir().unwrap();
        let bem = dir.path().join("sample").join("bem");
        std::fs::create_dir_all(&bem).unwrap();
        for f in [
            "sample-5120-5120-5120-bem.fif",
            "sample-inner_skull-bem.fif",
            "sample-5120-5120-5120-bem-sol.fif",
            "sample-head.fif",
            "other-inner_skull-bem.fif",
            "sample--bem.fif",
        ] {
            std::fs::write(bem.join(f), b"").unwrap();
        }

        let names = find_bem_names(dir.path(), "sample").unwrap();
        assert_eq!(names, vec!["5120-5120-5120-bem", "inner_skull-bem"]);
        assert!(find_bem_names(dir.path(), "missing").unwrap().is_empty());
    }

    #[test]
    fn test_validate_subject_to() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("existing")).unwrap();

        let check = |to: &str, overwrite| validate_subject_to(dir.path(), "sample", to, overwrite);
        assert!(matches!(check("", false), Err(CoregError::Validation(_))));
        assert!(matches!(check("sample", true), Err(CoregError::Validation(_))));
        assert!(matches!(check("existing", false), Err(CoregError::Validation(_))));
        assert!(check("existing", true).is_ok());
        assert!(check("scaled", false).is_ok());
    }
}
