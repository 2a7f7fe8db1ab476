//! Point file readers and extension-based reader selection.
//!
//! Each supported extension maps to one or more named readers. With a single
//! reader its error is returned as-is; with several, they are tried in order
//! and the first success wins. Extensions of formats that are recognised but
//! not readable here produce an error suggesting a supported alternative.

mod delimited;
mod text;

use std::path::Path;

use tracing::debug;

use crate::error::{CoregError, Result};
use crate::points::{Fiducials, Surface};
use crate::Vector3;

pub use self::delimited::read_points_csv;
pub use self::text::{read_labelled_text, read_xyz_text};

/// Points read from a file, with optional per-point normals and labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vector3>,
    /// Empty when the file carries no normals.
    pub normals: Vec<Vector3>,
    /// Empty when the file carries no labels.
    pub labels: Vec<String>,
}

impl PointCloud {
    pub fn into_surface(self) -> Surface {
        Surface::new(self.points, self.normals)
    }
}

type Reader = fn(&Path) -> Result<PointCloud>;

/// Supported extensions and their readers, in the order they are tried.
const SUPPORTED: &[(&str, &[(&str, Reader)])] = &[
    (".txt", &[("xyz text", read_xyz_text), ("labelled text", read_labelled_text)]),
    (".xyz", &[("xyz text", read_xyz_text)]),
    (".pts", &[("xyz text", read_xyz_text)]),
    (".csv", &[("CSV", read_points_csv)]),
];

/// Recognised formats that have no reader here, with the suggested alternative.
const SUGGESTED: &[(&str, &str)] = &[
    (".fif", ".txt"),
    (".elp", ".txt"),
    (".hsp", ".txt"),
    (".tsv", ".csv"),
];

/// All suffixes of the file name joined, e.g. `.fif.gz`.
fn full_extension(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find('.') {
        Some(idx) if idx > 0 => name[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Read a point file, selecting the reader from the file extension.
pub fn load_points<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let ext = full_extension(path);

    if let Some((_, suggestion)) = SUGGESTED.iter().find(|(e, _)| *e == ext) {
        return Err(CoregError::UnsupportedFormat {
            extension: ext,
            suggestion: Some(suggestion.to_string()),
        });
    }

    let readers = SUPPORTED
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, r)| *r)
        .ok_or_else(|| CoregError::UnsupportedFormat {
            extension: ext.clone(),
            suggestion: None,
        })?;

    if let [(_, reader)] = readers {
        return reader(path);
    }

    for (name, reader) in readers {
        match reader(path) {
            Ok(cloud) => {
                debug!("Read {} with the {} reader", path.display(), name);
                return Ok(cloud);
            }
            Err(e) => debug!("{} reader rejected {}: {}", name, path.display(), e),
        }
    }

    let tried: Vec<&str> = readers.iter().map(|(name, _)| *name).collect();
    Err(CoregError::file_format(
        path,
        format!(
            "could not read file using any of the readers for extension {ext} (tried: {})",
            tried.join(", ")
        ),
    ))
}

/// Read a fiducials file: labelled text with `lpa`, `nasion` and `rpa` rows.
pub fn load_fiducials<P: AsRef<Path>>(path: P) -> Result<Fiducials> {
    let path = path.as_ref();
    let cloud = read_labelled_text(path)?;

    let find = |names: &[&str]| -> Result<Vector3> {
        cloud
            .labels
            .iter()
            .position(|l| names.iter().any(|n| l.eq_ignore_ascii_case(n)))
            .map(|i| cloud.points[i])
            .ok_or_else(|| {
                CoregError::file_format(path, format!("no {} fiducial found", names[0]))
            })
    };

    Ok(Fiducials::new(
        find(&["lpa"])?,
        find(&["nasion", "nas"])?,
        find(&["rpa"])?,
    ))
}
