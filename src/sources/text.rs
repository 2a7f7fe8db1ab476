//! Whitespace-separated text point files.
//!
//! Two layouts are recognised:
//!
//! - **xyz**: `x y z` or `x y z nx ny nz` per line (all rows the same width)
//! - **labelled**: `label x y z` per line
//!
//! Blank lines and lines starting with `#` or `%` are ignored. Coordinates
//! are in metres.

use std::path::Path;

use crate::error::{CoregError, Result};
use crate::Vector3;

use super::PointCloud;

fn data_lines(data: &str) -> impl Iterator<Item = (usize, &str)> {
    data.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#') && !l.starts_with('%'))
}

fn parse_f64(token: &str, path: &Path, line: usize) -> Result<f64> {
    let v: f64 = token.parse().map_err(|_| {
        CoregError::file_format(path, format!("line {line}: '{token}' is not a number"))
    })?;
    if !v.is_finite() {
        return Err(CoregError::file_format(
            path,
            format!("line {line}: non-finite value"),
        ));
    }
    Ok(v)
}

/// Parse xyz text from an in-memory string. `path` is only used in errors.
pub(crate) fn parse_xyz_text(data: &str, path: &Path) -> Result<PointCloud> {
    let mut cloud = PointCloud::default();
    let mut width = None;

    for (line, text) in data_lines(data) {
        let values = text
            .split_whitespace()
            .map(|t| parse_f64(t, path, line))
            .collect::<Result<Vec<f64>>>()?;

        if values.len() != 3 && values.len() != 6 {
            return Err(CoregError::file_format(
                path,
                format!("line {line}: expected 3 or 6 columns, found {}", values.len()),
            ));
        }
        match width {
            None => width = Some(values.len()),
            Some(w) if w != values.len() => {
                return Err(CoregError::file_format(
                    path,
                    format!("line {line}: expected {w} columns, found {}", values.len()),
                ));
            }
            Some(_) => {}
        }

        cloud.points.push(Vector3::new(values[0], values[1], values[2]));
        if values.len() == 6 {
            cloud
                .normals
                .push(Vector3::new(values[3], values[4], values[5]));
        }
    }

    if cloud.points.is_empty() {
        return Err(CoregError::file_format(path, "no points found"));
    }
    Ok(cloud)
}

/// Parse labelled text from an in-memory string. `path` is only used in errors.
pub(crate) fn parse_labelled_text(data: &str, path: &Path) -> Result<PointCloud> {
    let mut cloud = PointCloud::default();

    for (line, text) in data_lines(data) {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() != 4 {
            return Err(CoregError::file_format(
                path,
                format!("line {line}: expected 'label x y z'"),
            ));
        }
        let x = parse_f64(tokens[1], path, line)?;
        let y = parse_f64(tokens[2], path, line)?;
        let z = parse_f64(tokens[3], path, line)?;
        cloud.labels.push(tokens[0].to_string());
        cloud.points.push(Vector3::new(x, y, z));
    }

    if cloud.points.is_empty() {
        return Err(CoregError::file_format(path, "no points found"));
    }
    Ok(cloud)
}

/// File contents as text; bytes that are not UTF-8 are a format error.
fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => CoregError::file_format(path, "not a UTF-8 text file"),
        _ => CoregError::Io(e),
    })
}

pub fn read_xyz_text(path: &Path) -> Result<PointCloud> {
    let data = read_text(path)?;
    parse_xyz_text(&data, path)
}

pub fn read_labelled_text(path: &Path) -> Result<PointCloud> {
    let data = read_text(path)?;
    parse_labelled_text(&data, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xyz_with_comments_and_normals() {
        let data = "% digitizer export\n# x y z nx ny nz\n\n0 0 0.1 0 0 1\n0.01 0 0.09 0 0 1\n";
        let cloud = parse_xyz_text(data, Path::new("hsp.txt")).unwrap();
        assert_eq!(cloud.points.len(), 2);
        assert_eq!(cloud.normals.len(), 2);
        assert_eq!(cloud.points[1], Vector3::new(0.01, 0.0, 0.09));
        assert!(cloud.labels.is_empty());
    }

    #[test]
    fn test_xyz_rejects_mixed_widths() {
        let data = "0 0 0\n0 0 0 0 0 1\n";
        let err = parse_xyz_text(data, Path::new("hsp.txt")).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn test_xyz_rejects_non_numeric_and_empty() {
        assert!(parse_xyz_text("1 2 abc\n", Path::new("a.txt")).is_err());
        assert!(parse_xyz_text("# only a comment\n", Path::new("a.txt")).is_err());
        assert!(parse_xyz_text("1 2 NaN\n", Path::new("a.txt")).is_err());
    }

    #[test]
    fn test_labelled() {
        let data = "lpa -0.07 0.0 0.0\nnasion 0.0 0.1 0.0\nrpa 0.07 0.0 0.0\n";
        let cloud = parse_labelled_text(data, Path::new("fid.txt")).unwrap();
        assert_eq!(cloud.labels, vec!["lpa", "nasion", "rpa"]);
        assert_eq!(cloud.points[2], Vector3::new(0.07, 0.0, 0.0));
    }
}
