//! CSV point files with a header row.
//!
//! Required columns are `x`, `y`, `z`; `nx`, `ny`, `nz` add normals and
//! `label` adds labels. Column order is free and names are case-insensitive.

use std::path::Path;

use crate::error::{CoregError, Result};
use crate::Vector3;

use super::PointCloud;

struct Columns {
    xyz: [usize; 3],
    normals: Option<[usize; 3]>,
    label: Option<usize>,
}

fn find_columns(headers: &::csv::StringRecord, path: &Path) -> Result<Columns> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let require = |name: &str| {
        find(name).ok_or_else(|| CoregError::file_format(path, format!("missing column '{name}'")))
    };

    let xyz = [require("x")?, require("y")?, require("z")?];
    let normals = match (find("nx"), find("ny"), find("nz")) {
        (Some(a), Some(b), Some(c)) => Some([a, b, c]),
        (None, None, None) => None,
        _ => {
            return Err(CoregError::file_format(
                path,
                "normal columns must include all of nx, ny, nz",
            ))
        }
    };
    Ok(Columns {
        xyz,
        normals,
        label: find("label"),
    })
}

fn field(record: &::csv::StringRecord, idx: usize, row: usize, path: &Path) -> Result<f64> {
    let raw = record.get(idx).unwrap_or("").trim();
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CoregError::file_format(
            path,
            format!("row {row}: '{raw}' is not a finite number"),
        )),
    }
}

pub fn read_points_csv(path: &Path) -> Result<PointCloud> {
    let mut rdr = ::csv::Reader::from_path(path)
        .map_err(|e| CoregError::file_format(path, e.to_string()))?;
    let headers = rdr
        .headers()
        .map_err(|e| CoregError::file_format(path, e.to_string()))?
        .clone();
    let cols = find_columns(&headers, path)?;

    let mut cloud = PointCloud::default();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 2;
        let record = result.map_err(|e| CoregError::file_format(path, e.to_string()))?;
        let [xi, yi, zi] = cols.xyz;
        cloud.points.push(Vector3::new(
            field(&record, xi, row, path)?,
            field(&record, yi, row, path)?,
            field(&record, zi, row, path)?,
        ));
        if let Some([a, b, c]) = cols.normals {
            cloud.normals.push(Vector3::new(
                field(&record, a, row, path)?,
                field(&record, b, row, path)?,
                field(&record, c, row, path)?,
            ));
        }
        if let Some(l) = cols.label {
            cloud
                .labels
                .push(record.get(l).unwrap_or("").trim().to_string());
        }
    }

    if cloud.points.is_empty() {
        return Err(CoregError::file_format(path, "no points found"));
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_reordered_columns_with_normals() {
        let (_dir, path) = write("z,Y,x,nx,ny,nz\n0.1,0.2,0.3,0,0,1\n1,2,3,0,1,0\n");
        let cloud = read_points_csv(&path).unwrap();
        assert_eq!(cloud.points[0], Vector3::new(0.3, 0.2, 0.1));
        assert_eq!(cloud.normals[1], Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_partial_normals_rejected() {
        let (_dir, path) = write("x,y,z,nx\n0,0,0,1\n");
        assert!(read_points_csv(&path).is_err());
    }

    #[test]
    fn test_bad_value_reports_row() {
        let (_dir, path) = write("x,y,z\n0,0,0\n0,oops,0\n");
        let err = read_points_csv(&path).unwrap_err();
        assert!(err.to_string().contains("row 3"), "{err}");
    }
}
