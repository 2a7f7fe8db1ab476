//! Homogeneous 4×4 transforms between the MRI and head coordinate frames.
//!
//! Rotations follow the x-y-z Euler convention used throughout the
//! coregistration model: `R = Rz(z) · Ry(y) · Rx(x)`. A full MRI→head
//! transform with scaling is composed as `T · R · S`.
//!
//! Transform files are written as an 8-byte magic header followed by an
//! [rkyv](https://docs.rs/rkyv) archive, which is validated on load so that
//! truncated or foreign files are rejected instead of misread.

use std::path::Path;

use nalgebra::{Matrix4, Vector3};
use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

use crate::error::{CoregError, Result};

const TRANSFORM_MAGIC: &[u8; 8] = b"CORGTRF1";

/// Coordinate frame a transform maps from or to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum CoordFrame {
    Mri,
    Head,
    Unknown,
}

impl std::fmt::Display for CoordFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoordFrame::Mri => "mri",
            CoordFrame::Head => "head",
            CoordFrame::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A transform together with the frames it connects.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub from: CoordFrame,
    pub to: CoordFrame,
    pub matrix: Matrix4<f64>,
}

impl Transform {
    pub fn new(from: CoordFrame, to: CoordFrame, matrix: Matrix4<f64>) -> Self {
        Self { from, to, matrix }
    }

    /// The transform in the opposite direction.
    ///
    /// Returns `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.matrix.try_inverse()?;
        Some(Self {
            from: self.to,
            to: self.from,
            matrix: inv,
        })
    }
}

/// On-disk representation; nalgebra matrices are stored row-major.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct TransformRecord {
    from: CoordFrame,
    to: CoordFrame,
    rows: [[f64; 4]; 4],
}

// ── Elementary transforms ──────────────────────────────────────────────────

/// Homogeneous rotation about the x, y and z axes (radians): `Rz · Ry · Rx`.
pub fn rotation(x: f64, y: f64, z: f64) -> Matrix4<f64> {
    let (sx, cx) = x.sin_cos();
    let (sy, cy) = y.sin_cos();
    let (sz, cz) = z.sin_cos();
    Matrix4::new(
        cy * cz,
        -cx * sz + sx * sy * cz,
        sx * sz + cx * sy * cz,
        0.0,
        cy * sz,
        cx * cz + sx * sy * sz,
        -sx * cz + cx * sy * sz,
        0.0,
        -sy,
        sx * cy,
        cx * cy,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
    )
}

/// Recover `(x, y, z)` rotation angles from the upper-left 3×3 block.
///
/// Inverse of [`rotation`] for proper rotations with `|y| < π/2`.
pub fn rotation_angles(m: &Matrix4<f64>) -> (f64, f64, f64) {
    let x = m[(2, 1)].atan2(m[(2, 2)]);
    let c2 = (m[(0, 0)] * m[(0, 0)] + m[(1, 0)] * m[(1, 0)]).sqrt();
    let y = (-m[(2, 0)]).atan2(c2);
    let (s1, c1) = x.sin_cos();
    let z = (s1 * m[(0, 2)] - c1 * m[(0, 1)]).atan2(c1 * m[(1, 1)] - s1 * m[(1, 2)]);
    (x, y, z)
}

pub fn translation(x: f64, y: f64, z: f64) -> Matrix4<f64> {
    Matrix4::new_translation(&Vector3::new(x, y, z))
}

pub fn scaling(x: f64, y: f64, z: f64) -> Matrix4<f64> {
    Matrix4::new_nonuniform_scaling(&Vector3::new(x, y, z))
}

/// Apply a homogeneous transform to a single point.
#[inline]
pub fn apply_trans_point(m: &Matrix4<f64>, p: &Vector3<f64>) -> Vector3<f64> {
    let r = m.fixed_view::<3, 3>(0, 0);
    let t = m.fixed_view::<3, 1>(0, 3);
    r * p + t
}

/// Apply a homogeneous transform to every point.
pub fn apply_trans(m: &Matrix4<f64>, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    points.iter().map(|p| apply_trans_point(m, p)).collect()
}

// ── Frame handling ─────────────────────────────────────────────────────────

/// Return an MRI→head transform, inverting a head→MRI transform if needed.
pub fn ensure_mri_to_head(trans: Transform, path: &Path) -> Result<Transform> {
    match (trans.from, trans.to) {
        (CoordFrame::Mri, CoordFrame::Head) => Ok(trans),
        (CoordFrame::Head, CoordFrame::Mri) => trans
            .inverse()
            .ok_or_else(|| CoregError::file_format(path, "head→mri transform is singular")),
        (from, to) => Err(CoregError::file_format(
            path,
            format!("expected a transform between mri and head, got {from}→{to}"),
        )),
    }
}

// ── Persistence ────────────────────────────────────────────────────────────

/// Write a transform file.
pub fn save_transform<P: AsRef<Path>>(path: P, trans: &Transform) -> Result<()> {
    let path = path.as_ref();
    let record = TransformRecord {
        from: trans.from,
        to: trans.to,
        rows: std::array::from_fn(|r| std::array::from_fn(|c| trans.matrix[(r, c)])),
    };
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(&record)
        .map_err(|e| CoregError::file_format(path, format!("serialization failed: {e}")))?;

    let mut bytes = Vec::with_capacity(TRANSFORM_MAGIC.len() + payload.len());
    bytes.extend_from_slice(TRANSFORM_MAGIC);
    bytes.extend_from_slice(&payload);
    std::fs::write(path, &bytes)?;
    info!(
        "Saved {}→{} transform to {}",
        trans.from,
        trans.to,
        path.display()
    );
    Ok(())
}

/// Read a transform file written by [`save_transform`].
pub fn load_transform<P: AsRef<Path>>(path: P) -> Result<Transform> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let payload = bytes
        .strip_prefix(TRANSFORM_MAGIC.as_slice())
        .ok_or_else(|| CoregError::file_format(path, "not a transform file"))?;

    // Archived f64 fields need an aligned buffer.
    let mut aligned = rkyv::util::AlignedVec::<16>::new();
    aligned.extend_from_slice(payload);
    let record = rkyv::from_bytes::<TransformRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| CoregError::file_format(path, format!("corrupt transform: {e}")))?;

    let matrix = Matrix4::from_fn(|r, c| record.rows[r][c]);
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(CoregError::file_format(path, "transform contains non-finite values"));
    }
    Ok(Transform::new(record.from, record.to, matrix))
}
