//! Point data consumed by the coregistration model.
//!
//! MRI geometry (head surfaces and fiducials) lives in MRI coordinates and is
//! transformed by the current registration. Digitized data (head-shape points
//! and fiducials) lives in head coordinates and is never transformed.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::Vector3;

/// An immutable set of points with an exclusion filter.
///
/// The filter records excluded indices into the original array, so the
/// points themselves are never modified by omission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    points: Vec<Vector3>,
    excluded: BTreeSet<usize>,
}

impl PointSet {
    pub fn new(points: Vec<Vector3>) -> Self {
        Self {
            points,
            excluded: BTreeSet::new(),
        }
    }

    /// All points, including excluded ones.
    pub fn all(&self) -> &[Vector3] {
        &self.points
    }

    /// Points that pass the exclusion filter, in original order.
    pub fn active(&self) -> Vec<Vector3> {
        self.active_indices().map(|i| self.points[i]).collect()
    }

    /// Original indices of the points that pass the filter.
    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.points.len()).filter(move |i| !self.excluded.contains(i))
    }

    pub fn excluded(&self) -> &BTreeSet<usize> {
        &self.excluded
    }

    pub fn n_omitted(&self) -> usize {
        self.excluded.len()
    }

    pub fn n_active(&self) -> usize {
        self.points.len() - self.excluded.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Exclude active points whose `keep` entry is `false`.
    ///
    /// `keep` is indexed like [`PointSet::active`]; previously excluded points
    /// stay excluded. Returns the number of newly excluded points.
    pub fn exclude_from_active(&mut self, keep: &[bool]) -> usize {
        assert_eq!(
            keep.len(),
            self.n_active(),
            "mask must cover exactly the active points"
        );
        let newly: Vec<usize> = self
            .active_indices()
            .zip(keep)
            .filter(|(_, &k)| !k)
            .map(|(i, _)| i)
            .collect();
        let n = newly.len();
        self.excluded.extend(newly);
        n
    }

    pub fn clear_filter(&mut self) {
        self.excluded.clear();
    }
}

/// Human-readable summary of how many head-shape points are omitted.
pub fn omitted_info(n_omitted: usize) -> String {
    match n_omitted {
        0 => "No points omitted".to_string(),
        1 => "1 point omitted".to_string(),
        n => format!("{n} points omitted"),
    }
}

/// The three cranial landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fiducials {
    pub lpa: Vector3,
    pub nasion: Vector3,
    pub rpa: Vector3,
}

impl Fiducials {
    pub fn new(lpa: Vector3, nasion: Vector3, rpa: Vector3) -> Self {
        Self { lpa, nasion, rpa }
    }

    /// Landmarks in `[LPA, Nasion, RPA]` order.
    pub fn as_array(&self) -> [Vector3; 3] {
        [self.lpa, self.nasion, self.rpa]
    }

    pub fn from_array(pts: [Vector3; 3]) -> Self {
        Self::new(pts[0], pts[1], pts[2])
    }
}

/// A triangulated head surface reduced to its vertices and (optional) normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Surface {
    pub points: Vec<Vector3>,
    /// Unit outward normals, one per point, or empty if unavailable.
    pub normals: Vec<Vector3>,
}

impl Surface {
    pub fn new(points: Vec<Vector3>, normals: Vec<Vector3>) -> Self {
        Self { points, normals }
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty() && self.normals.len() == self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// MRI subject geometry: low/high resolution head surfaces and fiducials.
#[derive(Debug, Clone, Default)]
pub struct MriHead {
    pub subject: String,
    pub subjects_dir: PathBuf,
    pub high_res: Surface,
    pub low_res: Surface,
    pub fiducials: Option<Fiducials>,
}

/// Digitizer data from a measurement file.
#[derive(Debug, Clone, Default)]
pub struct HeadShape {
    pub points: PointSet,
    pub fiducials: Option<Fiducials>,
    /// File name of the measurement the points came from.
    pub inst_fname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(n: usize) -> Vec<Vector3> {
        (0..n).map(|i| Vector3::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_exclusion_maps_through_previous_filter() {
        let mut set = PointSet::new(pts(5));
        assert_eq!(set.exclude_from_active(&[true, false, true, true, true]), 1);
        assert_eq!(set.active().len(), 4);

        // Active points are now 0, 2, 3, 4; drop the one at original index 3.
        assert_eq!(set.exclude_from_active(&[true, true, false, true]), 1);
        let excluded: Vec<usize> = set.excluded().iter().copied().collect();
        assert_eq!(excluded, vec![1, 3]);
        assert_eq!(set.all().len(), 5, "underlying points are untouched");

        set.clear_filter();
        assert_eq!(set.n_omitted(), 0);
        assert_eq!(set.active(), pts(5));
    }

    #[test]
    fn test_omitted_info() {
        assert_eq!(omitted_info(0), "No points omitted");
        assert_eq!(omitted_info(1), "1 point omitted");
        assert_eq!(omitted_info(7), "7 points omitted");
    }

    #[test]
    fn test_surface_normals_must_match_points() {
        let s = Surface::new(pts(3), pts(2));
        assert!(!s.has_normals());
        let s = Surface::new(pts(3), pts(3));
        assert!(s.has_normals());
    }
}
