//! Nearest-neighbour lookup over 3D point clouds.
//!
//! Points are binned into a uniform axis-aligned grid stored in CSR form:
//! `cell_offsets[c]..cell_offsets[c + 1]` indexes the slice of
//! `point_indices` belonging to cell `c`. A query scans cubic shells of cells
//! outward from its own cell and stops once no unvisited cell can hold a
//! closer point.

use crate::Vector3;

/// Aim for roughly this many points per occupied cell.
const TARGET_PER_CELL: f64 = 2.0;

/// Uniform-grid spatial index over a fixed set of points.
#[derive(Debug, Clone)]
pub struct PointIndex {
    points: Vec<Vector3>,
    origin: Vector3,
    cell_size: f64,
    dims: [i64; 3],
    cell_offsets: Vec<u32>,
    point_indices: Vec<u32>,
}

impl PointIndex {
    pub fn new(points: &[Vector3]) -> Self {
        if points.is_empty() {
            return Self {
                points: Vec::new(),
                origin: Vector3::zeros(),
                cell_size: 1.0,
                dims: [1, 1, 1],
                cell_offsets: vec![0, 0],
                point_indices: Vec::new(),
            };
        }

        let mut lo = points[0];
        let mut hi = points[0];
        for p in points {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        let extent = hi - lo;
        // Flat or coincident clouds still need a positive cell size.
        let floor = (extent.max() * 1e-3).max(1e-9);
        let volume = extent.map(|e| e.max(floor)).product();
        let cell_size = (volume * TARGET_PER_CELL / points.len() as f64)
            .cbrt()
            .max(floor);

        let dims = [
            (extent.x / cell_size).floor() as i64 + 1,
            (extent.y / cell_size).floor() as i64 + 1,
            (extent.z / cell_size).floor() as i64 + 1,
        ];
        let n_cells = (dims[0] * dims[1] * dims[2]) as usize;

        let mut index = Self {
            points: points.to_vec(),
            origin: lo,
            cell_size,
            dims,
            cell_offsets: Vec::with_capacity(n_cells + 1),
            point_indices: Vec::with_capacity(points.len()),
        };

        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); n_cells];
        for (i, p) in points.iter().enumerate() {
            let c = index.clamp_cell(index.cell_of(p));
            bins[index.flat(c)].push(i as u32);
        }
        index.cell_offsets.push(0);
        for bin in bins {
            index.point_indices.extend(bin);
            index.cell_offsets.push(index.point_indices.len() as u32);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Vector3] {
        &self.points
    }

    /// Index of the point closest to `q`, or `None` for an empty index.
    ///
    /// Ties resolve to the lowest point index.
    pub fn nearest(&self, q: &Vector3) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }

        let qc = self.cell_of(q);
        // Rings closer than the grid boundary are empty; start at the first
        // ring that touches the grid.
        let r_start = (0..3)
            .map(|a| (-qc[a]).max(qc[a] - (self.dims[a] - 1)).max(0))
            .max()
            .unwrap_or(0);
        let r_end = (0..3)
            .map(|a| qc[a].abs().max((qc[a] - (self.dims[a] - 1)).abs()))
            .max()
            .unwrap_or(0);

        let mut best: Option<(f64, usize)> = None;
        for r in r_start..=r_end {
            self.scan_shell(qc, r, q, &mut best);
            if let Some((d2, _)) = best {
                // Unvisited cells are at least r cells away from q's cell.
                let reach = r as f64 * self.cell_size;
                if d2 < reach * reach {
                    break;
                }
            }
        }
        best.map(|(_, i)| i)
    }

    fn scan_shell(&self, qc: [i64; 3], r: i64, q: &Vector3, best: &mut Option<(f64, usize)>) {
        let range = |a: usize| (qc[a] - r).max(0)..=(qc[a] + r).min(self.dims[a] - 1);
        for i in range(0) {
            for j in range(1) {
                let on_face = (i - qc[0]).abs() == r || (j - qc[1]).abs() == r;
                if on_face {
                    for k in range(2) {
                        self.scan_cell([i, j, k], q, best);
                    }
                } else {
                    for k in [qc[2] - r, qc[2] + r] {
                        if (0..self.dims[2]).contains(&k) {
                            self.scan_cell([i, j, k], q, best);
                        }
                    }
                }
            }
        }
    }

    fn scan_cell(&self, c: [i64; 3], q: &Vector3, best: &mut Option<(f64, usize)>) {
        let cell = self.flat(c);
        let start = self.cell_offsets[cell] as usize;
        let end = self.cell_offsets[cell + 1] as usize;
        for &idx in &self.point_indices[start..end] {
            let idx = idx as usize;
            let d2 = (self.points[idx] - q).norm_squared();
            let better = match *best {
                None => true,
                Some((bd, bi)) => d2 < bd || (d2 == bd && idx < bi),
            };
            if better {
                *best = Some((d2, idx));
            }
        }
    }

    fn cell_of(&self, p: &Vector3) -> [i64; 3] {
        let rel = (p - self.origin) / self.cell_size;
        [
            rel.x.floor() as i64,
            rel.y.floor() as i64,
            rel.z.floor() as i64,
        ]
    }

    fn clamp_cell(&self, c: [i64; 3]) -> [i64; 3] {
        std::array::from_fn(|a| c[a].clamp(0, self.dims[a] - 1))
    }

    fn flat(&self, c: [i64; 3]) -> usize {
        ((c[0] * self.dims[1] + c[1]) * self.dims[2] + c[2]) as usize
    }
}

/// For every query, the index of its nearest point.
///
/// Returns an empty vector when `points` is empty.
pub fn compute_nearest(points: &[Vector3], queries: &[Vector3]) -> Vec<usize> {
    let index = PointIndex::new(points);
    queries.iter().filter_map(|q| index.nearest(q)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(points: &[Vector3], q: &Vector3) -> f64 {
        points
            .iter()
            .map(|p| (p - q).norm_squared())
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Vector3> = (0..500)
            .map(|_| {
                Vector3::new(
                    rng.random_range(-0.1..0.1),
                    rng.random_range(-0.1..0.1),
                    rng.random_range(-0.05..0.12),
                )
            })
            .collect();
        let index = PointIndex::new(&points);

        // Queries inside and well outside the bounding box
        for _ in 0..200 {
            let q = Vector3::new(
                rng.random_range(-0.3..0.3),
                rng.random_range(-0.3..0.3),
                rng.random_range(-0.3..0.3),
            );
            let found = index.nearest(&q).unwrap();
            let d2 = (points[found] - q).norm_squared();
            assert_eq!(d2, brute_force(&points, &q), "query {q:?}");
        }
    }

    #[test]
    fn test_flat_cloud() {
        // All points share z; the grid must still have a usable cell size.
        let points: Vec<Vector3> = (0..20)
            .map(|i| Vector3::new(i as f64 * 0.01, (i % 4) as f64 * 0.01, 0.0))
            .collect();
        let nearest = compute_nearest(&points, &[Vector3::new(0.101, 0.0, 0.5)]);
        assert_eq!(nearest.len(), 1);
        let q = Vector3::new(0.101, 0.0, 0.5);
        assert_eq!(
            (points[nearest[0]] - q).norm_squared(),
            brute_force(&points, &q)
        );
    }

    #[test]
    fn test_single_point_and_empty() {
        let points = vec![Vector3::new(1.0, 2.0, 3.0)];
        assert_eq!(
            compute_nearest(&points, &[Vector3::zeros(), Vector3::new(5.0, 5.0, 5.0)]),
            vec![0, 0]
        );
        assert!(compute_nearest(&[], &[Vector3::zeros()]).is_empty());
        assert!(PointIndex::new(&[]).nearest(&Vector3::zeros()).is_none());
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let points = vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        ];
        assert_eq!(PointIndex::new(&points).nearest(&Vector3::zeros()), Some(0));
    }
}
