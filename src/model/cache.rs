//! Dependency graph and value caches for the derived quantities of
//! [`CoregModel`](super::CoregModel).
//!
//! Every derived node declares the inputs and nodes it is computed from.
//! When an input changes, the model invalidates the transitive downstream set
//! of that input; everything else keeps its cached value. Caches are
//! `OnceCell`s, so a node is computed at most once between invalidations.

use std::cell::OnceCell;

use nalgebra::Matrix4;

use crate::points::Fiducials;
use crate::Vector3;

/// Independently settable state of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Parameters,
    ScaleMode,
    GrowHair,
    MriSurfaces,
    MriFiducials,
    /// Head-shape points, including their exclusion filter.
    HeadPoints,
    HeadFiducials,
}

/// A cached quantity derived from the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedNode {
    HasFidData,
    HasPtsData,
    Scale,
    MriHeadT,
    MriTrans,
    ProcessedLowResMriPoints,
    ProcessedHighResMriPoints,
    TransformedLowResMriPoints,
    TransformedHighResMriPoints,
    NearestTransformedLowResMriIdx,
    TransformedMriFiducials,
    FiducialDistances,
    PointDistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Input(Input),
    Node(DerivedNode),
}

use self::DerivedNode as N;
use self::Input as I;
use self::Upstream::{Input as In, Node as Nd};

impl DerivedNode {
    pub const ALL: [DerivedNode; 13] = [
        N::HasFidData,
        N::HasPtsData,
        N::Scale,
        N::MriHeadT,
        N::MriTrans,
        N::ProcessedLowResMriPoints,
        N::ProcessedHighResMriPoints,
        N::TransformedLowResMriPoints,
        N::TransformedHighResMriPoints,
        N::NearestTransformedLowResMriIdx,
        N::TransformedMriFiducials,
        N::FiducialDistances,
        N::PointDistance,
    ];

    /// What this node is computed from.
    pub fn upstream(self) -> &'static [Upstream] {
        match self {
            N::HasFidData => &[In(I::MriFiducials), In(I::HeadFiducials)],
            N::HasPtsData => &[In(I::MriSurfaces), In(I::HeadPoints)],
            N::Scale => &[In(I::Parameters), In(I::ScaleMode)],
            N::MriHeadT => &[In(I::Parameters), Nd(N::HasFidData)],
            N::MriTrans => &[Nd(N::MriHeadT), Nd(N::Scale)],
            N::ProcessedLowResMriPoints | N::ProcessedHighResMriPoints => {
                &[In(I::MriSurfaces), In(I::GrowHair), Nd(N::Scale)]
            }
            N::TransformedLowResMriPoints => {
                &[Nd(N::ProcessedLowResMriPoints), Nd(N::MriTrans)]
            }
            N::TransformedHighResMriPoints => {
                &[Nd(N::ProcessedHighResMriPoints), Nd(N::MriTrans)]
            }
            N::NearestTransformedLowResMriIdx => {
                &[Nd(N::TransformedLowResMriPoints), In(I::HeadPoints)]
            }
            N::TransformedMriFiducials => &[In(I::MriFiducials), Nd(N::MriTrans)],
            N::FiducialDistances => &[Nd(N::TransformedMriFiducials), In(I::HeadFiducials)],
            N::PointDistance => &[
                Nd(N::NearestTransformedLowResMriIdx),
                Nd(N::TransformedLowResMriPoints),
                In(I::HeadPoints),
            ],
        }
    }

    fn depends_on(self, up: Upstream) -> bool {
        self.upstream().contains(&up)
    }
}

/// Every node that (transitively) depends on `input`.
pub fn downstream_of(input: Input) -> Vec<DerivedNode> {
    let mut stack: Vec<DerivedNode> = DerivedNode::ALL
        .into_iter()
        .filter(|n| n.depends_on(In(input)))
        .collect();
    let mut seen: Vec<DerivedNode> = Vec::new();

    while let Some(node) = stack.pop() {
        if seen.contains(&node) {
            continue;
        }
        seen.push(node);
        for dep in DerivedNode::ALL {
            if !seen.contains(&dep) && dep.depends_on(Nd(node)) {
                stack.push(dep);
            }
        }
    }
    seen
}

/// Cached values, one cell per [`DerivedNode`].
#[derive(Debug, Default)]
pub(crate) struct DerivedCache {
    pub has_fid_data: OnceCell<bool>,
    pub has_pts_data: OnceCell<bool>,
    pub scale: OnceCell<Vector3>,
    pub mri_head_t: OnceCell<Matrix4<f64>>,
    pub mri_trans: OnceCell<Matrix4<f64>>,
    pub processed_low_res: OnceCell<Vec<Vector3>>,
    pub processed_high_res: OnceCell<Vec<Vector3>>,
    pub transformed_low_res: OnceCell<Vec<Vector3>>,
    pub transformed_high_res: OnceCell<Vec<Vector3>>,
    pub nearest_idx: OnceCell<Vec<usize>>,
    pub transformed_fiducials: OnceCell<Option<Fiducials>>,
    pub fiducial_distances: OnceCell<Option<[f64; 3]>>,
    pub point_distance: OnceCell<Option<Vec<f64>>>,
}

impl DerivedCache {
    pub fn invalidate(&mut self, input: Input) {
        for node in downstream_of(input) {
            self.clear(node);
        }
    }

    pub fn clear(&mut self, node: DerivedNode) {
        match node {
            N::HasFidData => drop(self.has_fid_data.take()),
            N::HasPtsData => drop(self.has_pts_data.take()),
            N::Scale => drop(self.scale.take()),
            N::MriHeadT => drop(self.mri_head_t.take()),
            N::MriTrans => drop(self.mri_trans.take()),
            N::ProcessedLowResMriPoints => drop(self.processed_low_res.take()),
            N::ProcessedHighResMriPoints => drop(self.processed_high_res.take()),
            N::TransformedLowResMriPoints => drop(self.transformed_low_res.take()),
            N::TransformedHighResMriPoints => drop(self.transformed_high_res.take()),
            N::NearestTransformedLowResMriIdx => drop(self.nearest_idx.take()),
            N::TransformedMriFiducials => drop(self.transformed_fiducials.take()),
            N::FiducialDistances => drop(self.fiducial_distances.take()),
            N::PointDistance => drop(self.point_distance.take()),
        }
    }

    pub fn is_cached(&self, node: DerivedNode) -> bool {
        match node {
            N::HasFidData => self.has_fid_data.get().is_some(),
            N::HasPtsData => self.has_pts_data.get().is_some(),
            N::Scale => self.scale.get().is_some(),
            N::MriHeadT => self.mri_head_t.get().is_some(),
            N::MriTrans => self.mri_trans.get().is_some(),
            N::ProcessedLowResMriPoints => self.processed_low_res.get().is_some(),
            N::ProcessedHighResMriPoints => self.processed_high_res.get().is_some(),
            N::TransformedLowResMriPoints => self.transformed_low_res.get().is_some(),
            N::TransformedHighResMriPoints => self.transformed_high_res.get().is_some(),
            N::NearestTransformedLowResMriIdx => self.nearest_idx.get().is_some(),
            N::TransformedMriFiducials => self.transformed_fiducials.get().is_some(),
            N::FiducialDistances => self.fiducial_distances.get().is_some(),
            N::PointDistance => self.point_distance.get().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_points_do_not_touch_transforms() {
        let nodes = downstream_of(Input::HeadPoints);
        assert!(nodes.contains(&N::NearestTransformedLowResMriIdx));
        assert!(nodes.contains(&N::PointDistance));
        assert!(nodes.contains(&N::HasPtsData));
        assert!(!nodes.contains(&N::MriTrans));
        assert!(!nodes.contains(&N::TransformedLowResMriPoints));
        assert!(!nodes.contains(&N::FiducialDistances));
    }

    #[test]
    fn test_parameters_reach_all_geometry() {
        let nodes = downstream_of(Input::Parameters);
        for n in [
            N::Scale,
            N::MriHeadT,
            N::MriTrans,
            N::ProcessedHighResMriPoints,
            N::TransformedHighResMriPoints,
            N::FiducialDistances,
            N::PointDistance,
        ] {
            assert!(nodes.contains(&n), "{n:?} should follow the parameters");
        }
        assert!(!nodes.contains(&N::HasFidData));
        assert!(!nodes.contains(&N::HasPtsData));
    }

    #[test]
    fn test_head_fiducials_propagate_through_has_fid_data() {
        // mri_head_t is identity without fiducials, so it must follow them.
        let nodes = downstream_of(Input::HeadFiducials);
        assert!(nodes.contains(&N::MriHeadT));
        assert!(nodes.contains(&N::TransformedLowResMriPoints));
    }

    #[test]
    fn test_clear_and_is_cached() {
        let mut cache = DerivedCache::default();
        cache.scale.get_or_init(|| Vector3::new(1.0, 1.0, 1.0));
        cache.mri_trans.get_or_init(Matrix4::identity);
        assert!(cache.is_cached(N::Scale));

        cache.invalidate(Input::GrowHair);
        assert!(cache.is_cached(N::Scale), "grow hair does not affect scale");
        assert!(cache.is_cached(N::MriTrans));

        cache.invalidate(Input::ScaleMode);
        assert!(!cache.is_cached(N::Scale));
        assert!(!cache.is_cached(N::MriTrans));
    }
}
