//! The coregistration model: registration parameters, the MRI and head-shape
//! data they act on, and every quantity derived from them.

use std::path::Path;

use nalgebra::Matrix4;
use tracing::{debug, info, warn};

use crate::error::{CoregError, Result};
use crate::fit::{compute_nearest, fit_matched_points, FitOptions, FitResult, ScaleParams};
use crate::points::{omitted_info, Fiducials, HeadShape, MriHead, Surface};
use crate::scaling::{find_bem_names, ScalingJob};
use crate::transforms::{
    apply_trans, apply_trans_point, ensure_mri_to_head, load_transform, rotation,
    rotation_angles, save_transform, scaling, translation, CoordFrame, Transform,
};
use crate::Vector3;

use super::cache::{DerivedCache, DerivedNode, Input};
use super::parameters::{
    Axis, Direction, FiducialWeights, ParameterKind, ParameterSteps, RegistrationParameters,
    ScaleMode,
};

/// Head-to-MRI coregistration state.
///
/// Inputs are changed only through setters, each of which invalidates the
/// derived quantities downstream of what it changed. Derived getters take
/// `&self` and compute on first access after an invalidation; repeated reads
/// return the cached value.
#[derive(Debug)]
pub struct CoregModel {
    mri: MriHead,
    hsp: HeadShape,
    params: RegistrationParameters,
    scale_mode: ScaleMode,
    /// Hair offset (mm).
    grow_hair: f64,

    pub fiducial_weights: FiducialWeights,
    pub steps: ParameterSteps,
    pub fit_options: FitOptions,

    /// Follow the subject named by the measurement file when it changes.
    pub guess_mri_subject: bool,
    pub scale_labels: bool,
    pub copy_annot: bool,
    pub prepare_bem_model: bool,

    cache: DerivedCache,
}

impl Default for CoregModel {
    fn default() -> Self {
        Self::new(MriHead::default(), HeadShape::default())
    }
}

impl CoregModel {
    pub fn new(mri: MriHead, hsp: HeadShape) -> Self {
        Self {
            mri,
            hsp,
            params: RegistrationParameters::default(),
            scale_mode: ScaleMode::None,
            grow_hair: 0.0,
            fiducial_weights: FiducialWeights::default(),
            steps: ParameterSteps::default(),
            fit_options: FitOptions::default(),
            guess_mri_subject: true,
            scale_labels: true,
            copy_annot: true,
            prepare_bem_model: true,
            cache: DerivedCache::default(),
        }
    }

    // ── Inputs ─────────────────────────────────────────────────────────────

    pub fn mri(&self) -> &MriHead {
        &self.mri
    }

    pub fn head_shape(&self) -> &HeadShape {
        &self.hsp
    }

    pub fn parameters(&self) -> &RegistrationParameters {
        &self.params
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    pub fn grow_hair(&self) -> f64 {
        self.grow_hair
    }

    /// Replace the MRI subject data.
    ///
    /// A nonzero hair offset is cleared if the new surfaces lack normals.
    pub fn set_mri(&mut self, mri: MriHead) {
        self.mri = mri;
        self.cache.invalidate(Input::MriSurfaces);
        self.cache.invalidate(Input::MriFiducials);
        if self.grow_hair != 0.0 && !self.surfaces_have_normals() {
            warn!("Norms missing from bem of {}, can't grow hair", self.mri.subject);
            self.grow_hair = 0.0;
            self.cache.invalidate(Input::GrowHair);
        }
    }

    /// Replace the digitizer data. Any exclusion filter travels with it.
    pub fn set_head_shape(&mut self, hsp: HeadShape) {
        self.hsp = hsp;
        self.cache.invalidate(Input::HeadPoints);
        self.cache.invalidate(Input::HeadFiducials);
    }

    pub fn set_parameters(&mut self, params: RegistrationParameters) {
        if params != self.params {
            self.params = params;
            self.cache.invalidate(Input::Parameters);
        }
    }

    pub fn set_rotation(&mut self, rotation: Vector3) {
        self.set_parameters(RegistrationParameters {
            rotation,
            ..self.params
        });
    }

    pub fn set_translation(&mut self, translation: Vector3) {
        self.set_parameters(RegistrationParameters {
            translation,
            ..self.params
        });
    }

    pub fn set_scale(&mut self, scale: Vector3) {
        self.set_parameters(RegistrationParameters { scale, ..self.params });
    }

    /// Step one parameter by the configured increment.
    pub fn nudge(&mut self, kind: ParameterKind, axis: Axis, direction: Direction) {
        let params = self.params.nudged(kind, axis, direction, &self.steps);
        self.set_parameters(params);
    }

    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        if mode != self.scale_mode {
            self.scale_mode = mode;
            self.cache.invalidate(Input::ScaleMode);
        }
    }

    /// Move the back of the MRI head outward by `mm` along its normals.
    ///
    /// Fails with [`CoregError::DataMissing`] and resets the offset to zero
    /// when a surface has no normals.
    pub fn set_grow_hair(&mut self, mm: f64) -> Result<()> {
        let requested = if mm != 0.0 && !self.surfaces_have_normals() {
            0.0
        } else {
            mm
        };
        if requested != self.grow_hair {
            self.grow_hair = requested;
            self.cache.invalidate(Input::GrowHair);
        }
        if requested != mm {
            warn!("Norms missing from bem, can't grow hair");
            return Err(CoregError::DataMissing(
                "surface normals are missing, can't grow hair".into(),
            ));
        }
        Ok(())
    }

    fn surfaces_have_normals(&self) -> bool {
        [&self.mri.low_res, &self.mri.high_res]
            .iter()
            .all(|s| s.is_empty() || s.has_normals())
    }

    /// Whether the value of `node` is currently cached.
    pub fn is_cached(&self, node: DerivedNode) -> bool {
        self.cache.is_cached(node)
    }

    // ── Derived quantities ─────────────────────────────────────────────────

    /// Both MRI and digitized fiducials are present.
    pub fn has_fid_data(&self) -> bool {
        *self
            .cache
            .has_fid_data
            .get_or_init(|| self.mri.fiducials.is_some() && self.hsp.fiducials.is_some())
    }

    /// A low-resolution MRI surface and active head-shape points are present.
    pub fn has_pts_data(&self) -> bool {
        *self
            .cache
            .has_pts_data
            .get_or_init(|| !self.mri.low_res.is_empty() && self.hsp.points.n_active() > 0)
    }

    /// Effective scale per axis under the current scale mode.
    pub fn scale(&self) -> Vector3 {
        *self.cache.scale.get_or_init(|| {
            let s = self.params.scale;
            match self.scale_mode {
                ScaleMode::None => Vector3::new(1.0, 1.0, 1.0),
                ScaleMode::Uniform => Vector3::new(s.x, s.x, s.x),
                ScaleMode::ThreeAxis => s,
            }
        })
    }

    /// Rigid transform of the scaled MRI into head coordinates.
    ///
    /// Identity until both sets of fiducials are available.
    pub fn mri_head_t(&self) -> Matrix4<f64> {
        *self.cache.mri_head_t.get_or_init(|| {
            if !self.has_fid_data() {
                return Matrix4::identity();
            }
            let (r, t) = (self.params.rotation, self.params.translation);
            translation(t.x, t.y, t.z) * rotation(r.x, r.y, r.z)
        })
    }

    /// Full transform of unscaled MRI coordinates into head coordinates.
    pub fn mri_trans(&self) -> Matrix4<f64> {
        *self.cache.mri_trans.get_or_init(|| {
            let s = self.scale();
            self.mri_head_t() * scaling(s.x, s.y, s.z)
        })
    }

    /// Low-resolution MRI head surface after the hair offset.
    pub fn processed_low_res_mri_points(&self) -> &[Vector3] {
        self.cache
            .processed_low_res
            .get_or_init(|| self.grow_hair_on(&self.mri.low_res))
    }

    /// High-resolution MRI head surface after the hair offset.
    pub fn processed_high_res_mri_points(&self) -> &[Vector3] {
        self.cache
            .processed_high_res
            .get_or_init(|| self.grow_hair_on(&self.mri.high_res))
    }

    fn grow_hair_on(&self, surface: &Surface) -> Vec<Vector3> {
        if self.grow_hair == 0.0 || !surface.has_normals() {
            return surface.points.clone();
        }
        // The offset is given in head space, so undo the MRI scaling.
        let offset = Vector3::repeat(self.grow_hair).component_div(&(self.scale() * 1000.0));
        surface
            .points
            .iter()
            .zip(&surface.normals)
            .map(|(p, n)| {
                if p.z > p.y {
                    p + n.component_mul(&offset)
                } else {
                    *p
                }
            })
            .collect()
    }

    pub fn transformed_low_res_mri_points(&self) -> &[Vector3] {
        self.cache
            .transformed_low_res
            .get_or_init(|| apply_trans(&self.mri_trans(), self.processed_low_res_mri_points()))
    }

    pub fn transformed_high_res_mri_points(&self) -> &[Vector3] {
        self.cache
            .transformed_high_res
            .get_or_init(|| apply_trans(&self.mri_trans(), self.processed_high_res_mri_points()))
    }

    /// For each active head-shape point, the index of the nearest
    /// transformed low-resolution MRI point.
    pub fn nearest_transformed_low_res_mri_idx(&self) -> &[usize] {
        self.cache.nearest_idx.get_or_init(|| {
            compute_nearest(self.transformed_low_res_mri_points(), &self.hsp.points.active())
        })
    }

    /// MRI fiducials in head coordinates.
    pub fn transformed_mri_fiducials(&self) -> Option<Fiducials> {
        *self.cache.transformed_fiducials.get_or_init(|| {
            let trans = self.mri_trans();
            self.mri
                .fiducials
                .map(|f| Fiducials::from_array(f.as_array().map(|p| apply_trans_point(&trans, &p))))
        })
    }

    /// Distance between transformed MRI and digitized fiducials, in
    /// `[LPA, Nasion, RPA]` order (metres).
    pub fn fiducial_distances(&self) -> Option<[f64; 3]> {
        *self.cache.fiducial_distances.get_or_init(|| {
            let mri = self.transformed_mri_fiducials()?.as_array();
            let head = self.hsp.fiducials?.as_array();
            Some(std::array::from_fn(|i| (mri[i] - head[i]).norm()))
        })
    }

    /// Distance from every active head-shape point to the MRI head (metres).
    pub fn point_distance(&self) -> Option<&[f64]> {
        self.cache
            .point_distance
            .get_or_init(|| {
                let mri = self.transformed_low_res_mri_points();
                let hsp = self.hsp.points.active();
                if hsp.is_empty() || mri.is_empty() {
                    return None;
                }
                let nearest = self.nearest_transformed_low_res_mri_idx();
                Some(
                    hsp.iter()
                        .zip(nearest)
                        .map(|(p, &i)| (mri[i] - p).norm())
                        .collect(),
                )
            })
            .as_deref()
    }

    pub fn mean_point_distance(&self) -> Option<f64> {
        let d = self.point_distance()?;
        Some(d.iter().sum::<f64>() / d.len() as f64)
    }

    /// A transform file can only be written once the MRI was moved or scaled.
    pub fn can_save(&self) -> bool {
        self.mri_trans() != Matrix4::identity()
    }

    /// Scaling is on and the source subject has BEM models to recompute.
    pub fn can_prepare_bem_model(&self) -> bool {
        self.scale_mode != ScaleMode::None && self.subject_has_bem()
    }

    fn subject_has_bem(&self) -> bool {
        match find_bem_names(&self.mri.subjects_dir, &self.mri.subject) {
            Ok(names) => !names.is_empty(),
            Err(e) => {
                debug!("Could not list BEM models of {}: {}", self.mri.subject, e);
                false
            }
        }
    }

    /// Fiducial fit summary in millimetres, empty without fiducial data.
    pub fn fid_eval_str(&self) -> String {
        match self.fiducial_distances() {
            Some([lpa, nas, rpa]) => format!(
                "Error: LPA={:.1} NAS={:.1} RPA={:.1} mm",
                lpa * 1000.0,
                nas * 1000.0,
                rpa * 1000.0
            ),
            None => String::new(),
        }
    }

    /// Head-shape fit summary (mean and standard deviation in millimetres).
    pub fn points_eval_str(&self) -> String {
        let Some(d) = self.point_distance() else {
            return String::new();
        };
        let n = d.len() as f64;
        let mean = d.iter().sum::<f64>() / n;
        let var = d.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        format!(
            "Points: μ={:.1}, σ={:.1} mm",
            mean * 1000.0,
            var.sqrt() * 1000.0
        )
    }

    pub fn omitted_info(&self) -> String {
        omitted_info(self.hsp.points.n_omitted())
    }

    /// Subject guessed from the measurement file name (`<subject>_...`).
    pub fn raw_subject(&self) -> Option<String> {
        let fname = Path::new(&self.hsp.inst_fname)
            .file_name()?
            .to_string_lossy()
            .into_owned();
        match fname.split_once('_') {
            Some((subject, _)) if !subject.is_empty() => Some(subject.to_string()),
            _ => None,
        }
    }

    /// The MRI subject to switch to for the current measurement, if any.
    ///
    /// Prefers the subject named by the file, then `fsaverage`.
    pub fn guess_mri_subject<S: AsRef<str>>(&self, available: &[S]) -> Option<String> {
        if !self.guess_mri_subject {
            return None;
        }
        let has = |name: &str| available.iter().any(|s| s.as_ref() == name);
        match self.raw_subject() {
            Some(subject) if has(&subject) => Some(subject),
            _ if has("fsaverage") => Some("fsaverage".to_string()),
            _ => None,
        }
    }

    // ── Fitting ────────────────────────────────────────────────────────────

    fn fiducial_pairs(&self) -> Result<([Vector3; 3], [Vector3; 3])> {
        match (self.mri.fiducials, self.hsp.fiducials) {
            (Some(mri), Some(head)) => Ok((mri.as_array(), head.as_array())),
            _ => Err(CoregError::DataMissing(
                "MRI and digitized fiducials are both required".into(),
            )),
        }
    }

    /// Head-shape and fiducial correspondences for one ICP step.
    ///
    /// Returns unscaled MRI points, head points and weights.
    fn icp_pairs(&self) -> Result<(Vec<Vector3>, Vec<Vector3>, Vec<f64>)> {
        let (mri_fid, head_fid) = self.fiducial_pairs()?;
        if !self.has_pts_data() {
            return Err(CoregError::DataMissing(
                "an MRI head surface and head-shape points are both required".into(),
            ));
        }

        let processed = self.processed_low_res_mri_points();
        let mut src: Vec<Vector3> = self
            .nearest_transformed_low_res_mri_idx()
            .iter()
            .map(|&i| processed[i])
            .collect();
        src.extend(mri_fid);

        let mut tgt = self.hsp.points.active();
        tgt.extend(head_fid);

        let mut weights = vec![1.0; src.len() - 3];
        weights.extend(self.fiducial_weights.as_array());
        Ok((src, tgt, weights))
    }

    fn rigid_x0(&self) -> [f64; 6] {
        let (r, t) = (self.params.rotation, self.params.translation);
        [r.x, r.y, r.z, t.x, t.y, t.z]
    }

    fn apply_rigid_fit(&mut self, fit: &FitResult) {
        self.set_parameters(RegistrationParameters {
            rotation: fit.rotation,
            translation: fit.translation,
            ..self.params
        });
    }

    fn require_scaling(&self) -> Result<()> {
        if self.scale_mode == ScaleMode::None {
            return Err(CoregError::Validation(
                "scaling is disabled; choose a scale mode first".into(),
            ));
        }
        Ok(())
    }

    /// Rotate and translate the scaled MRI fiducials onto the digitized ones.
    ///
    /// The solve minimises the weighted sum of squared distances. If its
    /// optimum has a larger plain sum of the three fiducial distances than
    /// the current parameters, the current parameters are kept.
    pub fn fit_fiducials(&mut self) -> Result<FitResult> {
        let (mri_fid, head_fid) = self.fiducial_pairs()?;
        let previous = self.params;
        let before = self.fiducial_distance_sum();
        let scale = self.scale();
        let src = mri_fid.map(|p| p.component_mul(&scale));
        let weights = self.fiducial_weights.as_array();

        let fit = fit_matched_points(
            &src,
            &head_fid,
            Some(weights.as_slice()),
            &self.rigid_x0(),
            ScaleParams::None,
            &self.fit_options,
        );
        self.apply_rigid_fit(&fit);

        let after = self.fiducial_distance_sum();
        if after > before {
            debug!(
                "Fiducial fit raised the summed distance ({:.6} → {:.6} m), keeping previous parameters",
                before, after
            );
            self.set_parameters(previous);
        }
        info!("Fit fiducials: {}", self.fid_eval_str());
        Ok(fit)
    }

    fn fiducial_distance_sum(&self) -> f64 {
        self.fiducial_distances()
            .map_or(f64::INFINITY, |d| d.iter().sum())
    }

    /// One ICP step: match head-shape points to their current nearest MRI
    /// points and fit rotation and translation to those pairs plus the
    /// fiducials.
    pub fn fit_icp(&mut self) -> Result<FitResult> {
        let (src, tgt, weights) = self.icp_pairs()?;
        let scale = self.scale();
        let src: Vec<Vector3> = src.iter().map(|p| p.component_mul(&scale)).collect();

        let fit = fit_matched_points(
            &src,
            &tgt,
            Some(weights.as_slice()),
            &self.rigid_x0(),
            ScaleParams::None,
            &self.fit_options,
        );
        self.apply_rigid_fit(&fit);
        info!("Fit ICP ({} points): {}", tgt.len() - 3, self.points_eval_str());
        Ok(fit)
    }

    /// Fit rotation, translation and a uniform scale to the fiducials.
    pub fn fit_scale_fiducials(&mut self) -> Result<FitResult> {
        self.require_scaling()?;
        let (mri_fid, head_fid) = self.fiducial_pairs()?;
        let weights = self.fiducial_weights.as_array();
        let [rx, ry, rz, tx, ty, tz] = self.rigid_x0();
        let x0 = [rx, ry, rz, tx, ty, tz, self.params.scale.x];

        let fit = fit_matched_points(
            &mri_fid,
            &head_fid,
            Some(weights.as_slice()),
            &x0,
            ScaleParams::Uniform,
            &self.fit_options,
        );
        self.apply_full_fit(&fit);
        info!("Fit fiducials with scaling: {}", self.fid_eval_str());
        Ok(fit)
    }

    /// One ICP step that also fits the scale, uniform or per axis depending
    /// on the scale mode.
    pub fn fit_scale_icp(&mut self) -> Result<FitResult> {
        self.require_scaling()?;
        let (src, tgt, weights) = self.icp_pairs()?;
        let mut x0 = self.rigid_x0().to_vec();
        let s = self.params.scale;
        let params = self.scale_mode.fit_params();
        match params {
            ScaleParams::ThreeAxis => x0.extend([s.x, s.y, s.z]),
            _ => x0.push(s.x),
        }

        let fit = fit_matched_points(&src, &tgt, Some(weights.as_slice()), &x0, params, &self.fit_options);
        self.apply_full_fit(&fit);
        info!(
            "Fit ICP with scaling ({} points): {}",
            tgt.len() - 3,
            self.points_eval_str()
        );
        Ok(fit)
    }

    fn apply_full_fit(&mut self, fit: &FitResult) {
        self.set_parameters(RegistrationParameters {
            rotation: fit.rotation,
            translation: fit.translation,
            scale: fit.scale.unwrap_or(self.params.scale),
        });
    }

    // ── Head-shape filtering ───────────────────────────────────────────────

    /// Exclude head-shape points farther than `distance` (metres) from the
    /// MRI head.
    ///
    /// Exclusions accumulate across calls. `reset` clears the filter and
    /// returns without applying a new one. A non-positive `distance` excludes
    /// nothing. Returns the number of newly excluded points.
    pub fn omit_hsp_points(&mut self, distance: f64, reset: bool) -> Result<usize> {
        if reset {
            info!("Coregistration: Reset excluded head shape points");
            self.hsp.points.clear_filter();
            self.cache.invalidate(Input::HeadPoints);
            return Ok(0);
        }
        if distance <= 0.0 {
            return Ok(0);
        }

        let keep: Vec<bool> = self
            .point_distance()
            .ok_or_else(|| {
                CoregError::DataMissing(
                    "an MRI head surface and head-shape points are both required".into(),
                )
            })?
            .iter()
            .map(|&d| d <= distance)
            .collect();

        let n = self.hsp.points.exclude_from_active(&keep);
        info!(
            "Coregistration: Excluding {} head shape points with distance >= {:.3} m.",
            n, distance
        );
        if n > 0 {
            self.cache.invalidate(Input::HeadPoints);
        }
        Ok(n)
    }

    // ── Transforms ─────────────────────────────────────────────────────────

    /// Take rotation and translation from an MRI→head matrix; scale is kept.
    pub fn set_trans(&mut self, mri_head_t: &Matrix4<f64>) {
        let (rx, ry, rz) = rotation_angles(mri_head_t);
        self.set_parameters(RegistrationParameters {
            rotation: Vector3::new(rx, ry, rz),
            translation: Vector3::new(mri_head_t[(0, 3)], mri_head_t[(1, 3)], mri_head_t[(2, 3)]),
            ..self.params
        });
    }

    /// Load rotation and translation from a transform file.
    ///
    /// Head→MRI files are inverted. On error nothing changes.
    pub fn load_trans<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let trans = ensure_mri_to_head(load_transform(path)?, path)?;
        self.set_trans(&trans.matrix);
        info!("Loaded MRI→head transform from {}", path.display());
        Ok(())
    }

    /// Write the current MRI→head transform.
    pub fn save_trans<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.can_save() {
            return Err(CoregError::DataMissing(
                "not enough information for saving transform".into(),
            ));
        }
        save_transform(
            path,
            &Transform::new(CoordFrame::Mri, CoordFrame::Head, self.mri_head_t()),
        )
    }

    /// Return parameters and the hair offset to their defaults.
    ///
    /// The scale mode is left as is.
    pub fn reset(&mut self) {
        self.set_parameters(RegistrationParameters::default());
        if self.grow_hair != 0.0 {
            self.grow_hair = 0.0;
            self.cache.invalidate(Input::GrowHair);
        }
    }

    // ── Scaling ────────────────────────────────────────────────────────────

    /// Snapshot of everything needed to create `subject_to` in the background.
    pub fn get_scaling_job(&self, subject_to: &str, skip_fiducials: bool) -> Result<ScalingJob> {
        let bem_names = if self.prepare_bem_model && self.can_prepare_bem_model() {
            find_bem_names(&self.mri.subjects_dir, &self.mri.subject)?
        } else {
            Vec::new()
        };
        Ok(ScalingJob {
            subjects_dir: self.mri.subjects_dir.clone(),
            subject_from: self.mri.subject.clone(),
            subject_to: subject_to.to_string(),
            scale: self.scale(),
            skip_fiducials,
            scale_labels: self.scale_labels,
            copy_annot: self.copy_annot,
            bem_names,
        })
    }
}
