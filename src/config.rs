//! Persisted user preferences.
//!
//! [`ConfigStore`] is a flat string→string map kept as JSON at
//! `<home>/.mne/mne-python.json`. Environment variables of the same name take
//! precedence over stored values. [`CoregConfig`] is the typed view of the
//! `MNE_COREG_*` keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CoregError, Result};
use crate::model::CoregModel;

const CONFIG_DIR: &str = ".mne";
const CONFIG_FILE: &str = "mne-python.json";

pub const KEY_GUESS_MRI_SUBJECT: &str = "MNE_COREG_GUESS_MRI_SUBJECT";
pub const KEY_HEAD_HIGH_RES: &str = "MNE_COREG_HEAD_HIGH_RES";
pub const KEY_HEAD_OPACITY: &str = "MNE_COREG_HEAD_OPACITY";
pub const KEY_SCALE_LABELS: &str = "MNE_COREG_SCALE_LABELS";
pub const KEY_COPY_ANNOT: &str = "MNE_COREG_COPY_ANNOT";
pub const KEY_PREPARE_BEM: &str = "MNE_COREG_PREPARE_BEM";
pub const KEY_SUBJECTS_DIR: &str = "MNE_COREG_SUBJECTS_DIR";
pub const KEY_PROJECT_EEG: &str = "MNE_COREG_PROJECT_EEG";
pub const KEY_ORIENT_TO_SURFACE: &str = "MNE_COREG_ORIENT_TO_SURFACE";
pub const KEY_SCALE_BY_DISTANCE: &str = "MNE_COREG_SCALE_BY_DISTANCE";
pub const KEY_MARK_INSIDE: &str = "MNE_COREG_MARK_INSIDE";

/// Key-value configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl ConfigStore {
    /// `<home>/.mne/mne-python.json`, with `home` defaulting to `$HOME`.
    pub fn default_path(home: Option<&Path>) -> Option<PathBuf> {
        let home = match home {
            Some(h) => h.to_path_buf(),
            None => PathBuf::from(std::env::var_os("HOME")?),
        };
        Some(home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Open the store at `path`; a missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let values = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)
                .map_err(|e| CoregError::file_format(path, format!("invalid config: {e}")))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn open_default(home: Option<&Path>) -> Result<Self> {
        let path = Self::default_path(home)
            .ok_or_else(|| CoregError::Validation("no home directory to store config in".into()))?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Environment variable if set, else the stored value.
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.values.get(key).cloned())
    }

    /// Stored value only, ignoring the environment.
    pub fn get_stored(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(&self.values)
            .map_err(|e| CoregError::file_format(&self.path, e.to_string()))?;
        std::fs::write(&self.path, text)?;
        debug!("Wrote config to {}", self.path.display());
        Ok(())
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("true") => true,
            Some("false") => false,
            None => default,
            Some(other) => {
                warn!("Ignoring {}={:?}: expected true or false", key, other);
                default
            }
        }
    }
}

/// Coregistration preferences remembered across sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct CoregConfig {
    /// Switch MRI subject when a measurement file names one. Default true.
    pub guess_mri_subject: bool,
    /// Show the high-resolution head surface. Default true.
    pub head_high_res: bool,
    /// Opacity of the MRI head in [0, 1]. Default 1.0.
    head_opacity: f64,
    /// Scale label files with the MRI. Default true.
    pub scale_labels: bool,
    /// Copy annotation files with the MRI. Default true.
    pub copy_annot: bool,
    /// Compute BEM solutions for scaled subjects. Default true.
    pub prepare_bem: bool,
    pub subjects_dir: Option<PathBuf>,
    /// Project EEG electrodes onto the head surface. Default false.
    pub project_eeg: bool,
    /// Orient digitizer glyphs to the surface. Default false.
    pub orient_to_surface: bool,
    /// Scale digitizer glyphs by their distance. Default false.
    pub scale_by_distance: bool,
    /// Mark digitizer points inside the head. Default false.
    pub mark_inside: bool,
}

impl Default for CoregConfig {
    fn default() -> Self {
        Self {
            guess_mri_subject: true,
            head_high_res: true,
            head_opacity: 1.0,
            scale_labels: true,
            copy_annot: true,
            prepare_bem: true,
            subjects_dir: None,
            project_eeg: false,
            orient_to_surface: false,
            scale_by_distance: false,
            mark_inside: false,
        }
    }
}

impl CoregConfig {
    pub fn head_opacity(&self) -> f64 {
        self.head_opacity
    }

    pub fn set_head_opacity(&mut self, opacity: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(CoregError::Validation(format!(
                "head opacity must be between 0 and 1, got {opacity}"
            )));
        }
        self.head_opacity = opacity;
        Ok(())
    }

    /// Read from `store`, falling back to defaults for absent or invalid values.
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Self::default();
        let head_opacity = match store.get(KEY_HEAD_OPACITY) {
            None => d.head_opacity,
            Some(s) => match s.trim().parse::<f64>() {
                Ok(v) if (0.0..=1.0).contains(&v) => v,
                _ => {
                    warn!("Ignoring {}={:?}: expected a number in [0, 1]", KEY_HEAD_OPACITY, s);
                    d.head_opacity
                }
            },
        };
        Self {
            guess_mri_subject: store.get_bool(KEY_GUESS_MRI_SUBJECT, d.guess_mri_subject),
            head_high_res: store.get_bool(KEY_HEAD_HIGH_RES, d.head_high_res),
            head_opacity,
            scale_labels: store.get_bool(KEY_SCALE_LABELS, d.scale_labels),
            copy_annot: store.get_bool(KEY_COPY_ANNOT, d.copy_annot),
            prepare_bem: store.get_bool(KEY_PREPARE_BEM, d.prepare_bem),
            subjects_dir: store
                .get(KEY_SUBJECTS_DIR)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            project_eeg: store.get_bool(KEY_PROJECT_EEG, d.project_eeg),
            orient_to_surface: store.get_bool(KEY_ORIENT_TO_SURFACE, d.orient_to_surface),
            scale_by_distance: store.get_bool(KEY_SCALE_BY_DISTANCE, d.scale_by_distance),
            mark_inside: store.get_bool(KEY_MARK_INSIDE, d.mark_inside),
        }
    }

    /// Write every key into `store`. Booleans are stored as `"true"`/`"false"`.
    pub fn write_to(&self, store: &mut ConfigStore) {
        let flags = [
            (KEY_GUESS_MRI_SUBJECT, self.guess_mri_subject),
            (KEY_HEAD_HIGH_RES, self.head_high_res),
            (KEY_SCALE_LABELS, self.scale_labels),
            (KEY_COPY_ANNOT, self.copy_annot),
            (KEY_PREPARE_BEM, self.prepare_bem),
            (KEY_PROJECT_EEG, self.project_eeg),
            (KEY_ORIENT_TO_SURFACE, self.orient_to_surface),
            (KEY_SCALE_BY_DISTANCE, self.scale_by_distance),
            (KEY_MARK_INSIDE, self.mark_inside),
        ];
        for (key, value) in flags {
            store.set(key, value.to_string());
        }
        store.set(KEY_HEAD_OPACITY, self.head_opacity.to_string());
        if let Some(dir) = &self.subjects_dir {
            store.set(KEY_SUBJECTS_DIR, dir.to_string_lossy());
        }
    }

    /// Push the model-related preferences into `model`.
    pub fn apply_to(&self, model: &mut CoregModel) {
        model.guess_mri_subject = self.guess_mri_subject;
        model.scale_labels = self.scale_labels;
        model.copy_annot = self.copy_annot;
        model.prepare_bem_model = self.prepare_bem;
    }

    /// Pick up the model-related preferences from `model`.
    pub fn update_from(&mut self, model: &CoregModel) {
        self.guess_mri_subject = model.guess_mri_subject;
        self.scale_labels = model.scale_labels;
        self.copy_annot = model.copy_annot;
        self.prepare_bem = model.prepare_bem_model;
        let dir = &model.mri().subjects_dir;
        if !dir.as_os_str().is_empty() {
            self.subjects_dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open_default(Some(dir.path())).unwrap();
        assert_eq!(store.path(), dir.path().join(".mne").join("mne-python.json"));
        assert_eq!(store.get_stored(KEY_HEAD_OPACITY), None);
        assert_eq!(CoregConfig::from_store(&store).head_opacity(), 1.0);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CoregConfig {
            scale_labels: false,
            mark_inside: true,
            subjects_dir: Some(PathBuf::from("/data/subjects")),
            ..Default::default()
        };
        config.set_head_opacity(0.8).unwrap();

        let mut store = ConfigStore::open_default(Some(dir.path())).unwrap();
        config.write_to(&mut store);
        store.save().unwrap();

        let store = ConfigStore::open_default(Some(dir.path())).unwrap();
        assert_eq!(store.get_stored(KEY_SCALE_LABELS), Some("false"));
        assert_eq!(store.get_stored(KEY_HEAD_OPACITY), Some("0.8"));
        assert_eq!(CoregConfig::from_store(&store), config);
    }

    #[test]
    fn test_opacity_out_of_range_rejected() {
        let mut config = CoregConfig::default();
        assert!(matches!(config.set_head_opacity(1.5), Err(CoregError::Validation(_))));
        assert!(matches!(config.set_head_opacity(f64::NAN), Err(CoregError::Validation(_))));
        assert_eq!(config.head_opacity(), 1.0);

        let mut store = ConfigStore::default();
        store.set(KEY_HEAD_OPACITY, "-0.2");
        store.set(KEY_COPY_ANNOT, "maybe");
        let loaded = CoregConfig::from_store(&store);
        assert_eq!(loaded.head_opacity(), 1.0);
        assert!(loaded.copy_annot);
    }

    #[test]
    fn test_corrupt_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mne-python.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ConfigStore::open(&path), Err(CoregError::FileFormat { .. })));
    }
}
