//! A coregistration session: the model, its scaling queue and preferences,
//! with the save and close flows that tie them together.

use std::path::Path;

use tracing::{info, warn};

use crate::config::{ConfigStore, CoregConfig};
use crate::error::{CoregError, Result};
use crate::model::{CoregModel, ScaleMode};
use crate::scaling::{validate_subject_to, MriScaler, ScalingQueue};

/// Result of [`CoregSession::request_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Closed,
    /// Scaling jobs are still pending or running.
    Refused { unfinished: usize },
}

#[derive(Debug)]
pub struct CoregSession {
    pub model: CoregModel,
    pub config: CoregConfig,
    queue: ScalingQueue,
}

impl CoregSession {
    /// Apply `config` to `model` and start a scaling worker around `scaler`.
    pub fn start<S: MriScaler>(mut model: CoregModel, config: CoregConfig, scaler: S) -> Result<Self> {
        config.apply_to(&mut model);
        Ok(Self {
            model,
            config,
            queue: ScalingQueue::start(scaler)?,
        })
    }

    pub fn queue(&self) -> &ScalingQueue {
        &self.queue
    }

    /// Save the transform and, when scaling is on, queue the scaled subject.
    ///
    /// Without scaling `subject_to` is ignored. The subject name is validated,
    /// the queue checked and the job captured before the transform file is
    /// written, so a rejected save leaves no file behind. Returns whether a
    /// job was queued.
    pub fn commit_save<P: AsRef<Path>>(
        &mut self,
        trans_path: P,
        subject_to: &str,
        overwrite: bool,
        skip_fiducials: bool,
    ) -> Result<bool> {
        let job = if self.model.scale_mode() != ScaleMode::None {
            let mri = self.model.mri();
            validate_subject_to(&mri.subjects_dir, &mri.subject, subject_to, overwrite)?;
            if !self.queue.is_accepting() {
                return Err(CoregError::ScalingJob {
                    subject: subject_to.to_string(),
                    message: "scaling queue has been shut down".into(),
                });
            }
            Some(self.model.get_scaling_job(subject_to, skip_fiducials)?)
        } else {
            None
        };

        self.model.save_trans(trans_path)?;

        match job {
            Some(job) => {
                self.queue.submit(job)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close unless scaling jobs are outstanding.
    ///
    /// On close, preferences are written to the config store under `home`
    /// (failures are logged and do not block closing) and the worker is
    /// joined.
    pub fn request_close(&mut self, home: Option<&Path>) -> CloseDecision {
        let unfinished = self.queue.unfinished();
        if unfinished > 0 {
            info!(
                "Can not close while saving is still in progress ({} job(s) left)",
                unfinished
            );
            return CloseDecision::Refused { unfinished };
        }

        self.config.update_from(&self.model);
        if let Err(e) = self.save_config(home) {
            warn!("Error saving coregistration configuration: {}", e);
        }
        self.queue.shutdown();
        CloseDecision::Closed
    }

    fn save_config(&self, home: Option<&Path>) -> Result<()> {
        let mut store = ConfigStore::open_default(home)?;
        self.config.write_to(&mut store);
        store.save()
    }
}
