//! Single-worker FIFO queue for MRI scaling jobs.
//!
//! One background thread owns the receiving end of a channel and the
//! [`MriScaler`]. Jobs run strictly one at a time in submission order. Job
//! outcomes are published through a shared status that callers poll; nothing
//! a job does can stop the worker loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::error::{CoregError, Result};

use super::job::{bem_fname, bem_solution_fname, ScalingJob};
use super::MriScaler;

/// What happened to one BEM solution of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct BemOutcome {
    pub bem_name: String,
    /// Path of the written solution, or the error message.
    pub result: std::result::Result<PathBuf, String>,
}

/// Final report for a processed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub subject_to: String,
    /// `Err` holds the scaling error message; BEM steps were skipped.
    pub scaling: std::result::Result<(), String>,
    pub bem: Vec<BemOutcome>,
}

impl JobOutcome {
    /// Scaling and every BEM solution succeeded.
    pub fn succeeded(&self) -> bool {
        self.scaling.is_ok() && self.bem.iter().all(|b| b.result.is_ok())
    }
}

#[derive(Debug, Default)]
struct QueueStatus {
    /// Submitted but not yet picked up by the worker.
    queued: usize,
    /// Submitted and not yet finished, including the running job.
    unfinished: usize,
    current: String,
    feedback: String,
    outcomes: Vec<JobOutcome>,
}

#[derive(Debug, Default)]
struct Shared {
    status: Mutex<QueueStatus>,
    idle: Condvar,
}

impl Shared {
    fn update<F: FnOnce(&mut QueueStatus)>(&self, f: F) {
        f(&mut self.status.lock());
    }
}

/// Handle to the scaling worker.
///
/// Dropping the handle drains the remaining jobs and joins the worker.
pub struct ScalingQueue {
    tx: Option<mpsc::Sender<ScalingJob>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl ScalingQueue {
    /// Spawn the worker thread, which owns `scaler` until shutdown.
    pub fn start<S: MriScaler>(scaler: S) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<ScalingJob>();
        let shared = Arc::new(Shared::default());

        let worker = std::thread::Builder::new()
            .name("coreg-scaling".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker_loop(scaler, rx, &shared)
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            shared,
        })
    }

    /// Enqueue a job without waiting for it to run.
    pub fn submit(&self, job: ScalingJob) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(stopped(&job));
        };
        let subject = job.subject_to.clone();

        self.shared.update(|s| {
            s.queued += 1;
            s.unfinished += 1;
        });
        if tx.send(job).is_err() {
            self.shared.update(|s| {
                s.queued -= 1;
                s.unfinished -= 1;
            });
            self.shared.idle.notify_all();
            return Err(CoregError::ScalingJob {
                subject,
                message: "scaling worker has stopped".into(),
            });
        }
        info!("Queued scaling of {}", subject);
        Ok(())
    }

    /// Whether [`submit`](Self::submit) can still take jobs.
    pub fn is_accepting(&self) -> bool {
        self.tx.is_some()
    }

    /// Jobs waiting to start.
    pub fn len(&self) -> usize {
        self.shared.status.lock().queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `"Queue length: N"`, or an empty string when nothing is waiting.
    pub fn len_str(&self) -> String {
        match self.len() {
            0 => String::new(),
            n => format!("Queue length: {n}"),
        }
    }

    /// Jobs submitted and not yet finished, including the running one.
    pub fn unfinished(&self) -> usize {
        self.shared.status.lock().unfinished
    }

    pub fn is_idle(&self) -> bool {
        self.unfinished() == 0
    }

    /// Description of the step in progress, empty when idle.
    pub fn current(&self) -> String {
        self.shared.status.lock().current.clone()
    }

    /// Result message of the most recently finished step.
    pub fn feedback(&self) -> String {
        self.shared.status.lock().feedback.clone()
    }

    /// Outcomes of all finished jobs, in completion order.
    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.shared.status.lock().outcomes.clone()
    }

    /// Block until every submitted job has finished.
    pub fn wait_idle(&self) {
        let mut status = self.shared.status.lock();
        while status.unfinished > 0 {
            self.shared.idle.wait(&mut status);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with a deadline. Returns whether
    /// the queue became idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let mut status = self.shared.status.lock();
        while status.unfinished > 0 {
            if self.shared.idle.wait_for(&mut status, timeout).timed_out() {
                return status.unfinished == 0;
            }
        }
        true
    }

    /// Stop accepting jobs, let the worker finish the queued ones, and join it.
    pub fn shutdown(&mut self) {
        // Closing the channel ends the worker loop once it is drained.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Scaling worker terminated abnormally");
            }
        }
    }
}

impl Drop for ScalingQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ScalingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.shared.status.lock();
        f.debug_struct("ScalingQueue")
            .field("queued", &status.queued)
            .field("unfinished", &status.unfinished)
            .field("current", &status.current)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

fn stopped(job: &ScalingJob) -> CoregError {
    CoregError::ScalingJob {
        subject: job.subject_to.clone(),
        message: "scaling queue has been shut down".into(),
    }
}

// ── Worker ─────────────────────────────────────────────────────────────────

fn worker_loop<S: MriScaler>(mut scaler: S, rx: mpsc::Receiver<ScalingJob>, shared: &Shared) {
    for job in rx {
        let outcome = process_job(&mut scaler, &job, shared);
        shared.update(|s| {
            s.current.clear();
            s.unfinished -= 1;
            s.outcomes.push(outcome);
        });
        shared.idle.notify_all();
    }
    info!("Scaling worker stopped");
}

fn process_job<S: MriScaler>(scaler: &mut S, job: &ScalingJob, shared: &Shared) -> JobOutcome {
    let subject = &job.subject_to;
    shared.update(|s| {
        s.queued -= 1;
        s.current = format!("Scaling {subject}...");
    });

    let scaling = run_step(|| scaler.scale_mri(job));
    match &scaling {
        Ok(()) => {
            info!("Scaled {} → {}", job.subject_from, subject);
            shared.update(|s| s.feedback = format!("Done scaling {subject}."));
        }
        Err(msg) => {
            error!("Error scaling {}: {}", subject, msg);
            shared.update(|s| s.feedback = format!("Error scaling {subject} (see Terminal)"));
        }
    }

    let mut bem = Vec::new();
    if scaling.is_ok() {
        for bem_name in &job.bem_names {
            shared.update(|s| s.current = format!("Computing {bem_name} solution..."));

            let bem_file = bem_fname(&job.subjects_dir, subject, bem_name);
            let sol_file = bem_solution_fname(&bem_file);
            let result = run_step(|| {
                let solution = scaler.compute_bem_solution(&bem_file)?;
                scaler.write_bem_solution(&sol_file, &solution)
            })
            .map(|()| sol_file.clone());

            match &result {
                Ok(path) => {
                    info!("Wrote {} solution to {}", bem_name, path.display());
                    shared.update(|s| s.feedback = format!("Done computing {bem_name} solution."));
                }
                Err(msg) => {
                    error!("Error computing {} solution: {}", bem_name, msg);
                    shared.update(|s| {
                        s.feedback = format!("Error computing {bem_name} solution (see Terminal)")
                    });
                }
            }
            bem.push(BemOutcome {
                bem_name: bem_name.clone(),
                result,
            });
        }
    } else if !job.bem_names.is_empty() {
        warn!(
            "Skipping {} BEM solution(s) for {}",
            job.bem_names.len(),
            subject
        );
    }

    JobOutcome {
        subject_to: subject.clone(),
        scaling,
        bem,
    }
}

/// Run one job step, turning both errors and panics into a message.
fn run_step<T, F>(f: F) -> std::result::Result<T, String>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("panicked: {msg}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector3;
    use std::path::Path;

    #[derive(Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        gate: Option<Arc<(Mutex<bool>, Condvar)>>,
    }

    impl MriScaler for Recorder {
        type Solution = String;

        fn scale_mri(&mut self, job: &ScalingJob) -> anyhow::Result<()> {
            if let Some(gate) = &self.gate {
                let (open, cv) = &**gate;
                let mut open = open.lock();
                while !*open {
                    cv.wait(&mut open);
                }
            }
            self.log.lock().push(format!("scale {}", job.subject_to));
            if job.subject_to == "panics" {
                panic!("boom");
            }
            Ok(())
        }

        fn compute_bem_solution(&mut self, bem_path: &Path) -> anyhow::Result<String> {
            Ok(bem_path.display().to_string())
        }

        fn write_bem_solution(&mut self, path: &Path, _solution: &String) -> anyhow::Result<()> {
            self.log.lock().push(format!("write {}", path.display()));
            Ok(())
        }
    }

    fn job(subject_to: &str, bem_names: &[&str]) -> ScalingJob {
        ScalingJob {
            subjects_dir: PathBuf::from("/subjects"),
            subject_from: "fsaverage".into(),
            subject_to: subject_to.into(),
            scale: Vector3::new(1.1, 1.1, 1.1),
            skip_fiducials: false,
            scale_labels: true,
            copy_annot: true,
            bem_names: bem_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_len_str_counts_waiting_jobs() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let scaler = Recorder {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let queue = ScalingQueue::start(scaler).unwrap();
        assert_eq!(queue.len_str(), "");

        for name in ["a", "b", "c"] {
            queue.submit(job(name, &[])).unwrap();
        }
        assert_eq!(queue.unfinished(), 3);
        assert!(queue.len() >= 2, "at most one job can have started");

        *gate.0.lock() = true;
        gate.1.notify_all();
        assert!(queue.wait_idle_timeout(Duration::from_secs(10)));
        assert_eq!(queue.len_str(), "");
        assert_eq!(queue.current(), "");
    }

    #[test]
    fn test_panicking_job_does_not_stop_worker() {
        let scaler = Recorder::default();
        let log = Arc::clone(&scaler.log);
        let mut queue = ScalingQueue::start(scaler).unwrap();

        queue.submit(job("panics", &["inner_skull-bem"])).unwrap();
        queue.submit(job("fine", &["inner_skull-bem"])).unwrap();
        queue.shutdown();

        let outcomes = queue.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].scaling.as_ref().unwrap_err().contains("boom"));
        assert!(outcomes[0].bem.is_empty());
        assert!(outcomes[1].succeeded());
        assert_eq!(
            *log.lock(),
            vec![
                "scale panics".to_string(),
                "scale fine".to_string(),
                "write /subjects/fine/bem/fine-inner_skull-bem-sol.fif".to_string(),
            ]
        );
        assert_eq!(queue.feedback(), "Done computing inner_skull-bem solution.");
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let mut queue = ScalingQueue::start(Recorder::default()).unwrap();
        queue.shutdown();
        assert!(matches!(
            queue.submit(job("late", &[])),
            Err(CoregError::ScalingJob { .. })
        ));
        assert!(queue.is_idle());
    }
}
