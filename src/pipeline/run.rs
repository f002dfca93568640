use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::events::{Phase, Stage, StageEvent};

/// State owned by one pipeline run: its scratch directory, the artifacts
/// created there and the channel its events go out on.
///
/// Scratch files are removed when the run is cleaned up or dropped.
pub struct PipelineRun {
    id: Uuid,
    scratch: Option<TempDir>,
    work_dir: PathBuf,
    artifacts: Vec<PathBuf>,
    events: mpsc::Sender<StageEvent>,
    last_percent: AtomicU8,
    cancel: CancellationToken,
}

impl PipelineRun {
    /// Create a run with a fresh scratch directory under `temp_root`
    pub fn new(
        temp_root: &Path,
        events: mpsc::Sender<StageEvent>,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(temp_root)?;

        let id = Uuid::new_v4();
        let scratch = tempfile::Builder::new()
            .prefix(&format!("run-{}-", id.simple()))
            .tempdir_in(temp_root)?;
        let work_dir = scratch.path().to_path_buf();

        debug!("Run {} scratch directory: {:?}", id, work_dir);

        Ok(Self {
            id,
            scratch: Some(scratch),
            work_dir,
            artifacts: Vec::new(),
            events,
            last_percent: AtomicU8::new(0),
            cancel,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Reserve a scratch path for an intermediate file
    pub fn artifact(&mut self, name: &str) -> PathBuf {
        let path = self.work_dir.join(name);
        self.artifacts.push(path.clone());
        path
    }

    /// Fail unless a previous stage left `path` behind
    pub fn require(&self, path: &Path) -> Result<(), PipelineError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(PipelineError::MissingArtifact { path: path.to_path_buf() })
        }
    }

    /// Stop before `stage` when the caller asked to cancel
    pub fn check_cancelled(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled { stage: stage.to_string() })
        } else {
            Ok(())
        }
    }

    /// Send an event. A caller that stopped listening does not stop the run.
    pub async fn emit(&self, stage: Stage, phase: Phase, fraction: f64, message: impl Into<String>) {
        self.send(stage, phase, stage.percent_at(fraction), message.into()).await;
    }

    /// Report that `stage` failed, at the progress already reached
    pub async fn emit_failure(&self, stage: Stage, message: impl Into<String>) {
        let percent = self.last_percent();
        self.send(stage, Phase::Failed, percent, message.into()).await;
    }

    /// Highest percent sent so far
    pub fn last_percent(&self) -> u8 {
        self.last_percent.load(Ordering::Relaxed)
    }

    async fn send(&self, stage: Stage, phase: Phase, percent: u8, message: String) {
        self.last_percent.fetch_max(percent, Ordering::Relaxed);
        let event = StageEvent {
            run_id: self.id,
            stage,
            phase,
            percent,
            message,
        };

        if self.events.send(event).await.is_err() {
            debug!("Event receiver for run {} is gone", self.id);
        }
    }

    /// Remove the scratch directory. Never fails; problems are logged.
    pub fn cleanup(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            debug!("Removing {} scratch artifacts for run {}", self.artifacts.len(), self.id);
            if let Err(e) = scratch.close() {
                warn!("Failed to remove scratch directory {:?}: {}", self.work_dir, e);
            }
        }
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        self.cleanup();
    }
}
