use std::path::{Path, PathBuf};

use futures::future;
use tracing::{debug, info, warn};

use crate::audio::types::{EnergyClass, TrackDescriptor};
use crate::engine::MediaProbe;
use crate::error::AnalysisError;

/// A file that could not be analyzed, with its position in the batch
#[derive(Debug)]
pub struct AnalysisFailure {
    pub index: usize,
    pub path: PathBuf,
    pub error: AnalysisError,
}

/// Outcome of analyzing a batch of files. Valid tracks keep their input order.
#[derive(Debug, Default)]
pub struct BatchAnalysis {
    pub tracks: Vec<TrackDescriptor>,
    pub failures: Vec<AnalysisFailure>,
}

impl BatchAnalysis {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.tracks.is_empty()
    }
}

/// Builds [`TrackDescriptor`]s from probe results
pub struct TrackAnalyzer<'a, P> {
    probe: &'a P,
    concurrency: usize,
}

impl<'a, P: MediaProbe> TrackAnalyzer<'a, P> {
    pub fn new(probe: &'a P) -> Self {
        Self {
            probe,
            concurrency: num_cpus::get(),
        }
    }

    /// Limit how many files are analyzed at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Probe one file and meter its loudness.
    ///
    /// A failed metering pass does not fail the track; it only leaves the
    /// loudness unset and the energy class `Unknown`.
    pub async fn analyze(&self, path: &Path) -> Result<TrackDescriptor, AnalysisError> {
        let info = self
            .probe
            .probe(path)
            .await
            .map_err(|e| AnalysisError::ProbeFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let audio = info.audio.ok_or_else(|| AnalysisError::NoAudioStream {
            path: path.to_path_buf(),
        })?;

        if !info.duration_seconds.is_finite() || info.duration_seconds <= 0.0 {
            return Err(AnalysisError::InvalidDuration {
                path: path.to_path_buf(),
            });
        }

        let loudness = match self.probe.measure_loudness(path).await {
            Ok(report) if report.integrated_lufs.is_finite() => Some(report),
            Ok(report) => {
                warn!("Unusable loudness {} for {:?}", report.integrated_lufs, path);
                None
            }
            Err(e) => {
                warn!("Loudness measurement failed for {:?}: {}", path, e);
                None
            }
        };

        let loudness_lufs = loudness.map(|r| r.integrated_lufs);
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let track = TrackDescriptor {
            path: path.to_path_buf(),
            display_name,
            duration_seconds: info.duration_seconds,
            loudness_lufs,
            peak_db: loudness.and_then(|r| r.peak_db),
            channels: audio.channels,
            sample_rate: audio.sample_rate,
            energy: EnergyClass::classify(loudness_lufs),
        };

        debug!(
            "Analyzed {}: {:.1}s, {:?} LUFS, {} energy",
            track.display_name,
            track.duration_seconds,
            track.loudness_lufs,
            track.energy.label()
        );

        Ok(track)
    }

    /// Analyze many files concurrently. Failures are collected per file and
    /// never stop the rest of the batch.
    pub async fn analyze_batch(&self, paths: &[PathBuf]) -> BatchAnalysis {
        info!("Analyzing {} files ({} at a time)", paths.len(), self.concurrency);

        // join_all keeps results in input order within each chunk
        let mut results = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(self.concurrency) {
            results.extend(future::join_all(chunk.iter().map(|path| self.analyze(path))).await);
        }

        let mut batch = BatchAnalysis::default();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(track) => batch.tracks.push(track),
                Err(error) => {
                    warn!("Skipping {:?}: {}", paths[index], error);
                    batch.failures.push(AnalysisFailure {
                        index,
                        path: paths[index].clone(),
                        error,
                    });
                }
            }
        }

        batch
    }
}
