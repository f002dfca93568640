use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the FlowState mastering library
#[derive(Error, Debug)]
pub enum FlowStateError {
    #[error("Track analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file analysis failures. A batch keeps going when one file fails.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Could not probe {path}: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("No audio stream found in {path}")]
    NoAudioStream { path: PathBuf },

    #[error("Invalid duration reported for {path}")]
    InvalidDuration { path: PathBuf },

    #[error("None of the {count} input files could be analyzed")]
    NoValidTracks { count: usize },
}

/// External engine failures. Always fatal for the run.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to launch {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{operation} exited with {status}: {stderr}")]
    Failed {
        operation: String,
        status: String,
        stderr: String,
    },

    #[error("{operation} timed out after {seconds}s")]
    TimedOut { operation: String, seconds: u64 },

    #[error("Unreadable engine output for {operation}: {details}")]
    InvalidOutput { operation: String, details: String },

    #[error("Audio synthesis failed: {reason}")]
    SynthesisFailed { reason: String },

    #[error("Image preparation failed for {path}: {reason}")]
    ImageFailed { path: PathBuf, reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Failures while writing durable export artifacts
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export directory {path} is not writable: {reason}")]
    NotWritable { path: PathBuf, reason: String },

    #[error("Could not write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

/// Run-level failures that are not tied to a single component
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A pipeline run is already in progress")]
    Busy,

    #[error("Pipeline run was cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("Expected artifact is missing: {path}")]
    MissingArtifact { path: PathBuf },

    #[error("Pipeline worker stopped unexpectedly: {reason}")]
    WorkerLost { reason: String },
}

/// Convenience type alias for Results using FlowStateError
pub type Result<T> = std::result::Result<T, FlowStateError>;

impl FlowStateError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Render(RenderError::SpawnFailed { program, .. }) => {
                format!("Could not run '{}'. Please check that FFmpeg is installed and on your PATH.", program)
            }
            Self::Analysis(AnalysisError::NoValidTracks { count }) => {
                format!("None of the {} selected files could be read as audio.", count)
            }
            Self::Export(ExportError::NotWritable { path, .. }) => {
                format!("Cannot write to the exports folder '{}'.", path.display())
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
