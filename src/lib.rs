//! # FlowState Master
//!
//! Build long-form sleep and focus masters from a handful of tracks.
//!
//! A run analyzes the input tracks, orders them into a gentle energy curve,
//! crossfades and loudness-normalizes them, lays a binaural beat underneath,
//! loops the result out to the target length and optionally renders a
//! simple video to go with it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowstate_master::{
//!     config::Config,
//!     engine::FfmpegEngine,
//!     pipeline::{PipelineInput, PipelineOrchestrator},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let orchestrator = PipelineOrchestrator::new(FfmpegEngine::new(&config.engine), &config);
//!
//! let mut handle = orchestrator.start(
//!     config.project.clone(),
//!     PipelineInput {
//!         tracks: vec!["rain.flac".into(), "waves.wav".into()],
//!         images: Vec::new(),
//!     },
//! )?;
//!
//! while let Some(event) = handle.next_event().await {
//!     println!("{}", event);
//! }
//! let result = handle.wait().await?;
//! println!("Master written to {:?}", result.audio_path);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`audio`] - track analysis, sequencing, binaural synthesis, mixing, looping
//! - [`video`] - video planning and still-image preparation
//! - [`engine`] - the media engine boundary and its FFmpeg implementation
//! - [`pipeline`] - staged orchestration, events, run scope and exports
//! - [`config`] - configuration and project templates
//!
//! ## Using another engine
//!
//! The pipeline only talks to the engine through [`MediaProbe`] and
//! [`RenderEngine`], so tests and alternative backends can implement those
//! two traits instead of shelling out to FFmpeg.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::{Config, ProjectConfig},
    engine::{FfmpegEngine, MediaProbe, RenderEngine},
    error::{FlowStateError, Result},
    pipeline::{PipelineOrchestrator, PipelineResult},
};
