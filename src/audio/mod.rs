//! # Audio Mastering Module
//!
//! The audio half of the pipeline. Each component turns typed inputs into
//! either plain data or a [`RenderRequest`](crate::engine::RenderRequest),
//! never into engine command lines.
//!
//! ## Components
//!
//! - **TrackAnalyzer**: probes files and meters integrated loudness
//! - **SequenceOptimizer**: orders tracks by energy, then by loudness proximity
//! - **SequenceBuilder**: fades, safe crossfades and final normalization
//! - **BinauralSynthesizer**: in-process stereo sine pair written as WAV
//! - **Mixer**: lays the binaural layer under the music
//! - **LoopExpander**: repeats the master out to a target length
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flowstate_master::audio::{SequenceBuilder, SequenceOptimizer, TrackAnalyzer};
//! use flowstate_master::config::Config;
//! use flowstate_master::engine::FfmpegEngine;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let engine = FfmpegEngine::new(&config.engine);
//!
//! let batch = TrackAnalyzer::new(&engine)
//!     .analyze_batch(&["rain.flac".into(), "waves.wav".into()])
//!     .await;
//! let ordered = SequenceOptimizer::optimize(batch.tracks);
//!
//! let timeline = SequenceBuilder::from_config(&config.project).build(&ordered);
//! println!("{:?}", timeline.map(|t| t.output_duration()));
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod binaural;
pub mod looper;
pub mod mixer;
pub mod sequence;
pub mod types;

pub use analyzer::{AnalysisFailure, BatchAnalysis, TrackAnalyzer};
pub use binaural::{BinauralPreset, BinauralSpec, BinauralSynthesizer};
pub use looper::{LoopExpander, LoopPlan};
pub use mixer::Mixer;
pub use sequence::{safe_crossfade, SequenceBuilder, SequenceOptimizer};
pub use types::{format_duration, EnergyClass, TrackDescriptor};
