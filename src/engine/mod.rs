//! # Media Engine Boundary
//!
//! Everything the pipeline needs from an external audio/video engine goes
//! through two traits:
//!
//! - [`MediaProbe`] answers questions about existing files (stream layout,
//!   duration, integrated loudness and peak level)
//! - [`RenderEngine`] turns a typed [`RenderRequest`] into a rendered file
//!
//! The algorithms in [`crate::audio`] and [`crate::video`] only ever build
//! [`RenderRequest`] values. [`FfmpegEngine`] is the single place where those
//! requests become FFmpeg command lines, so no stage depends on FFmpeg's
//! argument grammar.

pub mod ffmpeg;
pub mod request;

use std::future::Future;
use std::path::Path;

use crate::error::RenderError;

pub use ffmpeg::FfmpegEngine;
pub use request::{
    Crossfade, FadeCurve, FadeOut, LoudnessTarget, RenderRequest, SequenceTimeline,
    TimelineSegment, VideoSource,
};

/// Audio stream layout of a probed file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Container-level facts about a probed file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    /// Container duration in seconds
    pub duration_seconds: f64,

    /// First audio stream, if the file has one
    pub audio: Option<AudioStreamInfo>,
}

/// Result of a whole-file loudness metering pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessReport {
    /// Integrated loudness (LUFS)
    pub integrated_lufs: f64,

    /// Peak level (dBFS), when the meter reported one
    pub peak_db: Option<f64>,
}

/// Read-only queries against media files
pub trait MediaProbe: Send + Sync {
    /// Duration and audio stream layout
    fn probe(&self, path: &Path) -> impl Future<Output = Result<StreamInfo, RenderError>> + Send;

    /// Integrated loudness and peak level over the whole file
    fn measure_loudness(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<LoudnessReport, RenderError>> + Send;
}

/// Produces media files from typed requests
pub trait RenderEngine: Send + Sync {
    /// Render `request` to `request.output()`, blocking the caller's task
    /// until the engine exits
    fn render(&self, request: &RenderRequest) -> impl Future<Output = Result<(), RenderError>> + Send;
}
