use std::path::{Path, PathBuf};

use crate::config::OutputResolution;

/// Integrated loudness and true-peak ceiling for normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessTarget {
    pub integrated_lufs: f64,
    pub true_peak_db: f64,
}

/// Gain curve used on both sides of a crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCurve {
    Triangular,
}

/// Fade-out window inside a single segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeOut {
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    pub seconds: f64,
    pub curve: FadeCurve,
}

/// One input file on the sequenced timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSegment {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub fade_in_seconds: Option<f64>,
    pub fade_out: Option<FadeOut>,
}

/// Ordered segments joined left to right, normalized once at the end
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceTimeline {
    pub segments: Vec<TimelineSegment>,

    /// Join between consecutive segments; `None` for a single segment
    pub crossfade: Option<Crossfade>,

    pub loudness: LoudnessTarget,
}

impl SequenceTimeline {
    /// Duration of the joined signal: every overlap removes one crossfade
    pub fn output_duration(&self) -> f64 {
        let total: f64 = self.segments.iter().map(|s| s.duration_seconds).sum();
        let joins = self.segments.len().saturating_sub(1) as f64;
        let overlap = self.crossfade.map(|c| c.seconds).unwrap_or(0.0);
        total - joins * overlap
    }
}

/// Picture source for a silent video segment
#[derive(Debug, Clone, PartialEq)]
pub enum VideoSource {
    /// Solid color frame
    Solid { color: String },

    /// Text read from `text_file`, centered on black
    Caption { text_file: PathBuf, font_size: u32 },

    /// Still image already sized to the output resolution
    Still { image: PathBuf },
}

/// A single unit of work for the rendering engine
#[derive(Debug, Clone, PartialEq)]
pub enum RenderRequest {
    /// Fade, crossfade and loudness-normalize a set of tracks into one file
    Sequence {
        timeline: SequenceTimeline,
        sample_rate: u32,
        output: PathBuf,
    },

    /// Attenuate `layer` by `layer_gain_db` and add it under `music`
    Mix {
        music: PathBuf,
        layer: PathBuf,
        layer_gain_db: f64,
        output: PathBuf,
    },

    /// Repeat `input` and cut to exactly `target_seconds` with edge fades
    Loop {
        input: PathBuf,
        /// Passes of `input` needed to reach the target
        repetitions: u32,
        target_seconds: f64,
        edge_fade_seconds: f64,
        output: PathBuf,
    },

    /// Encode a silent video segment
    VideoSegment {
        source: VideoSource,
        resolution: OutputResolution,
        fps: u32,
        duration_seconds: f64,
        output: PathBuf,
    },

    /// Join encoded segments listed in a concat list file without re-encoding
    ConcatVideo { list_file: PathBuf, output: PathBuf },

    /// Combine a silent video with the final audio, stopping at the shorter stream
    Mux {
        video: PathBuf,
        audio: PathBuf,
        output: PathBuf,
    },
}

impl RenderRequest {
    /// Short name used in logs and error messages
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Sequence { .. } => "sequence",
            Self::Mix { .. } => "mix",
            Self::Loop { .. } => "loop",
            Self::VideoSegment { .. } => "video segment",
            Self::ConcatVideo { .. } => "video concat",
            Self::Mux { .. } => "mux",
        }
    }

    /// File the request writes
    pub fn output(&self) -> &Path {
        match self {
            Self::Sequence { output, .. }
            | Self::Mix { output, .. }
            | Self::Loop { output, .. }
            | Self::VideoSegment { output, .. }
            | Self::ConcatVideo { output, .. }
            | Self::Mux { output, .. } => output,
        }
    }
}
