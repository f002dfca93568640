use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{OutputResolution, ProjectConfig, VideoMode};
use crate::engine::{RenderRequest, VideoSource};

/// Font size of the intro caption
pub const CAPTION_FONT_SIZE: u32 = 48;

/// Leftovers shorter than this are rounding noise, not segments
const MIN_SEGMENT_SECONDS: f64 = 1e-6;

/// Picture shown during one planned segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    Black,
    Caption(String),
    Still(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSegment {
    pub kind: SegmentKind,
    pub duration_seconds: f64,
}

/// Ordered picture timeline covering the whole master
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoPlan {
    pub segments: Vec<PlannedSegment>,
}

impl VideoPlan {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_seconds).sum()
    }

    /// Append a segment, cut to what is left of `limit`. Adjacent black
    /// segments are merged.
    fn push(&mut self, kind: SegmentKind, duration_seconds: f64, limit: f64) {
        let remaining = limit - self.total_duration();
        let duration = duration_seconds.min(remaining);
        if duration < MIN_SEGMENT_SECONDS {
            return;
        }

        if kind == SegmentKind::Black {
            if let Some(last) = self.segments.last_mut() {
                if last.kind == SegmentKind::Black {
                    last.duration_seconds += duration;
                    return;
                }
            }
        }

        self.segments.push(PlannedSegment { kind, duration_seconds: duration });
    }
}

/// Render requests that produce the silent video for a plan
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJob {
    /// One encode per planned segment, in order
    pub segments: Vec<RenderRequest>,

    /// Joins the segments; `None` when there is only one
    pub concat: Option<RenderRequest>,

    /// Final silent video
    pub video: PathBuf,
}

/// Plans and describes the optional video track
#[derive(Debug, Clone, PartialEq)]
pub struct VideoComposer {
    mode: VideoMode,
    intro_text: Option<String>,
    intro_seconds: f64,
    black_after_intro_seconds: f64,
    image_display_seconds: f64,
    resolution: OutputResolution,
    fps: u32,
}

impl VideoComposer {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            mode: config.video_mode,
            intro_text: config.intro_text().map(str::to_string),
            intro_seconds: config.intro_duration_seconds,
            black_after_intro_seconds: config.black_after_intro_seconds,
            image_display_seconds: config.image_display_seconds,
            resolution: config.output_resolution,
            fps: config.fps,
        }
    }

    pub fn mode(&self) -> VideoMode {
        self.mode
    }

    pub fn resolution(&self) -> OutputResolution {
        self.resolution
    }

    /// Picture length for a master of `audio_seconds`: one frame longer, so
    /// stopping at the shorter stream always keeps the full audio
    pub fn video_duration(&self, audio_seconds: f64) -> f64 {
        audio_seconds + 1.0 / self.fps.max(1) as f64
    }

    /// How many stills the plan can show
    pub fn still_slots(&self, audio_seconds: f64) -> usize {
        match self.mode {
            VideoMode::Images => 1,
            VideoMode::Hybrid => {
                let lead = self.intro_seconds + self.black_after_intro_seconds;
                let room = self.video_duration(audio_seconds) - lead;
                if room <= 0.0 || self.image_display_seconds <= 0.0 {
                    0
                } else {
                    (room / self.image_display_seconds).ceil() as usize
                }
            }
            VideoMode::None | VideoMode::BlackScreen => 0,
        }
    }

    /// Lay out segments for a master of `audio_seconds`.
    ///
    /// `stills` are prepared images in display order. Image modes without any
    /// usable still fall back to the black-screen layout. Returns `None` when
    /// video is disabled.
    pub fn plan(&self, audio_seconds: f64, stills: &[PathBuf]) -> Option<VideoPlan> {
        let total = self.video_duration(audio_seconds);
        let mut plan = VideoPlan::default();

        match (self.mode, stills.first()) {
            (VideoMode::None, _) => return None,

            (VideoMode::Images, Some(still)) => {
                plan.push(SegmentKind::Still(still.clone()), total, total);
            }

            (VideoMode::Hybrid, Some(_)) => {
                let intro = match &self.intro_text {
                    Some(text) => SegmentKind::Caption(text.clone()),
                    None => SegmentKind::Black,
                };
                plan.push(intro, self.intro_seconds, total);
                plan.push(SegmentKind::Black, self.black_after_intro_seconds, total);
                for still in stills {
                    plan.push(SegmentKind::Still(still.clone()), self.image_display_seconds, total);
                }
                plan.push(SegmentKind::Black, total, total);
            }

            _ => {
                if let Some(text) = &self.intro_text {
                    plan.push(SegmentKind::Caption(text.clone()), self.intro_seconds, total);
                }
                plan.push(SegmentKind::Black, total, total);
            }
        }

        debug!("Video plan: {} segments, {:.3}s", plan.segments.len(), plan.total_duration());
        Some(plan)
    }

    /// Describe the encodes for `plan`, writing caption text files and the
    /// concat list into `dir`
    pub fn write_job(&self, plan: &VideoPlan, dir: &Path) -> std::io::Result<VideoJob> {
        let mut segments = Vec::with_capacity(plan.segments.len());

        for (index, segment) in plan.segments.iter().enumerate() {
            let source = match &segment.kind {
                SegmentKind::Black => VideoSource::Solid { color: "black".to_string() },
                SegmentKind::Caption(text) => {
                    let text_file = dir.join(format!("caption_{:03}.txt", index));
                    std::fs::write(&text_file, text)?;
                    VideoSource::Caption { text_file, font_size: CAPTION_FONT_SIZE }
                }
                SegmentKind::Still(image) => VideoSource::Still { image: image.clone() },
            };

            segments.push(RenderRequest::VideoSegment {
                source,
                resolution: self.resolution,
                fps: self.fps,
                duration_seconds: segment.duration_seconds,
                output: dir.join(format!("segment_{:03}.mp4", index)),
            });
        }

        if segments.len() == 1 {
            let video = segments[0].output().to_path_buf();
            return Ok(VideoJob { segments, concat: None, video });
        }

        let list_file = dir.join("segments.txt");
        std::fs::write(&list_file, concat_list(&segments))?;

        let video = dir.join("video.mp4");
        Ok(VideoJob {
            segments,
            concat: Some(RenderRequest::ConcatVideo {
                list_file,
                output: video.clone(),
            }),
            video,
        })
    }

    pub fn mux_request(video: &Path, audio: &Path, output: &Path) -> RenderRequest {
        RenderRequest::Mux {
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
            output: output.to_path_buf(),
        }
    }
}

/// Concat demuxer list naming each segment output
fn concat_list(segments: &[RenderRequest]) -> String {
    let mut list = String::new();
    for request in segments {
        let path = request.output().display().to_string().replace('\'', "'\\''");
        let _ = writeln!(list, "file '{}'", path);
    }
    list
}
