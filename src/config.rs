use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for a FlowState master build
///
/// Every section falls back to its defaults, so a saved project template only
/// needs to carry the values that differ.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Creative settings for the master
    pub project: ProjectConfig,

    /// External engine and processing settings
    pub engine: EngineConfig,

    /// Durable export location
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.project.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// How the optional video is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    /// Audio only, no video stage work
    None,
    /// Solid black, optionally preceded by an intro text card
    BlackScreen,
    /// A single representative image held for the whole duration
    Images,
    /// Intro, black interval, image segments, black tail
    Hybrid,
}

impl VideoMode {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::None => "audio only",
            Self::BlackScreen => "black screen with intro",
            Self::Images => "still image",
            Self::Hybrid => "intro, black, images, black",
        }
    }
}

impl FromStr for VideoMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" | "audio_only" => Ok(Self::None),
            "black_screen" | "black" => Ok(Self::BlackScreen),
            "images" | "image" => Ok(Self::Images),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(ConfigError::InvalidValue {
                key: "project.video_mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Output frame size, written as `WIDTHxHEIGHT` in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputResolution {
    pub width: u32,
    pub height: u32,
}

impl OutputResolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for OutputResolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl fmt::Display for OutputResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for OutputResolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            key: "project.output_resolution".to_string(),
            value: s.to_string(),
        };

        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for OutputResolution {
    type Error = ConfigError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputResolution> for String {
    fn from(value: OutputResolution) -> Self {
        value.to_string()
    }
}

/// Upload metadata exported next to the master as a text file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
}

/// Immutable snapshot of every creative tunable, taken when a run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name, sanitized into export file names
    pub export_name: String,

    /// Length of the finished master when looping (seconds)
    pub target_duration_seconds: f64,

    /// Repeat the mix until it reaches the target duration
    pub loop_enabled: bool,

    /// Requested crossfade between consecutive tracks (seconds)
    pub crossfade_seconds: f64,

    /// Fade-in on the first track (seconds)
    pub fade_in_seconds: f64,

    /// Fade-out on the last track (seconds)
    pub fade_out_seconds: f64,

    /// Integrated loudness target for the sequenced music (LUFS)
    pub target_loudness_lufs: f64,

    /// Left-ear tone (Hz)
    pub binaural_base_hz: f64,

    /// Difference between the right and left tones (Hz)
    pub binaural_beat_hz: f64,

    /// Level of the binaural layer under the music (dB, negative)
    pub binaural_gain_db: f64,

    pub video_mode: VideoMode,

    /// Text shown centered during the intro card
    pub intro_text: Option<String>,

    pub intro_duration_seconds: f64,

    /// Black interval between the intro and the first image (hybrid mode)
    pub black_after_intro_seconds: f64,

    /// How long each image is held (hybrid mode)
    pub image_display_seconds: f64,

    pub output_resolution: OutputResolution,

    pub fps: u32,

    pub youtube_metadata: Option<YoutubeMetadata>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            export_name: "Untitled Project".to_string(),
            target_duration_seconds: 3600.0,
            loop_enabled: true,
            crossfade_seconds: 8.0,
            fade_in_seconds: 3.0,
            fade_out_seconds: 5.0,
            target_loudness_lufs: -16.0,
            binaural_base_hz: 200.0,
            binaural_beat_hz: 2.5,
            binaural_gain_db: -20.0,
            video_mode: VideoMode::BlackScreen,
            intro_text: None,
            intro_duration_seconds: 10.0,
            black_after_intro_seconds: 60.0,
            image_display_seconds: 30.0,
            output_resolution: OutputResolution::default(),
            fps: 30,
            youtube_metadata: None,
        }
    }
}

impl ProjectConfig {
    /// Intro text, if any non-blank text was configured
    pub fn intro_text(&self) -> Option<&str> {
        self.intro_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        check_range("project.binaural_base_hz", self.binaural_base_hz, 100.0, 400.0)?;
        check_range("project.binaural_beat_hz", self.binaural_beat_hz, 0.5, 40.0)?;
        check_range("project.target_loudness_lufs", self.target_loudness_lufs, -23.0, -14.0)?;

        // The binaural layer always sits under the music
        if !self.binaural_gain_db.is_finite()
            || self.binaural_gain_db >= 0.0
            || self.binaural_gain_db < -60.0
        {
            return Err(invalid("project.binaural_gain_db", self.binaural_gain_db));
        }

        if !self.crossfade_seconds.is_finite()
            || self.crossfade_seconds <= 0.0
            || self.crossfade_seconds > 30.0
        {
            return Err(invalid("project.crossfade_seconds", self.crossfade_seconds));
        }

        check_non_negative("project.fade_in_seconds", self.fade_in_seconds)?;
        check_non_negative("project.fade_out_seconds", self.fade_out_seconds)?;
        check_non_negative("project.intro_duration_seconds", self.intro_duration_seconds)?;
        check_non_negative("project.black_after_intro_seconds", self.black_after_intro_seconds)?;

        if self.loop_enabled
            && (!self.target_duration_seconds.is_finite() || self.target_duration_seconds <= 0.0)
        {
            return Err(invalid("project.target_duration_seconds", self.target_duration_seconds));
        }

        if self.video_mode != VideoMode::None {
            if self.fps == 0 || self.fps > 120 {
                return Err(invalid("project.fps", self.fps));
            }

            // yuv420p needs even dimensions
            let res = self.output_resolution;
            if res.width == 0 || res.height == 0 || res.width % 2 != 0 || res.height % 2 != 0 {
                return Err(invalid("project.output_resolution", res));
            }

            if !self.image_display_seconds.is_finite() || self.image_display_seconds <= 0.0 {
                return Err(invalid("project.image_display_seconds", self.image_display_seconds));
            }
        }

        Ok(())
    }
}

/// External engine and processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// FFmpeg executable used for rendering and loudness metering
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable used for stream metadata
    pub ffprobe_path: PathBuf,

    /// Sample rate of every intermediate and exported audio file (Hz)
    pub sample_rate: u32,

    /// Upper bound for a single engine invocation; `None` waits forever
    pub render_timeout_seconds: Option<u64>,

    /// Number of input files analyzed at the same time
    pub analysis_concurrency: usize,

    /// Parent directory for per-run scratch directories
    pub temp_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            sample_rate: 48_000,
            render_timeout_seconds: Some(4 * 3600),
            analysis_concurrency: num_cpus::get(),
            temp_root: std::env::temp_dir().join("flowstate"),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(invalid("engine.sample_rate", self.sample_rate));
        }

        if self.analysis_concurrency == 0 {
            return Err(invalid("engine.analysis_concurrency", self.analysis_concurrency));
        }

        if self.render_timeout_seconds == Some(0) {
            return Err(invalid("engine.render_timeout_seconds", 0));
        }

        Ok(())
    }
}

/// Durable export location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub exports_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            exports_dir: PathBuf::from("exports"),
        }
    }
}

fn invalid(key: &str, value: impl fmt::Display) -> crate::error::FlowStateError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

fn check_range(key: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(invalid(key, value))
    }
}

fn check_non_negative(key: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(key, value))
    }
}
