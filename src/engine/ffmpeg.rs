use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::request::{FadeCurve, RenderRequest, SequenceTimeline, VideoSource};
use crate::engine::{AudioStreamInfo, LoudnessReport, MediaProbe, RenderEngine, StreamInfo};
use crate::error::RenderError;

/// Every intermediate audio file is 24-bit PCM
const PCM_CODEC: &str = "pcm_s24le";

const STDERR_TAIL_LINES: usize = 12;

static INTEGRATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"I:\s*(-?(?:inf|[\d.]+))\s*LUFS").expect("valid regex"));

static PEAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Peak:\s*(-?(?:inf|[\d.]+))").expect("valid regex"));

/// FFmpeg/ffprobe backed implementation of [`MediaProbe`] and [`RenderEngine`]
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            timeout: config.render_timeout_seconds.map(Duration::from_secs),
        }
    }

    /// First line of `ffmpeg -version`
    pub async fn ffmpeg_version(&self) -> Result<String, RenderError> {
        self.version_of(&self.ffmpeg).await
    }

    /// First line of `ffprobe -version`
    pub async fn ffprobe_version(&self) -> Result<String, RenderError> {
        self.version_of(&self.ffprobe).await
    }

    async fn version_of(&self, program: &Path) -> Result<String, RenderError> {
        let output = self
            .execute(program, vec!["-version".to_string()], "version check")
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Translate a typed request into an FFmpeg argument list
    pub fn render_args(request: &RenderRequest) -> Vec<String> {
        let mut args = strings(&["-hide_banner", "-nostdin", "-y"]);

        match request {
            RenderRequest::Sequence { timeline, sample_rate, output } => {
                for segment in &timeline.segments {
                    args.push("-i".to_string());
                    args.push(path_arg(&segment.path));
                }
                args.push("-filter_complex".to_string());
                args.push(sequence_filter(timeline));
                args.extend(strings(&["-map", "[outa]", "-ar"]));
                args.push(sample_rate.to_string());
                args.extend(strings(&["-c:a", PCM_CODEC]));
                args.push(path_arg(output));
            }

            RenderRequest::Mix { music, layer, layer_gain_db, output } => {
                args.push("-i".to_string());
                args.push(path_arg(music));
                args.push("-i".to_string());
                args.push(path_arg(layer));
                args.push("-filter_complex".to_string());
                // normalize=0 keeps amix additive instead of averaging the inputs
                args.push(format!(
                    "[1:a]volume={}dB[layer];[0:a][layer]amix=inputs=2:duration=longest:dropout_transition=3:normalize=0[outa]",
                    layer_gain_db
                ));
                args.extend(strings(&["-map", "[outa]", "-c:a", PCM_CODEC]));
                args.push(path_arg(output));
            }

            RenderRequest::Loop { input, target_seconds, edge_fade_seconds, output, .. } => {
                // Loop without bound and let -t cut; the rendered mix can be a
                // few samples shorter than its nominal length
                args.extend(strings(&["-stream_loop", "-1"]));
                args.push("-i".to_string());
                args.push(path_arg(input));
                args.push("-t".to_string());
                args.push(target_seconds.to_string());
                args.push("-af".to_string());
                args.push(format!(
                    "afade=t=in:st=0:d={fade},afade=t=out:st={start}:d={fade}",
                    fade = edge_fade_seconds,
                    start = (target_seconds - edge_fade_seconds).max(0.0),
                ));
                args.extend(strings(&["-c:a", PCM_CODEC]));
                args.push(path_arg(output));
            }

            RenderRequest::VideoSegment { source, resolution, fps, duration_seconds, output } => {
                match source {
                    VideoSource::Solid { color } => {
                        args.extend(strings(&["-f", "lavfi", "-i"]));
                        args.push(format!("color=c={}:s={}:r={}", color, resolution, fps));
                    }
                    VideoSource::Caption { text_file, font_size } => {
                        args.extend(strings(&["-f", "lavfi", "-i"]));
                        args.push(format!("color=c=black:s={}:r={}", resolution, fps));
                        args.push("-vf".to_string());
                        args.push(format!(
                            "drawtext=textfile='{}':fontcolor=white:fontsize={}:x=(w-text_w)/2:y=(h-text_h)/2",
                            escape_filter_path(text_file),
                            font_size
                        ));
                    }
                    VideoSource::Still { image } => {
                        args.extend(strings(&["-loop", "1", "-i"]));
                        args.push(path_arg(image));
                        args.extend(strings(&["-tune", "stillimage"]));
                    }
                }
                args.push("-t".to_string());
                args.push(duration_seconds.to_string());
                args.push("-r".to_string());
                args.push(fps.to_string());
                args.extend(strings(&["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p", "-an"]));
                args.push(path_arg(output));
            }

            RenderRequest::ConcatVideo { list_file, output } => {
                args.extend(strings(&["-f", "concat", "-safe", "0", "-i"]));
                args.push(path_arg(list_file));
                args.extend(strings(&["-c", "copy"]));
                args.push(path_arg(output));
            }

            RenderRequest::Mux { video, audio, output } => {
                args.push("-i".to_string());
                args.push(path_arg(video));
                args.push("-i".to_string());
                args.push(path_arg(audio));
                args.extend(strings(&[
                    "-map", "0:v:0", "-map", "1:a:0",
                    "-c:v", "copy",
                    "-c:a", "aac", "-b:a", "192k",
                    "-shortest",
                ]));
                args.push(path_arg(output));
            }
        }

        args
    }

    /// Run an engine process, enforcing the configured timeout
    async fn execute(&self, program: &Path, args: Vec<String>, operation: &str) -> Result<Output, RenderError> {
        debug!("{} {}", program.display(), args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        let running = cmd.output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, running)
                .await
                .map_err(|_| RenderError::TimedOut {
                    operation: operation.to_string(),
                    seconds: limit.as_secs(),
                })?,
            None => running.await,
        };

        let output = result.map_err(|e| RenderError::SpawnFailed {
            program: program.display().to_string(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                operation: operation.to_string(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(output)
    }
}

impl MediaProbe for FfmpegEngine {
    async fn probe(&self, path: &Path) -> Result<StreamInfo, RenderError> {
        let mut args = strings(&[
            "-v", "error",
            "-show_entries", "format=duration:stream=codec_type,sample_rate,channels",
            "-of", "json",
        ]);
        args.push(path_arg(path));

        let output = self.execute(&self.ffprobe, args, "probe").await?;
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn measure_loudness(&self, path: &Path) -> Result<LoudnessReport, RenderError> {
        let mut args = strings(&["-hide_banner", "-nostdin", "-nostats", "-i"]);
        args.push(path_arg(path));
        args.extend(strings(&["-map", "0:a:0", "-af", "ebur128=peak=true", "-f", "null", "-"]));

        let output = self.execute(&self.ffmpeg, args, "loudness scan").await?;
        parse_loudness_report(&String::from_utf8_lossy(&output.stderr))
    }
}

impl RenderEngine for FfmpegEngine {
    async fn render(&self, request: &RenderRequest) -> Result<(), RenderError> {
        info!("   Rendering {} -> {:?}", request.operation(), request.output());
        let args = Self::render_args(request);
        self.execute(&self.ffmpeg, args, request.operation()).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output
pub fn parse_probe_output(json: &str) -> Result<StreamInfo, RenderError> {
    let invalid = |details: String| RenderError::InvalidOutput {
        operation: "probe".to_string(),
        details,
    };

    let parsed: ProbeOutput = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;

    let duration_seconds = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| invalid("missing format duration".to_string()))?
        .parse::<f64>()
        .map_err(|e| invalid(format!("bad duration: {}", e)))?;

    // Missing fields fall back to the engine's usual stereo 48 kHz layout
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| AudioStreamInfo {
            sample_rate: s
                .sample_rate
                .as_deref()
                .and_then(|rate| rate.parse().ok())
                .unwrap_or(48_000),
            channels: s.channels.unwrap_or(2),
        });

    Ok(StreamInfo { duration_seconds, audio })
}

/// Extract integrated loudness and peak from ebur128 diagnostic text.
///
/// The meter prints running `I:` values before its summary, so the last match
/// is the integrated figure.
pub fn parse_loudness_report(text: &str) -> Result<LoudnessReport, RenderError> {
    let last_value = |re: &Regex| {
        re.captures_iter(text)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    };

    let integrated_lufs = last_value(&INTEGRATED_RE).ok_or_else(|| RenderError::InvalidOutput {
        operation: "loudness scan".to_string(),
        details: "no integrated loudness in meter output".to_string(),
    })?;

    Ok(LoudnessReport {
        integrated_lufs,
        peak_db: last_value(&PEAK_RE),
    })
}

fn sequence_filter(timeline: &SequenceTimeline) -> String {
    let mut parts = Vec::new();

    for (i, segment) in timeline.segments.iter().enumerate() {
        let mut filters = Vec::new();
        if let Some(fade_in) = segment.fade_in_seconds {
            filters.push(format!("afade=t=in:st=0:d={}", fade_in));
        }
        if let Some(fade_out) = segment.fade_out {
            filters.push(format!(
                "afade=t=out:st={}:d={}",
                fade_out.start_seconds, fade_out.duration_seconds
            ));
        }
        if filters.is_empty() {
            filters.push("anull".to_string());
        }
        parts.push(format!("[{}:a]{}[a{}]", i, filters.join(","), i));
    }

    let mut last = "a0".to_string();
    if let Some(crossfade) = timeline.crossfade {
        let curve = match crossfade.curve {
            FadeCurve::Triangular => "tri",
        };
        for i in 1..timeline.segments.len() {
            let joined = format!("cf{}", i - 1);
            parts.push(format!(
                "[{}][a{}]acrossfade=d={}:c1={}:c2={}[{}]",
                last, i, crossfade.seconds, curve, curve, joined
            ));
            last = joined;
        }
    }

    parts.push(format!(
        "[{}]loudnorm=I={}:TP={}[outa]",
        last, timeline.loudness.integrated_lufs, timeline.loudness.true_peak_db
    ));

    parts.join(";")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Quote a path for use inside a filtergraph option value
fn escape_filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn stderr_tail(stderr: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
