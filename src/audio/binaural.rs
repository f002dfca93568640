use std::f64::consts::TAU;
use std::path::Path;

use clap::ValueEnum;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::ProjectConfig;
use crate::error::RenderError;

/// Peak amplitude of each channel, as a fraction of full scale
pub const SYNTH_AMPLITUDE: f64 = 0.125;

/// Bit depth shared with every other intermediate WAV
pub const BITS_PER_SAMPLE: u16 = 24;

const FULL_SCALE_24: f64 = 8_388_607.0;

/// Frames computed per parallel batch before they are written out
const FRAMES_PER_BATCH: usize = 1 << 16;

/// Named carrier/beat pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BinauralPreset {
    DeltaDeepSleep,
    ThetaDeep,
    ThetaLight,
    AlphaRelax,
    AlphaLight,
    Custom,
}

impl BinauralPreset {
    pub fn all() -> &'static [BinauralPreset] {
        &[
            Self::DeltaDeepSleep,
            Self::ThetaDeep,
            Self::ThetaLight,
            Self::AlphaRelax,
            Self::AlphaLight,
            Self::Custom,
        ]
    }

    pub fn base_hz(&self) -> f64 {
        200.0
    }

    pub fn beat_hz(&self) -> f64 {
        match self {
            Self::DeltaDeepSleep => 2.5,
            Self::ThetaDeep => 6.0,
            Self::ThetaLight => 4.5,
            Self::AlphaRelax => 10.0,
            Self::AlphaLight => 8.0,
            Self::Custom => 5.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DeltaDeepSleep => "Delta (2.5 Hz), Deep Sleep",
            Self::ThetaDeep => "Theta (6 Hz), Deep Meditation",
            Self::ThetaLight => "Theta Light (4.5 Hz), Pre-Sleep",
            Self::AlphaRelax => "Alpha (10 Hz), Calm Focus",
            Self::AlphaLight => "Alpha Light (8 Hz), Gentle Relaxation",
            Self::Custom => "Custom Frequencies",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DeltaDeepSleep => "Deep sleep and unconscious processing. Suited to overnight sessions.",
            Self::ThetaDeep => "Deep meditation and REM-like states.",
            Self::ThetaLight => "Light meditation and the drift into sleep.",
            Self::AlphaRelax => "Calm focus and relaxed awareness.",
            Self::AlphaLight => "Gentle, mindful relaxation.",
            Self::Custom => "Your own frequencies. Base 100-400 Hz, beat 0.5-40 Hz.",
        }
    }

    /// Write this preset's frequencies into a project
    pub fn apply(&self, project: &mut ProjectConfig) {
        project.binaural_base_hz = self.base_hz();
        project.binaural_beat_hz = self.beat_hz();
    }
}

/// What to synthesize
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinauralSpec {
    pub base_hz: f64,
    pub beat_hz: f64,
    pub duration_seconds: f64,
    pub sample_rate: u32,
}

impl BinauralSpec {
    pub fn new(config: &ProjectConfig, duration_seconds: f64, sample_rate: u32) -> Self {
        Self {
            base_hz: config.binaural_base_hz,
            beat_hz: config.binaural_beat_hz,
            duration_seconds,
            sample_rate,
        }
    }

    pub fn left_hz(&self) -> f64 {
        self.base_hz
    }

    pub fn right_hz(&self) -> f64 {
        self.base_hz + self.beat_hz
    }

    pub fn frame_count(&self) -> usize {
        if self.duration_seconds.is_finite() && self.duration_seconds > 0.0 {
            (self.duration_seconds * self.sample_rate as f64).round() as usize
        } else {
            0
        }
    }
}

/// In-process sine generator for the binaural layer
pub struct BinauralSynthesizer;

impl BinauralSynthesizer {
    /// Left and right sample values of frame `n`.
    ///
    /// Each frame depends only on its index, never on previously generated
    /// frames, so batches can be computed in any order.
    pub fn frame(spec: &BinauralSpec, n: usize) -> (i32, i32) {
        let t = n as f64 / spec.sample_rate as f64;
        (
            quantize((TAU * spec.left_hz() * t).sin()),
            quantize((TAU * spec.right_hz() * t).sin()),
        )
    }

    /// Render `spec` to a stereo 24-bit WAV at `output`, returning the frame count
    pub fn write_wav(spec: &BinauralSpec, output: &Path) -> Result<usize, RenderError> {
        let frames = spec.frame_count();
        if frames == 0 || spec.sample_rate == 0 {
            return Err(RenderError::SynthesisFailed {
                reason: format!(
                    "nothing to synthesize for {:.3}s at {} Hz",
                    spec.duration_seconds, spec.sample_rate
                ),
            });
        }

        info!(
            "🎧 Synthesizing binaural layer: L {} Hz / R {} Hz, {:.1}s",
            spec.left_hz(),
            spec.right_hz(),
            spec.duration_seconds
        );

        let wav_spec = hound::WavSpec {
            channels: 2,
            sample_rate: spec.sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, wav_spec).map_err(synthesis_failed)?;

        let mut buffer = vec![0i32; FRAMES_PER_BATCH * 2];
        let mut start = 0;
        while start < frames {
            let count = FRAMES_PER_BATCH.min(frames - start);
            let batch = &mut buffer[..count * 2];

            batch.par_chunks_mut(2).enumerate().for_each(|(i, pair)| {
                let (left, right) = Self::frame(spec, start + i);
                pair[0] = left;
                pair[1] = right;
            });

            for &sample in batch.iter() {
                writer.write_sample(sample).map_err(synthesis_failed)?;
            }
            start += count;
        }

        writer.finalize().map_err(synthesis_failed)?;
        debug!("Wrote {} binaural frames to {:?}", frames, output);

        Ok(frames)
    }
}

fn quantize(value: f64) -> i32 {
    (value * SYNTH_AMPLITUDE * FULL_SCALE_24).round() as i32
}

fn synthesis_failed(e: hound::Error) -> RenderError {
    RenderError::SynthesisFailed { reason: e.to_string() }
}
