use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Loudness assumed for tracks whose metering pass failed
pub const DEFAULT_LOUDNESS_LUFS: f64 = -20.0;

/// Below this integrated loudness a track is considered low energy
pub const LOW_ENERGY_CEILING_LUFS: f64 = -25.0;

/// At or above this integrated loudness a track is considered high energy
pub const HIGH_ENERGY_FLOOR_LUFS: f64 = -18.0;

/// Coarse energy profile derived from integrated loudness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyClass {
    Low,
    Mid,
    High,
    /// Loudness could not be measured
    Unknown,
}

impl EnergyClass {
    /// Classify an integrated loudness measurement
    pub fn classify(loudness_lufs: Option<f64>) -> Self {
        match loudness_lufs {
            Some(lufs) if lufs < LOW_ENERGY_CEILING_LUFS => Self::Low,
            Some(lufs) if lufs < HIGH_ENERGY_FLOOR_LUFS => Self::Mid,
            Some(_) => Self::High,
            None => Self::Unknown,
        }
    }

    /// Position in the sequence: low first, high last, unknown with mid
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Mid | Self::Unknown => 1,
            Self::High => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
            Self::Unknown => "unknown",
        }
    }
}

/// An analyzed input track. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Source file
    pub path: PathBuf,

    /// File name shown in listings
    pub display_name: String,

    pub duration_seconds: f64,

    /// Integrated loudness, `None` when metering failed
    pub loudness_lufs: Option<f64>,

    /// Peak level, `None` when metering failed
    pub peak_db: Option<f64>,

    pub channels: u16,

    pub sample_rate: u32,

    pub energy: EnergyClass,
}

impl TrackDescriptor {
    /// Loudness used when comparing tracks
    pub fn ordering_loudness(&self) -> f64 {
        self.loudness_lufs.unwrap_or(DEFAULT_LOUDNESS_LUFS)
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_seconds)
    }
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour up
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_thresholds() {
        assert_eq!(EnergyClass::classify(Some(-30.0)), EnergyClass::Low);
        assert_eq!(EnergyClass::classify(Some(-25.0)), EnergyClass::Mid);
        assert_eq!(EnergyClass::classify(Some(-18.1)), EnergyClass::Mid);
        assert_eq!(EnergyClass::classify(Some(-18.0)), EnergyClass::High);
        assert_eq!(EnergyClass::classify(Some(-9.0)), EnergyClass::High);
        assert_eq!(EnergyClass::classify(None), EnergyClass::Unknown);
    }

    #[test]
    fn test_unknown_ranks_with_mid() {
        assert_eq!(EnergyClass::Unknown.rank(), EnergyClass::Mid.rank());
        assert!(EnergyClass::Low.rank() < EnergyClass::Mid.rank());
        assert!(EnergyClass::Mid.rank() < EnergyClass::High.rank());
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(59.9), "0:59");
        assert_eq!(format_duration(892.0), "14:52");
        assert_eq!(format_duration(28_800.0), "8:00:00");
        assert_eq!(format_duration(f64::NAN), "0:00");
    }
}
