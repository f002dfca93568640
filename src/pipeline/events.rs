use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Sequencing,
    Binaural,
    Mixing,
    Exporting,
    Video,
    Finalizing,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Sequencing,
        Stage::Binaural,
        Stage::Mixing,
        Stage::Exporting,
        Stage::Video,
        Stage::Finalizing,
    ];

    pub fn index(&self) -> usize {
        match self {
            Self::Sequencing => 0,
            Self::Binaural => 1,
            Self::Mixing => 2,
            Self::Exporting => 3,
            Self::Video => 4,
            Self::Finalizing => 5,
        }
    }

    /// Overall run progress once `fraction` of this stage is done
    pub fn percent_at(&self, fraction: f64) -> u8 {
        let fraction = fraction.clamp(0.0, 1.0);
        let overall = (self.index() as f64 + fraction) / Self::ALL.len() as f64;
        (overall * 100.0).round() as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sequencing => "Sequencing",
            Self::Binaural => "Binaural",
            Self::Mixing => "Mixing",
            Self::Exporting => "Exporting",
            Self::Video => "Video",
            Self::Finalizing => "Finalizing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Started,
    Progress,
    Completed,
    Failed,
}

/// Progress notification sent from a run to its caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub run_id: Uuid,
    pub stage: Stage,
    pub phase: Phase,
    /// Overall progress, 0..=100
    pub percent: u8,
    pub message: String,
}

impl StageEvent {
    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Failed
            || (self.stage == Stage::Finalizing && self.phase == Phase::Completed)
    }
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>3}%] {} {:?}: {}", self.percent, self.stage, self.phase, self.message)
    }
}

/// Where an orchestrator is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running(Stage),
    Complete,
    Failed,
}
