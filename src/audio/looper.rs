use std::path::Path;

use crate::config::ProjectConfig;
use crate::engine::RenderRequest;

/// Fade applied at the very start and end of a looped master
pub const LOOP_EDGE_FADE_SECONDS: f64 = 0.5;

/// How a mixed master is repeated out to the target length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopPlan {
    pub repetitions: u32,
    pub target_seconds: f64,
    pub edge_fade_seconds: f64,
}

impl LoopPlan {
    pub fn request(&self, input: &Path, output: &Path) -> RenderRequest {
        RenderRequest::Loop {
            input: input.to_path_buf(),
            repetitions: self.repetitions,
            target_seconds: self.target_seconds,
            edge_fade_seconds: self.edge_fade_seconds,
            output: output.to_path_buf(),
        }
    }
}

/// Decides whether and how far a master is looped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopExpander {
    enabled: bool,
    target_seconds: f64,
}

impl LoopExpander {
    pub fn new(enabled: bool, target_seconds: f64) -> Self {
        Self { enabled, target_seconds }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(config.loop_enabled, config.target_duration_seconds)
    }

    /// `None` means the master is used as is
    pub fn plan(&self, source_seconds: f64) -> Option<LoopPlan> {
        if !self.enabled || source_seconds <= 0.0 || self.target_seconds <= source_seconds {
            return None;
        }

        let repetitions = (self.target_seconds / source_seconds).ceil() as u32;
        Some(LoopPlan {
            repetitions: repetitions.max(1),
            target_seconds: self.target_seconds,
            edge_fade_seconds: LOOP_EDGE_FADE_SECONDS.min(self.target_seconds / 2.0),
        })
    }

    /// Length of the exported master for a given mixed length
    pub fn output_duration(&self, source_seconds: f64) -> f64 {
        self.plan(source_seconds)
            .map(|plan| plan.target_seconds)
            .unwrap_or(source_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eight_hour_loop() {
        let expander = LoopExpander::new(true, 28_800.0);
        let plan = expander.plan(892.0).unwrap();

        assert_eq!(plan.repetitions, 33);
        assert_eq!(plan.target_seconds, 28_800.0);
        assert_eq!(plan.edge_fade_seconds, 0.5);
        assert_eq!(expander.output_duration(892.0), 28_800.0);
    }

    #[test]
    fn test_no_loop_when_disabled_or_long_enough() {
        assert!(LoopExpander::new(false, 28_800.0).plan(892.0).is_none());
        assert!(LoopExpander::new(true, 600.0).plan(892.0).is_none());
        assert!(LoopExpander::new(true, 892.0).plan(892.0).is_none());
        assert_eq!(LoopExpander::new(true, 600.0).output_duration(892.0), 892.0);
    }

    #[test]
    fn test_exact_multiple() {
        let plan = LoopExpander::new(true, 900.0).plan(300.0).unwrap();
        assert_eq!(plan.repetitions, 3);
    }

    #[test]
    fn test_edge_fade_clamped_for_tiny_targets() {
        let plan = LoopExpander::new(true, 0.6).plan(0.25).unwrap();
        assert_eq!(plan.edge_fade_seconds, 0.3);
    }
}
