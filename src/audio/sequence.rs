use tracing::debug;

use crate::audio::types::TrackDescriptor;
use crate::config::ProjectConfig;
use crate::engine::{
    Crossfade, FadeCurve, FadeOut, LoudnessTarget, SequenceTimeline, TimelineSegment,
};

/// True-peak ceiling applied by the final normalization
pub const TRUE_PEAK_CEILING_DB: f64 = -1.5;

/// Orders tracks into a gentle energy progression
pub struct SequenceOptimizer;

impl SequenceOptimizer {
    /// Order tracks low energy first, high energy last.
    ///
    /// Within each energy group the next track is the one closest in loudness
    /// to the track placed before it; ties go to the earliest input position.
    pub fn optimize(tracks: Vec<TrackDescriptor>) -> Vec<TrackDescriptor> {
        if tracks.len() <= 1 {
            return tracks;
        }

        // Stable sort keeps input order within a group, so the position in
        // `pool` doubles as the tie breaker.
        let mut pool: Vec<(usize, TrackDescriptor)> = tracks.into_iter().enumerate().collect();
        pool.sort_by_key(|(_, track)| track.energy.rank());

        let mut ordered = Vec::with_capacity(pool.len());
        let (_, first) = pool.remove(0);
        let mut last_loudness = first.ordering_loudness();
        ordered.push(first);

        while !pool.is_empty() {
            let group = pool[0].1.energy.rank();

            let next = pool
                .iter()
                .enumerate()
                .take_while(|(_, (_, track))| track.energy.rank() == group)
                .min_by(|(_, (ia, a)), (_, (ib, b))| {
                    let da = (a.ordering_loudness() - last_loudness).abs();
                    let db = (b.ordering_loudness() - last_loudness).abs();
                    da.total_cmp(&db).then(ia.cmp(ib))
                })
                .map(|(position, _)| position)
                .unwrap_or(0);

            let (_, track) = pool.remove(next);
            last_loudness = track.ordering_loudness();
            ordered.push(track);
        }

        debug!(
            "Sequence order: {}",
            ordered
                .iter()
                .map(|t| t.display_name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        ordered
    }
}

/// Crossfade length that never exceeds half of the shortest track
pub fn safe_crossfade(configured_seconds: f64, durations: &[f64]) -> f64 {
    let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
    if shortest.is_finite() {
        configured_seconds.min(shortest / 2.0).max(0.0)
    } else {
        configured_seconds.max(0.0)
    }
}

/// Turns an ordered track list into a render timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceBuilder {
    pub crossfade_seconds: f64,
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,
    pub loudness: LoudnessTarget,
}

impl SequenceBuilder {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            crossfade_seconds: config.crossfade_seconds,
            fade_in_seconds: config.fade_in_seconds,
            fade_out_seconds: config.fade_out_seconds,
            loudness: LoudnessTarget {
                integrated_lufs: config.target_loudness_lufs,
                true_peak_db: TRUE_PEAK_CEILING_DB,
            },
        }
    }

    /// Build the timeline; `None` when there is nothing to sequence
    pub fn build(&self, tracks: &[TrackDescriptor]) -> Option<SequenceTimeline> {
        if tracks.is_empty() {
            return None;
        }

        let last = tracks.len() - 1;
        let segments = tracks
            .iter()
            .enumerate()
            .map(|(i, track)| TimelineSegment {
                path: track.path.clone(),
                duration_seconds: track.duration_seconds,
                fade_in_seconds: (i == 0 && self.fade_in_seconds > 0.0)
                    .then_some(self.fade_in_seconds),
                fade_out: (i == last && self.fade_out_seconds > 0.0).then(|| FadeOut {
                    start_seconds: (track.duration_seconds - self.fade_out_seconds).max(0.0),
                    duration_seconds: self.fade_out_seconds,
                }),
            })
            .collect();

        let crossfade = (tracks.len() > 1).then(|| {
            let durations: Vec<f64> = tracks.iter().map(|t| t.duration_seconds).collect();
            Crossfade {
                seconds: safe_crossfade(self.crossfade_seconds, &durations),
                curve: FadeCurve::Triangular,
            }
        });

        Some(SequenceTimeline {
            segments,
            crossfade,
            loudness: self.loudness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::EnergyClass;
    use std::path::PathBuf;

    fn track(name: &str, duration: f64, lufs: Option<f64>) -> TrackDescriptor {
        TrackDescriptor {
            path: PathBuf::from(name),
            display_name: name.to_string(),
            duration_seconds: duration,
            loudness_lufs: lufs,
            peak_db: None,
            channels: 2,
            sample_rate: 48_000,
            energy: EnergyClass::classify(lufs),
        }
    }

    fn names(tracks: &[TrackDescriptor]) -> Vec<&str> {
        tracks.iter().map(|t| t.display_name.as_str()).collect()
    }

    #[test]
    fn test_single_track_is_unchanged() {
        let input = vec![track("only", 120.0, Some(-10.0))];
        assert_eq!(SequenceOptimizer::optimize(input.clone()), input);
        assert!(SequenceOptimizer::optimize(Vec::new()).is_empty());
    }

    #[test]
    fn test_energy_order_is_non_decreasing() {
        let input = vec![
            track("loud", 200.0, Some(-12.0)),
            track("quiet", 200.0, Some(-30.0)),
            track("middle", 200.0, Some(-21.0)),
            track("unmeasured", 200.0, None),
            track("whisper", 200.0, Some(-28.0)),
        ];

        let ordered = SequenceOptimizer::optimize(input);
        let ranks: Vec<u8> = ordered.iter().map(|t| t.energy.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ordered.first().map(|t| t.display_name.as_str()), Some("quiet"));
        assert_eq!(ordered.last().map(|t| t.display_name.as_str()), Some("loud"));
    }

    #[test]
    fn test_greedy_picks_nearest_loudness_within_group() {
        // First mid track follows the low group's last track (-26)
        let input = vec![
            track("low", 200.0, Some(-26.0)),
            track("mid_far", 200.0, Some(-19.0)),
            track("mid_near", 200.0, Some(-24.0)),
            track("mid_between", 200.0, Some(-22.0)),
        ];

        let ordered = SequenceOptimizer::optimize(input);
        assert_eq!(names(&ordered), vec!["low", "mid_near", "mid_between", "mid_far"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let input = vec![
            track("a", 200.0, Some(-22.0)),
            track("b", 200.0, Some(-20.0)),
            track("c", 200.0, Some(-24.0)),
        ];

        // b and c are both 2 LU away from a
        let ordered = SequenceOptimizer::optimize(input.clone());
        assert_eq!(names(&ordered), vec!["a", "b", "c"]);
        assert_eq!(SequenceOptimizer::optimize(input), ordered);
    }

    #[test]
    fn test_safe_crossfade_is_bounded_by_shortest_track() {
        assert_eq!(safe_crossfade(8.0, &[10.0, 100.0]), 5.0);
        assert_eq!(safe_crossfade(8.0, &[300.0, 400.0, 200.0]), 8.0);
        assert_eq!(safe_crossfade(12.0, &[600.0, 600.0]), 12.0);
    }

    #[test]
    fn test_three_track_timeline() {
        let config = ProjectConfig::default();
        let builder = SequenceBuilder::from_config(&config);
        let tracks = vec![
            track("one", 300.0, Some(-22.0)),
            track("two", 400.0, Some(-21.0)),
            track("three", 200.0, Some(-20.0)),
        ];

        let timeline = builder.build(&tracks).unwrap();
        assert_eq!(timeline.output_duration(), 884.0);
        assert_eq!(timeline.segments[0].fade_in_seconds, Some(3.0));
        assert!(timeline.segments[1].fade_in_seconds.is_none());
        assert!(timeline.segments[1].fade_out.is_none());
        assert_eq!(
            timeline.segments[2].fade_out,
            Some(FadeOut { start_seconds: 195.0, duration_seconds: 5.0 })
        );
        assert_eq!(timeline.loudness.true_peak_db, -1.5);
        assert_eq!(timeline.loudness.integrated_lufs, -16.0);
    }

    #[test]
    fn test_single_track_timeline_has_no_crossfade() {
        let builder = SequenceBuilder::from_config(&ProjectConfig::default());
        let timeline = builder.build(&[track("solo", 3.0, None)]).unwrap();

        assert!(timeline.crossfade.is_none());
        assert_eq!(timeline.segments[0].fade_in_seconds, Some(3.0));
        // Fade-out longer than the track starts at zero
        assert_eq!(timeline.segments[0].fade_out.map(|f| f.start_seconds), Some(0.0));
        assert_eq!(timeline.output_duration(), 3.0);
    }

    #[test]
    fn test_empty_track_list_builds_nothing() {
        let builder = SequenceBuilder::from_config(&ProjectConfig::default());
        assert!(builder.build(&[]).is_none());
    }
}
