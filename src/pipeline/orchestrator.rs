use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    audio::{
        format_duration, BinauralSpec, BinauralSynthesizer, LoopExpander, Mixer,
        SequenceBuilder, SequenceOptimizer, TrackAnalyzer, TrackDescriptor,
    },
    config::{Config, EngineConfig, ProjectConfig, VideoMode},
    engine::{MediaProbe, RenderEngine, RenderRequest},
    error::{AnalysisError, PipelineError, Result},
    pipeline::{
        events::{Phase, PipelineState, Stage, StageEvent},
        export::{self, ExportPaths},
        run::PipelineRun,
    },
    video::{prepare_stills, VideoComposer},
};

/// Capacity of the per-run event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Files a run works from
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    /// Audio tracks, in the order they were selected
    pub tracks: Vec<PathBuf>,

    /// Candidate stills for the image video modes
    pub images: Vec<PathBuf>,
}

/// Everything a successful run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub audio_path: PathBuf,
    pub video_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub final_duration_seconds: f64,
    /// Tracks in the order they were sequenced
    pub source_tracks: Vec<TrackDescriptor>,
    pub config: ProjectConfig,
}

/// Caller's side of a running pipeline
pub struct PipelineHandle {
    run_id: Uuid,
    events: mpsc::Receiver<StageEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<PipelineResult>>,
}

impl PipelineHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the run to stop before its next stage. A stage already handed to
    /// the engine runs to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the run has finished
    pub async fn next_event(&mut self) -> Option<StageEvent> {
        self.events.recv().await
    }

    /// Wait for the run to end. Events not yet received are discarded.
    pub async fn wait(self) -> Result<PipelineResult> {
        let Self { events, task, .. } = self;
        drop(events);

        task.await.map_err(|e| PipelineError::WorkerLost { reason: e.to_string() })?
    }
}

/// Clears the busy flag when a run ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the mastering pipeline, one run at a time.
///
/// Stages execute in a fixed order on a dedicated task:
/// 1. Sequencing - analyze, order, crossfade and normalize the tracks
/// 2. Binaural - synthesize the stereo beat layer
/// 3. Mixing - lay the beat layer under the music
/// 4. Exporting - loop the mix out to the target length
/// 5. Video - build and mux the picture track, or skip it
/// 6. Finalizing - copy results to the exports directory and clean up
pub struct PipelineOrchestrator<E> {
    engine: Arc<E>,
    engine_config: EngineConfig,
    exports_dir: PathBuf,
    busy: Arc<AtomicBool>,
    state: Arc<watch::Sender<PipelineState>>,
}

impl<E> PipelineOrchestrator<E>
where
    E: MediaProbe + RenderEngine + 'static,
{
    pub fn new(engine: E, config: &Config) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            engine: Arc::new(engine),
            engine_config: config.engine.clone(),
            exports_dir: config.export.exports_dir.clone(),
            busy: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Validate `project` and start a run on a new task.
    ///
    /// Configuration problems are returned here, before any stage runs.
    /// Fails with [`PipelineError::Busy`] while another run is in flight.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, project: ProjectConfig, input: PipelineInput) -> Result<PipelineHandle> {
        project.validate()?;
        self.engine_config.validate()?;

        if input.tracks.is_empty() {
            return Err(AnalysisError::NoValidTracks { count: 0 }.into());
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::Busy.into());
        }
        let guard = BusyGuard(self.busy.clone());

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let mut run = PipelineRun::new(&self.engine_config.temp_root, tx, cancel.clone())?;
        let run_id = run.id();

        let mut stages = StageRunner {
            engine: self.engine.clone(),
            engine_config: self.engine_config.clone(),
            exports_dir: self.exports_dir.clone(),
            project,
            input,
            state: self.state.clone(),
            current: Stage::Sequencing,
        };

        let task = tokio::spawn(async move {
            let outcome = stages.execute(&mut run).await;

            match &outcome {
                Ok(result) => {
                    stages.state.send_replace(PipelineState::Complete);
                    info!(
                        "🎉 Master complete: {:?} ({})",
                        result.audio_path,
                        format_duration(result.final_duration_seconds)
                    );
                }
                Err(e) => {
                    error!("❌ {} stage failed: {}", stages.current, e);
                    run.emit_failure(stages.current, e.user_message()).await;
                    stages.state.send_replace(PipelineState::Failed);
                }
            }

            run.cleanup();
            drop(guard);
            outcome
        });

        Ok(PipelineHandle {
            run_id,
            events: rx,
            cancel,
            task,
        })
    }
}

/// Per-run stage logic, moved onto the run's task
struct StageRunner<E> {
    engine: Arc<E>,
    engine_config: EngineConfig,
    exports_dir: PathBuf,
    project: ProjectConfig,
    input: PipelineInput,
    state: Arc<watch::Sender<PipelineState>>,
    current: Stage,
}

impl<E> StageRunner<E>
where
    E: MediaProbe + RenderEngine + 'static,
{
    async fn execute(&mut self, run: &mut PipelineRun) -> Result<PipelineResult> {
        info!("🌙 Starting master '{}' (run {})", self.project.export_name, run.id());
        info!("   Tracks: {}", self.input.tracks.len());
        info!("   Video: {}", self.project.video_mode.describe());

        // Stage 1: Sequencing
        let (tracks, sequenced, sequenced_seconds) = self.sequencing(run).await?;

        // Stage 2: Binaural
        let (binaural, binaural_seconds) = self.binaural(run, sequenced_seconds).await?;

        // Stage 3: Mixing
        let mixed = self.mixing(run, &sequenced, &binaural).await?;
        let mixed_seconds = Mixer::output_duration(sequenced_seconds, binaural_seconds);

        // Stage 4: Exporting
        let (master, master_seconds) = self.exporting(run, &mixed, mixed_seconds).await?;

        // Stage 5: Video
        let video = self.video(run, &master, master_seconds).await?;

        // Stage 6: Finalizing
        self.finalizing(run, tracks, &master, video.as_deref(), master_seconds).await
    }

    async fn enter(&mut self, run: &PipelineRun, stage: Stage, message: &str) -> Result<()> {
        self.current = stage;
        run.check_cancelled(stage)?;
        self.state.send_replace(PipelineState::Running(stage));

        info!("▶️  {}: {}", stage, message);
        run.emit(stage, Phase::Started, 0.0, message).await;
        Ok(())
    }

    async fn render(&self, request: &RenderRequest) -> Result<()> {
        self.engine.render(request).await?;
        Ok(())
    }

    // ==========================================
    // STAGE 1: SEQUENCING
    // ==========================================

    async fn sequencing(
        &mut self,
        run: &mut PipelineRun,
    ) -> Result<(Vec<TrackDescriptor>, PathBuf, f64)> {
        self.enter(run, Stage::Sequencing, "Analyzing tracks").await?;

        let batch = TrackAnalyzer::new(self.engine.as_ref())
            .with_concurrency(self.engine_config.analysis_concurrency)
            .analyze_batch(&self.input.tracks)
            .await;

        for failure in &batch.failures {
            run.emit(
                Stage::Sequencing,
                Phase::Progress,
                0.3,
                format!("Skipped {}: {}", failure.path.display(), failure.error),
            )
            .await;
        }

        if batch.tracks.is_empty() {
            return Err(AnalysisError::NoValidTracks { count: self.input.tracks.len() }.into());
        }
        if batch.is_partial() {
            warn!(
                "Continuing with {} of {} tracks",
                batch.tracks.len(),
                self.input.tracks.len()
            );
        }

        let ordered = SequenceOptimizer::optimize(batch.tracks);
        for (position, track) in ordered.iter().enumerate() {
            debug!(
                "  {:>2}. {} [{}] {}",
                position + 1,
                track.display_name,
                track.energy.label(),
                track.formatted_duration()
            );
        }

        run.emit(
            Stage::Sequencing,
            Phase::Progress,
            0.5,
            format!("Sequencing {} tracks", ordered.len()),
        )
        .await;

        let timeline = SequenceBuilder::from_config(&self.project)
            .build(&ordered)
            .ok_or(AnalysisError::NoValidTracks { count: self.input.tracks.len() })?;
        let duration = timeline.output_duration();

        let output = run.artifact("sequenced.wav");
        self.render(&RenderRequest::Sequence {
            timeline,
            sample_rate: self.engine_config.sample_rate,
            output: output.clone(),
        })
        .await?;
        run.require(&output)?;

        run.emit(
            Stage::Sequencing,
            Phase::Completed,
            1.0,
            format!("Sequenced {} tracks ({})", ordered.len(), format_duration(duration)),
        )
        .await;

        Ok((ordered, output, duration))
    }

    // ==========================================
    // STAGE 2: BINAURAL
    // ==========================================

    async fn binaural(&mut self, run: &mut PipelineRun, duration_seconds: f64) -> Result<(PathBuf, f64)> {
        self.enter(run, Stage::Binaural, "Synthesizing binaural layer").await?;

        let spec = BinauralSpec::new(&self.project, duration_seconds, self.engine_config.sample_rate);
        let output = run.artifact("binaural.wav");

        let path = output.clone();
        let frames = tokio::task::spawn_blocking(move || BinauralSynthesizer::write_wav(&spec, &path))
            .await
            .map_err(|e| PipelineError::WorkerLost { reason: e.to_string() })??;
        run.require(&output)?;
        let layer_seconds = frames as f64 / f64::from(spec.sample_rate);

        run.emit(
            Stage::Binaural,
            Phase::Completed,
            1.0,
            format!("Binaural layer L {} Hz / R {} Hz", spec.left_hz(), spec.right_hz()),
        )
        .await;

        Ok((output, layer_seconds))
    }

    // ==========================================
    // STAGE 3: MIXING
    // ==========================================

    async fn mixing(&mut self, run: &mut PipelineRun, music: &Path, layer: &Path) -> Result<PathBuf> {
        self.enter(run, Stage::Mixing, "Mixing binaural layer under the music").await?;

        let mixer = Mixer::from_config(&self.project);
        let output = run.artifact("mixed.wav");
        self.render(&mixer.request(music, layer, &output)).await?;
        run.require(&output)?;

        run.emit(
            Stage::Mixing,
            Phase::Completed,
            1.0,
            format!("Mixed at {} dB", mixer.layer_gain_db()),
        )
        .await;

        Ok(output)
    }

    // ==========================================
    // STAGE 4: EXPORTING
    // ==========================================

    async fn exporting(
        &mut self,
        run: &mut PipelineRun,
        mixed: &Path,
        mixed_seconds: f64,
    ) -> Result<(PathBuf, f64)> {
        self.enter(run, Stage::Exporting, "Preparing master").await?;

        let expander = LoopExpander::from_config(&self.project);
        let Some(plan) = expander.plan(mixed_seconds) else {
            run.emit(
                Stage::Exporting,
                Phase::Completed,
                1.0,
                format!("No looping needed ({})", format_duration(mixed_seconds)),
            )
            .await;
            return Ok((mixed.to_path_buf(), mixed_seconds));
        };

        let output = run.artifact("master.wav");
        run.emit(
            Stage::Exporting,
            Phase::Progress,
            0.1,
            format!(
                "Looping {} times to {}",
                plan.repetitions,
                format_duration(plan.target_seconds)
            ),
        )
        .await;

        self.render(&plan.request(mixed, &output)).await?;
        run.require(&output)?;

        run.emit(
            Stage::Exporting,
            Phase::Completed,
            1.0,
            format!("Master is {}", format_duration(plan.target_seconds)),
        )
        .await;

        Ok((output, plan.target_seconds))
    }

    // ==========================================
    // STAGE 5: VIDEO
    // ==========================================

    async fn video(
        &mut self,
        run: &mut PipelineRun,
        master: &Path,
        master_seconds: f64,
    ) -> Result<Option<PathBuf>> {
        self.enter(run, Stage::Video, "Building video").await?;

        let composer = VideoComposer::from_config(&self.project);
        let stills = self.prepare_stills(run, &composer, master_seconds).await?;

        let Some(plan) = composer.plan(master_seconds, &stills) else {
            run.emit(Stage::Video, Phase::Completed, 1.0, "Video skipped (audio only)").await;
            return Ok(None);
        };

        let job = composer.write_job(&plan, run.work_dir())?;
        let steps = job.segments.len() + 2;

        for (index, request) in job.segments.iter().enumerate() {
            self.render(request).await?;
            run.emit(
                Stage::Video,
                Phase::Progress,
                (index + 1) as f64 / steps as f64,
                format!("Encoded segment {} of {}", index + 1, job.segments.len()),
            )
            .await;
        }

        if let Some(concat) = &job.concat {
            self.render(concat).await?;
        }
        run.require(&job.video)?;

        let output = run.artifact("final.mp4");
        self.render(&VideoComposer::mux_request(&job.video, master, &output)).await?;
        run.require(&output)?;

        run.emit(
            Stage::Video,
            Phase::Completed,
            1.0,
            format!("Video ready ({} segments)", job.segments.len()),
        )
        .await;

        Ok(Some(output))
    }

    async fn prepare_stills(
        &self,
        run: &PipelineRun,
        composer: &VideoComposer,
        master_seconds: f64,
    ) -> Result<Vec<PathBuf>> {
        let slots = composer.still_slots(master_seconds);
        if slots == 0 || self.input.images.is_empty() {
            if slots > 0 {
                warn!("No images supplied for {} mode, using black screen", composer.mode().describe());
            }
            return Ok(Vec::new());
        }

        let images = self.input.images.clone();
        let resolution = composer.resolution();
        let dir = run.work_dir().to_path_buf();

        let stills = tokio::task::spawn_blocking(move || prepare_stills(&images, resolution, &dir, slots))
            .await
            .map_err(|e| PipelineError::WorkerLost { reason: e.to_string() })?;

        if stills.is_empty() {
            warn!("None of the {} images could be decoded", self.input.images.len());
        }
        Ok(stills)
    }

    // ==========================================
    // STAGE 6: FINALIZING
    // ==========================================

    async fn finalizing(
        &mut self,
        run: &mut PipelineRun,
        tracks: Vec<TrackDescriptor>,
        master: &Path,
        video: Option<&Path>,
        master_seconds: f64,
    ) -> Result<PipelineResult> {
        self.enter(run, Stage::Finalizing, "Writing exports").await?;

        export::ensure_writable(&self.exports_dir).await?;
        let paths = ExportPaths::new(&self.exports_dir, &self.project.export_name);

        // Either every export lands or none does
        let mut written = Vec::new();
        let (video_path, metadata_path) = match self
            .write_exports(&paths, master, video, master_seconds, &mut written)
            .await
        {
            Ok(exported) => exported,
            Err(e) => {
                warn!("Removing {} partial exports", written.len());
                export::discard_exports(&written).await;
                return Err(e);
            }
        };

        run.cleanup();

        run.emit(
            Stage::Finalizing,
            Phase::Completed,
            1.0,
            format!("Exported {}", paths.audio.display()),
        )
        .await;

        if self.project.video_mode != VideoMode::None && video_path.is_none() {
            warn!("Video mode {:?} produced no video", self.project.video_mode);
        }

        Ok(PipelineResult {
            audio_path: paths.audio,
            video_path,
            metadata_path,
            final_duration_seconds: master_seconds,
            source_tracks: tracks,
            config: self.project.clone(),
        })
    }

    /// Write the durable exports, recording each path before it is touched
    async fn write_exports(
        &self,
        paths: &ExportPaths,
        master: &Path,
        video: Option<&Path>,
        master_seconds: f64,
        written: &mut Vec<PathBuf>,
    ) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
        if paths.audio.exists() {
            warn!("Overwriting existing export {:?}", paths.audio);
        }
        written.push(paths.audio.clone());
        export::copy_artifact(master, &paths.audio).await?;

        let video_path = match video {
            Some(video) => {
                written.push(paths.video.clone());
                export::move_artifact(video, &paths.video).await?;
                Some(paths.video.clone())
            }
            None => None,
        };

        let metadata_path = match &self.project.youtube_metadata {
            Some(metadata) => {
                let text = export::metadata_text(metadata, &self.project, master_seconds, Local::now());
                written.push(paths.metadata.clone());
                export::write_text(&paths.metadata, &text).await?;
                Some(paths.metadata.clone())
            }
            None => None,
        };

        Ok((video_path, metadata_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputResolution, YoutubeMetadata};
    use crate::engine::VideoSource;
    use crate::engine::{AudioStreamInfo, LoudnessReport, StreamInfo};
    use crate::error::{FlowStateError, RenderError};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Engine double: probes answer from a table, renders write a stub file
    struct FakeEngine {
        tracks: HashMap<&'static str, (f64, f64)>,
        fail_on: Option<&'static str>,
        hold_on: Option<(&'static str, Arc<Semaphore>)>,
        rendered: Arc<Mutex<Vec<&'static str>>>,
        requests: Arc<Mutex<Vec<RenderRequest>>>,
    }

    impl FakeEngine {
        fn new() -> Self {
            let mut tracks = HashMap::new();
            tracks.insert("one.wav", (30.0, -22.0));
            tracks.insert("two.wav", (40.0, -27.0));
            tracks.insert("three.wav", (20.0, -17.0));
            Self {
                tracks,
                fail_on: None,
                hold_on: None,
                rendered: Arc::new(Mutex::new(Vec::new())),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing_on(mut self, operation: &'static str) -> Self {
            self.fail_on = Some(operation);
            self
        }

        /// Block `operation` until `gate` gets a permit
        fn holding(mut self, operation: &'static str, gate: Arc<Semaphore>) -> Self {
            self.hold_on = Some((operation, gate));
            self
        }

        fn lookup(&self, path: &Path) -> Option<(f64, f64)> {
            let name = path.file_name()?.to_str()?;
            self.tracks.get(name).copied()
        }
    }

    impl MediaProbe for FakeEngine {
        async fn probe(&self, path: &Path) -> std::result::Result<StreamInfo, RenderError> {
            let (duration, _) = self.lookup(path).ok_or_else(|| RenderError::Failed {
                operation: "probe".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            })?;
            Ok(StreamInfo {
                duration_seconds: duration,
                audio: Some(AudioStreamInfo { sample_rate: 44_100, channels: 2 }),
            })
        }

        async fn measure_loudness(
            &self,
            path: &Path,
        ) -> std::result::Result<LoudnessReport, RenderError> {
            let (_, lufs) = self.lookup(path).ok_or_else(|| RenderError::InvalidOutput {
                operation: "loudness scan".to_string(),
                details: "no summary".to_string(),
            })?;
            Ok(LoudnessReport { integrated_lufs: lufs, peak_db: Some(-3.0) })
        }
    }

    impl RenderEngine for FakeEngine {
        async fn render(&self, request: &RenderRequest) -> std::result::Result<(), RenderError> {
            let operation = request.operation();
            self.rendered.lock().unwrap().push(operation);
            self.requests.lock().unwrap().push(request.clone());

            if let Some((held, gate)) = &self.hold_on {
                if *held == operation {
                    let _ = gate.acquire().await;
                }
            }

            if self.fail_on == Some(operation) {
                return Err(RenderError::Failed {
                    operation: operation.to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "Conversion failed!".to_string(),
                });
            }

            tokio::fs::write(request.output(), b"stub").await.map_err(|e| RenderError::InvalidOutput {
                operation: operation.to_string(),
                details: e.to_string(),
            })
        }
    }

    struct Fixture {
        _root: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let mut config = Config::default();
            config.engine.sample_rate = 8_000;
            config.engine.analysis_concurrency = 2;
            config.engine.temp_root = root.path().join("scratch");
            config.export.exports_dir = root.path().join("exports");
            Self { _root: root, config }
        }

        fn project(&self, video_mode: VideoMode, loop_enabled: bool) -> ProjectConfig {
            ProjectConfig {
                export_name: "Night: Rain".to_string(),
                video_mode,
                loop_enabled,
                target_duration_seconds: 600.0,
                ..ProjectConfig::default()
            }
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(&self.config.engine.temp_root)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(true)
        }
    }

    fn input(names: &[&str]) -> PipelineInput {
        PipelineInput {
            tracks: names.iter().map(PathBuf::from).collect(),
            images: Vec::new(),
        }
    }

    async fn drain(mut handle: PipelineHandle) -> (Vec<StageEvent>, Result<PipelineResult>) {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        (events, handle.wait().await)
    }

    fn started_stages(events: &[StageEvent]) -> Vec<Stage> {
        events
            .iter()
            .filter(|e| e.phase == Phase::Started)
            .map(|e| e.stage)
            .collect()
    }

    #[tokio::test]
    async fn test_audio_only_run_with_loop() {
        let fixture = Fixture::new();
        let engine = FakeEngine::new();
        let rendered = engine.rendered.clone();
        let orchestrator = PipelineOrchestrator::new(engine, &fixture.config);

        let handle = orchestrator
            .start(
                fixture.project(VideoMode::None, true),
                input(&["one.wav", "two.wav", "three.wav"]),
            )
            .unwrap();
        let (events, result) = drain(handle).await;
        let result = result.unwrap();

        assert_eq!(started_stages(&events), Stage::ALL.to_vec());
        assert!(events.iter().all(|e| e.phase != Phase::Failed));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(events.last().map(|e| e.percent), Some(100));

        let video_done = events
            .iter()
            .find(|e| e.stage == Stage::Video && e.phase == Phase::Completed)
            .unwrap();
        assert!(video_done.message.contains("skipped"));

        assert_eq!(*rendered.lock().unwrap(), vec!["sequence", "mix", "loop"]);
        assert_eq!(result.final_duration_seconds, 600.0);
        assert_eq!(
            result.source_tracks.iter().map(|t| t.display_name.as_str()).collect::<Vec<_>>(),
            vec!["two.wav", "one.wav", "three.wav"]
        );
        assert_eq!(result.audio_path, fixture.config.export.exports_dir.join("Night Rain_master.wav"));
        assert!(result.audio_path.exists());
        assert!(result.video_path.is_none());
        assert!(result.metadata_path.is_none());

        assert!(fixture.scratch_is_empty());
        assert_eq!(orchestrator.state(), PipelineState::Complete);
    }

    #[tokio::test]
    async fn test_mixing_failure_emits_one_failure_and_cleans_up() {
        let fixture = Fixture::new();
        let orchestrator =
            PipelineOrchestrator::new(FakeEngine::new().failing_on("mix"), &fixture.config);

        let handle = orchestrator
            .start(fixture.project(VideoMode::BlackScreen, true), input(&["one.wav", "two.wav"]))
            .unwrap();
        let (events, result) = drain(handle).await;

        let failures: Vec<&StageEvent> = events.iter().filter(|e| e.phase == Phase::Failed).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Mixing);
        assert!(failures[0].message.contains("Conversion failed!"));
        assert_eq!(events.last(), Some(failures[0]));

        assert_eq!(
            started_stages(&events),
            vec![Stage::Sequencing, Stage::Binaural, Stage::Mixing]
        );
        assert!(matches!(result, Err(FlowStateError::Render(RenderError::Failed { .. }))));
        assert!(fixture.scratch_is_empty());
        assert!(!fixture.config.export.exports_dir.join("Night Rain_master.wav").exists());
        assert_eq!(orchestrator.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped() {
        let fixture = Fixture::new();
        let orchestrator = PipelineOrchestrator::new(FakeEngine::new(), &fixture.config);

        let handle = orchestrator
            .start(
                fixture.project(VideoMode::None, false),
                input(&["one.wav", "corrupt.wav", "three.wav"]),
            )
            .unwrap();
        let (events, result) = drain(handle).await;
        let result = result.unwrap();

        assert_eq!(result.source_tracks.len(), 2);
        // 30 s + 20 s joined by an 8 s crossfade
        assert_eq!(result.final_duration_seconds, 42.0);
        assert!(events.iter().any(|e| e.stage == Stage::Sequencing
            && e.phase == Phase::Progress
            && e.message.contains("corrupt.wav")));
        assert!(events.iter().all(|e| e.phase != Phase::Failed));
    }

    #[tokio::test]
    async fn test_all_files_unreadable_fails_sequencing() {
        let fixture = Fixture::new();
        let orchestrator = PipelineOrchestrator::new(FakeEngine::new(), &fixture.config);

        let handle = orchestrator
            .start(fixture.project(VideoMode::None, false), input(&["bad1.mp3", "bad2.mp3"]))
            .unwrap();
        let (events, result) = drain(handle).await;

        assert!(matches!(
            result,
            Err(FlowStateError::Analysis(AnalysisError::NoValidTracks { count: 2 }))
        ));
        let failures: Vec<&StageEvent> = events.iter().filter(|e| e.phase == Phase::Failed).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Sequencing);
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let fixture = Fixture::new();
        let orchestrator = PipelineOrchestrator::new(FakeEngine::new(), &fixture.config);
        let project = fixture.project(VideoMode::None, false);

        let first = orchestrator.start(project.clone(), input(&["one.wav"])).unwrap();
        let second = orchestrator.start(project.clone(), input(&["two.wav"]));
        assert!(matches!(second, Err(FlowStateError::Pipeline(PipelineError::Busy))));

        drain(first).await.1.unwrap();
        let third = orchestrator.start(project, input(&["two.wav"])).unwrap();
        drain(third).await.1.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_stage() {
        let fixture = Fixture::new();
        let orchestrator = PipelineOrchestrator::new(FakeEngine::new(), &fixture.config);

        let mut project = fixture.project(VideoMode::None, false);
        project.binaural_beat_hz = 45.0;

        let result = orchestrator.start(project, input(&["one.wav"]));
        assert!(matches!(result, Err(FlowStateError::Config(_))));
        assert_eq!(orchestrator.state(), PipelineState::Idle);

        // The rejected start leaves the orchestrator free
        let handle = orchestrator
            .start(fixture.project(VideoMode::None, false), input(&["one.wav"]))
            .unwrap();
        assert!(drain(handle).await.1.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_before_first_stage() {
        let fixture = Fixture::new();
        let orchestrator = PipelineOrchestrator::new(FakeEngine::new(), &fixture.config);

        let handle = orchestrator
            .start(fixture.project(VideoMode::None, false), input(&["one.wav"]))
            .unwrap();
        handle.cancel();
        let (events, result) = drain(handle).await;

        assert!(matches!(
            result,
            Err(FlowStateError::Pipeline(PipelineError::Cancelled { .. }))
        ));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Phase::Failed);
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_black_screen_video_with_intro_and_metadata() {
        let fixture = Fixture::new();
        let engine = FakeEngine::new();
        let rendered = engine.rendered.clone();
        let orchestrator = PipelineOrchestrator::new(engine, &fixture.config);

        let mut project = fixture.project(VideoMode::BlackScreen, false);
        project.intro_text = Some("Rain at Night".to_string());
        project.youtube_metadata = Some(YoutubeMetadata {
            title: "Rain at Night".to_string(),
            description: "Soft rain.".to_string(),
            tags: vec!["rain".to_string()],
            category: "Music".to_string(),
        });

        let handle = orchestrator.start(project, input(&["one.wav", "two.wav"])).unwrap();
        let (events, result) = drain(handle).await;
        let result = result.unwrap();

        assert_eq!(
            *rendered.lock().unwrap(),
            vec!["sequence", "mix", "video segment", "video segment", "video concat", "mux"]
        );
        assert_eq!(
            result.video_path,
            Some(fixture.config.export.exports_dir.join("Night Rain.mp4"))
        );
        let metadata_path = result.metadata_path.unwrap();
        let text = std::fs::read_to_string(&metadata_path).unwrap();
        assert!(text.contains("TITLE:\nRain at Night"));

        assert!(events
            .iter()
            .any(|e| e.stage == Stage::Video && e.phase == Phase::Progress));
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_finalizing_failure_leaves_no_partial_export() {
        let fixture = Fixture::new();
        let exports = &fixture.config.export.exports_dir;
        // A directory where the metadata file should go makes the last write fail
        std::fs::create_dir_all(exports.join("Night Rain_metadata.txt")).unwrap();

        let orchestrator = PipelineOrchestrator::new(FakeEngine::new(), &fixture.config);
        let mut project = fixture.project(VideoMode::BlackScreen, false);
        project.youtube_metadata = Some(YoutubeMetadata::default());

        let handle = orchestrator.start(project, input(&["one.wav"])).unwrap();
        let (events, result) = drain(handle).await;

        assert!(matches!(
            result,
            Err(FlowStateError::Export(crate::error::ExportError::WriteFailed { .. }))
        ));
        let failures: Vec<&StageEvent> = events.iter().filter(|e| e.phase == Phase::Failed).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Finalizing);
        assert_eq!(failures[0].percent, Stage::Finalizing.percent_at(0.0));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));

        assert!(!exports.join("Night Rain_master.wav").exists());
        assert!(!exports.join("Night Rain.mp4").exists());
        assert!(exports.join("Night Rain_metadata.txt").is_dir());
        assert!(fixture.scratch_is_empty());
        assert_eq!(orchestrator.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_between_stages_reports_next_stage() {
        let fixture = Fixture::new();
        let gate = Arc::new(Semaphore::new(0));
        let engine = FakeEngine::new().holding("mix", gate.clone());
        let rendered = engine.rendered.clone();
        let orchestrator = PipelineOrchestrator::new(engine, &fixture.config);

        let mut handle = orchestrator
            .start(fixture.project(VideoMode::None, true), input(&["one.wav", "two.wav"]))
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            let mixing_started = event.stage == Stage::Mixing && event.phase == Phase::Started;
            events.push(event);
            if mixing_started {
                break;
            }
        }

        // Mixing is in flight; it finishes, then the run stops
        handle.cancel();
        gate.add_permits(1);
        let (rest, result) = drain(handle).await;
        events.extend(rest);

        match result {
            Err(FlowStateError::Pipeline(PipelineError::Cancelled { stage })) => {
                assert_eq!(stage, "Exporting")
            }
            other => panic!("expected cancellation, got {:?}", other.map(|r| r.audio_path)),
        }

        let last = events.last().unwrap();
        assert_eq!(last.stage, Stage::Exporting);
        assert_eq!(last.phase, Phase::Failed);
        assert_eq!(last.percent, Stage::Mixing.percent_at(1.0));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(events
            .iter()
            .any(|e| e.stage == Stage::Mixing && e.phase == Phase::Completed));
        assert_eq!(
            started_stages(&events),
            vec![Stage::Sequencing, Stage::Binaural, Stage::Mixing]
        );

        assert_eq!(*rendered.lock().unwrap(), vec!["sequence", "mix"]);
        assert!(fixture.scratch_is_empty());
        assert!(!fixture.config.export.exports_dir.join("Night Rain_master.wav").exists());
        assert_eq!(orchestrator.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_hybrid_video_with_stills() {
        let fixture = Fixture::new();
        let images_dir = TempDir::new().unwrap();
        let first = images_dir.path().join("dawn.png");
        let second = images_dir.path().join("dusk.png");
        let broken = images_dir.path().join("broken.jpg");
        image::RgbImage::from_pixel(16, 9, image::Rgb([90, 120, 200])).save(&first).unwrap();
        image::RgbImage::from_pixel(9, 16, image::Rgb([200, 120, 90])).save(&second).unwrap();
        std::fs::write(&broken, b"not a jpeg").unwrap();

        let engine = FakeEngine::new();
        let rendered = engine.rendered.clone();
        let requests = engine.requests.clone();
        let orchestrator = PipelineOrchestrator::new(engine, &fixture.config);

        let mut project = fixture.project(VideoMode::Hybrid, false);
        project.intro_text = Some("Ocean".to_string());
        project.intro_duration_seconds = 2.0;
        project.black_after_intro_seconds = 3.0;
        project.image_display_seconds = 10.0;
        project.output_resolution = OutputResolution::new(64, 36);

        let handle = orchestrator
            .start(
                project,
                PipelineInput {
                    tracks: vec![PathBuf::from("one.wav"), PathBuf::from("two.wav")],
                    images: vec![first, broken, second],
                },
            )
            .unwrap();
        let (_, result) = drain(handle).await;
        let result = result.unwrap();

        assert_eq!(
            *rendered.lock().unwrap(),
            vec![
                "sequence",
                "mix",
                "video segment",
                "video segment",
                "video segment",
                "video segment",
                "video segment",
                "video concat",
                "mux"
            ]
        );

        // 30 s + 40 s joined by an 8 s crossfade, plus one frame of picture
        let segments: Vec<(String, f64)> = requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|request| match request {
                RenderRequest::VideoSegment { source, duration_seconds, .. } => {
                    let kind = match source {
                        VideoSource::Solid { .. } => "black".to_string(),
                        VideoSource::Caption { .. } => "caption".to_string(),
                        VideoSource::Still { image } => image
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    };
                    Some((kind, *duration_seconds))
                }
                _ => None,
            })
            .collect();

        let kinds: Vec<&str> = segments.iter().map(|(kind, _)| kind.as_str()).collect();
        assert_eq!(kinds, vec!["caption", "black", "still_000.png", "still_001.png", "black"]);
        assert_eq!(segments[0].1, 2.0);
        assert_eq!(segments[1].1, 3.0);
        assert_eq!(segments[2].1, 10.0);
        assert_eq!(segments[3].1, 10.0);
        let total: f64 = segments.iter().map(|(_, d)| d).sum();
        assert!((total - (62.0 + 1.0 / 30.0)).abs() < 1e-9);

        assert_eq!(result.final_duration_seconds, 62.0);
        assert!(result.video_path.unwrap().exists());
        assert!(fixture.scratch_is_empty());
    }
}
