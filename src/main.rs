use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowstate_master::{
    audio::{
        format_duration, BinauralPreset, LoopExpander, SequenceBuilder, SequenceOptimizer,
        TrackAnalyzer,
    },
    config::{Config, VideoMode},
    engine::FfmpegEngine,
    pipeline::{Phase, PipelineInput, PipelineOrchestrator},
    video::is_image_file,
};

const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "m4a", "aac", "ogg", "aiff"];

#[derive(Parser)]
#[command(
    name = "flowstate-master",
    version,
    about = "Build long-form sleep masters from a set of tracks",
    long_about = "Sequences tracks into a gentle energy curve, crossfades and normalizes them, \
                  lays a binaural beat underneath, loops the result to the target length and \
                  optionally renders a matching video."
)]
struct Cli {
    /// Audio files or directories of audio files
    tracks: Vec<PathBuf>,

    /// Image files or directories used by the images and hybrid video modes
    #[arg(short, long)]
    images: Vec<PathBuf>,

    /// Project template (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Binaural preset
    #[arg(short, long, value_enum)]
    preset: Option<BinauralPreset>,

    /// Binaural carrier frequency in Hz (overrides the preset)
    #[arg(long)]
    base_hz: Option<f64>,

    /// Binaural beat frequency in Hz (overrides the preset)
    #[arg(long)]
    beat_hz: Option<f64>,

    /// Project name used for the exported files
    #[arg(short, long)]
    name: Option<String>,

    /// Length of the looped master in minutes
    #[arg(short, long)]
    target_minutes: Option<f64>,

    /// Export the sequenced mix without looping it
    #[arg(long)]
    no_loop: bool,

    /// Video mode: none, black-screen, images or hybrid
    #[arg(long)]
    video_mode: Option<VideoMode>,

    /// Text shown at the start of the video
    #[arg(long)]
    intro_text: Option<String>,

    /// Directory receiving the exported files
    #[arg(short, long)]
    exports: Option<PathBuf>,

    /// Write the effective configuration to this file
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Analyze and order the tracks, then stop
    #[arg(long)]
    analyze_only: bool,

    /// List binaural presets and exit
    #[arg(long)]
    list_presets: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if cli.list_presets {
        for preset in BinauralPreset::all() {
            let key = preset
                .to_possible_value()
                .map(|value| value.get_name().to_string())
                .unwrap_or_default();
            println!(
                "{:<18} {:>5} / {:>4} Hz  {}",
                key,
                preset.base_hz(),
                preset.beat_hz(),
                preset.name()
            );
            println!("{:<18} {}", "", preset.description());
        }
        return Ok(());
    }

    info!("Starting FlowState Master v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading project template from {:?}", path);
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    apply_overrides(&mut config, &cli);
    config.validate().map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if let Some(path) = &cli.save_config {
        config.save_to_file(path)?;
        info!("Saved project template to {:?}", path);
        if cli.tracks.is_empty() {
            return Ok(());
        }
    }

    let tracks = collect_files(&cli.tracks, is_audio_file)?;
    if tracks.is_empty() {
        bail!("No audio files given. Pass files or directories containing audio.");
    }
    let images = collect_files(&cli.images, is_image_file)?;

    let engine = FfmpegEngine::new(&config.engine);

    if cli.analyze_only {
        return analyze_only(&engine, &config, &tracks).await;
    }

    info!("Project: {}", config.project.export_name);
    info!(
        "Binaural: {} Hz + {} Hz beat at {} dB",
        config.project.binaural_base_hz,
        config.project.binaural_beat_hz,
        config.project.binaural_gain_db
    );
    info!("Exports: {:?}", config.export.exports_dir);

    let orchestrator = PipelineOrchestrator::new(engine, &config);
    let mut handle = orchestrator
        .start(config.project.clone(), PipelineInput { tracks, images })
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    while let Some(event) = handle.next_event().await {
        match event.phase {
            Phase::Failed => warn!("{}", event),
            _ => info!("{}", event),
        }
        if event.is_terminal() {
            break;
        }
    }

    let result = handle
        .wait()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!();
    println!("✅ Master complete ({})", format_duration(result.final_duration_seconds));
    println!("   Audio:    {}", result.audio_path.display());
    if let Some(video) = &result.video_path {
        println!("   Video:    {}", video.display());
    }
    if let Some(metadata) = &result.metadata_path {
        println!("   Metadata: {}", metadata.display());
    }
    println!("   Tracks:   {}", result.source_tracks.len());

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    let project = &mut config.project;

    if let Some(preset) = cli.preset {
        preset.apply(project);
    }
    if let Some(base) = cli.base_hz {
        project.binaural_base_hz = base;
    }
    if let Some(beat) = cli.beat_hz {
        project.binaural_beat_hz = beat;
    }
    if let Some(name) = &cli.name {
        project.export_name = name.clone();
    }
    if let Some(minutes) = cli.target_minutes {
        project.target_duration_seconds = minutes * 60.0;
    }
    if cli.no_loop {
        project.loop_enabled = false;
    }
    if let Some(mode) = cli.video_mode {
        project.video_mode = mode;
    }
    if let Some(text) = &cli.intro_text {
        project.intro_text = Some(text.clone());
    }
    if let Some(exports) = &cli.exports {
        config.export.exports_dir = exports.clone();
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand directories into their matching files, sorted by name. Files given
/// directly are kept in the order given.
fn collect_files(inputs: &[PathBuf], accept: fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {:?}", input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && accept(path))
                .collect();
            found.sort();
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            warn!("Skipping missing input {:?}", input);
        }
    }

    Ok(files)
}

async fn analyze_only(engine: &FfmpegEngine, config: &Config, tracks: &[PathBuf]) -> Result<()> {
    let batch = TrackAnalyzer::new(engine)
        .with_concurrency(config.engine.analysis_concurrency)
        .analyze_batch(tracks)
        .await;

    for failure in &batch.failures {
        println!("⚠️  {}: {}", failure.path.display(), failure.error);
    }
    if batch.is_partial() {
        println!("   {} of {} files analyzed", batch.tracks.len(), tracks.len());
    }

    let ordered = SequenceOptimizer::optimize(batch.tracks);
    println!();
    println!("{:>3}  {:<40} {:>9} {:>10}  {}", "#", "Track", "Duration", "Loudness", "Energy");
    for (i, track) in ordered.iter().enumerate() {
        let loudness = track
            .loudness_lufs
            .map(|l| format!("{:.1} LUFS", l))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{:>3}  {:<40} {:>9} {:>10}  {}",
            i + 1,
            track.display_name,
            track.formatted_duration(),
            loudness,
            track.energy.label()
        );
    }

    if let Some(timeline) = SequenceBuilder::from_config(&config.project).build(&ordered) {
        let crossfade = timeline.crossfade.map(|c| c.seconds).unwrap_or(0.0);
        let sequenced = timeline.output_duration();
        let master = LoopExpander::from_config(&config.project).output_duration(sequenced);
        println!();
        println!(
            "Sequenced length: {} (crossfade {:.1}s)",
            format_duration(sequenced),
            crossfade
        );
        println!("Master length:    {}", format_duration(master));
    }

    Ok(())
}
