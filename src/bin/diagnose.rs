// Environment check: engine binaries and writable directories

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowstate_master::{config::Config, engine::FfmpegEngine, pipeline::export};

#[derive(Parser)]
#[command(name = "flowstate-diagnose", version, about = "Check that FlowState Master can run here")]
struct Cli {
    /// Project template whose engine and export settings are checked
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("🔍 FlowState Master diagnostics");

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let mut problems = 0;

    println!("\n1. Configuration...");
    match config.validate() {
        Ok(()) => println!("   ✅ Valid"),
        Err(e) => {
            println!("   ❌ {}", e.user_message());
            problems += 1;
        }
    }

    println!("\n2. Media engine...");
    let engine = FfmpegEngine::new(&config.engine);
    for (name, version) in [
        ("ffmpeg", engine.ffmpeg_version().await),
        ("ffprobe", engine.ffprobe_version().await),
    ] {
        match version {
            Ok(version) => println!("   ✅ {}: {}", name, version),
            Err(e) => {
                println!("   ❌ {}: {}", name, e);
                problems += 1;
            }
        }
    }

    println!("\n3. Directories...");
    for (label, dir) in [
        ("exports", &config.export.exports_dir),
        ("scratch", &config.engine.temp_root),
    ] {
        match export::ensure_writable(dir).await {
            Ok(()) => println!("   ✅ {} directory {:?} is writable", label, dir),
            Err(e) => {
                println!("   ❌ {}", e);
                problems += 1;
            }
        }
    }

    println!();
    if problems > 0 {
        bail!("{} problem(s) found", problems);
    }

    println!("🎉 Ready to master");
    Ok(())
}
