use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::audio::{format_duration, BinauralPreset};
use crate::config::{ProjectConfig, YoutubeMetadata};
use crate::error::ExportError;

/// Used when a project name has no usable characters
pub const FALLBACK_EXPORT_NAME: &str = "flowstate_export";

/// Make a project name safe for use as a file name.
///
/// Alphanumerics, `-` and `_` are kept. Any other character becomes a word
/// break, so `"My: Sleep/Mix!"` gives `"My Sleep Mix"`. Whitespace runs,
/// including ones already in the name, collapse to a single space
/// (`"a  b"` gives `"a b"`) and the ends are trimmed.
pub fn sanitize_export_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { ' ' })
        .collect();

    let cleaned = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        FALLBACK_EXPORT_NAME.to_string()
    } else {
        cleaned
    }
}

/// Durable file locations for one project name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub audio: PathBuf,
    pub video: PathBuf,
    pub metadata: PathBuf,
}

impl ExportPaths {
    /// Paths depend only on the sanitized name, so a second export with the
    /// same name overwrites the first
    pub fn new(exports_dir: &Path, project_name: &str) -> Self {
        let name = sanitize_export_name(project_name);
        Self {
            audio: exports_dir.join(format!("{}_master.wav", name)),
            video: exports_dir.join(format!("{}.mp4", name)),
            metadata: exports_dir.join(format!("{}_metadata.txt", name)),
        }
    }
}

/// Upload notes written next to the master
pub fn metadata_text(
    metadata: &YoutubeMetadata,
    project: &ProjectConfig,
    duration_seconds: f64,
    exported_at: DateTime<Local>,
) -> String {
    let title = if metadata.title.trim().is_empty() {
        project.export_name.as_str()
    } else {
        metadata.title.as_str()
    };
    let category = if metadata.category.trim().is_empty() {
        "Music"
    } else {
        metadata.category.as_str()
    };

    let binaural = BinauralPreset::all()
        .iter()
        .find(|p| p.base_hz() == project.binaural_base_hz && p.beat_hz() == project.binaural_beat_hz)
        .filter(|p| **p != BinauralPreset::Custom)
        .map(|p| p.name().to_string())
        .unwrap_or_else(|| {
            format!(
                "Custom ({} Hz base, {} Hz beat)",
                project.binaural_base_hz, project.binaural_beat_hz
            )
        });

    let mut text = String::new();
    let _ = writeln!(text, "YOUTUBE UPLOAD METADATA");
    let _ = writeln!(text, "{}", "=".repeat(50));
    let _ = writeln!(text);
    let _ = writeln!(text, "TITLE:\n{}\n", title);
    let _ = writeln!(text, "DESCRIPTION:\n{}\n", metadata.description);
    let _ = writeln!(text, "TAGS:\n{}\n", metadata.tags.join(", "));
    let _ = writeln!(text, "CATEGORY:\n{}\n", category);
    let _ = writeln!(text, "AUDIO SPECS:");
    let _ = writeln!(text, "- Duration: {}", format_duration(duration_seconds));
    let _ = writeln!(text, "- Binaural: {}", binaural);
    let _ = writeln!(text, "- Loudness: {} LUFS", project.target_loudness_lufs);
    let _ = writeln!(text);
    let _ = writeln!(text, "Exported {}", exported_at.format("%Y-%m-%d %H:%M"));
    text
}

/// Create `dir` if needed and confirm files can be written into it
pub async fn ensure_writable(dir: &Path) -> Result<(), ExportError> {
    let not_writable = |e: std::io::Error| ExportError::NotWritable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    tokio::fs::create_dir_all(dir).await.map_err(not_writable)?;

    let probe = dir.join(format!(".flowstate-write-check-{}", std::process::id()));
    tokio::fs::write(&probe, b"").await.map_err(not_writable)?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        warn!("Could not remove write check {:?}: {}", probe, e);
    }

    Ok(())
}

/// Copy `from` to `to`, replacing any existing file
pub async fn copy_artifact(from: &Path, to: &Path) -> Result<(), ExportError> {
    debug!("Copying {:?} -> {:?}", from, to);
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| write_failed(to, e))
}

/// Move `from` to `to`. Falls back to copy and delete across filesystems.
pub async fn move_artifact(from: &Path, to: &Path) -> Result<(), ExportError> {
    debug!("Moving {:?} -> {:?}", from, to);
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    copy_artifact(from, to).await?;
    if let Err(e) = tokio::fs::remove_file(from).await {
        warn!("Could not remove {:?} after copying: {}", from, e);
    }
    Ok(())
}

pub async fn write_text(path: &Path, contents: &str) -> Result<(), ExportError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| write_failed(path, e))
}

/// Remove exports written by a run that then failed. Best effort.
pub async fn discard_exports(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed partial export {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial export {:?}: {}", path, e),
        }
    }
}

fn write_failed(path: &Path, e: std::io::Error) -> ExportError {
    ExportError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
