use std::path::Path;

use crate::config::ProjectConfig;
use crate::engine::RenderRequest;

/// Lays the binaural layer under the sequenced music.
///
/// The sum is not renormalized afterwards, so a loud master plus the layer can
/// exceed the loudness target slightly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mixer {
    layer_gain_db: f64,
}

impl Mixer {
    pub fn new(layer_gain_db: f64) -> Self {
        Self { layer_gain_db }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(config.binaural_gain_db)
    }

    pub fn layer_gain_db(&self) -> f64 {
        self.layer_gain_db
    }

    pub fn request(&self, music: &Path, layer: &Path, output: &Path) -> RenderRequest {
        RenderRequest::Mix {
            music: music.to_path_buf(),
            layer: layer.to_path_buf(),
            layer_gain_db: self.layer_gain_db,
            output: output.to_path_buf(),
        }
    }

    /// The mix runs as long as the longer input
    pub fn output_duration(music_seconds: f64, layer_seconds: f64) -> f64 {
        music_seconds.max(layer_seconds)
    }
}
