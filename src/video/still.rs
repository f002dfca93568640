use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::config::OutputResolution;
use crate::error::RenderError;

/// Extensions accepted as still images
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Scale `source` to fit inside `resolution` and center it on black
pub fn letterbox(source: &DynamicImage, resolution: OutputResolution) -> RgbImage {
    let (width, height) = (resolution.width, resolution.height);
    let rgb = source.to_rgb8();

    let scale = f64::min(
        width as f64 / rgb.width() as f64,
        height as f64 / rgb.height() as f64,
    );
    let fitted_width = ((rgb.width() as f64 * scale).round() as u32).clamp(1, width);
    let fitted_height = ((rgb.height() as f64 * scale).round() as u32).clamp(1, height);

    let fitted = imageops::resize(&rgb, fitted_width, fitted_height, FilterType::Lanczos3);

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let x = (width - fitted_width) / 2;
    let y = (height - fitted_height) / 2;
    imageops::overlay(&mut canvas, &fitted, x as i64, y as i64);

    canvas
}

/// Decode `source`, letterbox it and save it as PNG at `output`
pub fn prepare_still(
    source: &Path,
    resolution: OutputResolution,
    output: &Path,
) -> Result<(), RenderError> {
    let image = image::open(source).map_err(|e| RenderError::ImageFailed {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;

    debug!(
        "Letterboxing {:?} ({}x{}) to {}",
        source,
        image.width(),
        image.height(),
        resolution
    );

    letterbox(&image, resolution)
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| RenderError::ImageFailed {
            path: output.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Prepare every decodable image in order, skipping the rest.
///
/// Output files are named `still_000.png`, `still_001.png`, ... in `dir`.
pub fn prepare_stills(
    sources: &[PathBuf],
    resolution: OutputResolution,
    dir: &Path,
    limit: usize,
) -> Vec<PathBuf> {
    let mut prepared = Vec::new();

    for source in sources {
        if prepared.len() >= limit {
            break;
        }

        let output = dir.join(format!("still_{:03}.png", prepared.len()));
        match prepare_still(source, resolution, &output) {
            Ok(()) => prepared.push(output),
            Err(e) => warn!("Skipping image {:?}: {}", source, e),
        }
    }

    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 180, 40])))
    }

    #[test]
    fn test_image_extensions() {
        assert!(is_image_file(Path::new("cover.JPG")));
        assert!(is_image_file(Path::new("a/b/night.png")));
        assert!(!is_image_file(Path::new("track.wav")));
        assert!(!is_image_file(Path::new("README")));
    }

    #[test]
    fn test_wide_image_is_pillarboxed_vertically() {
        // 4:1 image into 16:9 leaves black bars above and below
        let canvas = letterbox(&solid(400, 100), OutputResolution::new(320, 180));

        assert_eq!(canvas.dimensions(), (320, 180));
        assert_eq!(canvas.get_pixel(160, 0), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(160, 179), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(160, 90), &Rgb([200, 180, 40]));
    }

    #[test]
    fn test_tall_image_gets_side_bars() {
        let canvas = letterbox(&solid(100, 400), OutputResolution::new(320, 180));

        assert_eq!(canvas.get_pixel(0, 90), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(319, 90), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(160, 90), &Rgb([200, 180, 40]));
    }

    #[test]
    fn test_undecodable_images_are_skipped() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();

        let good = dir.path().join("good.png");
        solid(64, 36).save_with_format(&good, ImageFormat::Png).unwrap();

        let prepared = prepare_stills(
            &[broken, good.clone(), good],
            OutputResolution::new(128, 72),
            dir.path(),
            1,
        );

        assert_eq!(prepared, vec![dir.path().join("still_000.png")]);
        let written = image::open(&prepared[0]).unwrap();
        assert_eq!((written.width(), written.height()), (128, 72));
    }
}
