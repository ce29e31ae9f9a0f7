//! Image preprocessing collaborator.
//!
//! The engine only depends on the [`ImagePreprocessor`] trait. Two
//! implementations ship with the crate: [`DefaultPreprocessor`], a small
//! grayscale/denoise/contrast/binarize pipeline, and
//! [`PassthroughPreprocessor`], which hands the original file to the backend.

use crate::Result;
use crate::config::{PreprocessingConfig, ThresholdMethod};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{adaptive_threshold, otsu_level};
use imageproc::filter::median_filter;
use std::path::{Path, PathBuf};

/// Neighbourhood radius for adaptive thresholding.
const ADAPTIVE_BLOCK_RADIUS: u32 = 15;
/// Radius of the median filter used for denoising (3x3 window).
const MEDIAN_RADIUS: u32 = 1;

/// Input handed to a backend: either a file on disk or a decoded image.
#[derive(Debug, Clone)]
pub enum ProcessedImage {
    Path(PathBuf),
    Image(DynamicImage),
}

impl ProcessedImage {
    /// Decode to an in-memory image, reading the file if needed.
    pub fn to_dynamic(&self) -> Result<DynamicImage> {
        match self {
            ProcessedImage::Path(path) => Ok(image::open(path)?),
            ProcessedImage::Image(img) => Ok(img.clone()),
        }
    }
}

pub trait ImagePreprocessor: Send + Sync {
    /// Prepare the image at `path` for OCR.
    ///
    /// # Errors
    ///
    /// The engine reports any error as `OcrError::ImageProcessing`.
    fn preprocess(&self, path: &Path, config: &PreprocessingConfig) -> Result<ProcessedImage>;
}

/// Hands the original file to the backend untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPreprocessor;

impl ImagePreprocessor for PassthroughPreprocessor {
    fn preprocess(&self, path: &Path, _config: &PreprocessingConfig) -> Result<ProcessedImage> {
        Ok(ProcessedImage::Path(path.to_path_buf()))
    }
}

/// Grayscale, downscale, denoise, stretch contrast, then binarize.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPreprocessor;

impl ImagePreprocessor for DefaultPreprocessor {
    fn preprocess(&self, path: &Path, config: &PreprocessingConfig) -> Result<ProcessedImage> {
        let img = image::open(path)?;
        Ok(ProcessedImage::Image(DynamicImage::ImageLuma8(process_image(&img, config))))
    }
}

/// Run the default pipeline on a decoded image.
pub fn process_image(img: &DynamicImage, config: &PreprocessingConfig) -> GrayImage {
    let (width, height) = (img.width(), img.height());

    let resized;
    let img = if config.resize_max > 0 && width.max(height) > config.resize_max {
        resized = img.resize(config.resize_max, config.resize_max, FilterType::Lanczos3);
        tracing::debug!(
            from_width = width,
            from_height = height,
            to_width = resized.width(),
            to_height = resized.height(),
            "Downscaled image"
        );
        &resized
    } else {
        img
    };

    let mut gray = img.to_luma8();

    if config.denoise {
        gray = median_filter(&gray, MEDIAN_RADIUS, MEDIAN_RADIUS);
    }

    if config.enhance_contrast {
        stretch_contrast(&mut gray);
    }

    match config.threshold_method {
        ThresholdMethod::Adaptive => adaptive_threshold(&gray, ADAPTIVE_BLOCK_RADIUS),
        ThresholdMethod::Otsu => {
            let level = otsu_level(&gray);
            tracing::trace!(level, "Otsu threshold computed");
            binarize(&mut gray, level);
            gray
        }
        ThresholdMethod::None => gray,
    }
}

/// Linearly map the darkest pixel to 0 and the brightest to 255.
fn stretch_contrast(gray: &mut GrayImage) {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max <= min {
        return;
    }

    let range = f32::from(max - min);
    for pixel in gray.pixels_mut() {
        let scaled = f32::from(pixel[0] - min) * 255.0 / range;
        *pixel = Luma([scaled.round().clamp(0.0, 255.0) as u8]);
    }
}

fn binarize(gray: &mut GrayImage, level: u8) {
    for pixel in gray.pixels_mut() {
        *pixel = Luma([if pixel[0] <= level { 0 } else { 255 }]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
            Luma([(100 + (x * 50 / width.max(1))) as u8])
        }))
    }

    fn config(threshold_method: ThresholdMethod) -> PreprocessingConfig {
        PreprocessingConfig {
            threshold_method,
            ..Default::default()
        }
    }

    #[test]
    fn test_passthrough_returns_path() {
        let path = Path::new("/tmp/scan.png");
        let out = PassthroughPreprocessor
            .preprocess(path, &PreprocessingConfig::default())
            .unwrap();
        assert!(matches!(out, ProcessedImage::Path(p) if p == path));
    }

    #[test]
    fn test_resize_caps_longest_edge() {
        let img = gradient(400, 100);
        let cfg = PreprocessingConfig {
            resize_max: 200,
            threshold_method: ThresholdMethod::None,
            ..Default::default()
        };
        let out = process_image(&img, &cfg);
        assert_eq!(out.width(), 200);
        assert_eq!(out.height(), 50);
    }

    #[test]
    fn test_small_image_not_resized() {
        let out = process_image(&gradient(40, 30), &config(ThresholdMethod::None));
        assert_eq!(out.dimensions(), (40, 30));
    }

    #[test]
    fn test_contrast_stretch_spans_full_range() {
        let cfg = PreprocessingConfig {
            denoise: false,
            threshold_method: ThresholdMethod::None,
            ..Default::default()
        };
        let out = process_image(&gradient(64, 4), &cfg);
        let values: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        assert_eq!(values.iter().copied().min(), Some(0));
        assert_eq!(values.iter().copied().max(), Some(255));
    }

    #[test]
    fn test_uniform_image_survives_stretch() {
        let mut gray = GrayImage::from_pixel(8, 8, Luma([90]));
        stretch_contrast(&mut gray);
        assert!(gray.pixels().all(|p| p[0] == 90));
    }

    #[test]
    fn test_otsu_output_is_binary() {
        let out = process_image(&gradient(64, 16), &config(ThresholdMethod::Otsu));
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_adaptive_output_is_binary() {
        let out = process_image(&gradient(64, 64), &config(ThresholdMethod::Adaptive));
        assert_eq!(out.dimensions(), (64, 64));
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_default_preprocessor_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.png");
        gradient(32, 32).save(&path).unwrap();

        let out = DefaultPreprocessor.preprocess(&path, &PreprocessingConfig::default()).unwrap();
        match out {
            ProcessedImage::Image(img) => assert_eq!((img.width(), img.height()), (32, 32)),
            ProcessedImage::Path(_) => panic!("expected decoded image"),
        }
    }

    #[test]
    fn test_default_preprocessor_rejects_non_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = DefaultPreprocessor
            .preprocess(&path, &PreprocessingConfig::default())
            .unwrap_err();
        assert!(matches!(err, crate::OcrError::ImageProcessing { .. }));
    }
}
