//! Image statistics: brightness, contrast and histogram entropy.
//!
//! Rasters are first reduced by [`DOWNSAMPLE_FACTOR`] per axis with
//! nearest-neighbour sampling, which bounds the cost on high resolution
//! input. All three statistics are then derived from one 256-bin histogram.

use image::GrayImage;

use crate::error::TelemetryError;

/// Linear reduction per axis (area is reduced by its square).
pub const DOWNSAMPLE_FACTOR: u32 = 4;

const HISTOGRAM_BINS: usize = 256;

/// Intensity statistics of one greyscale image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageFeatures {
    /// Mean intensity.
    pub brightness: f64,
    /// Intensity standard deviation (population).
    pub contrast: f64,
    /// Shannon entropy of the intensity histogram, in bits.
    pub entropy: f64,
}

/// Nearest-neighbour downsample by `factor` per axis.
///
/// Output pixel `(x, y)` is input pixel `(x * factor, y * factor)`, giving a
/// `ceil(w / factor) x ceil(h / factor)` image.
pub fn downsample_nearest(image: &GrayImage, factor: u32) -> GrayImage {
    let factor = factor.max(1);
    let width = image.width().div_ceil(factor);
    let height = image.height().div_ceil(factor);
    GrayImage::from_fn(width, height, |x, y| *image.get_pixel(x * factor, y * factor))
}

pub fn histogram(image: &GrayImage) -> [u64; HISTOGRAM_BINS] {
    let mut bins = [0u64; HISTOGRAM_BINS];
    for &v in image.as_raw() {
        bins[v as usize] += 1;
    }
    bins
}

/// Shannon entropy `Σ p·log2(1/p)` of a histogram, skipping empty bins.
///
/// Written with `1/p` so a single occupied bin gives `+0.0`, not `-0.0`.
pub fn entropy_bits(bins: &[u64]) -> f64 {
    let total: u64 = bins.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    bins.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total;
            p * (1.0 / p).log2()
        })
        .fold(0.0, |acc, term| acc + term)
}

/// Mean and population standard deviation from a histogram.
fn mean_std_dev(bins: &[u64]) -> (f64, f64) {
    let total: u64 = bins.iter().sum();
    if total == 0 {
        return (0.0, 0.0);
    }
    let total = total as f64;
    let mean = bins
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum::<f64>()
        / total;
    let variance = bins
        .iter()
        .enumerate()
        .map(|(value, &count)| {
            let d = value as f64 - mean;
            d * d * count as f64
        })
        .fold(0.0, |acc, term| acc + term)
        / total;
    (mean, variance.sqrt())
}

/// Compute brightness, contrast and entropy of a raster after downsampling.
pub fn image_features(image: &GrayImage) -> Result<ImageFeatures, TelemetryError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(TelemetryError::MissingData("empty image raster"));
    }

    let reduced = downsample_nearest(image, DOWNSAMPLE_FACTOR);
    let bins = histogram(&reduced);
    let (brightness, contrast) = mean_std_dev(&bins);

    Ok(ImageFeatures {
        brightness,
        contrast,
        entropy: entropy_bits(&bins),
    })
}
