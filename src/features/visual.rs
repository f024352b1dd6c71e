use std::collections::HashMap;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use super::{DominantColor, VisualFeatures};

/// Default analysis raster, frames are downscaled to this before analysis
pub const DEFAULT_FRAME_WIDTH: u32 = 160;
pub const DEFAULT_FRAME_HEIGHT: u32 = 90;

/// Sobel gradient magnitude above which a pixel counts as an edge
pub const EDGE_THRESHOLD: f64 = 50.0;

/// Mean absolute channel difference above which the scene changed
pub const SCENE_CHANGE_THRESHOLD: f64 = 50.0;

/// Colour channels are bucketed in steps of this size
pub const COLOR_QUANTUM: u8 = 32;

/// Every Nth pixel is sampled for dominant colours
pub const COLOR_SAMPLE_STRIDE: usize = 4;

pub const MAX_DOMINANT_COLORS: usize = 5;

/// Text probability above which a frame is flagged as carrying text
pub const TEXT_PROBABILITY_CUTOFF: f64 = 0.5;

/// Visual feature extractor; keeps the previous frame for scene-change detection
#[derive(Debug, Clone)]
pub struct VisualFeatureExtractor {
    width: u32,
    height: u32,
    previous: Option<RgbaImage>,
}

impl Default for VisualFeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT)
    }
}

impl VisualFeatureExtractor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            previous: None,
        }
    }

    /// Extract visual features from a captured frame.
    ///
    /// Frames larger than the analysis raster are downscaled first. Returns
    /// `None` for an empty frame.
    pub fn extract(&mut self, frame: &RgbaImage) -> Option<VisualFeatures> {
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }

        let frame = if frame.width() > self.width || frame.height() > self.height {
            imageops::resize(frame, self.width, self.height, FilterType::Nearest)
        } else {
            frame.clone()
        };

        let luma = channel_averages(&frame);
        let (brightness, contrast) = mean_and_std_dev(&luma);
        let edge_density = edge_density(&luma, frame.width() as usize, frame.height() as usize);
        let text_probability = text_probability(edge_density, contrast);

        let scene_changed = self
            .previous
            .as_ref()
            .map(|prev| frame_difference(prev, &frame) > SCENE_CHANGE_THRESHOLD)
            .unwrap_or(false);

        let dominant_colors = dominant_colors(&frame);
        self.previous = Some(frame);

        Some(VisualFeatures {
            brightness,
            contrast,
            edge_density,
            has_text: text_probability > TEXT_PROBABILITY_CUTOFF,
            text_probability,
            scene_changed,
            dominant_colors,
        })
    }

    /// Forget the previous frame, e.g. when switching media elements
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Per-pixel mean of the RGB channels
fn channel_averages(frame: &RgbaImage) -> Vec<f64> {
    frame
        .pixels()
        .map(|p| (p[0] as f64 + p[1] as f64 + p[2] as f64) / 3.0)
        .collect()
}

fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Fraction of interior pixels whose Sobel gradient magnitude exceeds the edge threshold
pub fn edge_density(luma: &[f64], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }

    let at = |x: usize, y: usize| luma[y * width + x];
    let mut edges = 0usize;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = -at(x - 1, y - 1) - 2.0 * at(x - 1, y) - at(x - 1, y + 1)
                + at(x + 1, y - 1)
                + 2.0 * at(x + 1, y)
                + at(x + 1, y + 1);
            let gy = -at(x - 1, y - 1) - 2.0 * at(x, y - 1) - at(x + 1, y - 1)
                + at(x - 1, y + 1)
                + 2.0 * at(x, y + 1)
                + at(x + 1, y + 1);
            if (gx * gx + gy * gy).sqrt() > EDGE_THRESHOLD {
                edges += 1;
            }
        }
    }

    edges as f64 / ((width - 2) * (height - 2)) as f64
}

/// Monotonic in both edge density and contrast; no OCR involved
pub fn text_probability(edge_density: f64, contrast: f64) -> f64 {
    (edge_density * 3.0 + contrast / 255.0 * 0.5).clamp(0.0, 1.0)
}

/// Mean absolute RGB difference between two frames, 0 when sizes differ
fn frame_difference(previous: &RgbaImage, current: &RgbaImage) -> f64 {
    if previous.dimensions() != current.dimensions() {
        return 0.0;
    }

    let total: u64 = previous
        .pixels()
        .zip(current.pixels())
        .map(|(a, b)| {
            (0..3)
                .map(|c| (a[c] as i32 - b[c] as i32).unsigned_abs() as u64)
                .sum::<u64>()
        })
        .sum();

    let samples = previous.width() as f64 * previous.height() as f64 * 3.0;
    if samples == 0.0 {
        0.0
    } else {
        total as f64 / samples
    }
}

/// Top colours by frequency over a strided pixel sample.
///
/// Ties are ordered by colour value so the result is deterministic.
pub fn dominant_colors(frame: &RgbaImage) -> Vec<DominantColor> {
    let mut buckets: HashMap<[u8; 3], u32> = HashMap::new();
    for pixel in frame.pixels().step_by(COLOR_SAMPLE_STRIDE) {
        let key = [
            pixel[0] / COLOR_QUANTUM * COLOR_QUANTUM,
            pixel[1] / COLOR_QUANTUM * COLOR_QUANTUM,
            pixel[2] / COLOR_QUANTUM * COLOR_QUANTUM,
        ];
        *buckets.entry(key).or_insert(0) += 1;
    }

    let mut colors: Vec<DominantColor> = buckets
        .into_iter()
        .map(|(rgb, count)| DominantColor { rgb, count })
        .collect();
    colors.sort_by(|a, b| b.count.cmp(&a.count).then(a.rgb.cmp(&b.rgb)));
    colors.truncate(MAX_DOMINANT_COLORS);
    colors
}
