/// Signal extraction: audio spectrum, video frame and playback timing
///
/// Each extractor turns one raw input into a small numeric feature set. A
/// missing input (no audio graph, no capturable frame) yields `None` for that
/// part of the bundle; predictors treat it as contributing nothing.

pub mod audio;
pub mod context;
pub mod visual;

pub use audio::{AudioFeatureExtractor, FINGERPRINT_LENGTH};
pub use context::extract_context;
pub use visual::VisualFeatureExtractor;

use serde::{Deserialize, Serialize};

/// Features derived from one frequency-magnitude spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Root-mean-square of bin magnitudes
    pub energy: f64,
    /// Magnitude-weighted mean bin index
    pub spectral_centroid: f64,
    /// Estimated tempo, 0 when no confident beat was found
    pub tempo_bpm: f64,
    /// Mean magnitude under the silence threshold
    pub is_silent: bool,
    /// 32-symbol quantized digest of the spectrum
    pub fingerprint: String,
}

/// Quantized RGB colour with its sampled frequency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominantColor {
    pub rgb: [u8; 3],
    pub count: u32,
}

/// Features derived from one captured video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualFeatures {
    /// Mean of per-pixel channel average, 0-255
    pub brightness: f64,
    /// Standard deviation of per-pixel channel average
    pub contrast: f64,
    /// Fraction of interior pixels on a Sobel edge
    pub edge_density: f64,
    pub has_text: bool,
    pub text_probability: f64,
    /// Frame differs strongly from the previous capture
    pub scene_changed: bool,
    /// Up to five most frequent quantized colours, most frequent first
    pub dominant_colors: Vec<DominantColor>,
}

/// Playback-position features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFeatures {
    pub episode_progress: f64,
    pub is_beginning: bool,
    pub is_middle: bool,
    pub is_end: bool,
    pub time_in_episode_seconds: f64,
    pub remaining_seconds: f64,
    pub is_likely_intro: bool,
    pub is_likely_credits: bool,
}

/// One synchronized snapshot of features at a point in playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub audio: Option<AudioFeatures>,
    pub visual: Option<VisualFeatures>,
    pub context: ContextFeatures,
    /// Playback position when sampled
    pub timestamp_seconds: f64,
}

impl FeatureBundle {
    /// Bundle with only timing information
    pub fn from_context(context: ContextFeatures, timestamp_seconds: f64) -> Self {
        Self {
            audio: None,
            visual: None,
            context,
            timestamp_seconds,
        }
    }

    pub fn with_audio(mut self, audio: AudioFeatures) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_visual(mut self, visual: VisualFeatures) -> Self {
        self.visual = Some(visual);
        self
    }
}
