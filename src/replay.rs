/// Offline replay of recorded playback traces through the detector
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::detector::{AcceptedPrediction, Detector, DetectorStatistics, MediaSource};
use crate::error::Result;
use crate::learning::UserAction;
use crate::sync::{Platform, VideoFingerprint};

/// Recorded playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub title: String,
    #[serde(default = "default_platform")]
    pub platform: Platform,
    /// Media duration in seconds; absent while the player did not know it
    pub duration: Option<f64>,
    pub ticks: Vec<TraceTick>,
}

fn default_platform() -> Platform {
    Platform::Other
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceTick {
    /// Playback position in seconds
    pub time: f64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub spectrum: Option<Vec<u8>>,
    #[serde(default)]
    pub frame: Option<TraceFrame>,
    /// Viewer action taken at this position
    #[serde(default)]
    pub action: Option<UserAction>,
}

/// Frame either as raw RGBA bytes or as a solid fill colour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub rgba: Option<Vec<u8>>,
    #[serde(default)]
    pub fill: Option<[u8; 4]>,
}

impl TraceFrame {
    pub fn to_image(&self) -> Option<RgbaImage> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        match (&self.rgba, self.fill) {
            (Some(raw), _) => RgbaImage::from_raw(self.width, self.height, raw.clone()),
            (None, Some(fill)) => Some(RgbaImage::from_pixel(self.width, self.height, Rgba(fill))),
            (None, None) => None,
        }
    }
}

impl Trace {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let trace: Trace = serde_json::from_str(&content)?;
        debug!("Loaded trace '{}' with {} ticks", trace.title, trace.ticks.len());
        Ok(trace)
    }

    /// Fingerprint of the traced video, when its duration is known
    pub fn fingerprint(&self) -> Option<VideoFingerprint> {
        let duration = self.duration.filter(|d| d.is_finite() && *d > 0.0)?;
        Some(VideoFingerprint::compute(
            &self.title,
            self.platform,
            duration.round() as u64,
        ))
    }
}

/// Media source that plays back whichever tick the replay cursor points at
pub struct ReplaySource {
    duration: Option<f64>,
    current: Arc<Mutex<TraceTick>>,
}

impl ReplaySource {
    /// Returns the source plus the cursor used to advance it
    pub fn new(duration: Option<f64>) -> (Self, ReplayCursor) {
        let current = Arc::new(Mutex::new(TraceTick::default()));
        (
            Self {
                duration,
                current: current.clone(),
            },
            ReplayCursor { current },
        )
    }

    fn tick(&self) -> MutexGuard<'_, TraceTick> {
        lock(&self.current)
    }
}

impl MediaSource for ReplaySource {
    fn current_time(&self) -> f64 {
        self.tick().time
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn paused(&self) -> bool {
        self.tick().paused
    }

    fn capture_frame(&mut self) -> Option<RgbaImage> {
        self.tick().frame.as_ref().and_then(TraceFrame::to_image)
    }

    fn frequency_spectrum(&mut self) -> Option<Vec<u8>> {
        self.tick().spectrum.clone()
    }
}

#[derive(Clone)]
pub struct ReplayCursor {
    current: Arc<Mutex<TraceTick>>,
}

impl ReplayCursor {
    pub fn advance(&self, tick: TraceTick) {
        *lock(&self.current) = tick;
    }
}

fn lock(current: &Mutex<TraceTick>) -> MutexGuard<'_, TraceTick> {
    current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub title: String,
    pub ticks: usize,
    pub accepted: Vec<AcceptedPrediction>,
    pub user_actions: usize,
    /// Ticks whose time could not be placed on the replay clock
    #[serde(default)]
    pub skipped_ticks: usize,
    pub statistics: DetectorStatistics,
}

/// Drive the detector through every tick of a trace.
///
/// Tick times double as the throttle clock, so a replay is deterministic no
/// matter how fast it runs.
pub async fn run_trace(detector: &mut Detector, trace: &Trace) -> ReplayReport {
    let (source, cursor) = ReplaySource::new(trace.duration);
    detector.attach(Box::new(source), trace.fingerprint()).await;

    info!("▶️ Replaying '{}' ({} ticks)", trace.title, trace.ticks.len());

    let start = Instant::now();
    let mut accepted = Vec::new();
    let mut user_actions = 0;
    let mut skipped_ticks = 0;

    for tick in &trace.ticks {
        let Some(now) = Duration::try_from_secs_f64(tick.time.max(0.0))
            .ok()
            .and_then(|offset| start.checked_add(offset))
        else {
            warn!("⚠️ Skipping tick with unusable time {}", tick.time);
            skipped_ticks += 1;
            continue;
        };
        let action = tick.action;
        let time = tick.time;
        cursor.advance(tick.clone());

        if let Some(event) = detector.on_position_advanced_at(now).await {
            accepted.push(event);
        }
        if let Some(action) = action {
            let prediction_id = accepted.last().map(|e| e.learning_key.clone());
            detector.record_user_action(action, time, prediction_id).await;
            user_actions += 1;
        }
    }

    let statistics = detector.get_statistics();
    detector.detach();

    info!(
        "✅ Replay finished: {} accepted predictions, threshold {:.2}",
        accepted.len(),
        statistics.confidence_threshold
    );

    ReplayReport {
        title: trace.title.clone(),
        ticks: trace.ticks.len(),
        accepted,
        user_actions,
        skipped_ticks,
        statistics,
    }
}
