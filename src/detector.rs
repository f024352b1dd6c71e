/// Skip detector: ties extraction, prediction, learning and sync together
///
/// The host drives analysis by calling [`Detector::on_position_advanced`]
/// whenever playback moves. All mutation goes through `&mut self`, so a
/// second analysis can never start while one is outstanding.
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::arbiter::{arbitrate, AnalysisContext, AnalysisThrottle};
use crate::config::Config;
use crate::features::{extract_context, AudioFeatureExtractor, FeatureBundle, VisualFeatureExtractor};
use crate::learning::{LearningStatistics, LearningStore, UserAction};
use crate::predictors::{ContentType, PatternCounts, PatternRegistry, Prediction, SuggestedAction};
use crate::sync::{HttpSyncGateway, SharedLearningData, SyncDispatcher, SyncGateway, SyncRequest, VideoFingerprint};
use crate::threshold::ThresholdController;

/// Playback element the detector samples from.
///
/// Either capture method may return `None`; that part of the bundle is then
/// left out.
pub trait MediaSource: Send {
    fn current_time(&self) -> f64;

    /// `None` while the duration is not known yet
    fn duration(&self) -> Option<f64>;

    fn paused(&self) -> bool;

    fn capture_frame(&mut self) -> Option<RgbaImage>;

    fn frequency_spectrum(&mut self) -> Option<Vec<u8>>;
}

/// Prediction that cleared the adaptive threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedPrediction {
    pub content_type: ContentType,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub suggested_action: SuggestedAction,
    pub timestamp_seconds: f64,
    /// Learning store key, usable as the prediction id of a later correction
    pub learning_key: String,
}

/// Receiver of accepted predictions, e.g. the skip-button executor
pub trait ActionConsumer: Send + Sync {
    fn on_accepted(&self, event: &AcceptedPrediction);
}

impl ActionConsumer for mpsc::UnboundedSender<AcceptedPrediction> {
    fn on_accepted(&self, event: &AcceptedPrediction) {
        if self.send(event.clone()).is_err() {
            debug!("Action consumer channel closed");
        }
    }
}

/// Host-supplied settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub confidence_threshold: Option<f64>,
    pub verbose_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: None,
            verbose_logging: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorStatistics {
    pub enabled: bool,
    pub monitoring_active: bool,
    pub confidence_threshold: f64,
    pub learning: LearningStatistics,
    pub known_patterns: PatternCounts,
    pub video: Option<VideoFingerprint>,
    pub sync_attached: bool,
}

pub struct Detector {
    config: Config,
    enabled: bool,
    ctx: AnalysisContext,
    source: Option<Box<dyn MediaSource>>,
    video: Option<VideoFingerprint>,
    audio: AudioFeatureExtractor,
    visual: VisualFeatureExtractor,
    throttle: AnalysisThrottle,
    registry: PatternRegistry,
    threshold: ThresholdController,
    learning: LearningStore,
    consumers: Vec<Box<dyn ActionConsumer>>,
    gateway: Option<Arc<dyn SyncGateway>>,
    dispatcher: Option<SyncDispatcher>,
    shared_loaded_for: Option<String>,
}

impl Detector {
    /// Create a local-only detector with an in-memory learning store
    pub fn new(config: Config) -> Self {
        let learning = LearningStore::new(config.learning.store_limits());
        Self::with_store(config, learning)
    }

    /// Create a detector from configuration: rehydrates the learning store
    /// and connects the HTTP sync gateway when enabled.
    ///
    /// Gateway construction failures leave the detector in local-only mode.
    pub async fn from_config(mut config: Config) -> Self {
        config.normalize();
        let learning = match &config.learning.store_path {
            Some(path) => LearningStore::open(path.clone(), config.learning.store_limits()).await,
            None => LearningStore::new(config.learning.store_limits()),
        };
        let mut detector = Self::with_store(config, learning);

        if detector.config.sync.enabled {
            match HttpSyncGateway::new(detector.config.sync.clone()) {
                Ok(gateway) => {
                    let gateway = Arc::new(gateway);
                    if !gateway.check_connection().await {
                        warn!("⚠️ Sync gateway unreachable, continuing in local-only mode");
                    }
                    detector = detector.with_gateway(gateway);
                }
                Err(e) => warn!("⚠️ Sync gateway disabled: {}", e),
            }
        }

        info!(
            "🎬 Detector ready (threshold {:.2}, {} learning entries)",
            detector.threshold.current(),
            detector.learning.len()
        );
        detector
    }

    /// Create a detector around an existing learning store
    pub fn with_store(mut config: Config, learning: LearningStore) -> Self {
        config.normalize();
        let detector_cfg = &config.detector;
        Self {
            enabled: detector_cfg.enabled,
            ctx: AnalysisContext {
                verbose_logging: detector_cfg.verbose_logging,
            },
            source: None,
            video: None,
            audio: AudioFeatureExtractor::new(),
            visual: VisualFeatureExtractor::new(detector_cfg.frame_width, detector_cfg.frame_height),
            throttle: AnalysisThrottle::new(detector_cfg.analysis_interval()),
            registry: PatternRegistry::new(config.learning.max_known_patterns),
            threshold: ThresholdController::new(detector_cfg.confidence_threshold),
            learning,
            consumers: Vec::new(),
            gateway: None,
            dispatcher: None,
            shared_loaded_for: None,
            config,
        }
    }

    /// Attach a sync gateway; spawns the submission worker, so this must run
    /// inside a tokio runtime
    pub fn with_gateway(mut self, gateway: Arc<dyn SyncGateway>) -> Self {
        self.dispatcher = Some(SyncDispatcher::spawn(
            gateway.clone(),
            self.config.sync.queue_capacity,
            self.config.sync.reconnect_interval(),
        ));
        self.gateway = Some(gateway);
        self
    }

    pub fn add_consumer(&mut self, consumer: Box<dyn ActionConsumer>) {
        self.consumers.push(consumer);
    }

    /// Start sampling a media element, detaching any previous one first
    pub async fn attach(&mut self, source: Box<dyn MediaSource>, video: Option<VideoFingerprint>) {
        self.detach();
        info!(
            "📺 Attached media source{}",
            video
                .as_ref()
                .map(|v| format!(" ({} on {})", v.hash, v.platform))
                .unwrap_or_default()
        );
        self.source = Some(source);
        self.video = video;

        if self.enabled {
            self.load_shared_learning().await;
        }
    }

    /// Drop the current media element and every rolling buffer tied to it.
    ///
    /// Shared learning data stays applied; re-attaching the same video does
    /// not fetch it again.
    pub fn detach(&mut self) {
        if self.source.take().is_some() {
            debug!("Detached media source");
        }
        self.video = None;
        self.audio.reset();
        self.visual.reset();
    }

    pub fn is_attached(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            info!("▶️ Skip detection enabled");
        }
        self.enabled = true;
    }

    /// Stop all analysis and learning until re-enabled
    pub fn disable(&mut self) {
        if self.enabled {
            info!("⏸️ Skip detection disabled");
        }
        self.enabled = false;
    }

    /// Override the adaptive threshold; out-of-range values are clamped
    pub fn set_confidence_threshold(&mut self, value: f64) {
        self.threshold.set(value);
        debug!("Confidence threshold set to {:.2}", self.threshold.current());
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.threshold.current()
    }

    pub async fn apply_settings(&mut self, settings: &Settings) {
        self.ctx.verbose_logging = settings.verbose_logging;
        if let Some(threshold) = settings.confidence_threshold {
            self.set_confidence_threshold(threshold);
        }
        if settings.enabled {
            self.enable();
            if self.source.is_some() {
                self.load_shared_learning().await;
            }
        } else {
            self.disable();
        }
    }

    pub fn get_statistics(&self) -> DetectorStatistics {
        let monitoring_active = self.enabled && self.source.is_some();
        DetectorStatistics {
            enabled: self.enabled,
            monitoring_active,
            confidence_threshold: self.threshold.current(),
            learning: self.learning.summarize(
                self.threshold.current(),
                monitoring_active,
                self.config.learning.sample_key_count,
            ),
            known_patterns: self.registry.counts(),
            video: self.video.clone(),
            sync_attached: self.gateway.is_some(),
        }
    }

    pub fn learning_store(&self) -> &LearningStore {
        &self.learning
    }

    pub fn learning_store_mut(&mut self) -> &mut LearningStore {
        &mut self.learning
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PatternRegistry {
        &mut self.registry
    }

    /// Playback advanced; analyse if the throttle allows
    pub async fn on_position_advanced(&mut self) -> Option<AcceptedPrediction> {
        self.on_position_advanced_at(Instant::now()).await
    }

    pub async fn on_position_advanced_at(&mut self, now: Instant) -> Option<AcceptedPrediction> {
        if !self.enabled {
            return None;
        }
        let bundle = self.sample(now)?;
        self.process(bundle).await
    }

    /// Run arbitration over an externally built bundle, subject to the same throttle
    pub async fn submit_bundle_at(&mut self, bundle: FeatureBundle, now: Instant) -> Option<AcceptedPrediction> {
        if !self.enabled || !self.throttle.try_acquire(now) {
            return None;
        }
        self.process(bundle).await
    }

    /// Record a manual correction from the viewer
    pub async fn record_user_action(&mut self, action: UserAction, timestamp: f64, prediction_id: Option<String>) {
        if !self.enabled {
            return;
        }

        let key = self.learning.record_user_action(action, timestamp);
        debug!("👆 Recorded user action {} as {}", action.as_str(), key);
        self.self_tune();

        if let (Some(dispatcher), Some(video)) = (&self.dispatcher, &self.video) {
            dispatcher.dispatch(SyncRequest::UserAction {
                fingerprint: video.clone(),
                action,
                timestamp,
                prediction_id,
            });
        }

        self.persist().await;
    }

    /// Fetch shared patterns for the current video once per video
    pub async fn load_shared_learning(&mut self) {
        let (Some(gateway), Some(video)) = (&self.gateway, &self.video) else {
            return;
        };
        if self.shared_loaded_for.as_deref() == Some(video.hash.as_str()) {
            return;
        }

        let gateway = gateway.clone();
        let video = video.clone();
        match gateway.get_shared_learning_data(&video).await {
            Ok(data) => {
                self.apply_shared_learning(&data);
                self.shared_loaded_for = Some(video.hash);
            }
            Err(e) => warn!("Shared learning data unavailable, using local data only: {}", e),
        }
    }

    /// Seed pattern registries and the threshold from shared data
    pub fn apply_shared_learning(&mut self, data: &SharedLearningData) {
        let mut audio_added = 0;
        for shared in &data.audio_fingerprints {
            if self
                .registry
                .add_audio(shared.content_type, &shared.fingerprint, shared.confidence_level)
            {
                audio_added += 1;
            }
        }
        let mut visual_added = 0;
        for shared in &data.visual_patterns {
            if self
                .registry
                .add_visual(shared.content_type, &shared.pattern, shared.confidence_level)
            {
                visual_added += 1;
            }
        }
        self.threshold.apply_shared(&data.statistics);

        info!(
            "🌐 Loaded shared learning data: {} audio / {} visual patterns added",
            audio_added, visual_added
        );
    }

    /// Persist the learning store and drain pending sync submissions
    pub async fn shutdown(mut self) {
        self.detach();
        self.persist().await;
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }
    }

    fn sample(&mut self, now: Instant) -> Option<FeatureBundle> {
        let analyze_while_paused = self.config.detector.analyze_while_paused;
        let source = self.source.as_mut()?;
        if source.paused() && !analyze_while_paused {
            return None;
        }

        let current_time = source.current_time();
        let context = extract_context(current_time, source.duration())?;

        if !self.throttle.try_acquire(now) {
            return None;
        }

        let audio = source
            .frequency_spectrum()
            .and_then(|spectrum| self.audio.extract(&spectrum, current_time * 1000.0));
        let visual = source
            .capture_frame()
            .and_then(|frame| self.visual.extract(&frame));

        Some(FeatureBundle {
            audio,
            visual,
            context,
            timestamp_seconds: current_time,
        })
    }

    async fn process(&mut self, bundle: FeatureBundle) -> Option<AcceptedPrediction> {
        let threshold = self.threshold.current();
        let best = arbitrate(&bundle, &self.registry, &self.ctx).best;

        let learning_key = self.learning.record(&best, bundle.timestamp_seconds);
        self.self_tune();

        let accepted = if best.content_type != ContentType::Unknown && best.confidence > threshold {
            Some(self.accept(&best, &bundle, learning_key))
        } else {
            None
        };

        if best.content_type != ContentType::Unknown {
            self.submit_prediction(&best, bundle);
        }

        self.persist().await;
        accepted
    }

    fn accept(&mut self, best: &Prediction, bundle: &FeatureBundle, learning_key: String) -> AcceptedPrediction {
        if let Some(audio) = &bundle.audio {
            if self
                .registry
                .add_audio(best.content_type, &audio.fingerprint, best.confidence)
            {
                debug!("Learned {} fingerprint {}", best.content_type, audio.fingerprint);
            }
        }

        let event = AcceptedPrediction {
            content_type: best.content_type,
            confidence: best.confidence,
            reasoning: best.reasoning.clone(),
            suggested_action: best.suggested_action,
            timestamp_seconds: bundle.timestamp_seconds,
            learning_key,
        };
        info!(
            "🎯 Detected {} at {:.1}s (confidence {:.2}, action {:?})",
            event.content_type, event.timestamp_seconds, event.confidence, event.suggested_action
        );
        for consumer in &self.consumers {
            consumer.on_accepted(&event);
        }
        event
    }

    fn submit_prediction(&self, prediction: &Prediction, features: FeatureBundle) {
        if let (Some(dispatcher), Some(video)) = (&self.dispatcher, &self.video) {
            dispatcher.dispatch(SyncRequest::Prediction {
                fingerprint: video.clone(),
                prediction: prediction.clone(),
                features,
            });
        }
    }

    fn self_tune(&mut self) {
        self.threshold.self_tune(
            &self.learning.recent_confidences(),
            self.learning.len(),
            self.config.learning.min_entries_for_tuning,
        );
    }

    async fn persist(&self) {
        if let Err(e) = self.learning.save().await {
            warn!("Failed to save learning store: {}", e);
        }
    }
}
