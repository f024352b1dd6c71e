use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

use smart_skip::config::ConfigBuilder;
use smart_skip::features::{ContextFeatures, FeatureBundle, VisualFeatures};
use smart_skip::learning::{LearningStore, StoreLimits, UserAction};
use smart_skip::predictors::{ContentType, Prediction};
use smart_skip::replay::{run_trace, ReplaySource, Trace, TraceFrame, TraceTick};
use smart_skip::sync::{
    GlobalStatistics, Platform, SharedFingerprint, SharedLearningData, SharedVisualPattern, SubmitOutcome,
    SyncGateway, VideoFingerprint,
};
use smart_skip::threshold::SharedStatistics;
use smart_skip::{Config, Detector, Result};

/// In-memory gateway that records what the detector sends
#[derive(Default)]
struct RecordingGateway {
    shared: SharedLearningData,
    fetches: Mutex<usize>,
    predictions: Mutex<Vec<(ContentType, f64)>>,
    actions: Mutex<Vec<(UserAction, Option<String>)>>,
}

#[async_trait]
impl SyncGateway for RecordingGateway {
    async fn submit_prediction(
        &self,
        _: &VideoFingerprint,
        prediction: &Prediction,
        features: &FeatureBundle,
    ) -> SubmitOutcome {
        self.predictions
            .lock()
            .unwrap()
            .push((prediction.content_type, features.timestamp_seconds));
        SubmitOutcome::Accepted
    }

    async fn submit_user_action(
        &self,
        _: &VideoFingerprint,
        action: UserAction,
        _: f64,
        prediction_id: Option<&str>,
    ) -> SubmitOutcome {
        self.actions
            .lock()
            .unwrap()
            .push((action, prediction_id.map(str::to_string)));
        SubmitOutcome::Accepted
    }

    async fn get_shared_learning_data(&self, _: &VideoFingerprint) -> Result<SharedLearningData> {
        *self.fetches.lock().unwrap() += 1;
        Ok(self.shared.clone())
    }

    async fn get_global_statistics(&self) -> Result<GlobalStatistics> {
        Ok(GlobalStatistics::default())
    }
}

fn credits_context(time: f64) -> ContextFeatures {
    ContextFeatures {
        episode_progress: time / 1800.0,
        is_beginning: false,
        is_middle: false,
        is_end: true,
        time_in_episode_seconds: time,
        remaining_seconds: 1800.0 - time,
        is_likely_intro: false,
        is_likely_credits: true,
    }
}

fn text_overlay() -> VisualFeatures {
    VisualFeatures {
        brightness: 40.0,
        contrast: 70.0,
        edge_density: 0.3,
        has_text: true,
        text_probability: 0.95,
        scene_changed: false,
        dominant_colors: Vec::new(),
    }
}

/// Credits bundle scoring 0.8: timing plus on-screen text
fn credits_bundle(time: f64) -> FeatureBundle {
    FeatureBundle::from_context(credits_context(time), time).with_visual(text_overlay())
}

/// 2px vertical stripes: strong edges everywhere, so text is detected
fn striped_frame() -> TraceFrame {
    let (width, height) = (16u32, 9u32);
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for _y in 0..height {
        for x in 0..width {
            let v = if (x / 2) % 2 == 0 { 0 } else { 255 };
            rgba.extend_from_slice(&[v, v, v, 255]);
        }
    }
    TraceFrame {
        width,
        height,
        rgba: Some(rgba),
        fill: None,
    }
}

fn video() -> VideoFingerprint {
    VideoFingerprint::compute("Pilot", Platform::Netflix, 1800)
}

async fn attach_video(detector: &mut Detector) {
    let (source, _cursor) = ReplaySource::new(Some(1800.0));
    detector.attach(Box::new(source), Some(video())).await;
}

#[tokio::test]
async fn test_self_tuning_unlocks_acceptance() {
    let mut detector = Detector::new(Config::default());
    let start = Instant::now();

    // 0.8 does not exceed the default 0.8 threshold
    for i in 0..9 {
        let now = start + Duration::from_secs(i);
        assert!(detector.submit_bundle_at(credits_bundle(1700.0 + i as f64), now).await.is_none());
    }
    assert_eq!(detector.confidence_threshold(), 0.8);

    // Tenth entry reaches the tuning minimum with a 100% success rate
    detector
        .submit_bundle_at(credits_bundle(1709.0), start + Duration::from_secs(9))
        .await;
    assert!((detector.confidence_threshold() - 0.75).abs() < 1e-9);

    let accepted = detector
        .submit_bundle_at(credits_bundle(1710.0), start + Duration::from_secs(10))
        .await
        .expect("credits accepted after tuning");
    assert_eq!(accepted.content_type, ContentType::Credits);
    assert_eq!(detector.learning_store().len(), 11);
}

#[tokio::test]
async fn test_low_confidence_raises_threshold_to_ceiling() {
    let config = ConfigBuilder::new().with_threshold(0.6).build();
    let mut detector = Detector::new(config);
    let start = Instant::now();

    let context_only = |t: f64| FeatureBundle::from_context(credits_context(t), t);
    for i in 0..20 {
        detector
            .submit_bundle_at(context_only(1700.0 + i as f64), start + Duration::from_secs(i))
            .await;
    }
    assert!((detector.confidence_threshold() - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_throttle_limits_analysis_rate() {
    let mut detector = Detector::new(Config::default());
    let start = Instant::now();

    detector.submit_bundle_at(credits_bundle(1700.0), start).await;
    detector
        .submit_bundle_at(credits_bundle(1700.4), start + Duration::from_millis(500))
        .await;
    detector
        .submit_bundle_at(credits_bundle(1701.0), start + Duration::from_millis(1000))
        .await;

    assert_eq!(detector.learning_store().recent_confidences().len(), 2);
    assert!(detector.learning_store().contains("credits_1701"));
    assert_eq!(detector.learning_store().len(), 2);
}

#[tokio::test]
async fn test_shared_learning_seeds_registry_once() {
    let gateway = Arc::new(RecordingGateway {
        shared: SharedLearningData {
            audio_fingerprints: vec![
                SharedFingerprint {
                    fingerprint: "THEME".to_string(),
                    content_type: ContentType::Intro,
                    confidence_level: 0.9,
                },
                SharedFingerprint {
                    fingerprint: "NOISE".to_string(),
                    content_type: ContentType::Intro,
                    confidence_level: 0.5,
                },
            ],
            visual_patterns: vec![SharedVisualPattern {
                pattern: "black_white_text".to_string(),
                content_type: ContentType::Credits,
                confidence_level: 0.8,
            }],
            statistics: SharedStatistics {
                total_predictions: 100,
                average_accuracy: 0.9,
            },
        },
        ..RecordingGateway::default()
    });

    let mut detector = Detector::new(Config::default()).with_gateway(gateway.clone());
    attach_video(&mut detector).await;

    assert!(detector.registry().knows_audio(ContentType::Intro, "THEME"));
    assert!(!detector.registry().knows_audio(ContentType::Intro, "NOISE"));
    let stats = detector.get_statistics();
    assert_eq!(stats.known_patterns.audio, 1);
    assert_eq!(stats.known_patterns.visual, 1);
    assert!((stats.confidence_threshold - 0.75).abs() < 1e-9);

    // Same video again: no second fetch, no second reduction
    attach_video(&mut detector).await;
    assert_eq!(*gateway.fetches.lock().unwrap(), 1);
    assert!((detector.confidence_threshold() - 0.75).abs() < 1e-9);

    detector.shutdown().await;
}

#[tokio::test]
async fn test_submissions_are_forwarded_in_order() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut detector = Detector::new(Config::default()).with_gateway(gateway.clone());
    attach_video(&mut detector).await;
    detector.set_confidence_threshold(0.5);

    let start = Instant::now();
    let accepted = detector
        .submit_bundle_at(credits_bundle(1700.0), start)
        .await
        .unwrap();
    // Nothing clears the floor: learned locally, never submitted
    detector
        .submit_bundle_at(
            FeatureBundle::from_context(
                ContextFeatures {
                    is_likely_credits: false,
                    is_end: false,
                    is_middle: true,
                    ..credits_context(900.0)
                },
                900.0,
            ),
            start + Duration::from_secs(1),
        )
        .await;
    detector
        .submit_bundle_at(credits_bundle(1702.0), start + Duration::from_secs(2))
        .await;
    detector
        .record_user_action(UserAction::SkipCredits, 1702.0, Some(accepted.learning_key.clone()))
        .await;

    assert!(detector.learning_store().contains("unknown_900"));
    detector.shutdown().await;

    assert_eq!(
        *gateway.predictions.lock().unwrap(),
        vec![(ContentType::Credits, 1700.0), (ContentType::Credits, 1702.0)]
    );
    assert_eq!(
        *gateway.actions.lock().unwrap(),
        vec![(UserAction::SkipCredits, Some("credits_1700".to_string()))]
    );
}

#[tokio::test]
async fn test_disabled_detector_sends_nothing() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut detector = Detector::new(Config::default()).with_gateway(gateway.clone());
    detector.disable();
    attach_video(&mut detector).await;

    assert!(detector
        .submit_bundle_at(credits_bundle(1700.0), Instant::now())
        .await
        .is_none());
    detector.record_user_action(UserAction::SkipIntro, 20.0, None).await;
    detector.shutdown().await;

    assert_eq!(*gateway.fetches.lock().unwrap(), 0);
    assert!(gateway.predictions.lock().unwrap().is_empty());
    assert!(gateway.actions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_learning_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("learning").join("store.json");
    let config = ConfigBuilder::new().with_store_path(path.clone()).build();

    let mut detector = Detector::from_config(config.clone()).await;
    let start = Instant::now();
    detector.submit_bundle_at(credits_bundle(1700.0), start).await;
    detector
        .submit_bundle_at(credits_bundle(1701.0), start + Duration::from_secs(1))
        .await;
    detector.record_user_action(UserAction::NextEpisode, 1701.4, None).await;
    detector.shutdown().await;

    let detector = Detector::from_config(config).await;
    let store = detector.learning_store();
    assert_eq!(store.len(), 3);
    assert!(store.contains("credits_1700"));
    assert!(store.contains("user_action_1701"));
    assert_eq!(store.recent_confidences(), vec![0.8, 0.8]);
    assert_eq!(store.path(), Some(path.as_path()));
}

#[tokio::test]
async fn test_unvalidated_store_limits_still_cap_growth() {
    let config = ConfigBuilder::new().with_store_limits(4, 4).build();
    let mut detector = Detector::from_config(config.clone()).await;
    for i in 0..12 {
        detector.record_user_action(UserAction::SkipAd, i as f64 * 10.0, None).await;
        assert!(detector.learning_store().len() <= 4);
    }
    assert!(detector.learning_store().contains("user_action_110"));
    assert!(!detector.learning_store().contains("user_action_0"));

    let store = LearningStore::new(config.learning.store_limits());
    let mut detector = Detector::with_store(config, store);
    for i in 0..12 {
        detector.record_user_action(UserAction::SkipAd, i as f64 * 10.0, None).await;
    }
    assert!(detector.learning_store().len() <= 4);
    detector.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_entry_is_discarded_on_rehydration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let mut store = LearningStore::open(path.clone(), StoreLimits::default()).await;
    store.record(
        &Prediction {
            content_type: ContentType::Recap,
            confidence: 0.6,
            reasoning: vec!["Timing suggests recap".to_string()],
            suggested_action: smart_skip::SuggestedAction::None,
        },
        45.0,
    );
    store.save().await.unwrap();

    let mut snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    snapshot["entries"]["intro_12"] = json!({ "kind": "bogus", "predictions": 3 });
    std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

    let store = LearningStore::open(path, StoreLimits::default()).await;
    assert_eq!(store.len(), 1);
    assert!(store.contains("recap_45"));
    assert!(!store.contains("intro_12"));
}

#[test]
fn test_replayed_trace_emits_credits() {
    let frame = striped_frame();
    let mut ticks = vec![TraceTick {
        time: 10.0,
        frame: Some(frame.clone()),
        ..TraceTick::default()
    }];
    for i in 0..5 {
        ticks.push(TraceTick {
            time: 1700.0 + i as f64,
            paused: i == 2,
            frame: Some(frame.clone()),
            ..TraceTick::default()
        });
    }
    ticks.push(TraceTick {
        time: 1705.0,
        frame: Some(frame),
        action: Some(UserAction::NextEpisode),
        ..TraceTick::default()
    });
    let trace = Trace {
        title: "Pilot".to_string(),
        platform: Platform::Netflix,
        duration: Some(1800.0),
        ticks,
    };

    let report = tokio_test::block_on(async {
        let mut detector = Detector::new(ConfigBuilder::new().with_threshold(0.7).build());
        let (tx, mut rx) = mpsc::unbounded_channel();
        detector.add_consumer(Box::new(tx));

        let report = run_trace(&mut detector, &trace).await;
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, report.accepted.len());

        assert!(detector.learning_store().contains("intro_10"));
        assert!(!detector.learning_store().contains("credits_1702"));
        report
    });

    // Ticks at 1700, 1701, 1703, 1704 and 1705; 1702 is paused
    assert_eq!(report.accepted.len(), 5);
    assert!(report
        .accepted
        .iter()
        .all(|e| e.content_type == ContentType::Credits && (e.confidence - 0.8).abs() < 1e-9));
    assert_eq!(report.user_actions, 1);
    assert_eq!(report.statistics.learning.user_actions, 1);
    assert!(report.statistics.monitoring_active);
}
