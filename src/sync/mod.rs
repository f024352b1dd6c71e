/// Remote persistence boundary
///
/// The detector treats the gateway as fallible and possibly offline: shared
/// data seeds pattern registries and the threshold, submissions are
/// fire-and-forget through the [`SyncDispatcher`].

pub mod client;
pub mod dispatcher;

pub use client::HttpSyncGateway;
pub use dispatcher::SyncDispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::features::FeatureBundle;
use crate::learning::UserAction;
use crate::predictors::{ContentType, Prediction};
use crate::threshold::SharedStatistics;

/// Streaming platform a video belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Netflix,
    PrimeVideo,
    DisneyPlus,
    Hulu,
    Crunchyroll,
    Youtube,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Netflix => "netflix",
            Platform::PrimeVideo => "prime_video",
            Platform::DisneyPlus => "disney_plus",
            Platform::Hulu => "hulu",
            Platform::Crunchyroll => "crunchyroll",
            Platform::Youtube => "youtube",
            Platform::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "netflix" => Ok(Platform::Netflix),
            "prime_video" | "prime" | "amazon" => Ok(Platform::PrimeVideo),
            "disney_plus" | "disney" => Ok(Platform::DisneyPlus),
            "hulu" => Ok(Platform::Hulu),
            "crunchyroll" => Ok(Platform::Crunchyroll),
            "youtube" => Ok(Platform::Youtube),
            "other" => Ok(Platform::Other),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Opaque key identifying a video across viewers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFingerprint {
    pub hash: String,
    pub platform: Platform,
    pub duration_seconds: u64,
}

impl VideoFingerprint {
    /// Derive a fingerprint from the video's title, platform and whole-second duration
    pub fn compute(title: &str, platform: Platform, duration_seconds: u64) -> Self {
        let identity = format!(
            "{}|{}|{}",
            platform.as_str(),
            title.trim().to_lowercase(),
            duration_seconds
        );
        Self {
            hash: format!("{:x}", md5::compute(identity.as_bytes())),
            platform,
            duration_seconds,
        }
    }
}

/// Result of a submission from the caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    /// Kept locally for replay once connectivity returns
    Buffered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedFingerprint {
    pub fingerprint: String,
    pub content_type: ContentType,
    pub confidence_level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedVisualPattern {
    pub pattern: String,
    pub content_type: ContentType,
    pub confidence_level: f64,
}

/// Community-aggregated patterns and statistics for one video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedLearningData {
    #[serde(default)]
    pub audio_fingerprints: Vec<SharedFingerprint>,
    #[serde(default)]
    pub visual_patterns: Vec<SharedVisualPattern>,
    #[serde(default)]
    pub statistics: SharedStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    #[serde(default)]
    pub total_predictions: u64,
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub average_accuracy: f64,
}

/// A submission queued for the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncRequest {
    Prediction {
        fingerprint: VideoFingerprint,
        prediction: Prediction,
        features: FeatureBundle,
    },
    UserAction {
        fingerprint: VideoFingerprint,
        action: UserAction,
        timestamp: f64,
        prediction_id: Option<String>,
    },
}

/// Remote store for predictions, user actions and shared patterns.
///
/// Every call must be safe to retry and must tolerate the remote being unreachable.
#[async_trait]
pub trait SyncGateway: Send + Sync {
    async fn submit_prediction(
        &self,
        fingerprint: &VideoFingerprint,
        prediction: &Prediction,
        features: &FeatureBundle,
    ) -> SubmitOutcome;

    async fn submit_user_action(
        &self,
        fingerprint: &VideoFingerprint,
        action: UserAction,
        timestamp: f64,
        prediction_id: Option<&str>,
    ) -> SubmitOutcome;

    async fn get_shared_learning_data(&self, fingerprint: &VideoFingerprint) -> Result<SharedLearningData>;

    /// Used for connectivity probing only
    async fn get_global_statistics(&self) -> Result<GlobalStatistics>;

    /// True while submissions are being held back for replay
    fn needs_reconnect(&self) -> bool {
        false
    }

    /// Contact the remote and replay held-back submissions in order.
    ///
    /// Returns true once the gateway is back online with nothing left to replay.
    async fn reconnect(&self) -> bool {
        true
    }

    async fn submit(&self, request: &SyncRequest) -> SubmitOutcome {
        match request {
            SyncRequest::Prediction {
                fingerprint,
                prediction,
                features,
            } => self.submit_prediction(fingerprint, prediction, features).await,
            SyncRequest::UserAction {
                fingerprint,
                action,
                timestamp,
                prediction_id,
            } => {
                self.submit_user_action(fingerprint, *action, *timestamp, prediction_id.as_deref())
                    .await
            }
        }
    }
}
