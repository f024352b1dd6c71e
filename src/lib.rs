/// Smart Skip - Rust Implementation
///
/// Heuristic detection of intros, recaps, end credits and ads in streaming
/// video. Signal extractors feed rule-based predictors, an arbiter picks the
/// best class, and a learning store plus an adaptive threshold tune the
/// detector over time. Predictions are optionally shared through a sync gateway.

pub mod arbiter;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod learning;
pub mod predictors;
pub mod replay;
pub mod sync;
pub mod threshold;

// Re-export main types for easy access
pub use crate::arbiter::{arbitrate, AnalysisContext, AnalysisThrottle, Arbitration};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::detector::{AcceptedPrediction, ActionConsumer, Detector, DetectorStatistics, MediaSource, Settings};
pub use crate::error::{Result, SkipError};
pub use crate::features::{AudioFeatures, ContextFeatures, FeatureBundle, VisualFeatures};
pub use crate::learning::{LearningStatistics, LearningStore, UserAction};
pub use crate::predictors::{ContentType, PatternRegistry, Prediction, SuggestedAction};
pub use crate::replay::{run_trace, ReplayReport, Trace};
pub use crate::sync::{HttpSyncGateway, Platform, SyncGateway, VideoFingerprint};
pub use crate::threshold::ThresholdController;
