/// Prediction arbitration and analysis cadence
use std::time::{Duration, Instant};
use tracing::debug;

use crate::features::FeatureBundle;
use crate::predictors::{self, PatternRegistry, Prediction};

/// Fixed floor a best prediction must reach to be reported as its class
pub const ARBITRATION_FLOOR: f64 = 0.5;

/// Default minimum time between two analysis runs
pub const DEFAULT_ANALYSIS_INTERVAL: Duration = Duration::from_millis(1000);

/// Detector state handed to components that need it, instead of a global handle
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub verbose_logging: bool,
}

/// Result of running every predictor over one bundle
#[derive(Debug, Clone)]
pub struct Arbitration {
    /// Winning prediction, or `unknown` when nothing reached the floor
    pub best: Prediction,
    /// Every class prediction in evaluation order
    pub candidates: [Prediction; 4],
}

/// Run all predictors and pick the strictly highest confidence.
///
/// Ties keep the earliest class in evaluation order (intro, recap, credits,
/// ad). A best confidence below the floor yields the neutral `unknown`.
pub fn arbitrate(bundle: &FeatureBundle, registry: &PatternRegistry, ctx: &AnalysisContext) -> Arbitration {
    let candidates = predictors::predict_all(bundle, registry);

    if ctx.verbose_logging {
        for candidate in &candidates {
            debug!(
                "🔎 {} confidence {:.2} at {:.1}s: {:?}",
                candidate.content_type, candidate.confidence, bundle.timestamp_seconds, candidate.reasoning
            );
        }
    }

    let mut best = &candidates[0];
    for candidate in &candidates[1..] {
        if candidate.confidence > best.confidence {
            best = candidate;
        }
    }

    let best = if best.confidence >= ARBITRATION_FLOOR {
        best.clone()
    } else {
        Prediction::unknown()
    };

    Arbitration { best, candidates }
}

/// Drops analysis triggers that arrive sooner than the interval after the last run
#[derive(Debug, Clone)]
pub struct AnalysisThrottle {
    interval: Duration,
    last_run: Option<Instant>,
}

impl Default for AnalysisThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_ANALYSIS_INTERVAL)
    }
}

impl AnalysisThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    /// Returns true and records the run when enough time has passed
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_run = Some(now);
                true
            }
        }
    }
}
