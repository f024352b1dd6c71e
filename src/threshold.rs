/// Adaptive acceptance threshold
///
/// Two paths adjust the same scalar: local self-tuning from recent prediction
/// confidences, and a one-shot adjustment from shared community statistics.
/// Later writes overwrite earlier ones.
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Hard bounds for any threshold value
pub const MIN_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 1.0;

/// Soft bounds the automatic paths respect
pub const TUNING_FLOOR: f64 = 0.5;
pub const TUNING_CEILING: f64 = 0.9;

pub const TUNING_STEP: f64 = 0.05;

/// A recent prediction counts as a success above this confidence
pub const SUCCESS_CONFIDENCE: f64 = 0.6;

/// Community statistics for one video, as reported by the sync gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedStatistics {
    pub total_predictions: u64,
    pub average_accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Lowered,
    Raised,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdController {
    confidence_threshold: f64,
}

impl Default for ThresholdController {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ThresholdController {
    pub fn new(initial: f64) -> Self {
        Self {
            confidence_threshold: clamp_threshold(initial),
        }
    }

    pub fn current(&self) -> f64 {
        self.confidence_threshold
    }

    /// Set the threshold directly; out-of-range values are clamped, never rejected
    pub fn set(&mut self, value: f64) {
        self.confidence_threshold = clamp_threshold(value);
    }

    /// Local self-tuning from the most recent prediction confidences.
    ///
    /// Does nothing until `total_entries` reaches `min_entries`.
    pub fn self_tune(&mut self, recent: &[f64], total_entries: usize, min_entries: usize) -> Adjustment {
        if total_entries < min_entries || recent.is_empty() {
            return Adjustment::Unchanged;
        }

        let n = recent.len() as f64;
        let average = recent.iter().sum::<f64>() / n;
        let success_rate = recent.iter().filter(|&&c| c > SUCCESS_CONFIDENCE).count() as f64 / n;
        let before = self.confidence_threshold;

        if success_rate > 0.7 && average > 0.5 {
            if before > TUNING_FLOOR {
                self.set((before - TUNING_STEP).max(TUNING_FLOOR));
            }
        } else if success_rate < 0.3 && before < TUNING_CEILING {
            self.set((before + TUNING_STEP).min(TUNING_CEILING));
        }

        let adjustment = classify(before, self.confidence_threshold);
        if adjustment != Adjustment::Unchanged {
            debug!(
                "🎚️ Threshold {:.2} -> {:.2} (success rate {:.2}, avg confidence {:.2})",
                before, self.confidence_threshold, success_rate, average
            );
        }
        adjustment
    }

    /// Adjustment from shared statistics; only ever lowers the threshold
    pub fn apply_shared(&mut self, stats: &SharedStatistics) -> Adjustment {
        if stats.total_predictions <= 10 || stats.average_accuracy <= 0.8 {
            return Adjustment::Unchanged;
        }

        let reduction = ((stats.average_accuracy - 0.8) * 0.5).min(0.1);
        let candidate = (self.confidence_threshold - reduction).max(TUNING_FLOOR);
        if candidate < self.confidence_threshold {
            info!(
                "🌐 Shared accuracy {:.2} over {} predictions: threshold {:.2} -> {:.2}",
                stats.average_accuracy, stats.total_predictions, self.confidence_threshold, candidate
            );
            self.set(candidate);
            Adjustment::Lowered
        } else {
            Adjustment::Unchanged
        }
    }
}

/// Clamp into [0.1, 1.0]; NaN falls back to the default
pub fn clamp_threshold(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_THRESHOLD
    } else {
        value.clamp(MIN_THRESHOLD, MAX_THRESHOLD)
    }
}

fn classify(before: f64, after: f64) -> Adjustment {
    if after < before {
        Adjustment::Lowered
    } else if after > before {
        Adjustment::Raised
    } else {
        Adjustment::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recent(high: usize, low: usize) -> Vec<f64> {
        let mut v = vec![0.7; high];
        v.extend(std::iter::repeat(0.5).take(low));
        v
    }

    #[test]
    fn test_set_clamps() {
        let mut controller = ThresholdController::default();
        controller.set(3.0);
        assert_eq!(controller.current(), 1.0);
        controller.set(-1.0);
        assert_eq!(controller.current(), 0.1);
        controller.set(f64::NAN);
        assert_eq!(controller.current(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_self_tune_lowers_on_success() {
        // 15 of 20 above 0.6, average 0.65
        let mut controller = ThresholdController::default();
        let window = recent(15, 5);
        assert_eq!(controller.self_tune(&window, 20, 10), Adjustment::Lowered);
        assert!((controller.current() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_self_tune_waits_for_entries() {
        let mut controller = ThresholdController::default();
        assert_eq!(controller.self_tune(&recent(9, 0), 9, 10), Adjustment::Unchanged);
        assert_eq!(controller.current(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_self_tune_floor_and_ceiling() {
        let mut controller = ThresholdController::new(0.5);
        assert_eq!(controller.self_tune(&recent(20, 0), 20, 10), Adjustment::Unchanged);
        assert_eq!(controller.current(), 0.5);

        let mut controller = ThresholdController::new(0.88);
        assert_eq!(controller.self_tune(&recent(0, 20), 20, 10), Adjustment::Raised);
        assert_eq!(controller.current(), 0.9);
        assert_eq!(controller.self_tune(&recent(0, 20), 20, 10), Adjustment::Unchanged);

        // A manual value outside the tuning band is not pulled back into it
        let mut controller = ThresholdController::new(0.3);
        controller.self_tune(&recent(20, 0), 20, 10);
        assert_eq!(controller.current(), 0.3);
    }

    #[test]
    fn test_middling_success_rate_keeps_threshold() {
        let mut controller = ThresholdController::default();
        assert_eq!(controller.self_tune(&recent(10, 10), 20, 10), Adjustment::Unchanged);
    }

    #[test]
    fn test_shared_adjustment() {
        let mut controller = ThresholdController::default();
        let stats = SharedStatistics {
            total_predictions: 50,
            average_accuracy: 0.9,
        };
        assert_eq!(controller.apply_shared(&stats), Adjustment::Lowered);
        assert!((controller.current() - 0.75).abs() < 1e-9);

        // Reduction capped at 0.1
        let mut controller = ThresholdController::default();
        controller.apply_shared(&SharedStatistics {
            total_predictions: 50,
            average_accuracy: 1.0,
        });
        assert!((controller.current() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_shared_adjustment_never_raises() {
        let mut controller = ThresholdController::new(0.4);
        let stats = SharedStatistics {
            total_predictions: 50,
            average_accuracy: 0.95,
        };
        assert_eq!(controller.apply_shared(&stats), Adjustment::Unchanged);
        assert_eq!(controller.current(), 0.4);

        let mut controller = ThresholdController::default();
        let few = SharedStatistics {
            total_predictions: 10,
            average_accuracy: 0.95,
        };
        assert_eq!(controller.apply_shared(&few), Adjustment::Unchanged);
    }
}
