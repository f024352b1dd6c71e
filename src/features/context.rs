use super::ContextFeatures;

/// Progress below which playback counts as the beginning
pub const BEGINNING_PROGRESS: f64 = 0.1;

/// Progress above which playback counts as the end
pub const END_PROGRESS: f64 = 0.85;

/// Intro window: first two minutes and first 5% of the episode
pub const INTRO_WINDOW_SECONDS: f64 = 120.0;
pub const INTRO_PROGRESS: f64 = 0.05;

/// Credits window: last 10% or last three minutes
pub const CREDITS_PROGRESS: f64 = 0.9;
pub const CREDITS_REMAINING_SECONDS: f64 = 180.0;

/// Playback before this point is a clip-start transient and is never analysed
pub const MIN_ANALYSIS_TIME_SECONDS: f64 = 1.0;

/// Derive timing features from the playback position.
///
/// Returns `None` when the duration is unknown (missing, NaN, infinite or
/// non-positive) or when playback has not yet passed one second.
pub fn extract_context(current_time: f64, duration: Option<f64>) -> Option<ContextFeatures> {
    let duration = duration.filter(|d| d.is_finite() && *d > 0.0)?;
    if !current_time.is_finite() || current_time < MIN_ANALYSIS_TIME_SECONDS {
        return None;
    }

    let progress = (current_time / duration).clamp(0.0, 1.0);
    let remaining = duration - current_time;

    Some(ContextFeatures {
        episode_progress: progress,
        is_beginning: progress < BEGINNING_PROGRESS,
        is_middle: (BEGINNING_PROGRESS..=END_PROGRESS).contains(&progress),
        is_end: progress > END_PROGRESS,
        time_in_episode_seconds: current_time,
        remaining_seconds: remaining,
        is_likely_intro: current_time < INTRO_WINDOW_SECONDS && progress < INTRO_PROGRESS,
        is_likely_credits: progress > CREDITS_PROGRESS || remaining < CREDITS_REMAINING_SECONDS,
    })
}
