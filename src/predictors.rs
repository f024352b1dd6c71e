/// Fixed weighted-rule predictors, one per content class
///
/// Each predictor adds up independent evidence items, clamps the sum to
/// [0, 1] and records a reason per contributing item. Predictors never
/// mutate state, so the same bundle and registry always give the same answer.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

use crate::features::FeatureBundle;

/// Content classes the detector can recognise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Intro,
    Recap,
    Credits,
    Ad,
    Unknown,
}

impl ContentType {
    /// Evaluation order; earlier classes win confidence ties
    pub const PREDICTABLE: [ContentType; 4] = [
        ContentType::Intro,
        ContentType::Recap,
        ContentType::Credits,
        ContentType::Ad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Intro => "intro",
            ContentType::Recap => "recap",
            ContentType::Credits => "credits",
            ContentType::Ad => "ad",
            ContentType::Unknown => "unknown",
        }
    }

    /// Confidence a class must exceed before it suggests skipping
    pub fn skip_threshold(&self) -> f64 {
        match self {
            ContentType::Intro | ContentType::Credits => 0.7,
            ContentType::Recap | ContentType::Ad => 0.6,
            ContentType::Unknown => f64::INFINITY,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intro" => Ok(ContentType::Intro),
            "recap" => Ok(ContentType::Recap),
            "credits" => Ok(ContentType::Credits),
            "ad" => Ok(ContentType::Ad),
            "unknown" => Ok(ContentType::Unknown),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Skip,
    None,
}

/// Output of one predictor (or of the arbiter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub content_type: ContentType,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub suggested_action: SuggestedAction,
}

impl Prediction {
    /// Neutral prediction used when nothing clears the arbitration floor
    pub fn unknown() -> Self {
        Self {
            content_type: ContentType::Unknown,
            confidence: 0.0,
            reasoning: Vec::new(),
            suggested_action: SuggestedAction::None,
        }
    }

    fn from_evidence(content_type: ContentType, evidence: Evidence) -> Self {
        // Weights are given to two decimals; rounding keeps 0.4 + 0.2 at 0.6
        let confidence = ((evidence.score * 1e6).round() / 1e6).clamp(0.0, 1.0);
        let suggested_action = if confidence > content_type.skip_threshold() {
            SuggestedAction::Skip
        } else {
            SuggestedAction::None
        };
        Self {
            content_type,
            confidence,
            reasoning: evidence.reasons,
            suggested_action,
        }
    }
}

/// Additive evidence accumulator
#[derive(Default)]
struct Evidence {
    score: f64,
    reasons: Vec<String>,
}

impl Evidence {
    fn add(&mut self, holds: bool, weight: f64, reason: &str) {
        if holds {
            self.score += weight;
            self.reasons.push(reason.to_string());
        }
    }
}

/// Minimum source confidence for a pattern to enter the registry
pub const PATTERN_CONFIDENCE_FLOOR: f64 = 0.7;

/// Default per-class registry capacity
pub const DEFAULT_MAX_PATTERNS: usize = 500;

/// Known audio fingerprints and visual patterns, per content class.
///
/// Sets are bounded; once a class is full, further patterns are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRegistry {
    audio: HashMap<ContentType, BTreeSet<String>>,
    visual: HashMap<ContentType, BTreeSet<String>>,
    #[serde(default = "default_max_patterns")]
    max_per_class: usize,
}

fn default_max_patterns() -> usize {
    DEFAULT_MAX_PATTERNS
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATTERNS)
    }
}

/// Registry sizes reported in statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternCounts {
    pub audio: usize,
    pub visual: usize,
}

impl PatternRegistry {
    pub fn new(max_per_class: usize) -> Self {
        Self {
            audio: HashMap::new(),
            visual: HashMap::new(),
            max_per_class,
        }
    }

    /// Register an audio fingerprint observed with the given source confidence.
    ///
    /// Returns true when the fingerprint was newly inserted.
    pub fn add_audio(&mut self, content_type: ContentType, fingerprint: &str, confidence: f64) -> bool {
        Self::insert(&mut self.audio, self.max_per_class, content_type, fingerprint, confidence)
    }

    pub fn add_visual(&mut self, content_type: ContentType, pattern: &str, confidence: f64) -> bool {
        Self::insert(&mut self.visual, self.max_per_class, content_type, pattern, confidence)
    }

    pub fn knows_audio(&self, content_type: ContentType, fingerprint: &str) -> bool {
        self.audio
            .get(&content_type)
            .map_or(false, |set| set.contains(fingerprint))
    }

    pub fn counts(&self) -> PatternCounts {
        PatternCounts {
            audio: self.audio.values().map(BTreeSet::len).sum(),
            visual: self.visual.values().map(BTreeSet::len).sum(),
        }
    }

    pub fn clear(&mut self) {
        self.audio.clear();
        self.visual.clear();
    }

    fn insert(
        sets: &mut HashMap<ContentType, BTreeSet<String>>,
        max_per_class: usize,
        content_type: ContentType,
        pattern: &str,
        confidence: f64,
    ) -> bool {
        if confidence <= PATTERN_CONFIDENCE_FLOOR
            || pattern.is_empty()
            || content_type == ContentType::Unknown
        {
            return false;
        }
        let set = sets.entry(content_type).or_default();
        if set.len() >= max_per_class && !set.contains(pattern) {
            debug!("Pattern registry full for {}, ignoring new pattern", content_type);
            return false;
        }
        set.insert(pattern.to_string())
    }
}

pub fn predict_intro(bundle: &FeatureBundle, registry: &PatternRegistry) -> Prediction {
    let mut evidence = Evidence::default();

    evidence.add(
        bundle.context.is_likely_intro,
        0.4,
        "Timing suggests intro (first two minutes)",
    );
    if let Some(audio) = &bundle.audio {
        evidence.add(
            audio.tempo_bpm > 0.0 && audio.energy > 50.0,
            0.2,
            "Rhythmic, energetic audio typical of theme music",
        );
        evidence.add(
            registry.knows_audio(ContentType::Intro, &audio.fingerprint),
            0.3,
            "Audio fingerprint matches a known intro",
        );
    }
    if let Some(visual) = &bundle.visual {
        evidence.add(
            visual.has_text && visual.text_probability > 0.7,
            0.15,
            "On-screen text detected (title card)",
        );
        evidence.add(visual.scene_changed, 0.1, "Scene change detected");
    }

    Prediction::from_evidence(ContentType::Intro, evidence)
}

pub fn predict_recap(bundle: &FeatureBundle, _registry: &PatternRegistry) -> Prediction {
    let mut evidence = Evidence::default();

    let t = bundle.context.time_in_episode_seconds;
    evidence.add(
        t > 30.0 && t < 300.0,
        0.3,
        "Timing suggests recap (30s to 5min into the episode)",
    );
    if let Some(audio) = &bundle.audio {
        evidence.add(audio.is_silent, 0.1, "Quiet audio between segments");
    }
    if let Some(visual) = &bundle.visual {
        evidence.add(visual.scene_changed, 0.2, "Rapid scene changes typical of recaps");
    }

    Prediction::from_evidence(ContentType::Recap, evidence)
}

pub fn predict_credits(bundle: &FeatureBundle, _registry: &PatternRegistry) -> Prediction {
    let mut evidence = Evidence::default();

    evidence.add(
        bundle.context.is_likely_credits,
        0.5,
        "Timing suggests end credits",
    );
    if let Some(visual) = &bundle.visual {
        evidence.add(visual.has_text, 0.3, "On-screen text detected (credit roll)");
    }
    if let Some(audio) = &bundle.audio {
        evidence.add(
            audio.energy > 30.0 && audio.tempo_bpm > 0.0,
            0.2,
            "Music playing over credits",
        );
    }

    Prediction::from_evidence(ContentType::Credits, evidence)
}

pub fn predict_ad(bundle: &FeatureBundle, _registry: &PatternRegistry) -> Prediction {
    let mut evidence = Evidence::default();

    if let Some(audio) = &bundle.audio {
        evidence.add(audio.energy > 80.0, 0.2, "Loud audio typical of ads");
    }
    if let Some(visual) = &bundle.visual {
        evidence.add(visual.brightness > 150.0, 0.1, "Bright, saturated picture");
        evidence.add(visual.scene_changed, 0.2, "Fast cuts typical of ads");
    }

    Prediction::from_evidence(ContentType::Ad, evidence)
}

/// Run every class predictor in evaluation order
pub fn predict_all(bundle: &FeatureBundle, registry: &PatternRegistry) -> [Prediction; 4] {
    [
        predict_intro(bundle, registry),
        predict_recap(bundle, registry),
        predict_credits(bundle, registry),
        predict_ad(bundle, registry),
    ]
}
