use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, SkipError};
use crate::predictors::{ContentType, Prediction};
use crate::threshold::SUCCESS_CONFIDENCE;

/// Snapshot layout version written to disk
const SNAPSHOT_VERSION: u32 = 1;

/// Quality label attached to each recorded observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    /// Confidence above the success cutoff
    High,
    Low,
    /// Manual action taken by the viewer
    UserCorrection,
}

/// Manual skip / correction actions reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    SkipIntro,
    SkipRecap,
    SkipCredits,
    SkipAd,
    NextEpisode,
    UndoSkip,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::SkipIntro => "skip_intro",
            UserAction::SkipRecap => "skip_recap",
            UserAction::SkipCredits => "skip_credits",
            UserAction::SkipAd => "skip_ad",
            UserAction::NextEpisode => "next_episode",
            UserAction::UndoSkip => "undo_skip",
        }
    }
}

impl std::str::FromStr for UserAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skip_intro" => Ok(UserAction::SkipIntro),
            "skip_recap" => Ok(UserAction::SkipRecap),
            "skip_credits" => Ok(UserAction::SkipCredits),
            "skip_ad" => Ok(UserAction::SkipAd),
            "next_episode" => Ok(UserAction::NextEpisode),
            "undo_skip" => Ok(UserAction::UndoSkip),
            other => Err(format!("unknown user action: {}", other)),
        }
    }
}

/// What a learning entry is keyed on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Prediction { content_type: ContentType },
    UserAction { action: UserAction },
}

/// One observation appended to an entry's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub recorded_at: DateTime<Utc>,
    pub quality: QualityLabel,
}

/// Historical record for one (type, rounded timestamp) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub kind: EntryKind,
    pub predictions: Vec<PredictionRecord>,
    pub confidence_history: Vec<f64>,
    /// Fraction of records not labelled `Low`
    pub accuracy: f64,
    /// Store-wide insertion order, used for oldest-first eviction
    pub sequence: u64,
}

impl LearningEntry {
    fn new(kind: EntryKind, sequence: u64) -> Self {
        Self {
            kind,
            predictions: Vec::new(),
            confidence_history: Vec::new(),
            accuracy: 0.0,
            sequence,
        }
    }

    fn push(&mut self, record: PredictionRecord) {
        self.confidence_history.push(record.confidence);
        self.predictions.push(record);
        let good = self
            .predictions
            .iter()
            .filter(|r| r.quality != QualityLabel::Low)
            .count();
        self.accuracy = good as f64 / self.predictions.len() as f64;
    }

    /// Reject entries that could not have been produced by the store
    fn validate(&self) -> std::result::Result<(), String> {
        if self.predictions.len() != self.confidence_history.len() {
            return Err("history lengths differ".to_string());
        }
        if self
            .confidence_history
            .iter()
            .any(|c| !c.is_finite() || !(0.0..=1.0).contains(c))
        {
            return Err("confidence out of range".to_string());
        }
        if !self.accuracy.is_finite() || !(0.0..=1.0).contains(&self.accuracy) {
            return Err("accuracy out of range".to_string());
        }
        Ok(())
    }
}

/// Size limits for the store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreLimits {
    pub max_entries: usize,
    pub trim_to: usize,
    /// Store-wide recent confidences kept for self-tuning
    pub recent_window: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            trim_to: 5_000,
            recent_window: 20,
        }
    }
}

impl StoreLimits {
    /// Repair limits that would break the size cap: `trim_to` must sit below
    /// `max_entries` and keep at least the newest entry
    pub fn sanitized(self) -> Self {
        let max_entries = self.max_entries.max(2);
        let trim_to = if self.trim_to == 0 || self.trim_to >= max_entries {
            max_entries / 2
        } else {
            self.trim_to
        };
        Self {
            max_entries,
            trim_to,
            recent_window: self.recent_window.max(1),
        }
    }
}

/// Learning statistics exported to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStatistics {
    pub total_entries: usize,
    pub counts_by_type: BTreeMap<String, usize>,
    pub accuracy_by_type: BTreeMap<String, f64>,
    pub user_actions: usize,
    pub confidence_threshold: f64,
    pub monitoring_active: bool,
    pub sample_keys: Vec<String>,
}

/// On-disk layout; entries are kept as raw JSON so one bad entry does not
/// take the rest of the store with it
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    next_sequence: u64,
    recent_confidences: Vec<f64>,
    entries: BTreeMap<String, serde_json::Value>,
}

/// Keyed history of predictions and user corrections
#[derive(Debug, Clone)]
pub struct LearningStore {
    entries: HashMap<String, LearningEntry>,
    recent_confidences: VecDeque<f64>,
    next_sequence: u64,
    limits: StoreLimits,
    path: Option<PathBuf>,
}

impl Default for LearningStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl LearningStore {
    /// Create an empty in-memory store
    pub fn new(limits: StoreLimits) -> Self {
        let sanitized = limits.sanitized();
        if sanitized != limits {
            debug!("Adjusted learning store limits {:?} to {:?}", limits, sanitized);
        }
        Self {
            entries: HashMap::new(),
            recent_confidences: VecDeque::new(),
            next_sequence: 0,
            limits: sanitized,
            path: None,
        }
    }

    /// Open a store backed by a JSON file, rehydrating it when present.
    ///
    /// A missing or unreadable file yields an empty store; corrupt entries are
    /// dropped individually.
    pub async fn open(path: PathBuf, limits: StoreLimits) -> Self {
        let mut store = match fs::read_to_string(&path).await {
            Ok(content) => match Self::from_json(&content, limits) {
                Ok(store) => {
                    info!("📚 Learning store rehydrated with {} entries from {}", store.len(), path.display());
                    store
                }
                Err(e) => {
                    warn!("Failed to parse learning store {}: {}, starting empty", path.display(), e);
                    Self::new(limits)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No learning store at {}, starting empty", path.display());
                Self::new(limits)
            }
            Err(e) => {
                warn!("Failed to read learning store {}: {}, starting empty", path.display(), e);
                Self::new(limits)
            }
        };
        store.path = Some(path);
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record the best prediction of an analysis tick
    pub fn record(&mut self, prediction: &Prediction, timestamp: f64) -> String {
        let key = entry_key(prediction.content_type.as_str(), timestamp);
        let quality = if prediction.confidence > SUCCESS_CONFIDENCE {
            QualityLabel::High
        } else {
            QualityLabel::Low
        };
        let record = PredictionRecord {
            confidence: prediction.confidence,
            reasoning: prediction.reasoning.clone(),
            recorded_at: Utc::now(),
            quality,
        };

        self.upsert(
            &key,
            EntryKind::Prediction {
                content_type: prediction.content_type,
            },
            record,
        );

        self.recent_confidences.push_back(prediction.confidence);
        while self.recent_confidences.len() > self.limits.recent_window {
            self.recent_confidences.pop_front();
        }

        key
    }

    /// Record a manual correction, keyed independently of predictions
    pub fn record_user_action(&mut self, action: UserAction, timestamp: f64) -> String {
        let key = entry_key("user_action", timestamp);
        let record = PredictionRecord {
            confidence: 1.0,
            reasoning: vec![format!("Viewer action: {}", action.as_str())],
            recorded_at: Utc::now(),
            quality: QualityLabel::UserCorrection,
        };
        self.upsert(&key, EntryKind::UserAction { action }, record);
        key
    }

    fn upsert(&mut self, key: &str, kind: EntryKind, record: PredictionRecord) {
        if !self.entries.contains_key(key) {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.entries
                .insert(key.to_string(), LearningEntry::new(kind, sequence));
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.push(record);
        }

        if self.entries.len() > self.limits.max_entries {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        let excess = self.entries.len().saturating_sub(self.limits.trim_to);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.sequence, key.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, key) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        info!("🧹 Learning store trimmed by {} entries to {}", excess, self.entries.len());
    }

    /// Most recent prediction confidences, oldest first
    pub fn recent_confidences(&self) -> Vec<f64> {
        self.recent_confidences.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&LearningEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys ordered newest first, truncated to `limit`
    pub fn sample_keys(&self, limit: usize) -> Vec<String> {
        let mut keys: Vec<(&u64, &String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (&entry.sequence, key))
            .collect();
        keys.sort_unstable_by(|a, b| b.0.cmp(a.0));
        keys.into_iter().take(limit).map(|(_, k)| k.clone()).collect()
    }

    /// Summarize the store for diagnostics
    pub fn summarize(&self, confidence_threshold: f64, monitoring_active: bool, sample_size: usize) -> LearningStatistics {
        let mut counts_by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut accuracy_sums: BTreeMap<String, f64> = BTreeMap::new();
        let mut user_actions = 0;

        for entry in self.entries.values() {
            match &entry.kind {
                EntryKind::Prediction { content_type } => {
                    let name = content_type.as_str().to_string();
                    *counts_by_type.entry(name.clone()).or_insert(0) += 1;
                    *accuracy_sums.entry(name).or_insert(0.0) += entry.accuracy;
                }
                EntryKind::UserAction { .. } => user_actions += 1,
            }
        }

        let accuracy_by_type = accuracy_sums
            .into_iter()
            .map(|(name, sum)| {
                let count = counts_by_type.get(&name).copied().unwrap_or(1).max(1);
                (name, sum / count as f64)
            })
            .collect();

        LearningStatistics {
            total_entries: self.entries.len(),
            counts_by_type,
            accuracy_by_type,
            user_actions,
            confidence_threshold,
            monitoring_active,
            sample_keys: self.sample_keys(sample_size),
        }
    }

    /// Drop every entry
    pub fn reset(&mut self) {
        self.entries.clear();
        self.recent_confidences.clear();
        self.next_sequence = 0;
        info!("🗑️ Learning store reset");
    }

    /// Serialize the store to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        let mut entries = BTreeMap::new();
        for (key, entry) in &self.entries {
            entries.insert(key.clone(), serde_json::to_value(entry)?);
        }
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            next_sequence: self.next_sequence,
            recent_confidences: self.recent_confidences(),
            entries,
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Rebuild a store from JSON, discarding entries that fail to parse or validate
    pub fn from_json(content: &str, limits: StoreLimits) -> Result<Self> {
        let snapshot: StoreSnapshot = serde_json::from_str(content)?;
        let mut store = Self::new(limits);
        let mut discarded = 0;

        for (key, value) in snapshot.entries {
            match parse_entry(&key, value) {
                Ok(entry) => {
                    store.entries.insert(key, entry);
                }
                Err(e) => {
                    warn!("Discarding learning entry: {}", e);
                    discarded += 1;
                }
            }
        }

        let max_sequence = store.entries.values().map(|e| e.sequence + 1).max().unwrap_or(0);
        store.next_sequence = snapshot.next_sequence.max(max_sequence);
        store.recent_confidences = snapshot
            .recent_confidences
            .into_iter()
            .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
            .collect();
        while store.recent_confidences.len() > store.limits.recent_window {
            store.recent_confidences.pop_front();
        }
        if store.entries.len() > store.limits.max_entries {
            store.evict_oldest();
        }

        if discarded > 0 {
            warn!("⚠️ Discarded {} corrupt learning entries", discarded);
        }
        Ok(store)
    }

    /// Merge entries from an exported store; existing keys are kept
    pub fn import_json(&mut self, content: &str) -> Result<usize> {
        let imported = Self::from_json(content, self.limits)?;
        let mut incoming: Vec<(String, LearningEntry)> = imported.entries.into_iter().collect();
        incoming.sort_by_key(|(_, entry)| entry.sequence);

        let mut added = 0;
        for (key, mut entry) in incoming {
            if self.entries.contains_key(&key) {
                continue;
            }
            entry.sequence = self.next_sequence;
            self.next_sequence += 1;
            self.entries.insert(key, entry);
            added += 1;
        }
        if self.entries.len() > self.limits.max_entries {
            self.evict_oldest();
        }
        info!("📥 Imported {} learning entries", added);
        Ok(added)
    }

    /// Write the store to its backing file, if it has one
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, self.to_json()?).await?;
        debug!("💾 Learning store saved ({} entries)", self.entries.len());
        Ok(())
    }
}

fn entry_key(prefix: &str, timestamp: f64) -> String {
    format!("{}_{}", prefix, timestamp.round() as i64)
}

fn parse_entry(key: &str, value: serde_json::Value) -> Result<LearningEntry> {
    let entry: LearningEntry = serde_json::from_value(value).map_err(|e| SkipError::CorruptEntry {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    entry.validate().map_err(|reason| SkipError::CorruptEntry {
        key: key.to_string(),
        reason,
    })?;
    Ok(entry)
}
