use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::learning::StoreLimits;
use crate::threshold::{clamp_threshold, DEFAULT_THRESHOLD};

/// Configuration for the skip detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Analysis and acceptance settings
    pub detector: DetectorConfig,

    /// Learning store settings
    pub learning: LearningConfig,

    /// Remote sync settings
    pub sync: SyncConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Start with detection enabled
    pub enabled: bool,

    /// Initial adaptive acceptance threshold
    pub confidence_threshold: f64,

    /// Minimum time between analysis runs (milliseconds)
    pub analysis_interval_ms: u64,

    /// Analysis raster width
    pub frame_width: u32,

    /// Analysis raster height
    pub frame_height: u32,

    /// Log every predictor's reasoning on each tick
    pub verbose_logging: bool,

    /// Keep analysing while the media is paused
    pub analyze_while_paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Local backup file for the learning store
    pub store_path: Option<PathBuf>,

    /// Entry count that triggers eviction
    pub max_entries: usize,

    /// Entry count kept after eviction
    pub trim_to: usize,

    /// Recent predictions considered by self-tuning
    pub recent_window: usize,

    /// Entries required before self-tuning starts
    pub min_entries_for_tuning: usize,

    /// Known patterns kept per content class
    pub max_known_patterns: usize,

    /// Keys included in statistics for diagnostics
    pub sample_key_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Enable the remote sync gateway
    pub enabled: bool,

    /// Gateway base URL
    pub base_url: Option<String>,

    /// Bearer token for the gateway
    pub api_key: Option<String>,

    /// Request timeout (seconds)
    pub timeout_seconds: u64,

    /// Attempts per submission before buffering
    pub max_retries: u32,

    /// First retry delay, doubled per attempt (milliseconds)
    pub retry_base_delay_ms: u64,

    /// Offline buffer capacity
    pub max_pending: usize,

    /// Dispatcher queue capacity
    pub queue_capacity: usize,

    /// Delay between reconnect attempts while offline (milliseconds)
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter level
    pub level: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: DEFAULT_THRESHOLD,
            analysis_interval_ms: 1000,
            frame_width: 160,
            frame_height: 90,
            verbose_logging: false,
            analyze_while_paused: false,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_entries: 10_000,
            trim_to: 5_000,
            recent_window: 20,
            min_entries_for_tuning: 10,
            max_known_patterns: 500,
            sample_key_count: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            timeout_seconds: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            max_pending: 1000,
            queue_capacity: 256,
            reconnect_interval_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            learning: LearningConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }
}

impl DetectorConfig {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }
}

impl LearningConfig {
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_entries: self.max_entries,
            trim_to: self.trim_to,
            recent_window: self.recent_window,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let mut config_paths = vec![
            PathBuf::from("smart-skip.toml"),
            PathBuf::from("config/smart-skip.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            config_paths.push(PathBuf::from(home).join(".config/smart-skip/config.toml"));
        }

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(Self::from_env())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config.with_env_overrides())
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(threshold) = std::env::var("SMART_SKIP_THRESHOLD") {
            if let Ok(value) = threshold.parse() {
                self.detector.confidence_threshold = value;
            }
        }

        if let Ok(store) = std::env::var("SMART_SKIP_STORE") {
            self.learning.store_path = Some(PathBuf::from(store));
        }

        if let Ok(url) = std::env::var("SMART_SKIP_SYNC_URL") {
            self.sync.base_url = Some(url);
            self.sync.enabled = true;
        }

        if let Ok(api_key) = std::env::var("SMART_SKIP_SYNC_API_KEY") {
            self.sync.api_key = Some(api_key);
        }

        if let Ok(log_level) = std::env::var("SMART_SKIP_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        if let Ok(verbose) = std::env::var("SMART_SKIP_VERBOSE") {
            self.detector.verbose_logging = matches!(verbose.as_str(), "1" | "true" | "yes");
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration.
    ///
    /// Threshold values are clamped into range rather than rejected.
    pub fn validate(&mut self) -> Result<()> {
        self.detector.confidence_threshold = clamp_threshold(self.detector.confidence_threshold);

        if self.detector.analysis_interval_ms == 0 {
            return Err(anyhow!("analysis_interval_ms must be greater than 0"));
        }

        if self.detector.frame_width == 0 || self.detector.frame_height == 0 {
            return Err(anyhow!("frame dimensions must be greater than 0"));
        }

        if self.learning.trim_to == 0 || self.learning.trim_to >= self.learning.max_entries {
            return Err(anyhow!(
                "trim_to ({}) must be between 1 and max_entries ({})",
                self.learning.trim_to,
                self.learning.max_entries
            ));
        }

        if self.learning.recent_window == 0 {
            return Err(anyhow!("recent_window must be greater than 0"));
        }

        if self.sync.enabled && self.sync.base_url.is_none() {
            return Err(anyhow!("base_url required when sync is enabled"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Repair values the detector cannot run with, without failing.
    ///
    /// Used when a config reaches the detector without going through `validate`.
    pub fn normalize(&mut self) {
        let defaults = DetectorConfig::default();
        self.detector.confidence_threshold = clamp_threshold(self.detector.confidence_threshold);
        if self.detector.analysis_interval_ms == 0 {
            self.detector.analysis_interval_ms = defaults.analysis_interval_ms;
        }
        if self.detector.frame_width == 0 || self.detector.frame_height == 0 {
            self.detector.frame_width = defaults.frame_width;
            self.detector.frame_height = defaults.frame_height;
        }

        let limits = self.learning.store_limits().sanitized();
        self.learning.max_entries = limits.max_entries;
        self.learning.trim_to = limits.trim_to;
        self.learning.recent_window = limits.recent_window;
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Smart Skip Configuration:\n\
            - Enabled: {}\n\
            - Confidence Threshold: {:.2}\n\
            - Analysis Interval: {}ms\n\
            - Analysis Raster: {}x{}\n\
            - Learning Store: {}\n\
            - Max Entries: {} (trim to {})\n\
            - Sync: {}",
            self.detector.enabled,
            self.detector.confidence_threshold,
            self.detector.analysis_interval_ms,
            self.detector.frame_width,
            self.detector.frame_height,
            self.learning
                .store_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string()),
            self.learning.max_entries,
            self.learning.trim_to,
            if self.sync.enabled {
                self.sync.base_url.clone().unwrap_or_default()
            } else {
                "disabled".to_string()
            }
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.config.detector.confidence_threshold = threshold;
        self
    }

    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.config.learning.store_path = Some(path);
        self
    }

    pub fn with_sync_url(mut self, url: String) -> Self {
        self.config.sync.base_url = Some(url);
        self.config.sync.enabled = true;
        self
    }

    pub fn with_store_limits(mut self, max_entries: usize, trim_to: usize) -> Self {
        self.config.learning.max_entries = max_entries;
        self.config.learning.trim_to = trim_to;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.detector.verbose_logging = verbose;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
