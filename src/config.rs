use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::models::SourceStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_lock_path")]
    pub lock_path: String,

    #[serde(default = "default_agent_url")]
    pub extraction_agent_url: String,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,

    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub sources: Vec<SourceDef>,
}

/// Duplicate-detection thresholds. Loaded once per cycle as an immutable
/// snapshot; mid-cycle config edits never affect an in-progress run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Monotonic version counter so operators can tell which snapshot a run used.
    #[serde(default = "default_detection_version")]
    pub version: u64,

    #[serde(default = "default_content_threshold")]
    pub content_threshold: f64,

    #[serde(default = "default_title_threshold")]
    pub title_threshold: f64,

    #[serde(default = "default_time_proximity_hours")]
    pub time_proximity_hours: i64,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    #[serde(default = "default_true")]
    pub enable_fingerprint: bool,

    #[serde(default = "default_true")]
    pub enable_title_similarity: bool,

    #[serde(default = "default_true")]
    pub enable_time_proximity: bool,
}

/// A configured news source. Synced into the sources table at startup,
/// matched by slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    pub slug: String,
    pub name: String,
    pub home_url: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_source_status")]
    pub status: SourceStatus,
    #[serde(default = "default_cadence")]
    pub cadence: String,
}

fn data_dir() -> PathBuf {
    let dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newswatch");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn default_db_path() -> String {
    data_dir().join("newswatch.db").to_string_lossy().to_string()
}

fn default_lock_path() -> String {
    data_dir().join("cycle.lock").to_string_lossy().to_string()
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8090/extract".to_string()
}

fn default_interval_hours() -> u32 {
    4
}

fn default_source_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent_sources() -> usize {
    4
}

fn default_detection_version() -> u64 {
    1
}

fn default_content_threshold() -> f64 {
    0.80
}

fn default_title_threshold() -> f64 {
    0.85
}

fn default_time_proximity_hours() -> i64 {
    24
}

fn default_lookback_days() -> i64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "de".to_string()
}

fn default_source_status() -> SourceStatus {
    SourceStatus::Active
}

fn default_cadence() -> String {
    "daily".to_string()
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            version: default_detection_version(),
            content_threshold: default_content_threshold(),
            title_threshold: default_title_threshold(),
            time_proximity_hours: default_time_proximity_hours(),
            lookback_days: default_lookback_days(),
            enable_fingerprint: true,
            enable_title_similarity: true,
            enable_time_proximity: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lock_path: default_lock_path(),
            extraction_agent_url: default_agent_url(),
            interval_hours: default_interval_hours(),
            source_timeout_secs: default_source_timeout_secs(),
            max_concurrent_sources: default_max_concurrent_sources(),
            detection: DetectionConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newswatch")
            .join("config.toml")
    }

    /// Fatal at startup only, never mid-cycle.
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        if self.interval_hours == 0 {
            return Err(AppError::Config("interval_hours must be > 0".into()));
        }
        if self.max_concurrent_sources == 0 {
            return Err(AppError::Config(
                "max_concurrent_sources must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.content_threshold) {
            return Err(AppError::Config(format!(
                "content_threshold {} out of range [0, 1]",
                self.content_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.title_threshold) {
            return Err(AppError::Config(format!(
                "title_threshold {} out of range [0, 1]",
                self.title_threshold
            )));
        }
        if self.time_proximity_hours <= 0 {
            return Err(AppError::Config(
                "time_proximity_hours must be > 0".into(),
            ));
        }
        if self.lookback_days <= 0 {
            return Err(AppError::Config("lookback_days must be > 0".into()));
        }
        Ok(())
    }
}
