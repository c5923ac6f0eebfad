use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variables that take precedence over the config file.
pub mod env {
    pub const ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
    pub const SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const REGION: &str = "AWS_REGION";
    pub const BUCKET: &str = "VOICEVAULT_BUCKET";
}

/// Process configuration. Built once at startup and handed to every
/// component that needs a piece of it; nothing reads settings ad hoc.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Stop recording after this many seconds. 0 disables the timer.
    pub duration_seconds: u64,
    /// Join attempts before giving up. 0 means the default of 5.
    pub max_join_attempts: u32,
    /// Base unit for the linear join backoff.
    pub join_backoff_ms: u64,
    /// How often the occupancy monitor polls channel membership.
    pub occupancy_poll_ms: u64,
    /// Local staging root; each channel gets `<records_dir>/<channel_id>/`.
    pub records_dir: PathBuf,
    /// Container written per speaker.
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// `ogg` keeps the Opus packets as received; `wav` expects decoded PCM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Ogg,
    Wav,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub region: String,
    pub bucket: String,
    /// Custom S3-compatible endpoint (MinIO, R2, ...). Uses path-style addressing.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Validity window of generated share links.
    pub link_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on concurrent uploads and link generations.
    pub max_concurrency: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 0,
            max_join_attempts: 5,
            join_backoff_ms: 1000,
            occupancy_poll_ms: 1000,
            records_dir: PathBuf::from(global::RECORDS_DIR),
            format: AudioFormat::Ogg,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            bucket: String::new(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            link_ttl_seconds: 15 * 60,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

impl RecordingConfig {
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_seconds > 0).then(|| Duration::from_secs(self.duration_seconds))
    }

    pub fn join_backoff(&self) -> Duration {
        Duration::from_millis(self.join_backoff_ms)
    }

    pub fn occupancy_poll(&self) -> Duration {
        Duration::from_millis(self.occupancy_poll_ms.max(1))
    }
}

impl StorageConfig {
    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.link_ttl_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            let config = Self::load_from(&config_path)?;
            info!("Loaded config from {:?}", config_path);
            config
        } else {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Credentials and bucket placement from the environment win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = non_empty(env::ACCESS_KEY) {
            self.storage.access_key = Some(value);
        }
        if let Some(value) = non_empty(env::SECRET_KEY) {
            self.storage.secret_key = Some(value);
        }
        if let Some(value) = non_empty(env::REGION) {
            self.storage.region = value;
        }
        if let Some(value) = non_empty(env::BUCKET) {
            self.storage.bucket = value;
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
