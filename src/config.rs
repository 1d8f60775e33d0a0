//! Configuration management.
//!
//! Runtime configuration is loaded from a JSON file, with every nested
//! struct carrying spec-mandated defaults so `AppConfig::default()` alone
//! is a valid, runnable configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub sources: Vec<SourceConfig>,
    pub window: WindowConfig,
    pub thresholds: ThresholdsConfig,
    pub clip: ClipConfig,
    pub filters: FiltersConfig,
    pub actions: ActionsConfig,
    pub supervisor: SupervisorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            window: WindowConfig::default(),
            thresholds: ThresholdsConfig::default(),
            clip: ClipConfig::default(),
            filters: FiltersConfig::default(),
            actions: ActionsConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults with
    /// a warning on missing file or parse error.
    ///
    /// `validate-config` should use [`AppConfig::load_strict`] instead,
    /// since silent fallback would hide a real misconfiguration there.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] failed to parse JSON from {:?}: {}. using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] failed to read {:?}: {}. using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load and validate strictly: any missing file, parse error, or
    /// semantically invalid value is a hard `ConfigError`.
    pub fn load_strict<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path).map_err(|_| ConfigError::NotFound {
            path: path.as_ref().display().to_string(),
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|err| ConfigError::ParseFailed {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.length_ms == 0 || self.window.hop_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window".to_string(),
                reason: "lengthMs and hopMs must be > 0".to_string(),
            });
        }
        if self.window.hop_ms > self.window.length_ms {
            return Err(ConfigError::InvalidValue {
                field: "window.hopMs".to_string(),
                reason: "hopMs must not exceed lengthMs".to_string(),
            });
        }
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sources[].id".to_string(),
                    reason: "source id must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Soundcard,
    Rtsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    pub device_or_url: String,
    #[serde(default)]
    pub transport: Option<RtspTransport>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub length_ms: u32,
    pub hop_ms: u32,
    pub capture_retention_sec: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length_ms: 3000,
            hop_ms: 1500,
            capture_retention_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub base_default: f32,
    #[serde(default)]
    pub per_species: std::collections::HashMap<String, f32>,
    pub bump_step: f32,
    pub max_bump: f32,
    pub decay_half_life_sec: u32,
    pub dedup_cooldown_sec: u32,
    pub bark_threshold: f32,
    pub bark_suppress_windows: u32,
    #[serde(default = "default_bark_labels")]
    pub bark_labels: Vec<String>,
}

fn default_bark_labels() -> Vec<String> {
    vec!["Dog".to_string(), "Dog_bark".to_string()]
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            base_default: 0.6,
            per_species: std::collections::HashMap::new(),
            bump_step: 0.05,
            max_bump: 0.3,
            decay_half_life_sec: 600,
            dedup_cooldown_sec: 30,
            bark_threshold: 0.7,
            // 15s default at 1.5s hop == 10 windows.
            bark_suppress_windows: 10,
            bark_labels: default_bark_labels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipConfig {
    pub enabled: bool,
    pub pre_roll_sec: f32,
    pub post_roll_sec: f32,
    pub directory: String,
    pub target_sample_rate: u32,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pre_roll_sec: 3.0,
            post_roll_sec: 2.0,
            directory: "clips".to_string(),
            target_sample_rate: 48_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyWindowKind {
    NightOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyRule {
    pub species_scientific: String,
    pub window: PrivacyWindowKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub include_list: Vec<String>,
    #[serde(default)]
    pub exclude_list: Vec<String>,
    #[serde(default)]
    pub privacy_rules: Vec<PrivacyRule>,
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_url: String,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: "mqtt://localhost:1883".to_string(),
            topic_prefix: "birdnet/detections/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirdWeatherConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub station_id: String,
    pub include_clip: bool,
}

impl Default for BirdWeatherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://app.birdweather.com/api/v1".to_string(),
            station_id: String::new(),
            include_clip: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub webhook_url: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    pub enabled: bool,
    pub bind_addr: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub birdweather: BirdWeatherConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub sse: SseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub backoff_initial_ms: u64,
    pub backoff_cap_ms: u64,
    pub silence_deadline_sec: u64,
    pub shutdown_drain_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: 1_000,
            backoff_cap_ms: 60_000,
            silence_deadline_sec: 60,
            shutdown_drain_ms: 5_000,
        }
    }
}
