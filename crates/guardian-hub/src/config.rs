//! Hub configuration: TOML file with env-var overrides for the
//! deployment-shared keys.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use guardian_classify::Mode;
use guardian_radio::RadioParams;

use crate::{HubError, Result};

/// Complete hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Data directory. Empty = `./data`.
    #[serde(default)]
    pub data_dir: String,
    /// Radio channel settings. Must match the nodes.
    #[serde(default)]
    pub radio: RadioParams,
    /// Reassembly session abandonment, seconds.
    #[serde(default = "default_session_timeout_s")]
    pub session_timeout_s: u64,
    /// Concurrent in-flight session cap.
    #[serde(default = "default_session_cap")]
    pub session_cap: usize,
    /// Accept DATA packets that arrive before their START.
    #[serde(default)]
    pub permissive_sessions: bool,
    /// Radio-to-reassembler channel depth.
    #[serde(default = "default_rx_queue_depth")]
    pub rx_queue_depth: usize,
    /// Classifier worker pool size.
    #[serde(default = "default_classify_workers")]
    pub classify_workers: usize,
    /// Deep-tier calls allowed per window.
    #[serde(default = "default_deep_rate_limit")]
    pub deep_rate_limit: u32,
    /// Deep-tier window length, seconds.
    #[serde(default = "default_deep_rate_window_s")]
    pub deep_rate_window_s: u64,
    /// Dispatch mode default.
    #[serde(default)]
    pub ai_mode: Mode,
    /// HTTP listen address.
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    /// Connectivity probe cadence, seconds.
    #[serde(default = "default_sync_interval_s")]
    pub sync_check_interval_s: u64,
    /// Run against a simulated radio when no hardware is attached.
    #[serde(default = "default_true")]
    pub simulate: bool,
    /// Fast cloud tier endpoint; empty disables the tier.
    #[serde(default)]
    pub fast_cloud_endpoint: String,
    #[serde(default)]
    pub fast_cloud_key: String,
    /// Deep cloud tier endpoint; empty disables the tier.
    #[serde(default)]
    pub deep_cloud_endpoint: String,
    #[serde(default)]
    pub deep_cloud_key: String,
    #[serde(default = "default_deep_model")]
    pub deep_cloud_model: String,
}

fn default_session_timeout_s() -> u64 {
    30
}

fn default_session_cap() -> usize {
    32
}

fn default_rx_queue_depth() -> usize {
    256
}

fn default_classify_workers() -> usize {
    2
}

fn default_deep_rate_limit() -> u32 {
    5
}

fn default_deep_rate_window_s() -> u64 {
    900
}

fn default_http_listen() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_sync_interval_s() -> u64 {
    30
}

fn default_deep_model() -> String {
    "gpt-4o".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            radio: RadioParams::default(),
            session_timeout_s: default_session_timeout_s(),
            session_cap: default_session_cap(),
            permissive_sessions: false,
            rx_queue_depth: default_rx_queue_depth(),
            classify_workers: default_classify_workers(),
            deep_rate_limit: default_deep_rate_limit(),
            deep_rate_window_s: default_deep_rate_window_s(),
            ai_mode: Mode::Auto,
            http_listen: default_http_listen(),
            sync_check_interval_s: default_sync_interval_s(),
            simulate: true,
            fast_cloud_endpoint: String::new(),
            fast_cloud_key: String::new(),
            deep_cloud_endpoint: String::new(),
            deep_cloud_key: String::new(),
            deep_cloud_model: default_deep_model(),
        }
    }
}

impl HubConfig {
    /// Load configuration from the default file location, then apply env
    /// overrides. Falls back to defaults if no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| HubError::Config(e.to_string()))?;
            toml::from_str(&content).map_err(|e| HubError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// The hub data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            if let Ok(dir) = std::env::var("GUARDIAN_DATA_DIR") {
                return PathBuf::from(dir);
            }
            PathBuf::from("data")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    /// Where reconstructed spectrogram PNGs land.
    pub fn spectrogram_dir(&self) -> PathBuf {
        self.data_dir().join("spectrograms")
    }

    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("GUARDIAN_DATA_DIR") {
            return PathBuf::from(dir).join("hub.toml");
        }
        PathBuf::from("hub.toml")
    }

    /// Apply the env-style override keys shared across the deployment.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<f32>("RADIO_FREQ_MHZ") {
            self.radio.freq_mhz = v;
        }
        if let Some(v) = env_parse::<u8>("RADIO_SF") {
            self.radio.spreading_factor = v;
        }
        if let Some(v) = env_byte("RADIO_SYNC_WORD") {
            self.radio.sync_word = v;
        }
        if let Some(v) = env_parse::<u64>("SESSION_TIMEOUT_S") {
            self.session_timeout_s = v;
        }
        if let Some(v) = env_parse::<u32>("DEEP_RATE_LIMIT") {
            self.deep_rate_limit = v;
        }
        if let Some(v) = env_parse::<u64>("DEEP_RATE_WINDOW_S") {
            self.deep_rate_window_s = v;
        }
        if let Ok(v) = std::env::var("AI_MODE") {
            if let Ok(mode) = v.parse::<Mode>() {
                self.ai_mode = mode;
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_byte(key: &str) -> Option<u8> {
    let raw = std::env::var(key).ok()?;
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.session_timeout_s, 30);
        assert_eq!(config.session_cap, 32);
        assert_eq!(config.classify_workers, 2);
        assert_eq!(config.deep_rate_limit, 5);
        assert_eq!(config.deep_rate_window_s, 900);
        assert_eq!(config.ai_mode, Mode::Auto);
        assert!(!config.permissive_sessions);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HubConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let parsed: HubConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.session_timeout_s, config.session_timeout_s);
        assert_eq!(parsed.ai_mode, config.ai_mode);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: HubConfig = toml::from_str("session_timeout_s = 60").expect("parse");
        assert_eq!(parsed.session_timeout_s, 60);
        assert_eq!(parsed.session_cap, 32);
    }
}
