//! Node configuration: TOML file with env-var overrides for the keys
//! shared with the hub.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use guardian_dsp::gate::{GateConfig, GateProfile};
use guardian_radio::RadioParams;

use crate::{NodeError, Result};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity. Change this for each deployed unit.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Deployment coordinates, reported in telemetry.
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    /// Radio channel settings. Must match the hub.
    #[serde(default)]
    pub radio: RadioParams,
    /// `demo` or `production`.
    #[serde(default = "default_profile")]
    pub anomaly_profile: String,
    /// Production-profile energy threshold (0..1).
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,
    /// Gate hits required before transmitting.
    #[serde(default = "default_consecutive_hits")]
    pub consecutive_hits: u32,
    /// Quiet period after a transmission, milliseconds.
    #[serde(default = "default_tx_cooldown_ms")]
    pub tx_cooldown_ms: u64,
    /// Heartbeat period, milliseconds (30 000 live view, 300 000 low power).
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Post-heartbeat ACK receive window, milliseconds.
    #[serde(default = "default_ack_window_ms")]
    pub ack_window_ms: u64,
    /// Battery percentage that forces the low-battery path.
    #[serde(default = "default_low_battery_pct")]
    pub low_battery_pct: u8,
    /// Deep-sleep duration when the battery is critical, seconds.
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,
}

fn default_node_id() -> String {
    "GUARDIAN_001".to_string()
}

fn default_profile() -> String {
    "production".to_string()
}

fn default_energy_threshold() -> f32 {
    0.40
}

fn default_consecutive_hits() -> u32 {
    4
}

fn default_tx_cooldown_ms() -> u64 {
    30_000
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_ack_window_ms() -> u64 {
    2_000
}

fn default_low_battery_pct() -> u8 {
    5
}

fn default_sleep_secs() -> u64 {
    600
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            lat: 0.0,
            lon: 0.0,
            radio: RadioParams::default(),
            anomaly_profile: default_profile(),
            energy_threshold: default_energy_threshold(),
            consecutive_hits: default_consecutive_hits(),
            tx_cooldown_ms: default_tx_cooldown_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            ack_window_ms: default_ack_window_ms(),
            low_battery_pct: default_low_battery_pct(),
            sleep_secs: default_sleep_secs(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from the default file location, then apply env
    /// overrides. Falls back to defaults if no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| NodeError::Config(e.to_string()))?;
            toml::from_str(&content).map_err(|e| NodeError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("GUARDIAN_DATA_DIR") {
            return PathBuf::from(dir).join("node.toml");
        }
        PathBuf::from("node.toml")
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
        if let Ok(v) = std::env::var("ANOMALY_PROFILE") {
            self.anomaly_profile = v;
        }
        if let Some(v) = env_parse::<u32>("CONSECUTIVE_HITS") {
            self.consecutive_hits = v;
        }
        if let Some(v) = env_parse::<u64>("TX_COOLDOWN_MS") {
            self.tx_cooldown_ms = v;
        }
        if let Some(v) = env_parse::<u64>("HEARTBEAT_MS") {
            self.heartbeat_ms = v;
        }
    }

    /// Build the anomaly gate configuration.
    pub fn gate_config(&self) -> GateConfig {
        let profile =
            GateProfile::parse(&self.anomaly_profile).unwrap_or(GateProfile::Production);
        match profile {
            GateProfile::Demo => GateConfig {
                consecutive_hits: self.consecutive_hits,
                cooldown_ms: self.tx_cooldown_ms.min(10_000),
                ..GateConfig::demo()
            },
            GateProfile::Production => GateConfig {
                profile,
                energy_threshold: self.energy_threshold,
                consecutive_hits: self.consecutive_hits,
                cooldown_ms: self.tx_cooldown_ms,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Parse a sync-word value, accepting `0x12` or plain decimal.
fn env_byte(key: &str) -> Option<u8> {
    let raw = std::env::var(key).ok()?;
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}
