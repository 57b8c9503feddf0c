//! Channel parameters, fixed at both endpoints.

use serde::{Deserialize, Serialize};

/// LoRa channel configuration. The defaults are the deployed network
/// settings; a hub and its nodes must agree on every field.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RadioParams {
    /// Carrier frequency in MHz (915.0 for the Americas, 868.0 where
    /// regulation requires).
    #[serde(default = "default_freq")]
    pub freq_mhz: f32,
    /// Bandwidth in kHz.
    #[serde(default = "default_bandwidth")]
    pub bandwidth_khz: f32,
    /// Spreading factor (7..=12).
    #[serde(default = "default_sf")]
    pub spreading_factor: u8,
    /// Coding rate denominator (5 means 4/5).
    #[serde(default = "default_cr")]
    pub coding_rate: u8,
    /// Preamble length in symbols.
    #[serde(default = "default_preamble")]
    pub preamble_len: u16,
    /// Private network sync word.
    #[serde(default = "default_sync_word")]
    pub sync_word: u8,
    /// Transmit power in dBm.
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: i8,
    /// Hardware CRC on every packet.
    #[serde(default = "default_true")]
    pub crc: bool,
}

fn default_freq() -> f32 {
    915.0
}

fn default_bandwidth() -> f32 {
    125.0
}

fn default_sf() -> u8 {
    10
}

fn default_cr() -> u8 {
    5
}

fn default_preamble() -> u16 {
    8
}

fn default_sync_word() -> u8 {
    0x12
}

fn default_tx_power() -> i8 {
    14
}

fn default_true() -> bool {
    true
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            freq_mhz: default_freq(),
            bandwidth_khz: default_bandwidth(),
            spreading_factor: default_sf(),
            coding_rate: default_cr(),
            preamble_len: default_preamble(),
            sync_word: default_sync_word(),
            tx_power_dbm: default_tx_power(),
            crc: true,
        }
    }
}

impl RadioParams {
    /// Approximate time on air for a payload at these settings, in
    /// milliseconds. Used for pacing between packets of a transmission
    /// episode.
    pub fn time_on_air_ms(&self, payload_len: usize) -> u64 {
        // Symbol duration = 2^SF / BW.
        let symbol_ms = (1u64 << self.spreading_factor) as f64 / self.bandwidth_khz as f64;
        let de = if self.spreading_factor >= 11 { 1.0 } else { 0.0 };
        let cr = (self.coding_rate - 4) as f64;
        let numerator = 8.0 * payload_len as f64 - 4.0 * self.spreading_factor as f64
            + 28.0
            + if self.crc { 16.0 } else { 0.0 };
        let denominator = 4.0 * (self.spreading_factor as f64 - 2.0 * de);
        let payload_symbols = 8.0 + ((numerator / denominator).ceil() * (cr + 4.0)).max(0.0);
        let preamble_symbols = self.preamble_len as f64 + 4.25;
        ((preamble_symbols + payload_symbols) * symbol_ms).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let p = RadioParams::default();
        assert_eq!(p.freq_mhz, 915.0);
        assert_eq!(p.bandwidth_khz, 125.0);
        assert_eq!(p.spreading_factor, 10);
        assert_eq!(p.coding_rate, 5);
        assert_eq!(p.preamble_len, 8);
        assert_eq!(p.sync_word, 0x12);
        assert_eq!(p.tx_power_dbm, 14);
        assert!(p.crc);
    }

    #[test]
    fn test_time_on_air_scales_with_payload() {
        let p = RadioParams::default();
        let small = p.time_on_air_ms(10);
        let large = p.time_on_air_ms(200);
        assert!(large > small);
        // A full packet at SF10/125 kHz is on the order of a second.
        assert!(large > 300 && large < 3000, "toa was {large} ms");
    }

    #[test]
    fn test_serde_defaults_fill_missing_keys() {
        let p: RadioParams = toml_like_parse("{\"freq_mhz\": 868.0}");
        assert_eq!(p.freq_mhz, 868.0);
        assert_eq!(p.spreading_factor, 10);
    }

    fn toml_like_parse(json: &str) -> RadioParams {
        serde_json::from_str(json).expect("parse")
    }
}
