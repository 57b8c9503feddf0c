//! The anomaly gate: band-energy heuristics plus hit hysteresis and a
//! post-emission cooldown.
//!
//! Two operating profiles exist. The demo profile is tuned for playback
//! through phone or laptop speakers, which cannot reproduce a chainsaw's
//! low end; it keys on high-band energy instead. The production profile
//! keys on the real signature: loud, low engine rumble, broadband
//! spectrum, sustained.

use guardian_types::{Grid, SPEC_HEIGHT, SPEC_SIZE, SPEC_WIDTH};

/// Hits must accumulate within this window or the counter resets.
const HIT_WINDOW_MS: u64 = 3000;

/// Operating profile for the gate thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateProfile {
    /// Speaker-playback demo tuning.
    Demo,
    /// Real-forest chainsaw tuning.
    Production,
}

impl GateProfile {
    /// Parse an `ANOMALY_PROFILE` config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Some(GateProfile::Demo),
            "production" => Some(GateProfile::Production),
            _ => None,
        }
    }
}

/// Gate configuration.
#[derive(Clone, Copy, Debug)]
pub struct GateConfig {
    pub profile: GateProfile,
    /// Overall-energy threshold for the production profile (0..1).
    /// The demo profile pins its own threshold at 0.80.
    pub energy_threshold: f32,
    /// Successive hits required before an anomaly is emitted.
    pub consecutive_hits: u32,
    /// Quiet period after an emission, milliseconds.
    pub cooldown_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            profile: GateProfile::Production,
            energy_threshold: 0.40,
            consecutive_hits: 4,
            cooldown_ms: 30_000,
        }
    }
}

impl GateConfig {
    pub fn demo() -> Self {
        Self {
            profile: GateProfile::Demo,
            energy_threshold: 0.80,
            consecutive_hits: 4,
            cooldown_ms: 10_000,
        }
    }
}

/// Band-energy measurements over one grid.
///
/// Bands are taken over the flipped grid: low = bottom quarter, mid =
/// middle half, high = top quarter. `coef_var` is the coefficient of
/// variation of per-frame energies (sustained sources have a low CV).
#[derive(Clone, Copy, Debug)]
pub struct BandProfile {
    /// Mean intensity over the grid, normalized to 0..1.
    pub energy: f32,
    pub low_ratio: f32,
    pub mid_ratio: f32,
    pub high_ratio: f32,
    pub coef_var: f32,
}

impl BandProfile {
    pub fn measure(grid: &Grid) -> Self {
        let mut low = 0.0f32;
        let mut mid = 0.0f32;
        let mut high = 0.0f32;
        let mut frame_energy = [0.0f32; SPEC_WIDTH];

        for frame in 0..SPEC_WIDTH {
            for y in 0..SPEC_HEIGHT {
                let v = grid.get(frame, y) as f32;
                frame_energy[frame] += v;
                if y < SPEC_HEIGHT / 4 {
                    high += v;
                } else if y < 3 * SPEC_HEIGHT / 4 {
                    mid += v;
                } else {
                    low += v;
                }
            }
        }

        let mean = frame_energy.iter().sum::<f32>() / SPEC_WIDTH as f32;
        let variance = frame_energy
            .iter()
            .map(|&e| (e - mean) * (e - mean))
            .sum::<f32>()
            / SPEC_WIDTH as f32;
        let coef_var = if mean > 1e-3 {
            variance.sqrt() / mean
        } else {
            1.0
        };

        let total = low + mid + high + 1e-3;
        Self {
            energy: grid.as_slice().iter().map(|&v| v as f32).sum::<f32>()
                / (SPEC_SIZE as f32 * 255.0),
            low_ratio: low / total,
            mid_ratio: mid / total,
            high_ratio: high / total,
            coef_var,
        }
    }
}

/// The gate's verdict for one observed window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Criteria not met (or the counter just reset).
    Quiet,
    /// Criteria met; accumulating toward the hit requirement.
    Hit { count: u32 },
    /// Enough consecutive hits; transmit.
    Anomaly,
}

/// Stateful anomaly gate. Time always arrives as a parameter so ticks are
/// deterministic under test.
pub struct AnomalyGate {
    config: GateConfig,
    hit_count: u32,
    first_hit_at: u64,
    cooldown_until: u64,
}

impl AnomalyGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            hit_count: 0,
            first_hit_at: 0,
            cooldown_until: 0,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Whether one grid meets the profile's criteria, ignoring hysteresis.
    pub fn criteria_met(&self, profile: &BandProfile) -> bool {
        match self.config.profile {
            GateProfile::Demo => {
                profile.energy > 0.80
                    && profile.high_ratio > 0.22
                    && profile.coef_var < 0.05
                    && profile.high_ratio >= profile.low_ratio
            }
            GateProfile::Production => {
                let broadband = profile.low_ratio > 0.15
                    && profile.mid_ratio > 0.30
                    && profile.high_ratio > 0.10;
                profile.energy > self.config.energy_threshold
                    && profile.low_ratio > 0.20
                    && broadband
                    && profile.coef_var < 0.3
            }
        }
    }

    /// Observe one spectrogram window at `now_ms`.
    pub fn observe(&mut self, grid: &Grid, now_ms: u64) -> GateDecision {
        if now_ms < self.cooldown_until {
            return GateDecision::Quiet;
        }

        let profile = BandProfile::measure(grid);
        if !self.criteria_met(&profile) {
            self.hit_count = 0;
            return GateDecision::Quiet;
        }

        // Hits older than the sliding window no longer count.
        if self.hit_count > 0 && now_ms.saturating_sub(self.first_hit_at) > HIT_WINDOW_MS {
            self.hit_count = 0;
        }
        if self.hit_count == 0 {
            self.first_hit_at = now_ms;
        }
        self.hit_count += 1;

        tracing::debug!(
            energy = profile.energy,
            low = profile.low_ratio,
            mid = profile.mid_ratio,
            high = profile.high_ratio,
            cv = profile.coef_var,
            hits = self.hit_count,
            "gate hit"
        );

        if self.hit_count >= self.config.consecutive_hits {
            self.hit_count = 0;
            self.cooldown_until = now_ms + self.config.cooldown_ms;
            GateDecision::Anomaly
        } else {
            GateDecision::Hit {
                count: self.hit_count,
            }
        }
    }

    /// Milliseconds of cooldown remaining at `now_ms`.
    pub fn cooldown_remaining(&self, now_ms: u64) -> u64 {
        self.cooldown_until.saturating_sub(now_ms)
    }
}
