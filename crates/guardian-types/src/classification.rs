//! Classification labels, threat levels, and the result shape shared by
//! every classifier tier.

use serde::{Deserialize, Serialize};

/// Sound class assigned to a spectrogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Chainsaw,
    Vehicle,
    Natural,
    Unknown,
}

impl Label {
    /// Parse a label string from a classifier response. Anything
    /// unrecognized maps to [`Label::Unknown`] rather than failing, because
    /// cloud tiers occasionally return free-form tags.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "chainsaw" => Label::Chainsaw,
            "vehicle" | "truck" => Label::Vehicle,
            "natural" | "nature" => Label::Natural,
            _ => Label::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Chainsaw => "chainsaw",
            Label::Vehicle => "vehicle",
            Label::Natural => "natural",
            Label::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse severity derived from `(label, confidence)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Critical => "CRITICAL",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::Low => "LOW",
            ThreatLevel::None => "NONE",
        }
    }

    /// Parse a threat level string, defaulting to `None` on anything odd.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => ThreatLevel::Critical,
            "HIGH" => ThreatLevel::High,
            "MEDIUM" => ThreatLevel::Medium,
            "LOW" => ThreatLevel::Low,
            _ => ThreatLevel::None,
        }
    }

    /// Whether this level warrants creating an alert record.
    pub fn is_alerting(&self) -> bool {
        matches!(self, ThreatLevel::Critical | ThreatLevel::High)
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a label and confidence (0..=100) to a threat level.
pub fn threat_level_for(label: Label, confidence: u8) -> ThreatLevel {
    match label {
        Label::Chainsaw if confidence >= 85 => ThreatLevel::Critical,
        Label::Chainsaw if confidence >= 60 => ThreatLevel::High,
        Label::Chainsaw => ThreatLevel::High,
        Label::Vehicle if confidence >= 70 => ThreatLevel::Medium,
        Label::Vehicle => ThreatLevel::Low,
        Label::Natural => ThreatLevel::None,
        Label::Unknown => ThreatLevel::Low,
    }
}

/// The result returned by any classifier tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    /// Confidence percentage, 0..=100.
    pub confidence: u8,
    pub threat_level: ThreatLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl ClassificationResult {
    /// Build a result with the threat level derived from the mapping table.
    pub fn new(label: Label, confidence: u8) -> Self {
        Self {
            label,
            confidence: confidence.min(100),
            threat_level: threat_level_for(label, confidence),
            reasoning: None,
            features: Vec::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}
