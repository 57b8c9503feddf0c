//! The local tier: a band-energy heuristic over the raw grid.
//!
//! This is the always-available fallback when both cloud tiers are
//! unreachable or rate limited. It reuses the node-side band analysis:
//! a chainsaw reads as loud, low-heavy, broadband, and sustained; a
//! vehicle as a low-dominant rumble; anything else as natural.

use guardian_dsp::gate::BandProfile;
use guardian_types::{ClassificationResult, Label};

use crate::classifier::{Classifier, ClassifyInput};
use crate::Result;

pub struct LocalClassifier;

impl LocalClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for LocalClassifier {
    fn name(&self) -> &'static str {
        "local"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<ClassificationResult> {
        let p = BandProfile::measure(&input.grid);

        let broadband = p.low_ratio > 0.15 && p.mid_ratio > 0.30 && p.high_ratio > 0.10;
        let sustained = p.coef_var < 0.3;

        let result = if p.energy > 0.35 && p.low_ratio > 0.20 && broadband && sustained {
            // Stronger energy and steadier signal push confidence up.
            let margin = ((p.energy - 0.35) * 120.0) + ((0.3 - p.coef_var) * 60.0);
            let confidence = (55.0 + margin).clamp(55.0, 90.0) as u8;
            ClassificationResult::new(Label::Chainsaw, confidence)
                .with_reasoning("loud broadband sustained signature")
        } else if p.energy > 0.20 && p.low_ratio > 0.45 {
            let confidence = (50.0 + (p.low_ratio - 0.45) * 100.0).clamp(50.0, 75.0) as u8;
            ClassificationResult::new(Label::Vehicle, confidence)
                .with_reasoning("low-frequency dominant rumble")
        } else {
            let confidence = if p.energy < 0.15 { 80 } else { 60 };
            ClassificationResult::new(Label::Natural, confidence)
                .with_reasoning("no engine signature detected")
        };

        tracing::debug!(
            label = %result.label,
            confidence = result.confidence,
            energy = p.energy,
            "local classification"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_types::{Grid, SPEC_HEIGHT, SPEC_WIDTH, ThreatLevel};

    fn input_from(grid: Grid) -> ClassifyInput {
        ClassifyInput {
            png: Vec::new(),
            grid,
        }
    }

    fn chainsaw_grid() -> Grid {
        let mut grid = Grid::new();
        for frame in 0..SPEC_WIDTH {
            for y in 0..SPEC_HEIGHT {
                let v = if y >= 3 * SPEC_HEIGHT / 4 {
                    230
                } else if y >= SPEC_HEIGHT / 4 {
                    180
                } else {
                    90
                };
                grid.set(frame, y, v);
            }
        }
        grid
    }

    fn vehicle_grid() -> Grid {
        let mut grid = Grid::new();
        for frame in 0..SPEC_WIDTH {
            for y in 3 * SPEC_HEIGHT / 4..SPEC_HEIGHT {
                grid.set(frame, y, 240);
            }
            for y in SPEC_HEIGHT / 2..3 * SPEC_HEIGHT / 4 {
                grid.set(frame, y, 60);
            }
        }
        grid
    }

    #[test]
    fn test_chainsaw_detected() {
        let result = LocalClassifier::new()
            .classify(&input_from(chainsaw_grid()))
            .expect("classify");
        assert_eq!(result.label, Label::Chainsaw);
        assert!(result.confidence >= 55);
        assert!(result.threat_level >= ThreatLevel::High);
    }

    #[test]
    fn test_vehicle_detected() {
        let result = LocalClassifier::new()
            .classify(&input_from(vehicle_grid()))
            .expect("classify");
        assert_eq!(result.label, Label::Vehicle);
    }

    #[test]
    fn test_silence_is_natural() {
        let result = LocalClassifier::new()
            .classify(&input_from(Grid::new()))
            .expect("classify");
        assert_eq!(result.label, Label::Natural);
        assert_eq!(result.threat_level, ThreatLevel::None);
    }
}
