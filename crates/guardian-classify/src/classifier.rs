//! The classifier capability.

use guardian_types::{ClassificationResult, Grid};

use crate::Result;

/// One spectrogram as the tiers see it: the rendered PNG for vision
/// endpoints and the raw grid for local analysis. The hub always has
/// both, so no tier ever needs to decode an image.
#[derive(Clone, Debug)]
pub struct ClassifyInput {
    pub png: Vec<u8>,
    pub grid: Grid,
}

/// A classification tier. Implementations are blocking; the hub invokes
/// them from its worker pool via `spawn_blocking`.
pub trait Classifier: Send + Sync {
    /// Stable tier name, recorded as `classifier_used` on the stored
    /// spectrogram.
    fn name(&self) -> &'static str;

    fn classify(&self, input: &ClassifyInput) -> Result<ClassificationResult>;
}
