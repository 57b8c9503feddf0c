//! # guardian-classify
//!
//! Tiered spectrogram classification. Three tiers sit behind the
//! [`classifier::Classifier`] capability:
//!
//! - [`local::LocalClassifier`]: always-available band-energy heuristic.
//! - [`cloud::FastCloudClassifier`]: prediction-endpoint REST call.
//! - [`cloud::DeepCloudClassifier`]: vision chat-completion REST call.
//!
//! The [`dispatcher::Dispatcher`] composes them by mode, enforces the
//! deep-tier rate limit, and reports when cloud tiers were unreachable so
//! the caller can rank the spectrogram into the offline sync queue.

pub mod classifier;
pub mod cloud;
pub mod dispatcher;
pub mod local;
pub mod rate_limit;

pub use classifier::{Classifier, ClassifyInput};
pub use dispatcher::{Dispatcher, Mode, Outcome, Tier};

/// Error types for classification operations.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The deep tier's sliding-window quota is exhausted.
    #[error("rate limited")]
    RateLimited,

    /// The network or the remote endpoint is unreachable.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The tier cannot handle this input.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The remote service answered with something unusable.
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// Result type alias for classification operations.
pub type Result<T> = std::result::Result<T, ClassifyError>;
