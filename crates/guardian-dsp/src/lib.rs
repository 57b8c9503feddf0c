//! # guardian-dsp
//!
//! The node-side signal chain: audio conditioning ([`capture`]), the
//! 32x32 log-mel spectrogram engine ([`spectrogram`]), and the anomaly
//! gate that decides whether a grid is worth a radio transmission
//! ([`gate`]).

pub mod capture;
pub mod gate;
pub mod spectrogram;

/// FFT window size in samples.
pub const FFT_SIZE: usize = 128;

/// Hop between successive frames in samples.
pub const HOP: usize = 64;

/// Number of triangular mel filters (grid height).
pub const MEL_BINS: usize = 32;

/// Number of frames per spectrogram (grid width).
pub const FRAMES: usize = 32;

/// Capture window length in samples (~0.5 s at 16 kHz).
pub const WINDOW_LEN: usize = 8192;

/// Smallest acceptable capture window.
pub const MIN_WINDOW_LEN: usize = 8192;

/// Largest acceptable capture window.
pub const MAX_WINDOW_LEN: usize = 17_000;

/// Error types for the DSP pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DspError {
    /// The audio driver returned an error; the caller should retry.
    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),

    /// Fewer than five frames could be produced from the input.
    #[error("insufficient audio: {0} samples")]
    InsufficientAudio(usize),

    /// Capture window length outside the supported range.
    #[error("window length {0} outside {MIN_WINDOW_LEN}..={MAX_WINDOW_LEN}")]
    WindowOutOfRange(usize),
}

/// Result type alias for DSP operations.
pub type Result<T> = std::result::Result<T, DspError>;
