//! The 32x32 log-mel spectrogram engine.
//!
//! Per frame: Hann window over 128 samples, magnitude FFT, triangular mel
//! filterbank accumulation over the lower half of the spectrum, then
//! `ln(e + 1e-10)`. After all frames: pad missing columns with the window
//! minimum, rescale min..max to 0..255, and flip vertically so low
//! frequencies sit at the bottom of the grid.
//!
//! The filterbank, window, and FFT plan are computed once in `new`; no
//! allocation happens per call beyond scratch reuse.

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use guardian_types::{Grid, SAMPLE_RATE};

use crate::{DspError, Result, FFT_SIZE, FRAMES, HOP, MEL_BINS};

/// Lower edge of the mel filterbank (Hz).
const MEL_LOW_HZ: f32 = 100.0;

/// Upper edge of the mel filterbank (Hz), Nyquist for 16 kHz capture.
const MEL_HIGH_HZ: f32 = 8000.0;

/// Minimum frames before a spectrogram is meaningful.
const MIN_FRAMES: usize = 5;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Precomputed triangular mel filterbank, `[mel_bin][fft_bin]` over the
/// lower half of the spectrum.
fn mel_filterbank() -> Vec<Vec<f32>> {
    let mel_low = hz_to_mel(MEL_LOW_HZ);
    let mel_high = hz_to_mel(MEL_HIGH_HZ);

    // Mel-spaced edge points converted to FFT bin indices, clamped to the
    // usable half of the spectrum.
    let bin_points: Vec<usize> = (0..MEL_BINS + 2)
        .map(|i| {
            let mel = mel_low + (mel_high - mel_low) * i as f32 / (MEL_BINS + 1) as f32;
            let hz = mel_to_hz(mel);
            let bin = ((FFT_SIZE + 1) as f32 * hz / SAMPLE_RATE as f32) as usize;
            bin.min(FFT_SIZE / 2 - 1)
        })
        .collect();

    let mut bank = vec![vec![0.0f32; FFT_SIZE / 2]; MEL_BINS];
    for (m, filter) in bank.iter_mut().enumerate() {
        let (lo, mid, hi) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);
        for (k, weight) in filter.iter_mut().enumerate() {
            if k >= lo && k <= mid && mid != lo {
                *weight = (k - lo) as f32 / (mid - lo) as f32;
            } else if k > mid && k <= hi && hi != mid {
                *weight = (hi - k) as f32 / (hi - mid) as f32;
            }
        }
    }
    bank
}

/// Mel spectrogram generator with all DSP state precomputed.
pub struct SpectrogramEngine {
    fft: Arc<dyn Fft<f32>>,
    hann: [f32; FFT_SIZE],
    filterbank: Vec<Vec<f32>>,
    // scratch, reused between calls
    fft_buf: Vec<Complex32>,
    magnitudes: Vec<f32>,
}

impl SpectrogramEngine {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let mut hann = [0.0f32; FFT_SIZE];
        for (i, w) in hann.iter_mut().enumerate() {
            *w = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos());
        }

        Self {
            fft,
            hann,
            filterbank: mel_filterbank(),
            fft_buf: vec![Complex32::ZERO; FFT_SIZE],
            magnitudes: vec![0.0f32; FFT_SIZE / 2],
        }
    }

    /// Generate a grid from a PCM window.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::InsufficientAudio`] when fewer than five frames
    /// can be produced.
    pub fn generate(&mut self, audio: &[i16]) -> Result<Grid> {
        let available = if audio.len() >= FFT_SIZE {
            (audio.len() - FFT_SIZE) / HOP + 1
        } else {
            0
        };
        let num_frames = available.min(FRAMES);
        if num_frames < MIN_FRAMES {
            return Err(DspError::InsufficientAudio(audio.len()));
        }

        // [frame][mel] log energies.
        let mut mel_spec = [[0.0f32; MEL_BINS]; FRAMES];
        let mut min_energy = f32::MAX;
        let mut max_energy = f32::MIN;

        for (frame, row) in mel_spec.iter_mut().enumerate().take(num_frames) {
            let offset = frame * HOP;
            for i in 0..FFT_SIZE {
                let sample = audio.get(offset + i).copied().unwrap_or(0) as f32;
                self.fft_buf[i] = Complex32::new(sample * self.hann[i] / 32768.0, 0.0);
            }
            self.fft.process(&mut self.fft_buf);
            for (k, mag) in self.magnitudes.iter_mut().enumerate() {
                *mag = self.fft_buf[k].norm();
            }

            for (m, filter) in self.filterbank.iter().enumerate() {
                let energy: f32 = self
                    .magnitudes
                    .iter()
                    .zip(filter.iter())
                    .map(|(mag, w)| mag * w)
                    .sum();
                let log_e = (energy + 1e-10).ln();
                row[m] = log_e;
                min_energy = min_energy.min(log_e);
                max_energy = max_energy.max(log_e);
            }
        }

        // Frames beyond the audio get the window minimum.
        for row in mel_spec.iter_mut().skip(num_frames) {
            row.fill(min_energy);
        }

        let range = (max_energy - min_energy).max(1e-3);
        let mut grid = Grid::new();
        for (frame, row) in mel_spec.iter().enumerate() {
            for (m, &log_e) in row.iter().enumerate() {
                let normalized = (log_e - min_energy) / range;
                let value = (normalized * 255.0).round().clamp(0.0, 255.0) as u8;
                // Flip so bin 0 (lowest frequency) lands on the bottom row.
                grid.set(frame, MEL_BINS - 1 - m, value);
            }
        }

        tracing::trace!(num_frames, min_energy, max_energy, "spectrogram generated");
        Ok(grid)
    }
}

impl Default for SpectrogramEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AudioSource, SyntheticSource};
    use crate::WINDOW_LEN;
    use guardian_types::{SPEC_HEIGHT, SPEC_WIDTH};

    fn capture(src: &mut SyntheticSource) -> Vec<i16> {
        let mut buf = vec![0i16; WINDOW_LEN];
        src.read(&mut buf).expect("read");
        buf
    }

    #[test]
    fn test_insufficient_audio_rejected() {
        let mut engine = SpectrogramEngine::new();
        // 4 frames worth: FFT + 3*HOP samples.
        let audio = vec![0i16; FFT_SIZE + 3 * HOP];
        assert!(matches!(
            engine.generate(&audio),
            Err(DspError::InsufficientAudio(_))
        ));
    }

    #[test]
    fn test_five_frames_accepted() {
        let mut engine = SpectrogramEngine::new();
        let audio = vec![100i16; FFT_SIZE + 4 * HOP];
        assert!(engine.generate(&audio).is_ok());
    }

    #[test]
    fn test_full_range_normalization() {
        let mut engine = SpectrogramEngine::new();
        let audio = capture(&mut SyntheticSource::chainsaw(16_000));
        let grid = engine.generate(&audio).expect("generate");
        let min = grid.as_slice().iter().copied().min().expect("min");
        let max = grid.as_slice().iter().copied().max().expect("max");
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn test_pure_tone_lands_in_expected_band() {
        let mut engine = SpectrogramEngine::new();
        let mut src = SyntheticSource::new(16_000).with_component(440.0, 12_000.0);
        let audio = capture(&mut src);
        let grid = engine.generate(&audio).expect("generate");

        // Column energy per row: a 440 Hz tone must concentrate in the
        // lower half of the flipped grid (low frequencies at the bottom).
        let row_energy: Vec<u32> = grid
            .rows()
            .map(|row| row.iter().map(|&v| v as u32).sum())
            .collect();
        let bottom: u32 = row_energy[SPEC_HEIGHT / 2..].iter().sum();
        let top: u32 = row_energy[..SPEC_HEIGHT / 2].iter().sum();
        assert!(
            bottom > top,
            "tone energy should sit low: bottom={bottom} top={top}"
        );
    }

    #[test]
    fn test_high_tone_lands_high() {
        let mut engine = SpectrogramEngine::new();
        let mut src = SyntheticSource::new(16_000).with_component(6000.0, 12_000.0);
        let audio = capture(&mut src);
        let grid = engine.generate(&audio).expect("generate");

        let row_energy: Vec<u32> = grid
            .rows()
            .map(|row| row.iter().map(|&v| v as u32).sum())
            .collect();
        let top_quarter: u32 = row_energy[..SPEC_HEIGHT / 4].iter().sum();
        let bottom_quarter: u32 = row_energy[3 * SPEC_HEIGHT / 4..].iter().sum();
        assert!(
            top_quarter > bottom_quarter,
            "6 kHz energy should sit high: top={top_quarter} bottom={bottom_quarter}"
        );
    }

    #[test]
    fn test_short_window_pads_trailing_frames() {
        let mut engine = SpectrogramEngine::new();
        // 10 frames of real audio, the rest padded with the minimum.
        let mut src = SyntheticSource::new(16_000).with_component(1000.0, 10_000.0);
        let mut audio = vec![0i16; FFT_SIZE + 9 * HOP];
        src.read(&mut audio).expect("read");
        let grid = engine.generate(&audio).expect("generate");

        // Padded columns normalize to zero everywhere.
        for y in 0..SPEC_HEIGHT {
            assert_eq!(grid.get(SPEC_WIDTH - 1, y), 0);
        }
    }

    #[test]
    fn test_deterministic() {
        let mut engine = SpectrogramEngine::new();
        let audio = capture(&mut SyntheticSource::chainsaw(16_000));
        let a = engine.generate(&audio).expect("generate");
        let b = engine.generate(&audio).expect("generate");
        assert_eq!(a, b);
    }
}
