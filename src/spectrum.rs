use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::event::SpectrumFrame;

/// Samples per estimation window.
pub const FFT_SIZE: usize = 4096;

/// dB value both spectrum arrays are reset to at session start.
pub const SPECTRUM_FLOOR_DB: f32 = -72.0;

/// IIR smoothing constant: `1 - 1e-2 * 75`.
const AVG_COEFF: f32 = 0.25;

/// Estimates a smoothed power spectrum from an incoming PCM byte stream.
///
/// Bytes are accumulated into a window of `FFT_SIZE` samples; each full
/// window runs one forward transform and updates two per-bin arrays:
/// a fast-rising peak with 1/5-per-update decay, and an IIR-smoothed copy
/// of that peak. Only the lower half-spectrum is emitted, the input being
/// effectively real-valued.
///
/// The transform plan and scratch buffers are owned by the estimator, so two
/// concurrent sessions would never share spectral state.
pub struct SpectralEstimator {
    fft: Arc<dyn Fft<f32>>,
    // One sentinel slot past the window: the imaginary component of bin i is
    // synthesized from sample i+1, so the last bin reads window[FFT_SIZE].
    // The sentinel stays zero, which keeps the original construction (and
    // its spectral shape) without the original's out-of-bounds read.
    window: [f32; FFT_SIZE + 1],
    filled: usize,
    scratch: Vec<Complex<f32>>,
    peak: Vec<f32>,
    smoothed: Vec<f32>,
}

impl Default for SpectralEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralEstimator {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);
        SpectralEstimator {
            fft,
            window: [0.0; FFT_SIZE + 1],
            filled: 0,
            scratch: vec![Complex::default(); FFT_SIZE],
            peak: vec![SPECTRUM_FLOOR_DB; FFT_SIZE],
            smoothed: vec![SPECTRUM_FLOOR_DB; FFT_SIZE],
        }
    }

    /// Consumes raw PCM bytes, returning one spectrum snapshot per window
    /// completed by this call. Usually zero or one; a large chunk can
    /// complete several.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SpectrumFrame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            self.window[self.filled] = byte as f32;
            self.filled += 1;
            if self.filled == FFT_SIZE {
                frames.push(self.run_transform());
                self.filled = 0;
            }
        }
        frames
    }

    fn run_transform(&mut self) -> SpectrumFrame {
        let power_scale = 1.0 / (FFT_SIZE as f32 * FFT_SIZE as f32);

        for i in 0..FFT_SIZE {
            self.scratch[i] = Complex::new(
                self.window[i] / 127.5 - 1.0,
                -self.window[i + 1] / 127.5 - 1.0,
            );
        }

        self.fft.process(&mut self.scratch);

        for (i, bin) in self.scratch.iter().enumerate() {
            let power = (bin.re * bin.re + bin.im * bin.im).sqrt();
            // Clamp away from zero: silence would otherwise drive the peak
            // to -inf through log10(0).
            let db = 15.0 * (power_scale * power).max(f32::MIN_POSITIVE).log10();

            self.peak[i] = decay_step(self.peak[i], db);
            self.smoothed[i] += AVG_COEFF * (self.peak[i] - self.smoothed[i]);
        }

        SpectrumFrame {
            peak: self.peak[..FFT_SIZE / 2].to_vec(),
            smoothed: self.smoothed[..FFT_SIZE / 2].to_vec(),
        }
    }

    /// Restores the floor state without reallocating the transform plan.
    pub fn reset(&mut self) {
        self.filled = 0;
        self.window = [0.0; FFT_SIZE + 1];
        self.peak.fill(SPECTRUM_FLOOR_DB);
        self.smoothed.fill(SPECTRUM_FLOOR_DB);
    }
}

/// One peak-hold decay step: a reading below the held peak pulls it down by
/// a fifth of the gap.
pub fn decay_step(peak: f32, db: f32) -> f32 {
    if peak < db { db } else { peak - (peak - db) / 5.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_floor() {
        let estimator = SpectralEstimator::new();
        assert!(estimator.peak.iter().all(|&v| v == SPECTRUM_FLOOR_DB));
        assert!(estimator.smoothed.iter().all(|&v| v == SPECTRUM_FLOOR_DB));
    }

    #[test]
    fn zero_window_produces_finite_spectrum() {
        let mut estimator = SpectralEstimator::new();
        let frames = estimator.feed(&vec![0u8; FFT_SIZE]);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.peak.len(), FFT_SIZE / 2);
        assert_eq!(frame.smoothed.len(), FFT_SIZE / 2);
        assert!(frame.peak.iter().all(|v| v.is_finite()));
        assert!(frame.smoothed.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn constant_signal_survives_final_index_lookahead() {
        let mut estimator = SpectralEstimator::new();
        // Three consecutive full windows of a constant non-zero signal; the
        // final bin of each window reads the sentinel slot.
        let frames = estimator.feed(&vec![200u8; FFT_SIZE * 3]);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(frame.peak.iter().all(|v| v.is_finite()));
            assert!(frame.smoothed.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn partial_windows_accumulate_across_calls() {
        let mut estimator = SpectralEstimator::new();
        assert!(estimator.feed(&vec![10u8; FFT_SIZE - 1]).is_empty());
        let frames = estimator.feed(&[10u8, 10u8]);
        assert_eq!(frames.len(), 1);
        assert_eq!(estimator.filled, 1);
    }

    #[test]
    fn window_count_matches_bytes_fed() {
        let mut estimator = SpectralEstimator::new();
        let total = FFT_SIZE * 5 + 123;
        let mut produced = 0;
        for chunk in vec![7u8; total].chunks(1000) {
            produced += estimator.feed(chunk).len();
        }
        assert_eq!(produced, total / FFT_SIZE);
    }

    #[test]
    fn decay_law_single_step() {
        let peak = 10.0;
        let reading = 0.0;
        assert_eq!(decay_step(peak, reading), 10.0 - (10.0 - 0.0) / 5.0);
    }

    #[test]
    fn decay_converges_monotonically_without_overshoot() {
        let target = -30.0;
        let mut peak = 0.0;
        let mut previous = peak;
        for _ in 0..5 {
            peak = decay_step(peak, target);
            assert!(peak < previous);
            assert!(peak > target);
            previous = peak;
        }
    }

    #[test]
    fn rising_reading_replaces_peak_immediately() {
        assert_eq!(decay_step(-50.0, -10.0), -10.0);
    }

    #[test]
    fn reset_restores_floor() {
        let mut estimator = SpectralEstimator::new();
        estimator.feed(&vec![250u8; FFT_SIZE]);
        assert!(estimator.peak.iter().any(|&v| v != SPECTRUM_FLOOR_DB));
        estimator.reset();
        assert_eq!(estimator.filled, 0);
        assert!(estimator.peak.iter().all(|&v| v == SPECTRUM_FLOOR_DB));
        assert!(estimator.smoothed.iter().all(|&v| v == SPECTRUM_FLOOR_DB));
    }
}
