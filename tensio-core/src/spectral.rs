//! # Spectral Estimator Module
//!
//! Converts a block of time-domain samples into a single best-guess
//! fundamental frequency with sub-bin precision. This is the numeric heart
//! of the tension meter.
//!
//! ## Features
//! - Fixed transform size (default 32768) so frequency resolution does not
//!   depend on how much audio the capture device delivered
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Peak search restricted to the physically plausible fundamental band,
//!   rejecting octave/harmonic confusion from higher partials
//! - Parabolic interpolation for sub-bin accuracy

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by making its average value zero.
///
/// A microphone bias would otherwise leak a large component into the low
/// bins and skew the peak search.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window `0.5*(1-cos(2πi/(M-1)))` to the input buffer.
///
/// Tapering the signal to zero at the edges keeps energy from smearing
/// across bins when the tone is not aligned to a bin center.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// FFT-based fundamental frequency estimator.
///
/// The transform is planned once at construction and reused for every
/// tick. `estimate` is a pure function of its inputs: no state carries
/// over between calls.
pub struct SpectralEstimator {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    band_low_hz: f32,
    band_high_hz: f32,
}

impl SpectralEstimator {
    /// Creates an estimator with the given transform size and admissible
    /// fundamental band.
    ///
    /// # Panics
    /// * If `fft_size` is not a power of two (the radix-2 transform
    ///   requires it)
    pub fn new(fft_size: usize, band_low_hz: f32, band_high_hz: f32) -> Self {
        assert!(
            fft_size.is_power_of_two(),
            "FFT size must be a power of two"
        );
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            band_low_hz,
            band_high_hz,
        }
    }

    /// Estimates the fundamental frequency of `samples` in Hz.
    ///
    /// Input shorter than the transform size is embedded at the start and
    /// zero-padded; input longer is truncated to the most recent samples,
    /// favoring the freshest data.
    ///
    /// # Returns
    /// * `Some(frequency)` - Peak frequency within the admissible band,
    ///   refined to sub-bin precision
    /// * `None` - Flat or silent spectrum, no peak in the band
    pub fn estimate(&self, samples: &[f32], sample_rate: f32) -> Option<f32> {
        if samples.is_empty() || sample_rate <= 0.0 {
            return None;
        }

        // Most recent `fft_size` samples; the capture side may hand us more.
        let tail = if samples.len() > self.fft_size {
            &samples[samples.len() - self.fft_size..]
        } else {
            samples
        };

        let mut windowed = tail.to_vec();
        remove_dc_offset(&mut windowed);
        apply_hann_window(&mut windowed);

        let mut spectrum: Vec<Complex<f32>> = windowed
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();
        spectrum.resize(self.fft_size, Complex { re: 0.0, im: 0.0 });

        self.fft.process(&mut spectrum);

        let hz_per_bin = sample_rate / self.fft_size as f32;
        let (peak_bin, peak_power) = self.find_band_peak(&spectrum, hz_per_bin)?;
        if peak_power <= 0.0 {
            // Flat or silent spectrum.
            return None;
        }

        // Interpolation runs on the same squared magnitudes as the peak
        // pick: one consistent surface, no square roots, and the sub-bin
        // error stays a couple orders of magnitude under the bin width.
        let delta = parabolic_offset(
            spectrum[peak_bin - 1].norm_sqr(),
            peak_power,
            spectrum[peak_bin + 1].norm_sqr(),
        );

        let frequency = (peak_bin as f32 + delta) * hz_per_bin;
        if frequency.is_finite() {
            Some(frequency)
        } else {
            None
        }
    }

    /// Finds the bin of maximum squared magnitude inside the admissible
    /// band. The band is clamped so that both interpolation neighbors are
    /// always in range.
    fn find_band_peak(
        &self,
        spectrum: &[Complex<f32>],
        hz_per_bin: f32,
    ) -> Option<(usize, f32)> {
        let nyquist_bin = self.fft_size / 2;
        let low_bin = ((self.band_low_hz / hz_per_bin).ceil() as usize).max(1);
        let high_bin = ((self.band_high_hz / hz_per_bin).floor() as usize).min(nyquist_bin - 2);
        if low_bin > high_bin {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        for bin in low_bin..=high_bin {
            let power = spectrum[bin].norm_sqr();
            match best {
                Some((_, best_power)) if power <= best_power => {}
                _ => best = Some((bin, power)),
            }
        }
        best
    }
}

/// Parabolic interpolation across the three magnitudes around a peak bin.
///
/// Returns the sub-bin offset `0.5*(a-c)/(a-2b+c)`, or `0.0` when the
/// local magnitudes are perfectly flat (zero denominator), in which case
/// the unadjusted bin center is the best available answer.
fn parabolic_offset(prev: f32, peak: f32, next: f32) -> f32 {
    let denominator = prev - 2.0 * peak + next;
    if denominator.abs() <= f32::EPSILON {
        return 0.0;
    }
    0.5 * (prev - next) / denominator
}
