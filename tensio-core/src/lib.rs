// tensio-core/src/lib.rs

//! The core logic for the Tensio string tension meter.
//! This crate is responsible for audio capture, fundamental-frequency
//! detection, string physics, and the lock-in consensus filter. It is
//! completely headless and contains no UI code.

pub mod audio;
pub mod consensus;
pub mod detector;
pub mod physics;
pub mod session;
pub mod spectral;
pub mod window;

use std::time::Duration;

use crate::consensus::LockState;
use crate::physics::TensionResult;

/// Tuning knobs for the detection pipeline.
///
/// Every field is overridable by the host application; `Default` matches
/// the calibration of the reference device.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// FFT transform size. Must be a power of two. Inputs are zero-padded
    /// or truncated to this length, so frequency resolution is always
    /// `sample_rate / fft_size` regardless of how much audio arrived.
    pub fft_size: usize,
    /// Analysis window length in samples (power of two, at most `fft_size`).
    pub window_size: usize,
    /// Stride between candidate offsets when scanning the rolling buffer
    /// for the loudest analysis window.
    pub scan_stride: usize,
    /// Minimum RMS (normalized amplitude) for a window to count as signal.
    /// Below this the tick is treated as silence.
    pub min_signal_rms: f32,
    /// Lower edge of the admissible fundamental band, Hz.
    pub band_low_hz: f32,
    /// Upper edge of the admissible fundamental band, Hz.
    pub band_high_hz: f32,
    /// Number of mutually consistent readings required to lock.
    pub lock_count: usize,
    /// Relative tolerance for two readings to count as consistent.
    pub lock_tolerance: f32,
    /// Minimum wall-clock time between detection ticks.
    pub tick_interval: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            fft_size: 32768,
            window_size: 16384,
            scan_stride: 4096,
            min_signal_rms: 0.004,
            band_low_hz: 200.0,
            band_high_hz: 750.0,
            lock_count: 5,
            lock_tolerance: 0.03,
            tick_interval: Duration::from_millis(350),
        }
    }
}

/// Represents the outcome of a single detection tick.
#[derive(Debug, Clone)]
pub struct DetectionUpdate {
    /// The frequency estimated this tick, if any. Present even when the
    /// estimate was rejected by the validity predicate, so the host can
    /// still display a live reading.
    pub frequency_hz: Option<f32>,
    /// Snapshot of the consensus buffer after this tick.
    pub readings: Vec<f32>,
    /// Lock state after this tick.
    pub state: LockState,
    /// The averaged frequency, set once locked.
    pub locked_frequency: Option<f32>,
    /// Tension derived from the displayed frequency (the locked mean once
    /// locked, otherwise this tick's estimate).
    pub tension: Option<TensionResult>,
}
