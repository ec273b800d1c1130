//! # Detection Pipeline Module
//!
//! Glues one detection tick together: pick the loudest analysis window,
//! gate on signal level, estimate the fundamental, run the host's validity
//! predicate, and feed the consensus filter. Pure with respect to timing -
//! the session worker decides *when* a tick happens, this module decides
//! what one tick *does*.

use crate::consensus::LockIn;
use crate::physics::{self, StringProfile, StringTable};
use crate::spectral::SpectralEstimator;
use crate::window::WindowSelector;
use crate::{DetectionUpdate, DetectorConfig};

/// Host-supplied acceptance test for a frequency estimate.
///
/// Lets the application reject estimates that would produce an
/// implausible tension before they count toward lock-in, without the
/// consensus machine knowing anything about tension. Rejected estimates
/// are still surfaced for display.
pub trait FrequencyValidator: Send {
    fn is_plausible(&self, frequency_hz: f32) -> bool;
}

impl<F> FrequencyValidator for F
where
    F: Fn(f32) -> bool + Send,
{
    fn is_plausible(&self, frequency_hz: f32) -> bool {
        self(frequency_hz)
    }
}

/// The default validity predicate: the estimate must map to a tension
/// inside a plausible stringing range (20-65 lbs unless overridden).
#[derive(Debug, Clone)]
pub struct TensionWindow {
    length_m: f32,
    linear_density: f32,
    min_pounds: f32,
    max_pounds: f32,
}

impl TensionWindow {
    pub const DEFAULT_MIN_POUNDS: f32 = 20.0;
    pub const DEFAULT_MAX_POUNDS: f32 = 65.0;

    pub fn new(profile: &StringProfile, table: &StringTable) -> Self {
        Self::with_bounds(
            profile,
            table,
            Self::DEFAULT_MIN_POUNDS,
            Self::DEFAULT_MAX_POUNDS,
        )
    }

    pub fn with_bounds(
        profile: &StringProfile,
        table: &StringTable,
        min_pounds: f32,
        max_pounds: f32,
    ) -> Self {
        Self {
            length_m: profile.vibrating_length_m(),
            linear_density: profile.effective_linear_density(table),
            min_pounds,
            max_pounds,
        }
    }
}

impl FrequencyValidator for TensionWindow {
    fn is_plausible(&self, frequency_hz: f32) -> bool {
        let result = physics::tension(frequency_hz, self.length_m, self.linear_density);
        result.pounds >= self.min_pounds && result.pounds <= self.max_pounds
    }
}

/// One measurement attempt's worth of detection state.
///
/// Owns the estimator, the window selector, and the consensus filter;
/// borrows the rolling sample buffer from the caller each tick.
pub struct Detector {
    config: DetectorConfig,
    selector: WindowSelector,
    estimator: SpectralEstimator,
    lock_in: LockIn,
    validator: Option<Box<dyn FrequencyValidator>>,
    length_m: f32,
    linear_density: f32,
}

impl Detector {
    /// Builds a detector for one string profile. Geometry and density are
    /// resolved once here; the profile is immutable for the session.
    pub fn new(
        config: DetectorConfig,
        profile: &StringProfile,
        table: &StringTable,
        validator: Option<Box<dyn FrequencyValidator>>,
    ) -> Self {
        let selector = WindowSelector::new(config.window_size, config.scan_stride);
        let estimator =
            SpectralEstimator::new(config.fft_size, config.band_low_hz, config.band_high_hz);
        let mut lock_in = LockIn::new(config.lock_count, config.lock_tolerance);
        lock_in.start();
        Self {
            selector,
            estimator,
            lock_in,
            validator,
            length_m: profile.vibrating_length_m(),
            linear_density: profile.effective_linear_density(table),
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_locked(&self) -> bool {
        self.lock_in.is_locked()
    }

    /// Starts a new measurement attempt without touching capture.
    pub fn reset(&mut self) {
        self.lock_in.reset();
    }

    /// Ends the measurement attempt entirely.
    pub fn stop(&mut self) {
        self.lock_in.stop();
    }

    /// Runs one detection tick over the rolling sample buffer.
    ///
    /// Every failure mode short of an inconsistent reading degrades to "no
    /// progress this tick": silence, a sub-threshold window, and a missed
    /// peak search all leave the consensus buffer untouched.
    pub fn tick(&mut self, buffer: &[f32], sample_rate: f32) -> DetectionUpdate {
        let Some((pick, window)) = self.selector.select(buffer) else {
            return self.snapshot(None);
        };

        if pick.rms < self.config.min_signal_rms {
            tracing::trace!(rms = pick.rms, "window below signal threshold, skipping");
            return self.snapshot(None);
        }

        let Some(frequency) = self.estimator.estimate(window, sample_rate) else {
            return self.snapshot(None);
        };

        let accepted = self
            .validator
            .as_ref()
            .map(|v| v.is_plausible(frequency))
            .unwrap_or(true);

        if accepted {
            self.lock_in.offer(frequency);
        } else {
            // Surfaced for display but never promoted toward a lock.
            tracing::debug!(frequency, "estimate rejected by validity predicate");
        }

        self.snapshot(Some(frequency))
    }

    fn snapshot(&self, frequency_hz: Option<f32>) -> DetectionUpdate {
        let locked_frequency = self.lock_in.locked_frequency();
        let displayed = locked_frequency.or(frequency_hz);
        let tension =
            displayed.map(|hz| physics::tension(hz, self.length_m, self.linear_density));
        DetectionUpdate {
            frequency_hz,
            readings: self.lock_in.readings().to_vec(),
            state: self.lock_in.state(),
            locked_frequency,
            tension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::LockState;
    use crate::physics::{REFERENCE_TABLE, StringMaterial};

    fn profile() -> StringProfile {
        StringProfile {
            material: StringMaterial::Polyester,
            gauge_mm: 1.25,
            head_area_sq_in: 100.0,
            measured_length_m: None,
            mains: 16,
            crosses: 19,
        }
    }

    fn sine(frequency: f32, sample_rate: f32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin()
            })
            .collect()
    }

    fn detector(validator: Option<Box<dyn FrequencyValidator>>) -> Detector {
        Detector::new(
            DetectorConfig::default(),
            &profile(),
            &REFERENCE_TABLE,
            validator,
        )
    }

    #[test]
    fn consistent_ticks_converge_to_a_lock() {
        let mut detector = detector(None);
        let sample_rate = 48000.0;
        let tone = sine(420.0, sample_rate, 32768);

        let mut last = None;
        for _ in 0..5 {
            last = Some(detector.tick(&tone, sample_rate));
        }
        let update = last.unwrap();
        assert_eq!(update.state, LockState::Locked);
        let locked = update.locked_frequency.unwrap();
        assert!((locked - 420.0).abs() < 0.5, "locked at {locked}");

        // Locked tension should be near the reference scenario's 30 lbs.
        let tension = update.tension.unwrap();
        assert!((tension.pounds - 29.5).abs() < 1.5, "{} lbs", tension.pounds);
    }

    #[test]
    fn silence_never_advances_the_lock_buffer() {
        let mut detector = detector(None);
        let silence = vec![0.0f32; 32768];
        for _ in 0..10 {
            let update = detector.tick(&silence, 48000.0);
            assert_eq!(update.frequency_hz, None);
            assert!(update.readings.is_empty());
            assert_eq!(update.state, LockState::Listening);
        }
    }

    #[test]
    fn sub_threshold_signal_is_treated_as_silence() {
        let mut detector = detector(None);
        // A clean tone far below the 0.004 RMS gate.
        let quiet: Vec<f32> = sine(420.0, 48000.0, 32768)
            .into_iter()
            .map(|s| s * 0.005)
            .collect();
        let update = detector.tick(&quiet, 48000.0);
        assert_eq!(update.frequency_hz, None);
        assert!(update.readings.is_empty());
    }

    #[test]
    fn rejected_estimate_is_surfaced_but_not_buffered() {
        let reject_all: Box<dyn FrequencyValidator> = Box::new(|_: f32| false);
        let mut detector = detector(Some(reject_all));
        let tone = sine(420.0, 48000.0, 32768);

        let update = detector.tick(&tone, 48000.0);
        assert!(update.frequency_hz.is_some());
        assert!(update.readings.is_empty());
        assert_eq!(update.state, LockState::Listening);
        // The reading is still displayable, tension included.
        assert!(update.tension.is_some());
    }

    #[test]
    fn tension_window_accepts_plausible_and_rejects_wild_frequencies() {
        let validator = TensionWindow::new(&profile(), &REFERENCE_TABLE);
        // ~29.5 lbs for this profile.
        assert!(validator.is_plausible(420.0));
        // Far below 20 lbs.
        assert!(!validator.is_plausible(250.0));
        // Far above 65 lbs.
        assert!(!validator.is_plausible(700.0));
    }

    #[test]
    fn reset_starts_a_fresh_attempt() {
        let mut detector = detector(None);
        let sample_rate = 48000.0;
        let tone = sine(420.0, sample_rate, 32768);
        for _ in 0..5 {
            detector.tick(&tone, sample_rate);
        }
        assert!(detector.is_locked());

        detector.reset();
        assert!(!detector.is_locked());
        let update = detector.tick(&tone, sample_rate);
        assert_eq!(update.readings.len(), 1);
        assert_eq!(update.state, LockState::Listening);
    }
}
