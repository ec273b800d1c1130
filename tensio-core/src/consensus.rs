//! # Lock-In Consensus Module
//!
//! Turns the noisy stream of per-tick frequency estimates into a single
//! trustworthy reading. A measurement locks once enough consecutive
//! estimates are mutually consistent; a strongly inconsistent estimate is
//! treated as the start of a fresh run, not as noise to be ignored.

/// Lifecycle of one measurement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No session running.
    Idle,
    /// Accumulating readings.
    Listening,
    /// Enough consistent readings; the averaged frequency is frozen.
    Locked,
}

/// Consensus filter over accepted frequency readings.
///
/// Mutated only through [`offer`](LockIn::offer) and the explicit
/// lifecycle methods; the caller decides which estimates are offered (the
/// validity predicate runs upstream).
#[derive(Debug, Clone)]
pub struct LockIn {
    state: LockState,
    readings: Vec<f32>,
    locked_frequency: Option<f32>,
    lock_count: usize,
    tolerance: f32,
}

impl LockIn {
    pub fn new(lock_count: usize, tolerance: f32) -> Self {
        Self {
            state: LockState::Idle,
            readings: Vec::with_capacity(lock_count),
            locked_frequency: None,
            lock_count,
            tolerance,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    /// The readings accumulated toward the current lock attempt.
    pub fn readings(&self) -> &[f32] {
        &self.readings
    }

    /// The averaged frequency, available once locked. Rounded to one
    /// decimal place for display stability.
    pub fn locked_frequency(&self) -> Option<f32> {
        self.locked_frequency
    }

    /// Begins listening. A no-op unless idle.
    pub fn start(&mut self) {
        if self.state == LockState::Idle {
            self.state = LockState::Listening;
        }
    }

    /// Stops the measurement entirely, discarding all accumulated state.
    pub fn stop(&mut self) {
        self.state = LockState::Idle;
        self.readings.clear();
        self.locked_frequency = None;
    }

    /// Starts a new measurement attempt: back to listening with empty
    /// buffers, whether currently locked or mid-run.
    pub fn reset(&mut self) {
        if self.state != LockState::Idle {
            self.state = LockState::Listening;
        }
        self.readings.clear();
        self.locked_frequency = None;
    }

    /// Offers one accepted frequency estimate to the consensus buffer.
    ///
    /// The estimate is consistent if the buffer is empty or every existing
    /// reading is within the relative tolerance of it; an inconsistent
    /// estimate clears the buffer and seeds a fresh run with itself. When
    /// the buffer reaches the lock count the state freezes to `Locked`
    /// with the arithmetic mean of the readings.
    ///
    /// # Returns
    /// * The state after processing the estimate
    pub fn offer(&mut self, frequency_hz: f32) -> LockState {
        if self.state != LockState::Listening {
            return self.state;
        }

        let consistent = self
            .readings
            .iter()
            .all(|&reading| (reading - frequency_hz).abs() / reading < self.tolerance);

        if !consistent {
            tracing::debug!(
                frequency_hz,
                discarded = self.readings.len(),
                "inconsistent reading, starting a fresh run"
            );
            self.readings.clear();
        }
        self.readings.push(frequency_hz);

        if self.readings.len() >= self.lock_count {
            let mean = self.readings.iter().sum::<f32>() / self.readings.len() as f32;
            self.locked_frequency = Some(round1(mean));
            self.state = LockState::Locked;
            tracing::info!(frequency_hz = round1(mean), "measurement locked");
        }
        self.state
    }
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
