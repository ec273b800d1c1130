//! # Signal Window Module
//!
//! Owns the rolling sample store fed by the capture thread and picks the
//! best analysis window out of it. Capture hardware may leave stale or
//! silent samples at the buffer edges, so before every detection tick the
//! selector scans for the loudest region instead of blindly analyzing the
//! tail of the buffer.

/// Default capacity of the rolling sample store, in samples.
///
/// Four analysis windows' worth: enough history that a pluck is never
/// scrolled out between ticks, small enough to scan cheaply.
pub const DEFAULT_RING_CAPACITY: usize = 65536;

/// Fixed-capacity rolling store of the most recent capture samples.
///
/// The capture callback never touches this directly; the session worker
/// drains frames out of a channel into it, so there is exactly one owner
/// and no aliasing with the audio thread.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: Vec<f32>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a capture frame, discarding the oldest samples once the
    /// capacity is exceeded.
    pub fn extend(&mut self, frame: &[f32]) {
        self.samples.extend_from_slice(frame);
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// The offset and loudness of a selected analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPick {
    /// Offset of the window inside the scanned buffer.
    pub offset: usize,
    /// Root-mean-square amplitude of the window. The caller gates on this:
    /// below the minimum-signal threshold the tick is silence and no
    /// frequency estimation happens.
    pub rms: f32,
}

/// Scans a rolling buffer for the loudest fixed-size sub-window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSelector {
    window_size: usize,
    stride: usize,
}

impl WindowSelector {
    /// # Panics
    /// * If `stride` is zero (the scan would never terminate)
    pub fn new(window_size: usize, stride: usize) -> Self {
        assert!(stride > 0, "scan stride must be non-zero");
        assert!(window_size > 0, "window size must be non-zero");
        Self {
            window_size,
            stride,
        }
    }

    /// Picks the sub-window of maximal RMS energy.
    ///
    /// Candidate offsets are scanned at the configured stride from the end
    /// of the buffer backward to the start, replacing the best pick only on
    /// strict improvement, so ties favor the most recent candidate. A
    /// buffer shorter than one window is returned whole (the estimator
    /// zero-pads anyway).
    ///
    /// # Returns
    /// * `Some((pick, window))` - Chosen offset/RMS and the window slice
    /// * `None` - Empty buffer
    pub fn select<'a>(&self, buffer: &'a [f32]) -> Option<(WindowPick, &'a [f32])> {
        if buffer.is_empty() {
            return None;
        }
        if buffer.len() <= self.window_size {
            let pick = WindowPick {
                offset: 0,
                rms: rms(buffer),
            };
            return Some((pick, buffer));
        }

        let mut offset = buffer.len() - self.window_size;
        let mut best = WindowPick {
            offset,
            rms: rms(&buffer[offset..offset + self.window_size]),
        };
        while offset > 0 {
            offset = offset.saturating_sub(self.stride);
            let candidate = rms(&buffer[offset..offset + self.window_size]);
            if candidate > best.rms {
                best = WindowPick {
                    offset,
                    rms: candidate,
                };
            }
        }

        Some((best, &buffer[best.offset..best.offset + self.window_size]))
    }
}

/// Root-mean-square amplitude of a block of samples.
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    (block.iter().map(|&s| s * s).sum::<f32>() / block.len() as f32).sqrt()
}
