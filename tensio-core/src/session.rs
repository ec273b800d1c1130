//! # Measurement Session Module
//!
//! Owns one measurement attempt end to end: the capture stream, the
//! rolling sample buffer, and the worker thread that runs detection
//! ticks. Ticking is throttled to the configured interval on a monotonic
//! clock, decoupled from how often audio frames arrive. All detection
//! state lives on the worker thread, so no locks are needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::DetectionUpdate;
use crate::audio;
use crate::detector::Detector;
use crate::window::{DEFAULT_RING_CAPACITY, RollingBuffer};

/// How long the worker blocks waiting for audio before re-checking
/// control state. Keeps stop/reset latency bounded.
const AUDIO_POLL: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared between a session handle and its
/// worker thread. Checked at the top of every worker pass.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum SessionCommand {
    Reset,
}

/// A running measurement session.
///
/// Dropping the session stops the worker and releases the capture device;
/// `stop` does the same explicitly. `reset` starts a new measurement
/// attempt without re-acquiring capture (and therefore without a new
/// permission prompt on platforms that gate microphone access).
pub struct MeasurementSession {
    stream: Option<cpal::Stream>,
    worker: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    commands: Sender<SessionCommand>,
    updates: Receiver<DetectionUpdate>,
    sample_rate: u32,
}

impl MeasurementSession {
    /// Acquires the default capture device and starts ticking the given
    /// detector.
    pub fn start(detector: Detector) -> Result<Self> {
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let (stream, sample_rate) = audio::start_capture(frame_tx)?;

        let (update_tx, update_rx) = crossbeam_channel::unbounded();
        let (command_tx, command_rx) = crossbeam_channel::bounded(4);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let worker = thread::Builder::new()
            .name("tensio-session".into())
            .spawn(move || {
                run_worker(detector, frame_rx, command_rx, update_tx, token, sample_rate);
            })?;

        Ok(Self {
            stream: Some(stream),
            worker: Some(worker),
            cancel,
            commands: command_tx,
            updates: update_rx,
            sample_rate,
        })
    }

    /// The live device sample rate for this session, Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Per-tick detection updates. The receiver can be cloned and moved to
    /// another thread.
    pub fn updates(&self) -> &Receiver<DetectionUpdate> {
        &self.updates
    }

    /// Starts a new measurement attempt: clears consensus state and the
    /// rolling buffer, resumes ticking. Capture keeps running throughout.
    ///
    /// # Returns
    /// * `true` - The reset was queued for the worker
    /// * `false` - The command queue is full or the worker is gone; the
    ///   host may retry
    pub fn reset(&self) -> bool {
        let delivered = self.commands.try_send(SessionCommand::Reset).is_ok();
        if !delivered {
            tracing::warn!("reset command not delivered, worker backlogged or gone");
        }
        delivered
    }

    /// Stops the session: cancels the worker, joins it, then pauses and
    /// releases the capture stream.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("Error pausing stream: {e}");
            }
            drop(stream);
        }
        tracing::debug!("measurement session stopped");
    }
}

impl Drop for MeasurementSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The session worker loop.
///
/// Each pass drains capture frames into the rolling buffer, then runs a
/// detection tick if the interval has elapsed. Once the detector locks,
/// no further ticks are scheduled until a reset arrives; audio keeps
/// draining so the buffer is fresh when it does.
fn run_worker(
    mut detector: Detector,
    frames: Receiver<Vec<f32>>,
    commands: Receiver<SessionCommand>,
    updates: Sender<DetectionUpdate>,
    cancel: CancellationToken,
    sample_rate: u32,
) {
    let mut ring = RollingBuffer::new(DEFAULT_RING_CAPACITY);
    let tick_interval = detector.config().tick_interval;
    // Backdate so the first pass with audio ticks immediately.
    let mut last_tick = Instant::now() - tick_interval;

    tracing::debug!(sample_rate, "session worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        while let Ok(SessionCommand::Reset) = commands.try_recv() {
            detector.reset();
            ring.clear();
            last_tick = Instant::now() - tick_interval;
            tracing::debug!("session reset, consensus cleared");
        }

        match frames.recv_timeout(AUDIO_POLL) {
            Ok(frame) => ring.extend(&frame),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("audio channel closed, worker exiting");
                break;
            }
        }
        // Drain any backlog so the buffer always holds the freshest audio.
        while let Ok(frame) = frames.try_recv() {
            ring.extend(&frame);
        }

        if detector.is_locked() {
            continue;
        }
        if ring.is_empty() || last_tick.elapsed() < tick_interval {
            continue;
        }

        last_tick = Instant::now();
        let update = detector.tick(ring.as_slice(), sample_rate as f32);
        if updates.send(update).is_err() {
            tracing::debug!("update receiver dropped, worker exiting");
            break;
        }
    }

    tracing::debug!("session worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DetectorConfig;
    use crate::consensus::LockState;
    use crate::detector::Detector;
    use crate::physics::{REFERENCE_TABLE, StringMaterial, StringProfile};

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

    fn tone_frames(frequency: f32, sample_rate: f32, total_samples: usize) -> Vec<Vec<f32>> {
        let tone: Vec<f32> = (0..total_samples)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin()
            })
            .collect();
        tone.chunks(2048).map(<[f32]>::to_vec).collect()
    }

    #[test]
    fn cancellation_token_round_trip() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        let shared = token.clone();
        token.cancel();
        assert!(shared.is_cancelled());
    }

    #[test]
    fn worker_throttles_ticks_then_stops_after_lock_until_reset() {
        let config = DetectorConfig {
            tick_interval: Duration::from_millis(50),
            ..DetectorConfig::default()
        };
        let tick_interval = config.tick_interval;
        let lock_count = config.lock_count;
        let detector = Detector::new(config, &profile(), &REFERENCE_TABLE, None);

        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let (command_tx, command_rx) = crossbeam_channel::bounded(4);
        let (update_tx, update_rx) = crossbeam_channel::unbounded();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sample_rate = 48000u32;

        // Two rolling buffers' worth of a clean pluck tone.
        for frame in tone_frames(420.0, sample_rate as f32, 131072) {
            frame_tx.send(frame).unwrap();
        }

        let started = Instant::now();
        let worker = thread::spawn(move || {
            run_worker(detector, frame_rx, command_rx, update_tx, token, sample_rate);
        });

        let mut updates = Vec::new();
        loop {
            let update = update_rx
                .recv_timeout(Duration::from_secs(2))
                .expect("worker stalled before locking");
            let state = update.state;
            updates.push(update);
            if state == LockState::Locked {
                break;
            }
        }
        let lock_elapsed = started.elapsed();

        // One accepted reading per tick, so the lock lands on exactly the
        // lock-count-th update.
        assert_eq!(updates.len(), lock_count);
        // The monotonic throttle spaces ticks at least one interval apart:
        // the locking update cannot be produced before lock_count - 1
        // intervals have passed.
        assert!(
            lock_elapsed >= tick_interval * (lock_count as u32 - 1),
            "locked after only {lock_elapsed:?}"
        );

        // Once locked, no further ticks are scheduled.
        assert!(update_rx.recv_timeout(tick_interval * 4).is_err());

        // Reset resumes ticking over the same frame channel - capture is
        // never re-acquired - starting a fresh run from a cleared buffer.
        // Keep feeding audio while polling: the worker clears its rolling
        // buffer on reset, so it needs frames that arrive afterwards.
        command_tx.send(SessionCommand::Reset).unwrap();
        let mut resumed = None;
        for _ in 0..50 {
            for frame in tone_frames(420.0, sample_rate as f32, 32768) {
                frame_tx.send(frame).unwrap();
            }
            match update_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(update) => {
                    resumed = Some(update);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => panic!("worker exited during reset"),
            }
        }
        let resumed = resumed.expect("no update after reset");
        // The first update of the new attempt carries a single fresh reading.
        assert_eq!(resumed.state, LockState::Listening);
        assert_eq!(resumed.readings.len(), 1);

        cancel.cancel();
        worker.join().unwrap();
    }

    #[test]
    fn reset_reports_undelivered_when_command_queue_is_full() {
        // A session handle with no worker draining its command queue.
        let (command_tx, _command_rx) = crossbeam_channel::bounded(1);
        let (_update_tx, update_rx) = crossbeam_channel::unbounded();
        let session = MeasurementSession {
            stream: None,
            worker: None,
            cancel: CancellationToken::new(),
            commands: command_tx,
            updates: update_rx,
            sample_rate: 48000,
        };

        assert!(session.reset());
        // The queue is full now, so the host must be told.
        assert!(!session.reset());
    }
}
