//! # Audio Capture Module
//!
//! Real-time microphone capture through CPAL. The capture device and its
//! stream are an exclusively-owned resource for the lifetime of one
//! measurement session; dropping the returned stream releases it
//! deterministically.
//!
//! ## Features
//! - Default input device selection with mono f32 configuration
//! - Nearest supported sample rate to 44.1 kHz, reported to the caller
//!   rather than assumed
//! - Fixed-size capture frames pushed over a channel to the session worker

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;

/// Samples per capture frame handed to the session worker.
///
/// Small relative to the analysis window: the worker accumulates frames
/// into its rolling buffer, so this only bounds capture latency.
pub const CAPTURE_FRAME: usize = 2048;

/// Preferred capture rate; the nearest rate the device supports wins.
const TARGET_SAMPLE_RATE: u32 = 44100;

/// Starts audio capture from the default input device.
///
/// Sets up a mono f32 input stream and a callback that slices incoming
/// data into `CAPTURE_FRAME`-sample frames for the session worker. Frames
/// are sent with `try_send` so a slow consumer drops audio instead of
/// blocking the audio callback.
///
/// # Arguments
/// * `sender` - Channel sender feeding the session worker
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Live stream handle and the actual
///   device sample rate in Hz
/// * `Err(e)` - No device, no suitable format, or the stream failed to
///   start. Acquisition failure is the host's concern; the detector stays
///   resettable afterwards.
pub fn start_capture(sender: Sender<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    tracing::info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let sample_rate = supported_config
        .try_with_sample_rate(cpal::SampleRate(TARGET_SAMPLE_RATE))
        .unwrap_or_else(|| supported_config.with_max_sample_rate());

    let sample_rate_val = sample_rate.sample_rate().0;
    let config: cpal::StreamConfig = sample_rate.into();

    tracing::info!("Selected sample rate: {} Hz", sample_rate_val);

    let err_fn = |err| tracing::error!("An error occurred on the audio stream: {err}");

    // Accumulates callback data until a full frame is available.
    let mut frame_buffer = Vec::with_capacity(CAPTURE_FRAME * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            frame_buffer.extend_from_slice(data);

            while frame_buffer.len() >= CAPTURE_FRAME {
                let frame = frame_buffer[..CAPTURE_FRAME].to_vec();

                // Drop the frame if the worker is behind; blocking here
                // would glitch the capture callback.
                let _ = sender.try_send(frame);

                frame_buffer.drain(..CAPTURE_FRAME);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate_val))
}

/// Picks the input format the meter wants from what the device offers:
/// single channel, f32 samples, and a rate span as near the preferred
/// rate as possible. A span that already contains the preferred rate
/// scores zero and wins outright.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    let target = target_rate as i64;
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let low = c.min_sample_rate().0 as i64;
            let high = c.max_sample_rate().0 as i64;
            if (low..=high).contains(&target) {
                0
            } else {
                // Distance from the target to the nearest edge of the span.
                (low - target).abs().min((high - target).abs())
            }
        })
}
