//! # Tensio - String Tension Meter (terminal frontend)
//!
//! Thin frontend over `tensio-core`: starts a measurement session against
//! the default microphone and prints each detection tick until the
//! reading locks. The real measurement logic lives entirely in the core
//! crate; this binary only wires capture to the terminal.
//!
//! Usage: `tensio [string-table.json]` - an optional JSON file overrides
//! the built-in reference string table.

use std::fs::File;

use anyhow::{Context, Result};
use tensio_core::DetectorConfig;
use tensio_core::consensus::LockState;
use tensio_core::detector::{Detector, TensionWindow};
use tensio_core::physics::{REFERENCE_TABLE, StringMaterial, StringProfile, StringTable};
use tensio_core::session::MeasurementSession;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let table = match std::env::args().nth(1) {
        Some(path) => {
            let file = File::open(&path).with_context(|| format!("opening {path}"))?;
            StringTable::from_json_reader(file)?
        }
        None => REFERENCE_TABLE.clone(),
    };

    // A common setup; a full application would collect this from the user.
    let profile = StringProfile {
        material: StringMaterial::Polyester,
        gauge_mm: 1.25,
        head_area_sq_in: 100.0,
        measured_length_m: None,
        mains: 16,
        crosses: 19,
    };

    let config = DetectorConfig::default();
    let lock_count = config.lock_count;
    let validator = TensionWindow::new(&profile, &table);
    let detector = Detector::new(config, &profile, &table, Some(Box::new(validator)));

    let session = MeasurementSession::start(detector)?;
    tracing::info!(
        sample_rate = session.sample_rate(),
        "measurement session started"
    );
    println!(
        "Listening at {} Hz. Pluck a main string near the center of the bed.",
        session.sample_rate()
    );

    let updates = session.updates().clone();
    for update in updates.iter() {
        match update.state {
            LockState::Locked => {
                if let (Some(frequency), Some(tension)) =
                    (update.locked_frequency, update.tension)
                {
                    tracing::info!(frequency, pounds = tension.pounds, "measurement locked");
                    println!(
                        "\nLocked: {frequency:.1} Hz -> {:.2} lbs ({:.2} N)",
                        tension.pounds, tension.newtons
                    );
                }
                break;
            }
            LockState::Listening => {
                if let (Some(frequency), Some(tension)) = (update.frequency_hz, update.tension) {
                    println!(
                        "  {frequency:7.1} Hz  ~{:6.2} lbs  [{}/{}]",
                        tension.pounds,
                        update.readings.len(),
                        lock_count
                    );
                }
            }
            LockState::Idle => break,
        }
    }

    session.stop();
    Ok(())
}
