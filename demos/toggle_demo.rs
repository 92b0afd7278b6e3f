//! Demonstration of channel toggling with simulated sensors.
//!
//! This example shows how to:
//! 1. Build a coordinator over simulated drivers
//! 2. Toggle channels and change the sampling tier
//! 3. Spool buffered readings to disk on a transmit schedule
//! 4. Inspect the status bitmask and transparency counters
//!
//! Run with: cargo run --example toggle_demo

use std::sync::Arc;
use std::time::Duration;

use sense_platform::{
    rate::RateTier,
    transmit::{nudge_channel, read_spool},
    transparency::create_shared_log,
    ChannelKind, Coordinator, JsonPrefs, LocalSession, ReadingBuffer, SensingPrefs, SensorConfig,
    SimulatedFactory, SpoolFlusher, StateStore, TransmitScheduler,
};

fn main() {
    println!("Sense Platform - Toggle Demo");
    println!("============================");
    println!();

    let spool_dir = std::env::temp_dir().join(format!("sense-demo-{}", uuid::Uuid::new_v4()));
    let transparency = create_shared_log();

    let (nudger, nudges) = nudge_channel();
    let buffer = Arc::new(
        ReadingBuffer::default()
            .with_nudger(nudger)
            .with_transparency(transparency.clone()),
    );
    let flusher =
        Arc::new(SpoolFlusher::new(buffer.clone(), &spool_dir).with_transparency(transparency.clone()));

    let store = StateStore::new(Arc::new(JsonPrefs::in_memory()));
    let prefs = SensingPrefs {
        screen_off_fix: true,
        ..SensingPrefs::default()
    };
    let coordinator = match Coordinator::builder(store)
        .prefs(prefs)
        .threaded_supervisors(Arc::new(SimulatedFactory::new(SensorConfig::default())), buffer.clone())
        .transmit(TransmitScheduler::new(flusher, nudges))
        .sync_rate(RateTier::RealTime.into())
        .session(Arc::new(LocalSession::new(true)))
        .transparency(transparency.clone())
        .spawn()
    {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Failed to start coordinator: {e}");
            return;
        }
    };

    println!("Starting service with real-time sampling...");
    coordinator.on_rate_change(RateTier::RealTime);
    coordinator.start();
    coordinator.toggle(ChannelKind::Motion, true);
    coordinator.toggle(ChannelKind::PhoneState, true);
    println!("Status: {:#06x}", coordinator.status_bitmask());

    std::thread::sleep(Duration::from_secs(3));

    println!("Turning phone state off and ambience on...");
    coordinator.toggle(ChannelKind::PhoneState, false);
    coordinator.toggle(ChannelKind::Ambience, true);
    println!("Status: {:#06x}", coordinator.status_bitmask());

    std::thread::sleep(Duration::from_secs(3));

    println!("Simulating display off...");
    coordinator.on_screen_off();
    std::thread::sleep(Duration::from_secs(1));

    coordinator.stop();
    println!("Status after stop: {:#06x}", coordinator.status_bitmask());
    drop(coordinator);

    println!();
    match read_spool(&spool_dir) {
        Ok(batches) => {
            let readings: usize = batches.iter().map(|b| b.len()).sum();
            println!("Spooled {} batches with {readings} readings", batches.len());
        }
        Err(e) => println!("Could not read spool: {e}"),
    }
    println!("{}", transparency.summary());

    let _ = std::fs::remove_dir_all(&spool_dir);
}
