//! Sense Platform - multi-channel sensor polling daemon.
//!
//! Multiplexes a device's sensor channels into one background process,
//! buffers their readings, and periodically transmits them. Which channels
//! run is persisted, so a restarted daemon resumes exactly the channels that
//! were enabled before.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Sense Platform                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  toggle/start/stop ──▶ ┌─────────────┐ ──▶ ┌─────────────┐       │
//! │                        │ Coordinator │     │ StateStore  │       │
//! │                        └─────────────┘     └─────────────┘       │
//! │                          │         │                             │
//! │                          ▼         ▼                             │
//! │               ┌──────────────┐  ┌──────────────┐                 │
//! │               │  Supervisor  │  │   Transmit   │──▶ spool/gateway│
//! │               │ (one thread  │  │  Scheduler   │                 │
//! │               │ per channel) │  └──────────────┘                 │
//! │               └──────────────┘         ▲                         │
//! │                      │                 │ drain                   │
//! │                      ▼                 │                         │
//! │               ┌──────────────┐         │                         │
//! │               │ReadingBuffer │─────────┘                         │
//! │               └──────────────┘                                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sense_platform::{
//!     ChannelKind, Coordinator, JsonPrefs, RateTier, ReadingBuffer, SensorConfig,
//!     SimulatedFactory, StateStore,
//! };
//! use std::sync::Arc;
//!
//! let store = StateStore::new(Arc::new(JsonPrefs::in_memory()));
//! let buffer = Arc::new(ReadingBuffer::default());
//! let coordinator = Coordinator::builder(store)
//!     .threaded_supervisors(Arc::new(SimulatedFactory::new(SensorConfig::default())), buffer)
//!     .spawn()?;
//!
//! coordinator.start();
//! coordinator.toggle(ChannelKind::Ambience, true);
//! coordinator.on_rate_change(RateTier::Often);
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod rate;
pub mod store;
pub mod supervisor;
pub mod transmit;
pub mod transparency;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use channel::{ChannelKind, IngestionSink, Reading, SubSensor};
pub use config::{Config, SensingPrefs, SensorConfig};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, LocalSession, LoginOutcome, ServiceSnapshot, SessionBackend,
};
pub use driver::{DriverError, DriverFactory, SensorDriver, SimulatedFactory};
pub use rate::{ConfigurationError, RateTier, SamplingPlan};
pub use store::{JsonPrefs, PersistenceError, PreferenceStore, StateStore};
pub use supervisor::{ChannelSupervisor, StartError, ThreadedSupervisor, WorkerHandle};
pub use transmit::{BufferFlusher, ReadingBuffer, SpoolFlusher, TransmitError, TransmitScheduler};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

#[cfg(feature = "gateway")]
pub use gateway::{
    BlockingGatewayClient, GatewayClient, GatewayConfig, GatewayError, GatewayFlusher,
    GatewaySession,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
