//! Sensor channels and the readings they produce.

pub mod types;

pub use types::{
    ChannelKind, Fields, IngestionSink, Reading, SubSensor, UnknownChannel,
    STATUS_CONNECTED, STATUS_RUNNING,
};
