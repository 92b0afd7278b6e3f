//! Buffering and periodic transmission of readings.
//!
//! Sensing workers push into a [`ReadingBuffer`]; the [`TransmitScheduler`]
//! periodically asks a [`BufferFlusher`] to drain it.

pub mod buffer;
pub mod scheduler;
pub mod spool;

pub use buffer::ReadingBuffer;
pub use scheduler::TransmitScheduler;
pub use spool::{device_id, read_spool, ReadingBatch, SpoolFlusher};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Errors raised while draining or transmitting readings.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("spool io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("upload failed: {0}")]
    Upload(String),
}

/// Drains buffered readings and sends them on.
pub trait BufferFlusher: Send + Sync {
    /// Transmit everything currently buffered. Returns the number of readings sent.
    fn flush(&self) -> Result<usize, TransmitError>;
}

/// Wakes the scheduler when new data is buffered.
///
/// Nudges coalesce: any number of nudges before the scheduler wakes count as one.
#[derive(Debug, Clone)]
pub struct Nudger(Sender<()>);

impl Nudger {
    pub fn nudge(&self) {
        let _ = self.0.try_send(());
    }
}

/// Create a connected nudger and the receiver a scheduler listens on.
pub fn nudge_channel() -> (Nudger, Receiver<()>) {
    let (tx, rx) = bounded(1);
    (Nudger(tx), rx)
}
