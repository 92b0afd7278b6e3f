//! Channel supervisors.
//!
//! One supervisor owns the lifecycle of a channel's sensing workers and the
//! single execution context they run on. Supervisors hold live worker state
//! only; persistence is the coordinator's job.

pub mod context;
pub mod deferred;
pub mod threaded;

use crate::channel::ChannelKind;
use crate::rate::SamplingPlan;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub use context::ExecutionContext;
pub use deferred::DeferredAction;
pub use threaded::ThreadedSupervisor;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one activation of a channel's workers.
///
/// A fresh handle is issued on every successful enable, so a rebuilt channel
/// never reuses the previous handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerHandle(u64);

impl WorkerHandle {
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Failure to activate a channel.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to spawn {kind} execution context: {source}")]
    Spawn {
        kind: ChannelKind,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} sensor could not be started: {reason}")]
    Rejected { kind: ChannelKind, reason: String },
}

/// Lifecycle of one channel's workers.
///
/// `Disabled --enable--> Enabled --disable--> Disabled`. Enabling an enabled
/// supervisor tears the stale workers down and rebuilds them.
pub trait ChannelSupervisor: Send {
    fn kind(&self) -> ChannelKind;

    /// Schedule construction and start of every sub-worker with `plan`.
    ///
    /// Returns once the work is queued on the channel's execution context;
    /// it never waits for the first reading.
    fn enable(&mut self, plan: SamplingPlan) -> Result<(), StartError>;

    /// Stop all sub-workers and end the execution context. No-op when
    /// already disabled.
    fn disable(&mut self);

    fn is_active(&self) -> bool;

    /// Handle of the current activation, if any.
    fn handle(&self) -> Option<WorkerHandle>;

    /// Plan the current activation was started with.
    fn plan(&self) -> Option<SamplingPlan>;

    /// Whether this supervisor currently listens for display-off events.
    fn display_off_subscribed(&self) -> bool {
        self.kind() == ChannelKind::Motion && self.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_handles_are_unique() {
        let a = WorkerHandle::next();
        let b = WorkerHandle::next();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }
}
