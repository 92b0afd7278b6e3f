//! In-memory service state owned by the control thread.

use crate::channel::{ChannelKind, STATUS_CONNECTED, STATUS_RUNNING};
use crate::store::StateSnapshot;
use crate::supervisor::WorkerHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Live state of one channel.
///
/// `worker_handle` is set only while the channel is enabled and the daemon
/// runs. It stays empty for an enabled channel whose activation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub kind: ChannelKind,
    pub enabled: bool,
    pub worker_handle: Option<WorkerHandle>,
}

impl ChannelState {
    fn new(kind: ChannelKind, enabled: bool) -> Self {
        Self {
            kind,
            enabled,
            worker_handle: None,
        }
    }
}

/// Process-wide state, mutated only by the coordinator.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub running: bool,
    pub logged_in: bool,
    pub foreground: bool,
    pub channels: BTreeMap<ChannelKind, ChannelState>,
}

impl ServiceState {
    /// Fresh, stopped state with the persisted enabled flags.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self {
            running: false,
            logged_in: false,
            foreground: false,
            channels: ChannelKind::ALL
                .iter()
                .map(|kind| (*kind, ChannelState::new(*kind, snapshot.is_enabled(*kind))))
                .collect(),
        }
    }

    pub fn channel(&self, kind: ChannelKind) -> &ChannelState {
        // Every kind is inserted at construction and never removed.
        &self.channels[&kind]
    }

    pub fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelState {
        self.channels
            .entry(kind)
            .or_insert_with(|| ChannelState::new(kind, false))
    }

    pub fn enabled_channels(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.channel(*kind).enabled)
            .collect()
    }

    /// Status bitmask: nothing while stopped, otherwise the running bit, the
    /// connected bit while logged in and one bit per enabled channel.
    pub fn status_bitmask(&self) -> u32 {
        if !self.running {
            return 0;
        }
        let mut status = STATUS_RUNNING;
        if self.logged_in {
            status |= STATUS_CONNECTED;
        }
        self.enabled_channels()
            .iter()
            .fold(status, |mask, kind| mask | kind.status_bit())
    }

    pub fn snapshot(&self, sample_rate: i32, sync_rate: i32) -> ServiceSnapshot {
        ServiceSnapshot {
            running: self.running,
            logged_in: self.logged_in,
            foreground: self.foreground,
            status: self.status_bitmask(),
            sample_rate,
            sync_rate,
            channels: self
                .channels
                .values()
                .map(|c| ChannelStatus {
                    kind: c.kind,
                    enabled: c.enabled,
                    active: c.worker_handle.is_some(),
                })
                .collect(),
            taken_at: Utc::now(),
        }
    }
}

/// Per-channel entry of a [`ServiceSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub kind: ChannelKind,
    pub enabled: bool,
    pub active: bool,
}

/// Externally visible view of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub running: bool,
    pub logged_in: bool,
    pub foreground: bool,
    pub status: u32,
    pub sample_rate: i32,
    pub sync_rate: i32,
    pub channels: Vec<ChannelStatus>,
    pub taken_at: DateTime<Utc>,
}

impl ServiceSnapshot {
    pub fn channel(&self, kind: ChannelKind) -> Option<&ChannelStatus> {
        self.channels.iter().find(|c| c.kind == kind)
    }
}
