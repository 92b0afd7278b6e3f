//! Typed access to the persisted service status.

use super::prefs::PreferenceStore;
use crate::channel::{ChannelKind, STATUS_RUNNING};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Status key recording whether the daemon was asked to run.
pub const KEY_MAIN: &str = "main";
/// Status key recording whether the daemon should start with the host.
pub const KEY_AUTOSTART: &str = "autostart";

/// Errors raised by the state store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("preference '{0}' not stored")]
    NotCommitted(String),
}

/// Durable record of which channels are enabled and whether the daemon runs.
#[derive(Clone)]
pub struct StateStore {
    prefs: Arc<dyn PreferenceStore>,
}

impl StateStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    pub fn is_main_enabled(&self) -> bool {
        self.prefs.get_bool(KEY_MAIN, false)
    }

    pub fn set_main_enabled(&self, active: bool) -> Result<(), PersistenceError> {
        self.put(KEY_MAIN, active)
    }

    pub fn is_autostart(&self) -> bool {
        self.prefs.get_bool(KEY_AUTOSTART, false)
    }

    pub fn set_autostart(&self, active: bool) -> Result<(), PersistenceError> {
        self.put(KEY_AUTOSTART, active)
    }

    pub fn is_channel_enabled(&self, kind: ChannelKind) -> bool {
        self.prefs.get_bool(kind.status_key(), false)
    }

    pub fn set_channel_enabled(
        &self,
        kind: ChannelKind,
        active: bool,
    ) -> Result<(), PersistenceError> {
        self.put(kind.status_key(), active)
    }

    /// Read the whole persisted status at once.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            main: self.is_main_enabled(),
            channels: ChannelKind::ALL
                .iter()
                .map(|kind| (*kind, self.is_channel_enabled(*kind)))
                .collect(),
        }
    }

    fn put(&self, key: &str, value: bool) -> Result<(), PersistenceError> {
        if self.prefs.put_bool(key, value) {
            Ok(())
        } else {
            Err(PersistenceError::NotCommitted(key.to_string()))
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Persisted status as read at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub main: bool,
    pub channels: BTreeMap<ChannelKind, bool>,
}

impl StateSnapshot {
    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        self.channels.get(&kind).copied().unwrap_or(false)
    }

    pub fn enabled_channels(&self) -> Vec<ChannelKind> {
        self.channels
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Bitmask the daemon would report if it ran with this status.
    pub fn status_bitmask(&self) -> u32 {
        if !self.main {
            return 0;
        }
        self.enabled_channels()
            .iter()
            .fold(STATUS_RUNNING, |mask, kind| mask | kind.status_bit())
    }
}
