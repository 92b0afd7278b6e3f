//! Persistence for service status.
//!
//! [`PreferenceStore`] is the raw key/value collaborator; [`StateStore`]
//! layers the channel and service status keys on top of it.

pub mod prefs;
pub mod state;

pub use prefs::{JsonPrefs, PreferenceStore};
pub use state::{PersistenceError, StateSnapshot, StateStore, KEY_AUTOSTART, KEY_MAIN};
