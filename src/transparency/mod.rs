//! Transparency module.
//!
//! Exposes what the daemon has collected and sent, so users can audit it.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
