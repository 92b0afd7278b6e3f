//! Backend session used for login around connectivity changes.

use serde::{Deserialize, Serialize};

/// Result of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginOutcome {
    Success,
    /// Credentials were rejected.
    Forbidden,
    /// Network or backend failure.
    Failed,
}

/// Performs the login handshake. Called off the control thread and may block.
pub trait SessionBackend: Send + Sync {
    fn login(&self) -> LoginOutcome;
}

/// Session for a daemon that transmits to local storage only.
///
/// Logs in successfully unless use of the backend is switched off.
#[derive(Debug, Clone, Copy)]
pub struct LocalSession {
    use_backend: bool,
}

impl LocalSession {
    pub fn new(use_backend: bool) -> Self {
        Self { use_backend }
    }
}

impl SessionBackend for LocalSession {
    fn login(&self) -> LoginOutcome {
        if self.use_backend {
            LoginOutcome::Success
        } else {
            tracing::debug!("Backend use is disabled, not logging in");
            LoginOutcome::Failed
        }
    }
}
