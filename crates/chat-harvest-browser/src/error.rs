//! Browser-level errors.

use std::time::Duration;

use chat_harvest_core::PageError;
use thiserror::Error;

/// Chrome launch and DevTools protocol failure.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Chrome executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Failed to start Chrome: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Chrome exited before announcing a DevTools endpoint")]
    NoDevToolsEndpoint,
    #[error("DevTools endpoint did not appear within {0:?}")]
    StartupTimeout(Duration),
    #[error("Failed to connect to DevTools at {url}: {reason}")]
    Connection { url: String, reason: String },
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },
    #[error("CDP command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },
    #[error("CDP protocol error: {0}")]
    Protocol(String),
    #[error("JavaScript exception: {0}")]
    Script(String),
}

impl From<BrowserError> for PageError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::Spawn(io) => Self::Io(io),
            other => Self::Backend(other.to_string()),
        }
    }
}
