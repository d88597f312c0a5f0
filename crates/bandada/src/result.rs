//! Result and error types for Bandada.

use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while running a fleet
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration error detected before any client was opened
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Client session error
    #[error("Session error: {message}")]
    Session {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// In-page evaluation error
    #[error("Evaluation failed: {message}")]
    Evaluation {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every client event source dropped before the fleet finished.
    ///
    /// The original scripts waited forever in this situation; surfacing it as
    /// an error makes the dead run visible instead of hanging.
    #[error("Event channel closed with {finished} of {clients} clients finished")]
    EventChannelClosed {
        /// Clients that had signaled completion
        finished: usize,
        /// Fleet size
        clients: usize,
    },
}

impl HarnessError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a session error
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a browser launch error
    #[must_use]
    pub fn browser_launch(message: impl Into<String>) -> Self {
        Self::BrowserLaunch {
            message: message.into(),
        }
    }

    /// Create an evaluation error
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create a screenshot error
    #[must_use]
    pub fn screenshot(message: impl Into<String>) -> Self {
        Self::Screenshot {
            message: message.into(),
        }
    }
}
