//! Fleet configuration.

use crate::result::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of concurrent clients
pub const DEFAULT_CLIENTS: usize = 2;

/// Default target URL (local development endpoint of the game under test)
pub const DEFAULT_URL: &str = "http://localhost:8080/pairs/";

/// Parameters for one fleet run.
///
/// Parsed once at process start and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Number of concurrent clients to open
    pub clients: usize,
    /// Target URL every client navigates to
    pub url: String,
    /// Whether the underlying browser sessions keep cookie storage enabled
    pub cookies_enabled: bool,
    /// Per-client capture delay; when set, each still-unfinished client is
    /// captured once this long after the run loop starts
    pub capture_after: Option<Duration>,
    /// Directory screenshot artifacts are written into
    pub capture_dir: PathBuf,
    /// Close a client session as soon as it signals completion instead of
    /// leaving it open until the run ends
    pub close_on_finish: bool,
    /// Evaluate the player-id expression on completion and include the
    /// result in the completion log line
    pub extract_player_id: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            clients: DEFAULT_CLIENTS,
            url: DEFAULT_URL.to_string(),
            cookies_enabled: true,
            capture_after: None,
            capture_dir: PathBuf::from("."),
            close_on_finish: false,
            extract_player_id: false,
        }
    }
}

impl FleetConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fleet size
    #[must_use]
    pub const fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    /// Set the target URL
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Enable or disable cookie storage in the browser sessions
    #[must_use]
    pub const fn with_cookies(mut self, enabled: bool) -> Self {
        self.cookies_enabled = enabled;
        self
    }

    /// Schedule a per-client capture this long after the run loop starts
    #[must_use]
    pub const fn with_capture_after(mut self, delay: Duration) -> Self {
        self.capture_after = Some(delay);
        self
    }

    /// Set the directory screenshots are written into
    #[must_use]
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    /// Close each session as soon as it finishes
    #[must_use]
    pub const fn with_close_on_finish(mut self, close: bool) -> Self {
        self.close_on_finish = close;
        self
    }

    /// Log an extracted player id with each completion line
    #[must_use]
    pub const fn with_extract_player_id(mut self, extract: bool) -> Self {
        self.extract_player_id = extract;
        self
    }

    /// Validate the configuration eagerly, before any client is opened.
    ///
    /// A zero fleet size is valid (the run exits immediately); an empty URL
    /// is not — it could only produce a run that never terminates.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.url.trim().is_empty() {
            return Err(HarnessError::config("target URL must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.clients, 2);
        assert_eq!(config.url, DEFAULT_URL);
        assert!(config.cookies_enabled);
        assert!(config.capture_after.is_none());
        assert!(!config.close_on_finish);
        assert!(!config.extract_player_id);
    }

    #[test]
    fn test_builder() {
        let config = FleetConfig::new()
            .with_clients(16)
            .with_url("http://game.test/pairs/")
            .with_cookies(false)
            .with_capture_after(Duration::from_secs(240))
            .with_capture_dir("/tmp/captures")
            .with_close_on_finish(true)
            .with_extract_player_id(true);

        assert_eq!(config.clients, 16);
        assert_eq!(config.url, "http://game.test/pairs/");
        assert!(!config.cookies_enabled);
        assert_eq!(config.capture_after, Some(Duration::from_secs(240)));
        assert_eq!(config.capture_dir, PathBuf::from("/tmp/captures"));
        assert!(config.close_on_finish);
        assert!(config.extract_player_id);
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = FleetConfig::new().with_url("  ");
        assert!(matches!(
            config.validate(),
            Err(crate::HarnessError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_zero_clients() {
        let config = FleetConfig::new().with_clients(0);
        assert!(config.validate().is_ok());
    }
}
