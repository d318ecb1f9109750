//! Watch session configuration

use crate::error::WatchError;
use crate::ignore::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Interval used when the native backend is unavailable and no interval was set
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Configuration for a [`WatchSession`](crate::WatchSession)
///
/// Can be loaded from TOML:
/// ```toml
/// ignore_initial = true
/// poll_interval_ms = 250
///
/// [ignore]
/// use_gitignore = true
/// patterns = ["*.log", "node_modules/"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seed the tracker silently instead of reporting pre-existing entries
    #[serde(default)]
    pub ignore_initial: bool,

    /// Use the polling backend with this interval (milliseconds)
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Paths that never produce tracked entries or events
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

impl WatcherConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, WatchError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            WatchError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, WatchError> {
        toml::from_str(text).map_err(|e| WatchError::InvalidConfig(e.to_string()))
    }

    pub fn with_ignore_initial(mut self, ignore_initial: bool) -> Self {
        self.ignore_initial = ignore_initial;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Add a gitignore-syntax pattern
    pub fn with_ignored(mut self, pattern: impl Into<String>) -> Self {
        self.ignore.patterns.push(pattern.into());
        self
    }

    pub fn with_gitignore(mut self, use_gitignore: bool) -> Self {
        self.ignore.use_gitignore = use_gitignore;
        self
    }

    /// Polling interval, if the polling backend was requested
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// Reject settings the backend cannot run with
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.poll_interval_ms == Some(0) {
            return Err(WatchError::InvalidConfig(
                "poll interval must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }
}
