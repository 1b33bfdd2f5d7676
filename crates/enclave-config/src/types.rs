//! Configuration types.
//!
//! Every struct implements [`Default`] with the same values as
//! `defaults.toml`, so a bare `[section]` header produces a working
//! configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where registry state lives.
    pub storage: StorageSection,
    /// The host application the registry runs inside.
    pub host: HostSection,
    /// Synthetic user limits.
    pub users: UsersSection,
    /// Broadcast delivery.
    pub broadcast: BroadcastSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

/// Storage location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Registry root. `None` uses the platform default.
    pub root: Option<String>,
}

impl StorageSection {
    /// Configured root as a path.
    #[must_use]
    pub fn root_path(&self) -> Option<PathBuf> {
        self.root.as_deref().map(PathBuf::from)
    }
}

/// Host application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// The host's own package name.
    pub package: String,
    /// Substrings that make an install emit a warning.
    pub caution_markers: Vec<String>,
    /// Packages shipped with the host, by name.
    pub system_packages: BTreeMap<String, String>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            package: "dev.enclave.host".to_owned(),
            caution_markers: vec!["enclave".to_owned(), "sandbox".to_owned(), "virtual".to_owned()],
            system_packages: BTreeMap::new(),
        }
    }
}

/// User limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersSection {
    /// Maximum number of users, including user 0.
    pub max_users: usize,
}

impl Default for UsersSection {
    fn default() -> Self {
        Self { max_users: 16 }
    }
}

/// Broadcast delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSection {
    /// Receiver timeout in milliseconds.
    pub timeout_ms: u64,
}

impl BroadcastSection {
    /// Receiver timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self { timeout_ms: 9000 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["enclave_pm=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
