//! Lifecycle event type.

use chrono::{DateTime, Utc};
use enclave_core::{PackageName, UserId};
use serde::Serialize;

/// Whether a package became installed or uninstalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    /// Installed (or updated) for a user.
    Installed,
    /// Uninstalled for a user, or everywhere.
    Uninstalled,
}

/// A transient notification emitted after a durable registry mutation.
///
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    /// Affected package.
    pub package: PackageName,
    /// Affected user, or [`UserId::ALL`].
    pub user: UserId,
    /// Installed or uninstalled.
    pub kind: LifecycleKind,
    /// Set when the package record is gone for every user.
    pub removed_entirely: bool,
    /// When the mutation completed.
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// An `installed` event.
    #[must_use]
    pub fn installed(package: PackageName, user: UserId) -> Self {
        Self {
            package,
            user,
            kind: LifecycleKind::Installed,
            removed_entirely: false,
            timestamp: Utc::now(),
        }
    }

    /// An `uninstalled` event.
    #[must_use]
    pub fn uninstalled(package: PackageName, user: UserId, removed_entirely: bool) -> Self {
        Self {
            package,
            user,
            kind: LifecycleKind::Uninstalled,
            removed_entirely,
            timestamp: Utc::now(),
        }
    }
}
