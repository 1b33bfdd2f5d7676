//! The persisted per-package record.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use enclave_core::{AppId, ComponentName, InstallFlags, PackageName, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{ComponentDecl, PackageDescriptor};
use crate::error::PmResult;
use crate::persist;

/// Install state of a package for one synthetic user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageUserState {
    /// Installed for this user.
    pub installed: bool,
    /// Force-stopped until next explicit launch.
    pub stopped: bool,
    /// Components enabled for this user regardless of their declaration.
    pub enabled_components: BTreeSet<ComponentName>,
    /// Components disabled for this user regardless of their declaration.
    pub disabled_components: BTreeSet<ComponentName>,
}

impl PackageUserState {
    /// Whether a component is enabled, applying this user's overrides.
    #[must_use]
    pub fn is_enabled(&self, decl: &ComponentDecl) -> bool {
        if self.disabled_components.contains(&decl.name) {
            false
        } else if self.enabled_components.contains(&decl.name) {
            true
        } else {
            decl.enabled
        }
    }

    /// Override a component's enabled state.
    pub fn set_enabled(&mut self, name: &ComponentName, enabled: bool) {
        if enabled {
            self.disabled_components.remove(name);
            self.enabled_components.insert(name.clone());
        } else {
            self.enabled_components.remove(name);
            self.disabled_components.insert(name.clone());
        }
    }
}

/// Everything the registry knows about one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Parsed descriptor.
    pub descriptor: PackageDescriptor,
    /// Application identity.
    pub app_id: AppId,
    /// Options the package was installed with.
    pub install_flags: InstallFlags,
    /// Where the artifact currently lives.
    pub code_path: PathBuf,
    /// Per-user state.
    #[serde(default)]
    pub user_states: BTreeMap<UserId, PackageUserState>,
    /// First time any user installed it.
    pub first_install_time: DateTime<Utc>,
    /// Last install or update.
    pub last_update_time: DateTime<Utc>,
}

impl PackageRecord {
    /// A fresh record with no installed users.
    #[must_use]
    pub fn new(
        descriptor: PackageDescriptor,
        app_id: AppId,
        install_flags: InstallFlags,
        code_path: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            descriptor,
            app_id,
            install_flags,
            code_path,
            user_states: BTreeMap::new(),
            first_install_time: now,
            last_update_time: now,
        }
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &PackageName {
        &self.descriptor.package_name
    }

    /// Shared identity group key.
    #[must_use]
    pub fn shared_group(&self) -> Option<&str> {
        self.descriptor.shared_group.as_deref()
    }

    /// Whether the package is installed for `user`.
    #[must_use]
    pub fn is_installed(&self, user: UserId) -> bool {
        self.user_states.get(&user).is_some_and(|s| s.installed)
    }

    /// Users the package is installed for, ascending.
    #[must_use]
    pub fn installed_users(&self) -> Vec<UserId> {
        self.user_states
            .iter()
            .filter(|(_, s)| s.installed)
            .map(|(u, _)| *u)
            .collect()
    }

    /// State for one user, if any.
    #[must_use]
    pub fn user_state(&self, user: UserId) -> Option<&PackageUserState> {
        self.user_states.get(&user)
    }

    /// Mutable state for one user, created on first access.
    pub fn user_state_mut(&mut self, user: UserId) -> &mut PackageUserState {
        self.user_states.entry(user).or_default()
    }

    /// Mark installed for `user`, clearing any stopped flag.
    pub fn mark_installed(&mut self, user: UserId) {
        let state = self.user_state_mut(user);
        state.installed = true;
        state.stopped = false;
    }

    /// Drop `user`'s state entirely.
    pub fn remove_user(&mut self, user: UserId) {
        self.user_states.remove(&user);
    }

    /// Whether a component of this package is usable by `user`.
    #[must_use]
    pub fn is_component_enabled(&self, decl: &ComponentDecl, user: UserId) -> bool {
        self.user_states
            .get(&user)
            .map_or(decl.enabled, |s| s.is_enabled(decl))
    }

    /// Read a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed.
    pub fn load(path: &Path) -> PmResult<Self> {
        let record: Self = persist::read_json(path)?;
        record.descriptor.validate()?;
        Ok(record)
    }

    /// Atomically replace the record file.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub fn save(&self, path: &Path) -> PmResult<()> {
        persist::write_json_atomic(path, self)?;
        debug!(package = %self.name(), path = %path.display(), "Saved package record");
        Ok(())
    }
}
