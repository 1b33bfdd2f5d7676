//! Request and result types of the registry facade.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use enclave_core::{AppId, InstallFlags, PackageName, UserId};
use serde::Serialize;

use crate::descriptor::ComponentDecl;

/// Where an artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// A file readable by the registry.
    Path(PathBuf),
    /// A locator opened through the content resolver.
    Content(String),
}

/// A request to install one artifact for one user.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Artifact source.
    pub source: InstallSource,
    /// Install mode.
    pub flags: InstallFlags,
    /// Target user.
    pub user: UserId,
}

impl InstallRequest {
    /// Install from a filesystem path.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>, flags: InstallFlags, user: UserId) -> Self {
        Self {
            source: InstallSource::Path(path.into()),
            flags,
            user,
        }
    }

    /// Install from a content locator. The staged copy is moved into
    /// managed storage.
    #[must_use]
    pub fn from_content(locator: impl Into<String>, flags: InstallFlags, user: UserId) -> Self {
        Self {
            source: InstallSource::Content(locator.into()),
            flags: flags | InstallFlags::URI_FILE,
            user,
        }
    }

    /// Flags as applied: `URI_FILE` only ever accompanies a content source.
    pub(crate) fn effective_flags(&self) -> InstallFlags {
        match self.source {
            InstallSource::Path(_) => self.flags - InstallFlags::URI_FILE,
            InstallSource::Content(_) => self.flags | InstallFlags::URI_FILE,
        }
    }
}

/// Outcome of [`PackageManager::install`](super::PackageManager::install).
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallResult {
    /// Package named by the artifact, once parsed.
    pub package_name: Option<PackageName>,
    /// Whether the package is now installed for the user.
    pub success: bool,
    /// Human-readable reason for failure, empty on success.
    pub diagnostic: String,
    /// Package that caused the failure, when one did.
    pub offending_package: Option<String>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl InstallResult {
    pub(crate) fn installed(package: PackageName, warnings: Vec<String>) -> Self {
        Self {
            package_name: Some(package),
            success: true,
            diagnostic: String::new(),
            offending_package: None,
            warnings,
        }
    }

    pub(crate) fn failed(
        package: Option<PackageName>,
        diagnostic: impl Into<String>,
        offending_package: Option<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            package_name: package,
            success: false,
            diagnostic: diagnostic.into(),
            offending_package,
            warnings,
        }
    }
}

/// How far an uninstall went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallOutcome {
    /// The package was not installed for the user.
    NotInstalled,
    /// Other users still have the package.
    RemovedForUser,
    /// The last user was removed; the record and identity mapping are gone.
    RemovedEntirely,
}

impl std::fmt::Display for UninstallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotInstalled => "not installed",
            Self::RemovedForUser => "removed for user",
            Self::RemovedEntirely => "removed entirely",
        })
    }
}

/// What a startup scan did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Records loaded and indexed.
    pub loaded: Vec<PackageName>,
    /// Directories deleted because their record was unusable.
    pub purged: Vec<String>,
    /// System packages re-pointed at a new host artifact.
    pub reconciled: Vec<PackageName>,
    /// Host system packages installed for the first time.
    pub provisioned: Vec<PackageName>,
}

/// Per-user view of an installed package's runtime environment.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationInfo {
    /// Package name.
    pub package_name: PackageName,
    /// Shared application identity.
    pub app_id: AppId,
    /// Per-user identity.
    pub uid: u32,
    /// Default process name.
    pub process_name: String,
    /// Installed artifact.
    pub code_path: PathBuf,
    /// Extracted native code.
    pub native_library_dir: PathBuf,
    /// Credential-encrypted data directory.
    pub data_dir: PathBuf,
    /// Device-encrypted data directory.
    pub device_protected_data_dir: PathBuf,
    /// External storage directory.
    pub external_data_dir: PathBuf,
    /// Installed from the host image.
    pub system: bool,
    /// Force-stopped and not yet relaunched.
    pub stopped: bool,
    /// Package meta-data, only with `GET_META_DATA`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta_data: BTreeMap<String, String>,
}

/// Per-user view of an installed package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    /// Package name.
    pub package_name: PackageName,
    /// Per-user identity.
    pub uid: u32,
    /// Monotonic version.
    pub version_code: u64,
    /// Display version.
    pub version_name: Option<String>,
    /// Display label.
    pub label: Option<String>,
    /// Shared identity group.
    pub shared_group: Option<String>,
    /// Install flags of the current install.
    pub install_flags: InstallFlags,
    /// First install.
    pub first_install_time: DateTime<Utc>,
    /// Last install or update.
    pub last_update_time: DateTime<Utc>,
    /// Runtime environment.
    pub application: ApplicationInfo,
    /// Activities, only with `GET_COMPONENTS`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<ComponentDecl>,
    /// Services, only with `GET_COMPONENTS`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ComponentDecl>,
    /// Receivers, only with `GET_COMPONENTS`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<ComponentDecl>,
    /// Providers, only with `GET_COMPONENTS`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ComponentDecl>,
}
