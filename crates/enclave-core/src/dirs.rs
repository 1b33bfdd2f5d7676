//! On-disk layout of the Enclave home directory.
//!
//! # Layout
//!
//! ```text
//! ~/.enclave/                         (EnclaveHome)
//! ├── system/
//! │   ├── identities.json              (identity counter + package/group map)
//! │   ├── users.json                   (synthetic users)
//! │   └── install.lock                 (cross-process install lock)
//! ├── app/<package>/
//! │   ├── base.pkg                     (artifact copied into managed storage)
//! │   ├── lib/                         (extracted native code)
//! │   └── package.json                 (persisted package record)
//! ├── data/user/<user>/<package>/      (cache/, files/, databases/)
//! ├── data/user_de/<user>/<package>/   (device-encrypted data)
//! ├── external/<user>/data/<package>/
//! ├── cache/                           (staged content-locator installs)
//! ├── logs/
//! └── config.toml
//! ```

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

use crate::ids::{PackageName, UserId};

/// Provides every filesystem location the registry and installer touch.
///
/// All paths derive from [`StorageLayout::root`]; implementors normally only
/// supply the root.
pub trait StorageLayout: Send + Sync + Debug {
    /// Root directory.
    fn root(&self) -> &Path;

    /// Registry-wide state (`system/`).
    fn system_dir(&self) -> PathBuf {
        self.root().join("system")
    }

    /// Persisted identity allocation.
    fn identities_path(&self) -> PathBuf {
        self.system_dir().join("identities.json")
    }

    /// Persisted synthetic users.
    fn users_path(&self) -> PathBuf {
        self.system_dir().join("users.json")
    }

    /// File locked for the duration of every install or uninstall.
    fn install_lock_path(&self) -> PathBuf {
        self.system_dir().join("install.lock")
    }

    /// Parent of every package directory (`app/`).
    fn apps_dir(&self) -> PathBuf {
        self.root().join("app")
    }

    /// Package directory (`app/<package>/`).
    fn app_dir_for(&self, package: &PackageName) -> PathBuf {
        self.apps_dir().join(package.as_str())
    }

    /// Artifact placed in managed storage.
    fn artifact_path_for(&self, package: &PackageName) -> PathBuf {
        self.app_dir_for(package).join("base.pkg")
    }

    /// Extracted native code.
    fn native_lib_dir_for(&self, package: &PackageName) -> PathBuf {
        self.app_dir_for(package).join("lib")
    }

    /// Persisted package record.
    fn record_path_for(&self, package: &PackageName) -> PathBuf {
        self.app_dir_for(package).join("package.json")
    }

    /// Credential-encrypted data root for a user.
    fn user_dir(&self, user: UserId) -> PathBuf {
        self.root().join("data").join("user").join(user.to_string())
    }

    /// Credential-encrypted data for a package under a user.
    fn user_data_dir_for(&self, package: &PackageName, user: UserId) -> PathBuf {
        self.user_dir(user).join(package.as_str())
    }

    /// Device-encrypted data root for a user.
    fn user_de_dir(&self, user: UserId) -> PathBuf {
        self.root().join("data").join("user_de").join(user.to_string())
    }

    /// Device-encrypted data for a package under a user.
    fn user_de_data_dir_for(&self, package: &PackageName, user: UserId) -> PathBuf {
        self.user_de_dir(user).join(package.as_str())
    }

    /// External storage root for a user.
    fn external_dir(&self, user: UserId) -> PathBuf {
        self.root().join("external").join(user.to_string())
    }

    /// External storage for a package under a user.
    fn external_data_dir_for(&self, package: &PackageName, user: UserId) -> PathBuf {
        self.external_dir(user).join("data").join(package.as_str())
    }

    /// Staging area for content-locator installs.
    fn cache_dir(&self) -> PathBuf {
        self.root().join("cache")
    }
}

/// Global Enclave home directory (`~/.enclave/` or `$ENCLAVE_HOME`).
#[derive(Debug, Clone)]
pub struct EnclaveHome {
    root: PathBuf,
}

impl EnclaveHome {
    /// Resolve the home directory.
    ///
    /// Checks `$ENCLAVE_HOME` first, then falls back to `$HOME/.enclave/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$ENCLAVE_HOME` is relative, or if neither
    /// variable is set.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var("ENCLAVE_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "ENCLAVE_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither ENCLAVE_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".enclave")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the top-level directories exist.
    ///
    /// The root is restricted to `0o700` on Unix.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.system_dir())?;
        std::fs::create_dir_all(self.apps_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Log files written by the CLI.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// User configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}

impl StorageLayout for EnclaveHome {
    fn root(&self) -> &Path {
        &self.root
    }
}
