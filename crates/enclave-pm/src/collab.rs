//! Collaborators the registry calls into, with default implementations.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use enclave_core::{PackageName, UserId};
use tracing::{debug, warn};

use crate::artifact::TarArtifactParser;
use crate::descriptor::{ComponentDecl, PackageDescriptor};
use crate::error::{PmError, PmResult};

/// Supervises guest processes.
pub trait ProcessSupervisor: Send + Sync + Debug {
    /// Terminate every process of `package` running as `user`
    /// ([`UserId::ALL`] for every user).
    fn kill_package_for_user(&self, package: &PackageName, user: UserId);

    /// Make sure the process hosting `component` runs, returning its pid.
    fn find_or_start_process_for_component(
        &self,
        component: &ComponentDecl,
        process: &str,
        user: UserId,
    ) -> Option<u32>;
}

/// Reads package artifacts.
pub trait ArtifactParser: Send + Sync + Debug {
    /// Parse an artifact into a descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is unreadable or malformed.
    fn parse(&self, artifact: &Path) -> PmResult<PackageDescriptor>;

    /// ABIs the artifact ships native code for.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is unreadable.
    fn native_abis(&self, artifact: &Path) -> PmResult<Vec<String>> {
        let _ = artifact;
        Ok(Vec::new())
    }

    /// Extract native code for the first of `abis` the artifact carries
    /// into `dest`, returning the number of files written.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing failed.
    fn extract_native_code(&self, artifact: &Path, dest: &Path, abis: &[String]) -> PmResult<usize> {
        let _ = (artifact, dest, abis);
        Ok(0)
    }
}

/// Decides whether an artifact's native code can run on this host.
pub trait ArchitectureChecker: Send + Sync + Debug {
    /// Whether the artifact may be installed.
    fn is_artifact_compatible(&self, artifact: &Path) -> bool;

    /// ABIs in preference order, used to pick native code to extract.
    fn preferred_abis(&self) -> &[String] {
        &[]
    }
}

/// Facts about the host application.
pub trait HostEnvironment: Send + Sync + Debug {
    /// The host's own package name; guests may never claim it.
    fn host_package(&self) -> &str;

    /// Name fragments that deserve a warning when a guest uses them.
    fn caution_markers(&self) -> &[String] {
        &[]
    }

    /// Where the host image ships a system package, if it does.
    fn system_artifact_path(&self, package: &PackageName) -> Option<PathBuf>;

    /// Every system package the host image ships.
    fn system_packages(&self) -> Vec<(PackageName, PathBuf)> {
        Vec::new()
    }
}

/// Opens abstract content locators.
pub trait ContentResolver: Send + Sync + Debug {
    /// Open a locator for reading.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Content`] if the locator is unsupported or cannot
    /// be opened.
    fn open(&self, locator: &str) -> PmResult<Box<dyn Read + Send>>;
}

/// A supervisor that only logs. Used when no process layer is attached.
#[derive(Debug, Default)]
pub struct NoopSupervisor;

impl ProcessSupervisor for NoopSupervisor {
    fn kill_package_for_user(&self, package: &PackageName, user: UserId) {
        debug!(package = %package, user = %user, "Kill requested (no supervisor attached)");
    }

    fn find_or_start_process_for_component(
        &self,
        component: &ComponentDecl,
        process: &str,
        user: UserId,
    ) -> Option<u32> {
        debug!(
            component = %component.name,
            process,
            user = %user,
            "Process start requested (no supervisor attached)"
        );
        None
    }
}

/// Checks artifacts against the ABIs of the running host.
#[derive(Debug, Clone)]
pub struct HostAbiChecker {
    abis: Vec<String>,
    parser: TarArtifactParser,
}

impl HostAbiChecker {
    /// ABIs supported by the build target, best first.
    #[must_use]
    pub fn host() -> Self {
        let abis: &[&str] = match std::env::consts::ARCH {
            "x86_64" => &["x86_64", "x86"],
            "x86" => &["x86"],
            "aarch64" => &["arm64-v8a", "armeabi-v7a", "armeabi"],
            "arm" => &["armeabi-v7a", "armeabi"],
            _ => &[],
        };
        Self::with_abis(abis.iter().map(|a| (*a).to_owned()).collect())
    }

    /// A checker for an explicit ABI list.
    #[must_use]
    pub fn with_abis(abis: Vec<String>) -> Self {
        Self {
            abis,
            parser: TarArtifactParser::new(),
        }
    }
}

impl ArchitectureChecker for HostAbiChecker {
    fn is_artifact_compatible(&self, artifact: &Path) -> bool {
        match self.parser.native_abis(artifact) {
            Ok(found) if found.is_empty() => true,
            Ok(found) => found.iter().any(|abi| self.abis.contains(abi)),
            Err(e) => {
                warn!(artifact = %artifact.display(), error = %e, "Cannot inspect native code");
                false
            },
        }
    }

    fn preferred_abis(&self) -> &[String] {
        &self.abis
    }
}

/// Host facts supplied up front, typically from configuration.
#[derive(Debug, Clone)]
pub struct StaticHost {
    package: String,
    caution_markers: Vec<String>,
    system_packages: BTreeMap<PackageName, PathBuf>,
}

impl StaticHost {
    /// A host with the given package name.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            caution_markers: Vec::new(),
            system_packages: BTreeMap::new(),
        }
    }

    /// Set the caution markers.
    #[must_use]
    pub fn with_caution_markers(mut self, markers: Vec<String>) -> Self {
        self.caution_markers = markers;
        self
    }

    /// Register a system package shipped by the host image.
    #[must_use]
    pub fn with_system_package(mut self, package: PackageName, path: PathBuf) -> Self {
        self.system_packages.insert(package, path);
        self
    }
}

impl Default for StaticHost {
    fn default() -> Self {
        Self::new("dev.enclave.host")
    }
}

impl HostEnvironment for StaticHost {
    fn host_package(&self) -> &str {
        &self.package
    }

    fn caution_markers(&self) -> &[String] {
        &self.caution_markers
    }

    fn system_artifact_path(&self, package: &PackageName) -> Option<PathBuf> {
        self.system_packages.get(package).cloned()
    }

    fn system_packages(&self) -> Vec<(PackageName, PathBuf)> {
        self.system_packages
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Opens `file://` URLs.
#[derive(Debug, Default)]
pub struct FileContentResolver;

impl ContentResolver for FileContentResolver {
    fn open(&self, locator: &str) -> PmResult<Box<dyn Read + Send>> {
        let content_err = |message: String| PmError::Content {
            locator: locator.to_owned(),
            message,
        };

        let url = url::Url::parse(locator).map_err(|e| content_err(e.to_string()))?;
        if url.scheme() != "file" {
            return Err(content_err(format!("unsupported scheme '{}'", url.scheme())));
        }
        let path = url
            .to_file_path()
            .map_err(|()| content_err("not a local file path".into()))?;
        let file = File::open(&path).map_err(|e| content_err(e.to_string()))?;
        Ok(Box::new(file))
    }
}
