//! Shared harness for registry integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use enclave_core::{EnclaveHome, InstallFlags, PackageName, StorageLayout, UserId};
use enclave_pm::{
    ComponentDecl, InstallRequest, InstallResult, PackageManager, PackageManagerBuilder,
    ProcessSupervisor,
};
use tempfile::TempDir;

/// Records every kill request.
#[derive(Debug, Default)]
pub struct RecordingSupervisor {
    kills: Mutex<Vec<(PackageName, UserId)>>,
}

impl RecordingSupervisor {
    pub fn kills(&self) -> Vec<(PackageName, UserId)> {
        self.kills.lock().unwrap().clone()
    }
}

impl ProcessSupervisor for RecordingSupervisor {
    fn kill_package_for_user(&self, package: &PackageName, user: UserId) {
        self.kills.lock().unwrap().push((package.clone(), user));
    }

    fn find_or_start_process_for_component(
        &self,
        _component: &ComponentDecl,
        _process: &str,
        _user: UserId,
    ) -> Option<u32> {
        Some(4242)
    }
}

/// Write a tar artifact containing `Package.toml` and any extra files.
pub fn write_artifact(path: &Path, manifest: &str, extra: &[(&str, &[u8])]) {
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        let mut files: Vec<(&str, &[u8])> = vec![("Package.toml", manifest.as_bytes())];
        files.extend_from_slice(extra);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body).unwrap();
        }
        builder.finish().unwrap();
    }
    std::fs::write(path, data).unwrap();
}

/// Minimal manifest for `package`.
pub fn manifest(package: &str) -> String {
    format!("package = \"{package}\"\n")
}

/// Manifest for `package` in shared identity group `group`.
pub fn grouped_manifest(package: &str, group: &str) -> String {
    format!("package = \"{package}\"\nshared_group = \"{group}\"\n")
}

pub fn name(s: &str) -> PackageName {
    PackageName::parse(s).unwrap()
}

/// A registry over a throwaway home directory.
///
/// Owns the `TempDir`; everything is removed when the harness drops.
pub struct TestRegistry {
    pub pm: Arc<PackageManager>,
    pub supervisor: Arc<RecordingSupervisor>,
    pub home: Arc<EnclaveHome>,
    pub artifacts: PathBuf,
    dir: TempDir,
}

impl TestRegistry {
    /// A registry with default collaborators, scanned and ready.
    pub fn new() -> Self {
        Self::with(|b| b)
    }

    /// A registry whose builder is customised by `configure`.
    pub fn with(configure: impl Fn(PackageManagerBuilder) -> PackageManagerBuilder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let home = Arc::new(EnclaveHome::from_path(dir.path().join("home")));
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();

        let supervisor = Arc::new(RecordingSupervisor::default());
        let builder = PackageManager::builder(Arc::clone(&home) as _)
            .with_supervisor(Arc::clone(&supervisor) as _);
        let pm = configure(builder).build().unwrap();
        pm.system_ready().unwrap();

        Self {
            pm,
            supervisor,
            home,
            artifacts,
            dir,
        }
    }

    /// A second registry over the same home, as after a restart.
    pub fn restart(&self) -> Arc<PackageManager> {
        let pm = PackageManager::builder(Arc::clone(&self.home) as _).build().unwrap();
        pm.system_ready().unwrap();
        pm
    }

    /// Write an artifact named `file` into the artifacts directory.
    pub fn artifact(&self, file: &str, manifest: &str) -> PathBuf {
        let path = self.artifacts.join(file);
        write_artifact(&path, manifest, &[]);
        path
    }

    /// Build and install an artifact into managed storage.
    pub fn install(&self, manifest: &str, user: UserId) -> InstallResult {
        let file = format!("{}.pkg", uuid::Uuid::new_v4());
        let path = self.artifact(&file, manifest);
        self.pm
            .install(InstallRequest::from_path(path, InstallFlags::STORAGE, user))
    }

    /// Install and assert success.
    pub fn install_ok(&self, manifest: &str, user: UserId) -> PackageName {
        let result = self.install(manifest, user);
        assert!(result.success, "install failed: {}", result.diagnostic);
        result.package_name.unwrap()
    }

    pub fn root(&self) -> &Path {
        self.home.root()
    }
}
