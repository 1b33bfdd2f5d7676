//! Shared harness for runtime bookkeeping tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use enclave_core::{EnclaveHome, InstallFlags, PackageName, UserId};
use enclave_pm::{ComponentDecl, InstallRequest, PackageManager, ProcessSupervisor};
use tempfile::TempDir;

/// Starts processes with increasing pids and records kills.
#[derive(Debug, Default)]
pub struct FakeSupervisor {
    started: Mutex<Vec<String>>,
    refuse: bool,
}

impl FakeSupervisor {
    pub fn refusing() -> Self {
        Self {
            started: Mutex::default(),
            refuse: true,
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl ProcessSupervisor for FakeSupervisor {
    fn kill_package_for_user(&self, _package: &PackageName, _user: UserId) {}

    fn find_or_start_process_for_component(
        &self,
        _component: &ComponentDecl,
        process: &str,
        _user: UserId,
    ) -> Option<u32> {
        if self.refuse {
            return None;
        }
        let mut started = self.started.lock().unwrap();
        started.push(process.to_string());
        u32::try_from(started.len()).ok().and_then(|n| n.checked_add(1000))
    }
}

pub fn write_artifact(path: &Path, manifest: &str) {
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "Package.toml", manifest.as_bytes())
            .unwrap();
        builder.finish().unwrap();
    }
    std::fs::write(path, data).unwrap();
}

pub struct Harness {
    pub pm: Arc<PackageManager>,
    pub supervisor: Arc<FakeSupervisor>,
    dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_supervisor(FakeSupervisor::default())
    }

    pub fn with_supervisor(supervisor: FakeSupervisor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let home = Arc::new(EnclaveHome::from_path(dir.path().join("home")));
        let supervisor = Arc::new(supervisor);
        let pm = PackageManager::builder(home)
            .with_supervisor(Arc::clone(&supervisor) as Arc<dyn ProcessSupervisor>)
            .build()
            .unwrap();
        pm.system_ready().unwrap();
        Self { pm, supervisor, dir }
    }

    pub fn install(&self, manifest: &str, user: UserId) -> PackageName {
        let path = self
            .dir
            .path()
            .join(format!("{}.pkg", uuid::Uuid::new_v4()));
        write_artifact(&path, manifest);
        let result = self
            .pm
            .install(InstallRequest::from_path(path, InstallFlags::STORAGE, user));
        assert!(result.success, "{}", result.diagnostic);
        result.package_name.unwrap()
    }
}

pub const CLOCK: &str = r#"
package = "com.example.clock"
process = ":ui"

[[receiver]]
name = ".Boot"

[[receiver.filter]]
actions = ["BOOT_COMPLETED"]

[[receiver]]
name = ".Alarm"

[[receiver.filter]]
actions = ["ALARM"]

[[service]]
name = ".Sync"
process = ":sync"

[[service]]
name = ".Cleanup"
"#;
