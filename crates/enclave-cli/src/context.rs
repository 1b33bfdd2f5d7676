//! Opens the registry the way every command expects to find it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use enclave_config::Config;
use enclave_core::{EnclaveHome, PackageName};
use enclave_pm::{PackageManager, ScanReport, StaticHost};

/// An open registry plus the report of its startup scan.
pub(crate) struct Session {
    pub(crate) pm: Arc<PackageManager>,
    pub(crate) report: ScanReport,
}

/// Host facts from the `[host]` section.
pub(crate) fn host_from_config(config: &Config) -> anyhow::Result<StaticHost> {
    let mut host = StaticHost::new(config.host.package.clone())
        .with_caution_markers(config.host.caution_markers.clone());

    for (name, path) in &config.host.system_packages {
        let package = PackageName::parse(name)
            .with_context(|| format!("invalid system package name '{name}'"))?;
        host = host.with_system_package(package, PathBuf::from(path));
    }
    Ok(host)
}

/// Build the package manager rooted at `root` and run the startup scan.
pub(crate) fn open(root: &Path, config: &Config) -> anyhow::Result<Session> {
    let layout = Arc::new(EnclaveHome::from_path(root));
    let host = host_from_config(config)?;

    let pm = PackageManager::builder(layout)
        .with_host(Arc::new(host))
        .with_max_users(config.users.max_users)
        .build()
        .with_context(|| format!("failed to open the package registry at {}", root.display()))?;

    let report = pm.system_ready().context("startup scan failed")?;
    tracing::debug!(
        loaded = report.loaded.len(),
        purged = report.purged.len(),
        "registry ready"
    );

    Ok(Session { pm, report })
}
