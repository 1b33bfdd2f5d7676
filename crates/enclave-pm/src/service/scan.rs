//! Startup scan: load records from disk, purge what is unusable, reconcile
//! system packages with the host image.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use enclave_core::{InstallFlags, PackageName, UserId};
use enclave_events::LifecycleEvent;
use tracing::{info, warn};

use super::install::InstallProgress;
use super::{InstallRequest, PackageManager, ScanReport};
use crate::error::{PmError, PmResult};
use crate::persist;
use crate::record::PackageRecord;
use crate::resolver::{ComponentResolver, PackageMap};

impl PackageManager {
    /// Load every package record from disk and make the registry usable.
    ///
    /// Unusable records are purged, each with an `Uninstalled` event for
    /// all users; one corrupt record never blocks the others. A record that
    /// loads but whose identity cannot be written back is kept. Packages the
    /// host ships but the registry lacks are installed for user 0.
    ///
    /// # Errors
    ///
    /// Returns an error only if the package root cannot be listed.
    pub fn system_ready(&self) -> PmResult<ScanReport> {
        let guard = self.lock_install()?;
        let mut report = ScanReport::default();
        let mut events = Vec::new();

        let loaded = self.load_records(&mut report, &mut events)?;

        let notified: BTreeSet<PackageName> = events.iter().map(|e| e.package.clone()).collect();
        let previous: Vec<PackageName> = self.read_state().packages.keys().cloned().collect();
        for gone in previous
            .iter()
            .filter(|p| !loaded.contains_key(*p) && !notified.contains(*p))
        {
            warn!(package = %gone, "Registered package disappeared from disk");
            events.push(LifecycleEvent::uninstalled(gone.clone(), UserId::ALL, true));
        }

        let mut resolver = ComponentResolver::new();
        for record in loaded.values() {
            resolver.add_package(&record.descriptor);
        }
        report.loaded = loaded.keys().cloned().collect();
        {
            let mut state = self.write_state();
            state.packages = loaded;
            state.resolver = resolver;
        }

        let system: Vec<PackageName> = self
            .read_state()
            .packages
            .values()
            .filter(|r| r.install_flags.contains(InstallFlags::SYSTEM))
            .map(|r| r.name().clone())
            .collect();
        for package in system {
            match self.reconcile_system_package(&package) {
                Ok(Some(users)) => {
                    events.extend(users.into_iter().map(|u| LifecycleEvent::installed(package.clone(), u)));
                    report.reconciled.push(package);
                },
                Ok(None) => {},
                Err(e) => warn!(package = %package, error = %e, "System package reconciliation failed"),
            }
        }

        for (package, path) in self.host.system_packages() {
            if self.read_state().packages.contains_key(&package) {
                continue;
            }
            let request = InstallRequest::from_path(path, InstallFlags::SYSTEM, UserId::SYSTEM);
            let mut progress = InstallProgress::default();
            match self.install_locked(&request, &mut progress) {
                Ok(installed) => {
                    events.push(LifecycleEvent::installed(installed.clone(), UserId::SYSTEM));
                    report.provisioned.push(installed);
                },
                Err(e) => warn!(package = %package, error = %e, "System package provisioning failed"),
            }
        }
        drop(guard);

        info!(
            loaded = report.loaded.len(),
            purged = report.purged.len(),
            reconciled = report.reconciled.len(),
            provisioned = report.provisioned.len(),
            "Package scan complete"
        );
        self.notify_all(&events);
        Ok(report)
    }

    /// Alias of [`system_ready`](Self::system_ready).
    ///
    /// # Errors
    ///
    /// See [`system_ready`](Self::system_ready).
    pub fn rescan(&self) -> PmResult<ScanReport> {
        self.system_ready()
    }

    fn load_records(&self, report: &mut ScanReport, events: &mut Vec<LifecycleEvent>) -> PmResult<PackageMap> {
        let apps = self.layout.apps_dir();
        std::fs::create_dir_all(&apps).map_err(|e| PmError::io(&apps, e))?;

        let mut dirs: Vec<_> = std::fs::read_dir(&apps)
            .map_err(|e| PmError::io(&apps, e))?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .map(|entry| entry.path())
            .collect();
        dirs.sort();

        let mut loaded = PackageMap::new();
        for dir in dirs {
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let Ok(package) = PackageName::parse(&dir_name) else {
                warn!(dir = %dir.display(), "Deleting directory that is not a package");
                if let Err(e) = persist::remove_tree(&dir) {
                    warn!(dir = %dir.display(), error = %e, "Failed to delete directory");
                }
                report.purged.push(dir_name);
                continue;
            };

            match self.load_record(&package) {
                Ok(record) => {
                    // The record is authoritative; a table that cannot be
                    // written is repaired by the next identity write.
                    if let Err(e) = self
                        .identities
                        .adopt(&package, record.app_id, record.shared_group())
                    {
                        warn!(package = %package, error = %e, "Failed to re-register identity, keeping package");
                    }
                    loaded.insert(package, record);
                },
                Err(e) => {
                    warn!(package = %package, error = %e, "Purging unusable package record");
                    self.purge(&package, &dir);
                    events.push(LifecycleEvent::uninstalled(package, UserId::ALL, true));
                    report.purged.push(dir_name);
                },
            }
        }
        Ok(loaded)
    }

    fn load_record(&self, package: &PackageName) -> PmResult<PackageRecord> {
        let record = PackageRecord::load(&self.record_path(package))?;
        if record.name() != package {
            return Err(PmError::Manifest(format!(
                "record for {} stored under {package}",
                record.name()
            )));
        }
        if record.installed_users().is_empty() {
            return Err(PmError::Manifest(format!("{package} is not installed for any user")));
        }
        Ok(record)
    }

    /// Best-effort removal of everything a package left behind.
    fn purge(&self, package: &PackageName, dir: &Path) {
        self.supervisor.kill_package_for_user(package, UserId::ALL);
        if let Err(e) = self.identities.release(package) {
            warn!(package = %package, error = %e, "Failed to release identity");
        }

        let mut leftovers = vec![dir.to_path_buf()];
        for user in self.users.user_ids() {
            leftovers.push(self.layout.user_data_dir_for(package, user));
            leftovers.push(self.layout.user_de_data_dir_for(package, user));
            leftovers.push(self.layout.external_data_dir_for(package, user));
        }
        for path in leftovers {
            if let Err(e) = persist::remove_tree(&path) {
                warn!(package = %package, path = %path.display(), error = %e, "Failed to remove package data");
            }
        }
        self.write_state().remove(package);
    }

    /// Re-point a system package at the artifact the host now ships.
    ///
    /// Returns the users to notify when the record changed, `None` when it
    /// was already current or the host no longer ships the package. Runs
    /// with the install lock held.
    fn reconcile_system_package(&self, package: &PackageName) -> PmResult<Option<Vec<UserId>>> {
        let Some(mut record) = self.record(package) else {
            return Err(PmError::UnknownPackage(package.to_string()));
        };
        let Some(host_path) = self.host.system_artifact_path(package) else {
            return Ok(None);
        };
        if host_path == record.code_path {
            return Ok(None);
        }

        self.supervisor.kill_package_for_user(package, UserId::ALL);
        let descriptor = self.parse_guarded(&host_path)?;
        if descriptor.package_name != *package {
            return Err(PmError::Manifest(format!(
                "host artifact {} declares {}",
                host_path.display(),
                descriptor.package_name
            )));
        }

        info!(
            package = %package,
            from = %record.code_path.display(),
            to = %host_path.display(),
            "Reconciling system package"
        );
        record.descriptor = descriptor;
        record.code_path = host_path;
        record.last_update_time = Utc::now();
        record.save(&self.record_path(package))?;

        let users = record.installed_users();
        self.write_state().upsert(record);
        Ok(Some(users))
    }
}
