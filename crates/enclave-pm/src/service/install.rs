//! Install path.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use chrono::Utc;
use enclave_core::{InstallFlags, PackageName, UserId};
use enclave_events::LifecycleEvent;
use tracing::{info, warn};
use uuid::Uuid;

use super::{InstallRequest, InstallResult, InstallSource, PackageManager};
use crate::descriptor::PackageDescriptor;
use crate::error::{PmError, PmResult};
use crate::installer::{Pipeline, StepContext};
use crate::record::PackageRecord;

/// Artifact ready for parsing. Content copies are deleted on drop.
struct StagedArtifact {
    path: PathBuf,
    temporary: bool,
}

impl StagedArtifact {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.temporary {
            // The copy step may already have moved the file.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// What an install learned before it finished or failed.
#[derive(Default)]
pub(super) struct InstallProgress {
    pub(super) package: Option<PackageName>,
    pub(super) warnings: Vec<String>,
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl PackageManager {
    /// Install an artifact for one user.
    ///
    /// Never returns an error; failures are reported in the result with a
    /// diagnostic and, when one package is at fault, its name.
    pub fn install(&self, request: InstallRequest) -> InstallResult {
        let guard = match self.lock_install() {
            Ok(guard) => guard,
            Err(e) => return InstallResult::failed(None, e.to_string(), None, Vec::new()),
        };

        let mut progress = InstallProgress::default();
        let outcome = self.install_locked(&request, &mut progress);
        drop(guard);

        match outcome {
            Ok(package) => {
                self.notify_all(&[LifecycleEvent::installed(package.clone(), request.user)]);
                InstallResult::installed(package, progress.warnings)
            },
            Err(e) => {
                let offending = match &e {
                    PmError::HostPackage(name) | PmError::IncompatibleArchitecture { package: name, .. } => {
                        Some(name.to_string())
                    },
                    _ => progress.package.as_ref().map(ToString::to_string),
                };
                warn!(
                    source = ?request.source,
                    user = %request.user,
                    error = %e,
                    "Install failed"
                );
                InstallResult::failed(progress.package, e.to_string(), offending, progress.warnings)
            },
        }
    }

    /// Install with the install lock already held. Returns the package name.
    pub(super) fn install_locked(
        &self,
        request: &InstallRequest,
        progress: &mut InstallProgress,
    ) -> PmResult<PackageName> {
        let user = request.user;
        if self.users.ensure_user(user)? {
            info!(user = %user, "Created user on first install");
        }

        let flags = request.effective_flags();
        let staged = self.stage(&request.source)?;
        let descriptor = self.parse_guarded(staged.path())?;
        let package = descriptor.package_name.clone();
        progress.package = Some(package.clone());

        if package.as_str() == self.host.host_package() {
            return Err(PmError::HostPackage(package));
        }
        for marker in self.host.caution_markers() {
            if package.as_str().contains(marker.as_str()) {
                warn!(package = %package, marker = %marker, "Package name contains a caution marker");
                progress
                    .warnings
                    .push(format!("package name '{package}' contains '{marker}'"));
            }
        }

        if !self.arch.is_artifact_compatible(staged.path()) {
            let abis = self
                .parser
                .native_abis(staged.path())
                .unwrap_or_default()
                .join(", ");
            return Err(PmError::IncompatibleArchitecture { package, abis });
        }

        let mut record = self.prepare_record(descriptor, flags, staged.path(), user)?;
        let newly_added = !record.is_installed(user);

        let ctx = StepContext {
            layout: self.layout.as_ref(),
            flags,
            source: Some(staged.path()),
            parser: self.parser.as_ref(),
            abis: self.arch.preferred_abis(),
        };
        Pipeline::package_install().run(&mut record, &ctx, user)?;
        if newly_added {
            Pipeline::user_install().run(&mut record, &ctx, user)?;
        }

        record.mark_installed(user);
        record.last_update_time = Utc::now();
        record.save(&self.record_path(&package))?;

        info!(
            package = %package,
            user = %user,
            app_id = record.app_id.0,
            version = record.descriptor.version_code,
            "Installed package"
        );
        self.write_state().upsert(record);
        Ok(package)
    }

    /// New record, or the existing one updated with the new descriptor.
    ///
    /// Adding an unchanged version for another user only stops that user's
    /// processes. Any other change replaces the shared code, so the package
    /// is stopped for every user.
    fn prepare_record(
        &self,
        descriptor: PackageDescriptor,
        flags: InstallFlags,
        source: &Path,
        user: UserId,
    ) -> PmResult<PackageRecord> {
        let package = descriptor.package_name.clone();
        let group = descriptor.shared_group.clone();

        let Some(mut record) = self.record(&package) else {
            let app_id = self.identities.allocate(&package, group.as_deref())?;
            return Ok(PackageRecord::new(descriptor, app_id, flags, source.to_path_buf()));
        };

        let app_id = match group.as_deref().and_then(|g| self.identities.lookup_group(g)) {
            Some(group_id) => {
                if group_id != record.app_id {
                    warn!(
                        package = %package,
                        from = record.app_id.0,
                        to = group_id.0,
                        "Update moves package into an existing shared identity"
                    );
                }
                self.identities.allocate(&package, group.as_deref())?
            },
            None => {
                self.identities.adopt(&package, record.app_id, group.as_deref())?;
                record.app_id
            },
        };

        let added_for_user = !record.is_installed(user)
            && record.descriptor.version_code == descriptor.version_code;
        let scope = if added_for_user { user } else { UserId::ALL };
        self.supervisor.kill_package_for_user(&package, scope);
        record.descriptor = descriptor;
        record.app_id = app_id;
        record.install_flags = flags;
        Ok(record)
    }

    fn stage(&self, source: &InstallSource) -> PmResult<StagedArtifact> {
        match source {
            InstallSource::Path(path) => Ok(StagedArtifact {
                path: path.clone(),
                temporary: false,
            }),
            InstallSource::Content(locator) => {
                let mut reader = self.content.open(locator)?;
                let cache = self.layout.cache_dir();
                std::fs::create_dir_all(&cache).map_err(|e| PmError::io(&cache, e))?;

                let staged = StagedArtifact {
                    path: cache.join(format!("{}.pkg", Uuid::new_v4())),
                    temporary: true,
                };
                let mut file =
                    std::fs::File::create(staged.path()).map_err(|e| PmError::io(staged.path(), e))?;
                std::io::copy(&mut reader, &mut file).map_err(|e| PmError::io(staged.path(), e))?;
                file.sync_all().map_err(|e| PmError::io(staged.path(), e))?;
                Ok(staged)
            },
        }
    }

    /// Parse, turning a parser panic into an error.
    pub(super) fn parse_guarded(&self, artifact: &Path) -> PmResult<PackageDescriptor> {
        let parser = &self.parser;
        std::panic::catch_unwind(AssertUnwindSafe(|| parser.parse(artifact)))
            .unwrap_or_else(|payload| Err(PmError::ParserPanic(panic_message(payload.as_ref()))))
    }
}
