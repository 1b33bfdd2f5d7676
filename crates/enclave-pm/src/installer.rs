//! Installer pipeline: ordered steps that materialize or remove a package's
//! on-disk artifacts.
//!
//! Steps are individually idempotent, so a failed pipeline can be retried
//! as a whole. The pipeline itself is not transactional: it stops at the
//! first failure and leaves whatever earlier steps produced in place.

use std::fmt;
use std::io;
use std::path::Path;

use enclave_core::{InstallFlags, StorageLayout, UserId};
use tracing::{debug, warn};

use crate::collab::ArtifactParser;
use crate::error::{PmError, PmResult};
use crate::persist;
use crate::record::PackageRecord;

/// What a step may consult while running.
pub struct StepContext<'a> {
    /// Filesystem layout.
    pub layout: &'a dyn StorageLayout,
    /// Options the package is installed with.
    pub flags: InstallFlags,
    /// Local artifact being installed. Unset for removal pipelines.
    pub source: Option<&'a Path>,
    /// Parser used for native code extraction.
    pub parser: &'a dyn ArtifactParser,
    /// ABIs to extract native code for, best first.
    pub abis: &'a [String],
}

impl fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("root", &self.layout.root())
            .field("flags", &self.flags)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// One unit of install or removal work.
pub trait InstallStep: Send + Sync {
    /// Name used in logs and failures.
    fn name(&self) -> &'static str;

    /// Run the step for `record` (and `user`, for per-user steps).
    ///
    /// # Errors
    ///
    /// Returns the failure that stops the pipeline.
    fn execute(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, user: UserId)
    -> PmResult<()>;
}

fn create_dir(path: &Path) -> PmResult<()> {
    std::fs::create_dir_all(path).map_err(|e| PmError::io(path, e))
}

/// Wipe and recreate `app/<package>/` and its native library directory.
#[derive(Debug, Default)]
pub struct CreatePackageDirectory;

impl InstallStep for CreatePackageDirectory {
    fn name(&self) -> &'static str {
        "create-package-directory"
    }

    fn execute(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, _user: UserId) -> PmResult<()> {
        let app_dir = ctx.layout.app_dir_for(record.name());

        // Reinstalling from the managed copy must not delete its own source.
        let source_inside = ctx.source.is_some_and(|s| s.starts_with(&app_dir));
        if !source_inside {
            persist::remove_tree(&app_dir)?;
        }

        create_dir(&app_dir)?;
        create_dir(&ctx.layout.native_lib_dir_for(record.name()))
    }
}

/// Extract native code and place the artifact.
///
/// Content-sourced artifacts are moved with a rename when possible and
/// copied otherwise; the placed artifact is made read-only.
#[derive(Debug, Default)]
pub struct CopyArtifactsAndNativeCode;

impl InstallStep for CopyArtifactsAndNativeCode {
    fn name(&self) -> &'static str {
        "copy-artifacts-and-native-code"
    }

    fn execute(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, _user: UserId) -> PmResult<()> {
        let package = record.name().clone();
        let source = ctx.source.ok_or_else(|| {
            PmError::io(
                ctx.layout.app_dir_for(&package),
                io::Error::new(io::ErrorKind::NotFound, "no artifact to place"),
            )
        })?;

        if !ctx.flags.contains(InstallFlags::SYSTEM) {
            let lib_dir = ctx.layout.native_lib_dir_for(&package);
            ctx.parser.extract_native_code(source, &lib_dir, ctx.abis)?;
        }

        if !ctx.flags.intersects(InstallFlags::STORAGE | InstallFlags::URI_FILE) {
            record.code_path = source.to_path_buf();
            return Ok(());
        }

        let target = ctx.layout.artifact_path_for(&package);
        if target != source {
            persist::remove_file(&target)?;

            let moved = ctx.flags.contains(InstallFlags::URI_FILE)
                && match std::fs::rename(source, &target) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(
                            package = %package,
                            error = %e,
                            "Rename failed, falling back to copy"
                        );
                        false
                    },
                };
            if !moved {
                std::fs::copy(source, &target).map_err(|e| PmError::io(&target, e))?;
            }

            let mut perms = std::fs::metadata(&target)
                .map_err(|e| PmError::io(&target, e))?
                .permissions();
            perms.set_readonly(true);
            std::fs::set_permissions(&target, perms).map_err(|e| PmError::io(&target, e))?;
        }

        record.code_path = target;
        Ok(())
    }
}

/// Create the per-user data directories.
#[derive(Debug, Default)]
pub struct CreateUserDirectories;

impl InstallStep for CreateUserDirectories {
    fn name(&self) -> &'static str {
        "create-user-directories"
    }

    fn execute(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, user: UserId) -> PmResult<()> {
        let data = ctx.layout.user_data_dir_for(record.name(), user);
        for sub in ["cache", "files", "databases"] {
            create_dir(&data.join(sub))?;
        }
        create_dir(&ctx.layout.user_de_data_dir_for(record.name(), user))?;
        create_dir(&ctx.layout.external_data_dir_for(record.name(), user))
    }
}

/// Remove the per-user data directories.
#[derive(Debug, Default)]
pub struct RemoveUserDirectories;

impl InstallStep for RemoveUserDirectories {
    fn name(&self) -> &'static str {
        "remove-user-directories"
    }

    fn execute(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, user: UserId) -> PmResult<()> {
        persist::remove_tree(&ctx.layout.user_data_dir_for(record.name(), user))?;
        persist::remove_tree(&ctx.layout.user_de_data_dir_for(record.name(), user))?;
        persist::remove_tree(&ctx.layout.external_data_dir_for(record.name(), user))
    }
}

/// Remove `app/<package>/`.
#[derive(Debug, Default)]
pub struct RemoveAppArtifacts;

impl InstallStep for RemoveAppArtifacts {
    fn name(&self) -> &'static str {
        "remove-app-artifacts"
    }

    fn execute(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, _user: UserId) -> PmResult<()> {
        persist::remove_tree(&ctx.layout.app_dir_for(record.name()))
    }
}

/// An ordered list of steps.
pub struct Pipeline {
    steps: Vec<Box<dyn InstallStep>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.step_names()).finish()
    }
}

impl Pipeline {
    /// A pipeline of arbitrary steps.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn InstallStep>>) -> Self {
        Self { steps }
    }

    /// Run once per package install or update.
    #[must_use]
    pub fn package_install() -> Self {
        Self::new(vec![
            Box::new(CreatePackageDirectory),
            Box::new(CopyArtifactsAndNativeCode),
        ])
    }

    /// Run once per newly added user.
    #[must_use]
    pub fn user_install() -> Self {
        Self::new(vec![Box::new(CreateUserDirectories)])
    }

    /// Run once per removed user.
    #[must_use]
    pub fn user_removal() -> Self {
        Self::new(vec![Box::new(RemoveUserDirectories)])
    }

    /// Run when the last user is removed.
    #[must_use]
    pub fn app_removal() -> Self {
        Self::new(vec![Box::new(RemoveAppArtifacts)])
    }

    /// Step names in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::StepFailed`] naming the step that failed. Steps
    /// that already ran are not undone.
    pub fn run(&self, record: &mut PackageRecord, ctx: &StepContext<'_>, user: UserId) -> PmResult<()> {
        for step in &self.steps {
            debug!(package = %record.name(), user = %user, step = step.name(), "Running install step");
            if let Err(e) = step.execute(record, ctx, user) {
                warn!(
                    package = %record.name(),
                    user = %user,
                    step = step.name(),
                    error = %e,
                    "Install step failed"
                );
                return Err(PmError::StepFailed {
                    step: step.name(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }
}
