//! Per-user package state changes.

use enclave_core::{ComponentName, PackageName, UserId};
use tracing::info;

use super::PackageManager;
use crate::error::{PmError, PmResult};
use crate::installer::Pipeline;
use crate::record::PackageRecord;

impl PackageManager {
    /// Enable or disable a component for one user.
    ///
    /// # Errors
    ///
    /// Returns an error if the package is not installed for `user`, the
    /// component is not declared, or the record cannot be written.
    pub fn set_component_enabled(&self, component: &ComponentName, enabled: bool, user: UserId) -> PmResult<()> {
        let _guard = self.lock_install()?;
        let mut record = self.installed_record(component.package(), user)?;
        if record.descriptor.find_any(component).is_none() {
            return Err(PmError::UnknownComponent(component.to_string()));
        }

        record.user_state_mut(user).set_enabled(component, enabled);
        record.save(&self.record_path(component.package()))?;
        self.write_state().upsert(record);

        info!(component = %component, user = %user, enabled, "Changed component state");
        Ok(())
    }

    /// Kill a package's processes for one user and mark it stopped until
    /// its next install.
    ///
    /// # Errors
    ///
    /// Returns an error if the package is not installed for `user` or the
    /// record cannot be written.
    pub fn stop_package(&self, package: &PackageName, user: UserId) -> PmResult<()> {
        let _guard = self.lock_install()?;
        let mut record = self.installed_record(package, user)?;

        self.supervisor.kill_package_for_user(package, user);
        record.user_state_mut(user).stopped = true;
        record.save(&self.record_path(package))?;
        self.write_state().replace_state(record);

        info!(package = %package, user = %user, "Stopped package");
        Ok(())
    }

    /// Kill a package for one user and reset its data directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the package is not installed for `user` or a
    /// directory step fails.
    pub fn clear_package(&self, package: &PackageName, user: UserId) -> PmResult<()> {
        let _guard = self.lock_install()?;
        let mut record = self.installed_record(package, user)?;

        self.supervisor.kill_package_for_user(package, user);
        let ctx = self.step_context(&record);
        Pipeline::user_removal().run(&mut record, &ctx, user)?;
        Pipeline::user_install().run(&mut record, &ctx, user)?;

        info!(package = %package, user = %user, "Cleared package data");
        Ok(())
    }

    fn installed_record(&self, package: &PackageName, user: UserId) -> PmResult<PackageRecord> {
        self.record(package)
            .filter(|r| r.is_installed(user))
            .ok_or_else(|| PmError::UnknownPackage(package.to_string()))
    }
}
