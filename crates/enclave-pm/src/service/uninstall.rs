//! Uninstall path.

use enclave_core::{PackageName, UserId};
use enclave_events::LifecycleEvent;
use tracing::info;

use super::{PackageManager, UninstallOutcome};
use crate::error::PmResult;
use crate::installer::Pipeline;

impl PackageManager {
    /// Uninstall a package for one user.
    ///
    /// The package's shared artifacts and identity mapping are removed only
    /// when no other user has it installed.
    ///
    /// # Errors
    ///
    /// Returns an error if a removal step fails. Steps already run are not
    /// undone.
    pub fn uninstall_for_user(&self, package: &PackageName, user: UserId) -> PmResult<UninstallOutcome> {
        let guard = self.lock_install()?;
        let (outcome, event) = self.uninstall_locked(package, user)?;
        drop(guard);

        self.notify_all(event.as_slice());
        Ok(outcome)
    }

    /// Uninstall a package for every user that has it, in ascending user
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first removal failure. Users processed before it stay
    /// uninstalled and their events are still delivered.
    pub fn uninstall_everywhere(&self, package: &PackageName) -> PmResult<UninstallOutcome> {
        let guard = self.lock_install()?;
        let users = self
            .record(package)
            .map(|r| r.installed_users())
            .unwrap_or_default();

        let mut events = Vec::with_capacity(users.len());
        let mut outcome = Ok(UninstallOutcome::NotInstalled);
        for user in users {
            match self.uninstall_locked(package, user) {
                Ok((step, event)) => {
                    outcome = Ok(step);
                    events.extend(event);
                },
                Err(e) => {
                    outcome = Err(e);
                    break;
                },
            }
        }
        drop(guard);

        self.notify_all(&events);
        outcome
    }

    pub(super) fn uninstall_locked(
        &self,
        package: &PackageName,
        user: UserId,
    ) -> PmResult<(UninstallOutcome, Option<LifecycleEvent>)> {
        let Some(mut record) = self.record(package) else {
            return Ok((UninstallOutcome::NotInstalled, None));
        };
        if !record.is_installed(user) {
            return Ok((UninstallOutcome::NotInstalled, None));
        }

        self.supervisor.kill_package_for_user(package, user);

        let ctx = self.step_context(&record);
        Pipeline::user_removal().run(&mut record, &ctx, user)?;
        record.remove_user(user);

        if record.installed_users().is_empty() {
            Pipeline::app_removal().run(&mut record, &ctx, user)?;
            self.identities.release(package)?;
            self.write_state().remove(package);

            info!(package = %package, user = %user, "Removed package entirely");
            Ok((
                UninstallOutcome::RemovedEntirely,
                Some(LifecycleEvent::uninstalled(package.clone(), user, true)),
            ))
        } else {
            record.save(&self.record_path(package))?;
            self.write_state().replace_state(record);

            info!(package = %package, user = %user, "Removed package for user");
            Ok((
                UninstallOutcome::RemovedForUser,
                Some(LifecycleEvent::uninstalled(package.clone(), user, false)),
            ))
        }
    }
}
