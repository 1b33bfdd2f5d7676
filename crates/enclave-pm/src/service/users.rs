//! User lifecycle through the facade.

use enclave_core::UserId;
use tracing::info;

use super::PackageManager;
use crate::error::{PmError, PmResult};
use crate::persist;
use crate::users::UserInfo;

impl PackageManager {
    /// Every user, ascending.
    #[must_use]
    pub fn users(&self) -> Vec<UserInfo> {
        self.users.users()
    }

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user limit is reached or the table cannot be
    /// written.
    pub fn create_user(&self, name: &str) -> PmResult<UserInfo> {
        let _guard = self.lock_install()?;
        self.users.create_user(name)
    }

    /// Delete a user, uninstalling everything they have installed first.
    ///
    /// # Errors
    ///
    /// Returns an error for user 0, an unknown user, or a failed removal.
    /// Lifecycle events for packages already removed are still delivered.
    pub fn delete_user(&self, user: UserId) -> PmResult<()> {
        if user == UserId::SYSTEM {
            return Err(PmError::ProtectedUser(user));
        }

        let guard = self.lock_install()?;
        if !self.users.exists(user) {
            return Err(PmError::UnknownUser(user));
        }

        let packages: Vec<_> = self
            .read_state()
            .packages
            .values()
            .filter(|r| r.is_installed(user))
            .map(|r| r.name().clone())
            .collect();

        let mut events = Vec::with_capacity(packages.len());
        let mut outcome = Ok(());
        for package in &packages {
            match self.uninstall_locked(package, user) {
                Ok((_, event)) => events.extend(event),
                Err(e) => {
                    outcome = Err(e);
                    break;
                },
            }
        }

        if outcome.is_ok() {
            outcome = self.remove_user_storage(user);
        }
        drop(guard);

        self.notify_all(&events);
        outcome?;
        info!(user = %user, packages = packages.len(), "Deleted user");
        Ok(())
    }

    fn remove_user_storage(&self, user: UserId) -> PmResult<()> {
        persist::remove_tree(&self.layout.user_dir(user))?;
        persist::remove_tree(&self.layout.user_de_dir(user))?;
        persist::remove_tree(&self.layout.external_dir(user))?;
        self.users.remove_user(user)?;
        Ok(())
    }
}
