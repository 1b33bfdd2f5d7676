//! Synthetic user partitions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use enclave_core::UserId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PmError, PmResult};
use crate::persist;

/// Default upper bound on the number of users.
pub const DEFAULT_MAX_USERS: usize = 16;

/// User attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFlags {
    /// The owner user.
    pub primary: bool,
    /// A guest partition.
    pub guest: bool,
}

/// One synthetic user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Attributes.
    #[serde(default)]
    pub flags: UserFlags,
}

impl UserInfo {
    fn owner() -> Self {
        Self {
            id: UserId::SYSTEM,
            name: "Owner".to_owned(),
            created_at: Utc::now(),
            flags: UserFlags {
                primary: true,
                guest: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserTable {
    next_id: i32,
    users: BTreeMap<UserId, UserInfo>,
}

impl Default for UserTable {
    fn default() -> Self {
        let owner = UserInfo::owner();
        Self {
            next_id: 1,
            users: BTreeMap::from([(owner.id, owner)]),
        }
    }
}

/// Persisted set of users. User 0 always exists.
#[derive(Debug)]
pub struct UserManager {
    path: PathBuf,
    max_users: usize,
    table: Mutex<UserTable>,
}

impl UserManager {
    /// Load users from `path`. A missing or corrupt file yields the owner
    /// user only.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, max_users: usize) -> Self {
        let path = path.into();
        let mut table = if path.exists() {
            persist::read_json::<UserTable>(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "User table unreadable, resetting");
                UserTable::default()
            })
        } else {
            UserTable::default()
        };

        if !table.users.contains_key(&UserId::SYSTEM) {
            table.users.insert(UserId::SYSTEM, UserInfo::owner());
        }
        let floor = table
            .users
            .keys()
            .map(|u| u.0.saturating_add(1))
            .max()
            .unwrap_or(1);
        table.next_id = table.next_id.max(floor);

        Self {
            path,
            max_users: max_users.max(1),
            table: Mutex::new(table),
        }
    }

    /// Whether `user` exists.
    #[must_use]
    pub fn exists(&self, user: UserId) -> bool {
        self.lock().users.contains_key(&user)
    }

    /// A user's info.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<UserInfo> {
        self.lock().users.get(&user).cloned()
    }

    /// Every user, ascending by id.
    #[must_use]
    pub fn users(&self) -> Vec<UserInfo> {
        self.lock().users.values().cloned().collect()
    }

    /// Every user id, ascending.
    #[must_use]
    pub fn user_ids(&self) -> Vec<UserId> {
        self.lock().users.keys().copied().collect()
    }

    /// Create a user with the next free id.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::UserLimit`] when the maximum is reached, or an
    /// I/O error if persisting failed.
    pub fn create_user(&self, name: &str) -> PmResult<UserInfo> {
        let mut table = self.lock();
        let id = UserId(table.next_id);
        self.insert_locked(&mut table, id, name)
    }

    /// Create `user` if it does not exist. Returns `true` if it was created.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::UnknownUser`] for pseudo-users, or
    /// [`PmError::UserLimit`] when the maximum is reached.
    pub fn ensure_user(&self, user: UserId) -> PmResult<bool> {
        if !user.is_concrete() {
            return Err(PmError::UnknownUser(user));
        }
        let mut table = self.lock();
        if table.users.contains_key(&user) {
            return Ok(false);
        }
        self.insert_locked(&mut table, user, &format!("User {user}"))?;
        Ok(true)
    }

    /// Remove a user. The owner cannot be removed.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::ProtectedUser`] for user 0 and
    /// [`PmError::UnknownUser`] if the user does not exist.
    pub fn remove_user(&self, user: UserId) -> PmResult<UserInfo> {
        if user == UserId::SYSTEM {
            return Err(PmError::ProtectedUser(user));
        }
        let mut table = self.lock();
        let removed = table.users.remove(&user).ok_or(PmError::UnknownUser(user))?;
        persist::write_json_atomic(&self.path, &*table)?;
        info!(user = %user, "Removed user");
        Ok(removed)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn insert_locked(&self, table: &mut UserTable, id: UserId, name: &str) -> PmResult<UserInfo> {
        if table.users.len() >= self.max_users {
            return Err(PmError::UserLimit {
                max: self.max_users,
            });
        }

        let info = UserInfo {
            id,
            name: name.to_owned(),
            created_at: Utc::now(),
            flags: UserFlags::default(),
        };
        table.users.insert(id, info.clone());
        table.next_id = table.next_id.max(id.0.saturating_add(1));
        persist::write_json_atomic(&self.path, &*table)?;

        info!(user = %id, name, "Created user");
        Ok(info)
    }

    fn lock(&self) -> MutexGuard<'_, UserTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
