//! Persisted application identity allocation.
//!
//! The table maps package names and shared-group keys to [`AppId`]s and
//! carries a monotonic counter. Identities are never handed out twice: a
//! released package forgets its mapping but the counter never goes back, so
//! its identity is not reused.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use enclave_core::{AppId, PackageName};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PmError, PmResult};
use crate::persist;

/// On-disk form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IdentityTable {
    counter: AppId,
    #[serde(default)]
    packages: BTreeMap<PackageName, AppId>,
    #[serde(default)]
    groups: BTreeMap<String, AppId>,
}

impl Default for IdentityTable {
    fn default() -> Self {
        Self {
            counter: AppId::FIRST,
            packages: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }
}

/// Store-wide locked identity table backed by an atomically replaced file.
#[derive(Debug)]
pub struct IdentityStore {
    path: PathBuf,
    table: Mutex<IdentityTable>,
}

impl IdentityStore {
    /// Load the table from `path`.
    ///
    /// Never fails: a missing file yields an empty table, and an unreadable
    /// or malformed one is deleted and replaced by an empty table whose
    /// counter starts over.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = if path.exists() {
            match persist::read_json::<IdentityTable>(&path) {
                Ok(table) if counter_in_range(table.counter) => {
                    debug!(
                        path = %path.display(),
                        packages = table.packages.len(),
                        counter = %table.counter,
                        "Loaded identity table"
                    );
                    table
                },
                Ok(table) => {
                    warn!(
                        path = %path.display(),
                        counter = %table.counter,
                        "Identity counter out of range, resetting identity table"
                    );
                    discard(&path);
                    IdentityTable::default()
                },
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Identity table unreadable, resetting"
                    );
                    discard(&path);
                    IdentityTable::default()
                },
            }
        } else {
            IdentityTable::default()
        };

        Self {
            path,
            table: Mutex::new(table),
        }
    }

    /// Allocate (or return the existing) identity for a package.
    ///
    /// A shared group that already has an identity wins. Otherwise a package
    /// that was allocated before gets its old identity back. Only then is a
    /// new one taken from the counter. Every allocation is persisted before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::IdentitiesExhausted`] when the counter passed the
    /// end of the application range, or an I/O error if persisting failed.
    pub fn allocate(&self, package: &PackageName, shared_group: Option<&str>) -> PmResult<AppId> {
        let mut table = self.lock();

        let group_id = shared_group.and_then(|group| table.groups.get(group).copied());
        if let Some(id) = group_id {
            if table.packages.get(package) != Some(&id) {
                table.packages.insert(package.clone(), id);
                self.persist_locked(&table)?;
            }
            debug!(package = %package, group = ?shared_group, app_id = %id, "Joined shared identity");
            return Ok(id);
        }

        if let Some(&id) = table.packages.get(package) {
            if let Some(group) = shared_group {
                table.groups.insert(group.to_owned(), id);
                self.persist_locked(&table)?;
            }
            return Ok(id);
        }

        let id = table.counter;
        if !id.is_application() {
            return Err(PmError::IdentitiesExhausted);
        }
        table.counter = AppId(id.0.saturating_add(1));
        table.packages.insert(package.clone(), id);
        if let Some(group) = shared_group {
            table.groups.insert(group.to_owned(), id);
        }
        self.persist_locked(&table)?;

        info!(package = %package, app_id = %id, "Allocated application identity");
        Ok(id)
    }

    /// Identity previously allocated to a package.
    #[must_use]
    pub fn lookup(&self, package: &PackageName) -> Option<AppId> {
        self.lock().packages.get(package).copied()
    }

    /// Identity bound to a shared group.
    #[must_use]
    pub fn lookup_group(&self, group: &str) -> Option<AppId> {
        self.lock().groups.get(group).copied()
    }

    /// Every package currently mapped to an identity.
    #[must_use]
    pub fn packages_with(&self, id: AppId) -> Vec<PackageName> {
        self.lock()
            .packages
            .iter()
            .filter(|(_, v)| **v == id)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Record an identity observed on a loaded package record.
    ///
    /// Used by the startup scan to repair a table that lost entries.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting failed.
    pub fn adopt(&self, package: &PackageName, id: AppId, shared_group: Option<&str>) -> PmResult<()> {
        let mut table = self.lock();
        let mut changed = table.packages.insert(package.clone(), id) != Some(id);
        if let Some(group) = shared_group {
            changed |= table.groups.insert(group.to_owned(), id) != Some(id);
        }
        if id >= table.counter {
            table.counter = AppId(id.0.saturating_add(1));
            changed = true;
        }
        if changed {
            warn!(package = %package, app_id = %id, "Re-registered identity from package record");
            self.persist_locked(&table)?;
        }
        Ok(())
    }

    /// Forget a package's mapping. The counter is left untouched, so the
    /// identity is never reclaimed; shared-group bindings are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting failed.
    pub fn release(&self, package: &PackageName) -> PmResult<()> {
        let mut table = self.lock();
        if let Some(id) = table.packages.remove(package) {
            debug!(package = %package, app_id = %id, "Released identity mapping");
            self.persist_locked(&table)?;
        }
        Ok(())
    }

    /// Write the table to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the atomic write failed.
    pub fn persist(&self) -> PmResult<()> {
        let table = self.lock();
        self.persist_locked(&table)
    }

    /// Next identity the counter would hand out.
    #[must_use]
    pub fn counter(&self) -> AppId {
        self.lock().counter
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_locked(&self, table: &IdentityTable) -> PmResult<()> {
        persist::write_json_atomic(&self.path, table)
    }

    fn lock(&self) -> MutexGuard<'_, IdentityTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The counter may sit one past the end once every identity is handed out.
fn counter_in_range(counter: AppId) -> bool {
    counter >= AppId::FIRST && counter.0 <= AppId::LAST.0.saturating_add(1)
}

fn discard(path: &Path) {
    if let Err(e) = persist::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to delete corrupt identity table");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    #[test]
    fn test_allocate_distinct_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::load(dir.path().join("ids.json"));

        let a = store.allocate(&pkg("com.example.a"), None).unwrap();
        let b = store.allocate(&pkg("com.example.b"), None).unwrap();
        assert_eq!(a, AppId::FIRST);
        assert_ne!(a, b);
        assert_eq!(store.allocate(&pkg("com.example.a"), None).unwrap(), a);
    }

    #[test]
    fn test_shared_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::load(dir.path().join("ids.json"));

        let a = store.allocate(&pkg("com.example.a"), Some("suite")).unwrap();
        let b = store.allocate(&pkg("com.example.b"), Some("suite")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.lookup_group("suite"), Some(a));
        assert_eq!(store.packages_with(a).len(), 2);
    }

    #[test]
    fn test_persisted_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");

        let a = {
            let store = IdentityStore::load(&path);
            store.allocate(&pkg("com.example.a"), Some("g")).unwrap()
        };

        let store = IdentityStore::load(&path);
        assert_eq!(store.lookup(&pkg("com.example.a")), Some(a));
        assert_eq!(store.lookup_group("g"), Some(a));
        let b = store.allocate(&pkg("com.example.b"), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_release_never_reclaims() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::load(dir.path().join("ids.json"));

        let a = store.allocate(&pkg("com.example.a"), None).unwrap();
        store.release(&pkg("com.example.a")).unwrap();
        assert_eq!(store.lookup(&pkg("com.example.a")), None);

        let again = store.allocate(&pkg("com.example.a"), None).unwrap();
        assert_ne!(again, a);
        assert!(again > a);
    }

    #[test]
    fn test_corrupt_file_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();

        let store = IdentityStore::load(&path);
        assert_eq!(store.counter(), AppId::FIRST);
        assert!(!path.exists());

        let a = store.allocate(&pkg("com.example.a"), None).unwrap();
        assert_eq!(a, AppId::FIRST);
        assert!(path.exists());
    }

    #[test]
    fn test_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let table = IdentityTable {
            counter: AppId::LAST,
            ..IdentityTable::default()
        };
        persist::write_json_atomic(&path, &table).unwrap();

        let store = IdentityStore::load(&path);
        assert_eq!(store.allocate(&pkg("com.example.a"), None).unwrap(), AppId::LAST);
        assert!(matches!(
            store.allocate(&pkg("com.example.b"), None),
            Err(PmError::IdentitiesExhausted)
        ));
    }

    #[test]
    fn test_adopt_repairs_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::load(dir.path().join("ids.json"));

        store.adopt(&pkg("com.example.a"), AppId(10_005), None).unwrap();
        assert_eq!(store.lookup(&pkg("com.example.a")), Some(AppId(10_005)));
        assert_eq!(store.counter(), AppId(10_006));
    }
}
