//! The registry service facade.
//!
//! [`PackageManager`] owns two locks:
//! - the install lock serializes every install, uninstall and other
//!   state-changing operation, including its filesystem work; it is backed
//!   by an advisory file lock so separate processes sharing one home
//!   directory serialize too
//! - the registry lock guards the in-memory package map and component
//!   index, and is held only for a single read or the in-memory part of a
//!   mutation
//!
//! The install lock is always taken first. Queries only take the registry
//! lock. Lifecycle events are delivered after both locks are released.

mod control;
mod install;
mod query;
mod scan;
mod types;
mod uninstall;
mod users;

use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use enclave_core::{PackageName, StorageLayout, UserId};
use enclave_events::{LifecycleEvent, PackageWatcher, WatcherId, WatcherRegistry};
use tracing::{debug, info};

pub use types::{
    ApplicationInfo, InstallRequest, InstallResult, InstallSource, PackageInfo, ScanReport,
    UninstallOutcome,
};

use crate::collab::{
    ArchitectureChecker, ArtifactParser, ContentResolver, FileContentResolver, HostAbiChecker,
    HostEnvironment, NoopSupervisor, ProcessSupervisor, StaticHost,
};
use crate::error::{PmError, PmResult};
use crate::identity::IdentityStore;
use crate::installer::StepContext;
use crate::record::PackageRecord;
use crate::resolver::{ComponentResolver, PackageMap};
use crate::users::{DEFAULT_MAX_USERS, UserManager};

/// In-memory registry guarded by the registry lock.
#[derive(Debug, Default)]
struct RegistryState {
    packages: PackageMap,
    resolver: ComponentResolver,
}

impl RegistryState {
    /// Insert or replace a record and rebuild its index entries.
    fn upsert(&mut self, record: PackageRecord) {
        self.resolver.add_package(&record.descriptor);
        self.packages.insert(record.name().clone(), record);
    }

    /// Replace a record whose components did not change.
    fn replace_state(&mut self, record: PackageRecord) {
        self.packages.insert(record.name().clone(), record);
    }

    fn remove(&mut self, package: &PackageName) -> Option<PackageRecord> {
        self.resolver.remove_package(package);
        self.packages.remove(package)
    }
}

/// Held for the duration of a state-changing operation.
struct InstallGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: File,
}

/// The guest package registry.
///
/// Built once with [`PackageManager::builder`] and shared as an `Arc`.
pub struct PackageManager {
    layout: Arc<dyn StorageLayout>,
    identities: IdentityStore,
    users: UserManager,
    state: RwLock<RegistryState>,
    install_lock: Mutex<()>,
    watchers: WatcherRegistry,
    supervisor: Arc<dyn ProcessSupervisor>,
    parser: Arc<dyn ArtifactParser>,
    arch: Arc<dyn ArchitectureChecker>,
    host: Arc<dyn HostEnvironment>,
    content: Arc<dyn ContentResolver>,
}

impl std::fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let packages = self.read_state().packages.len();
        f.debug_struct("PackageManager")
            .field("root", &self.layout.root())
            .field("package_count", &packages)
            .field("watchers", &self.watchers)
            .finish_non_exhaustive()
    }
}

impl PackageManager {
    /// Start building a registry rooted at `layout`.
    #[must_use]
    pub fn builder(layout: Arc<dyn StorageLayout>) -> PackageManagerBuilder {
        PackageManagerBuilder::new(layout)
    }

    /// Filesystem layout.
    #[must_use]
    pub fn layout(&self) -> &Arc<dyn StorageLayout> {
        &self.layout
    }

    /// Process supervisor the registry was built with.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<dyn ProcessSupervisor> {
        &self.supervisor
    }

    /// Identity store.
    #[must_use]
    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// Register a lifecycle watcher.
    pub fn add_watcher(&self, watcher: Arc<dyn PackageWatcher>) -> WatcherId {
        self.watchers.register(watcher)
    }

    /// Unregister a lifecycle watcher.
    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        self.watchers.unregister(id)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a record.
    fn record(&self, package: &PackageName) -> Option<PackageRecord> {
        self.read_state().packages.get(package).cloned()
    }

    fn lock_install(&self) -> PmResult<InstallGuard<'_>> {
        let local = self
            .install_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let path = self.layout.install_lock_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PmError::io(parent, e))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| PmError::io(&path, e))?;
        fs2::FileExt::lock_exclusive(&file).map_err(|e| PmError::io(&path, e))?;

        Ok(InstallGuard {
            _local: local,
            _file: file,
        })
    }

    fn step_context<'a>(&'a self, record: &PackageRecord) -> StepContext<'a> {
        StepContext {
            layout: self.layout.as_ref(),
            flags: record.install_flags,
            source: None,
            parser: self.parser.as_ref(),
            abis: self.arch.preferred_abis(),
        }
    }

    fn record_path(&self, package: &PackageName) -> std::path::PathBuf {
        self.layout.record_path_for(package)
    }

    fn notify_all(&self, events: &[LifecycleEvent]) {
        for event in events {
            debug!(package = %event.package, user = %event.user, kind = ?event.kind, "Delivering lifecycle event");
            self.watchers.notify(event);
        }
    }

    /// Whether `user` exists.
    #[must_use]
    pub fn user_exists(&self, user: UserId) -> bool {
        self.users.exists(user)
    }
}

/// Builder for [`PackageManager`].
pub struct PackageManagerBuilder {
    layout: Arc<dyn StorageLayout>,
    supervisor: Arc<dyn ProcessSupervisor>,
    parser: Arc<dyn ArtifactParser>,
    arch: Arc<dyn ArchitectureChecker>,
    host: Arc<dyn HostEnvironment>,
    content: Arc<dyn ContentResolver>,
    max_users: usize,
}

impl std::fmt::Debug for PackageManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageManagerBuilder")
            .field("root", &self.layout.root())
            .field("max_users", &self.max_users)
            .finish_non_exhaustive()
    }
}

impl PackageManagerBuilder {
    fn new(layout: Arc<dyn StorageLayout>) -> Self {
        Self {
            layout,
            supervisor: Arc::new(NoopSupervisor),
            parser: Arc::new(crate::artifact::TarArtifactParser::new()),
            arch: Arc::new(HostAbiChecker::host()),
            host: Arc::new(StaticHost::default()),
            content: Arc::new(FileContentResolver),
            max_users: DEFAULT_MAX_USERS,
        }
    }

    /// Attach a process supervisor.
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Use a different artifact parser.
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn ArtifactParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Use a different architecture checker.
    #[must_use]
    pub fn with_architecture_checker(mut self, arch: Arc<dyn ArchitectureChecker>) -> Self {
        self.arch = arch;
        self
    }

    /// Describe the host application.
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = host;
        self
    }

    /// Use a different content resolver.
    #[must_use]
    pub fn with_content_resolver(mut self, content: Arc<dyn ContentResolver>) -> Self {
        self.content = content;
        self
    }

    /// Cap the number of users.
    #[must_use]
    pub fn with_max_users(mut self, max_users: usize) -> Self {
        self.max_users = max_users;
        self
    }

    /// Load persisted identities and users and build the registry.
    ///
    /// Packages are not loaded until [`PackageManager::system_ready`].
    ///
    /// # Errors
    ///
    /// Returns an error if the base directories cannot be created.
    pub fn build(self) -> PmResult<Arc<PackageManager>> {
        for dir in [
            self.layout.system_dir(),
            self.layout.apps_dir(),
            self.layout.cache_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| PmError::io(&dir, e))?;
        }

        let identities = IdentityStore::load(self.layout.identities_path());
        let users = UserManager::load(self.layout.users_path(), self.max_users);

        info!(root = %self.layout.root().display(), host = self.host.host_package(), "Package manager created");

        Ok(Arc::new(PackageManager {
            identities,
            users,
            state: RwLock::new(RegistryState::default()),
            install_lock: Mutex::new(()),
            watchers: WatcherRegistry::new(),
            layout: self.layout,
            supervisor: self.supervisor,
            parser: self.parser,
            arch: self.arch,
            host: self.host,
            content: self.content,
        }))
    }
}
