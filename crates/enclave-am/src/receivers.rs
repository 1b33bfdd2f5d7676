//! Mirror guest receivers into the host.
//!
//! Every enabled receiver of an installed package gets one host-side
//! registration per user. Registrations follow install and uninstall
//! events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use enclave_core::{ComponentKind, PackageName, QueryFlags, UserId};
use enclave_events::PackageWatcher;
use enclave_pm::{ComponentDecl, PackageManager};
use serde::Serialize;
use tracing::{debug, info};

/// Host handle for one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegistrationId(pub u64);

/// Host side of receiver registration.
pub trait HostReceiverBridge: Send + Sync {
    /// Register a proxy for `receiver` running as `user`.
    fn register(&self, receiver: &ComponentDecl, user: UserId) -> RegistrationId;

    /// Drop a registration.
    fn unregister(&self, id: RegistrationId);
}

/// A bridge that only hands out ids and logs.
#[derive(Debug, Default)]
pub struct LoggingBridge {
    next: AtomicU64,
}

impl HostReceiverBridge for LoggingBridge {
    fn register(&self, receiver: &ComponentDecl, user: UserId) -> RegistrationId {
        let id = RegistrationId(self.next.fetch_add(1, Ordering::Relaxed));
        debug!(receiver = %receiver.name, user = %user, id = id.0, "Registered receiver");
        id
    }

    fn unregister(&self, id: RegistrationId) {
        debug!(id = id.0, "Unregistered receiver");
    }
}

type Registrations = HashMap<(PackageName, UserId), Vec<RegistrationId>>;

/// Keeps host registrations in step with installed receivers.
pub struct ReceiverMirror {
    pm: Weak<PackageManager>,
    bridge: Arc<dyn HostReceiverBridge>,
    registrations: Mutex<Registrations>,
}

impl std::fmt::Debug for ReceiverMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverMirror")
            .field("registered", &self.lock().values().map(Vec::len).sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl ReceiverMirror {
    /// Mirror every installed package, then follow lifecycle events.
    pub fn attach(pm: &Arc<PackageManager>, bridge: Arc<dyn HostReceiverBridge>) -> Arc<Self> {
        let mirror = Arc::new(Self {
            pm: Arc::downgrade(pm),
            bridge,
            registrations: Mutex::new(HashMap::new()),
        });

        for user in pm.users() {
            for info in pm.installed_packages(QueryFlags::empty(), user.id) {
                mirror.register_package(pm, &info.package_name, user.id);
            }
        }
        pm.add_watcher(Arc::clone(&mirror) as Arc<dyn PackageWatcher>);

        info!(registrations = mirror.registration_count(), "Receiver mirror attached");
        mirror
    }

    /// Registrations held for `package`, by user.
    #[must_use]
    pub fn registrations(&self, package: &PackageName) -> Vec<(UserId, RegistrationId)> {
        let mut found: Vec<_> = self
            .lock()
            .iter()
            .filter(|((p, _), _)| p == package)
            .flat_map(|((_, user), ids)| ids.iter().map(move |id| (*user, *id)))
            .collect();
        found.sort();
        found
    }

    /// Total registrations.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn register_package(&self, pm: &PackageManager, package: &PackageName, user: UserId) {
        self.unregister(package, user);

        let Some(info) = pm.package_info(package, QueryFlags::GET_COMPONENTS, user) else {
            return;
        };
        let ids: Vec<RegistrationId> = info
            .receivers
            .iter()
            .filter(|decl| {
                pm.component_info(ComponentKind::Receiver, &decl.name, QueryFlags::empty(), user)
                    .is_some()
            })
            .map(|decl| self.bridge.register(decl, user))
            .collect();

        if !ids.is_empty() {
            debug!(package = %package, user = %user, count = ids.len(), "Mirrored receivers");
            self.lock().insert((package.clone(), user), ids);
        }
    }

    fn unregister(&self, package: &PackageName, user: UserId) {
        let removed = self.lock().remove(&(package.clone(), user));
        for id in removed.into_iter().flatten() {
            self.bridge.unregister(id);
        }
    }

    fn unregister_all(&self, package: &PackageName) {
        let removed: Vec<RegistrationId> = {
            let mut map = self.lock();
            let keys: Vec<_> = map.keys().filter(|(p, _)| p == package).cloned().collect();
            keys.iter().filter_map(|k| map.remove(k)).flatten().collect()
        };
        for id in removed {
            self.bridge.unregister(id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.registrations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PackageWatcher for ReceiverMirror {
    fn name(&self) -> &str {
        "receiver-mirror"
    }

    fn on_package_installed(&self, package: &PackageName, user: UserId) {
        if let Some(pm) = self.pm.upgrade() {
            self.register_package(&pm, package, user);
        }
    }

    fn on_package_uninstalled(&self, package: &PackageName, removed_entirely: bool, user: UserId) {
        if removed_entirely || user == UserId::ALL {
            self.unregister_all(package);
        } else {
            self.unregister(package, user);
        }
    }
}
