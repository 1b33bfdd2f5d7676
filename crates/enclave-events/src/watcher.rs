//! Watcher trait and ordered registry.

use std::sync::{Arc, PoisonError, RwLock};

use enclave_core::{PackageName, UserId};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::event::{LifecycleEvent, LifecycleKind};

/// Receives package lifecycle notifications.
///
/// Calls happen synchronously on the thread that completed the mutation, so
/// implementations should return quickly.
///
/// A watcher that needs to query the registry must hold a `Weak` reference
/// to it; a strong one forms a cycle through the registry's watcher list.
pub trait PackageWatcher: Send + Sync {
    /// Name used in logs.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }

    /// A package was installed or updated for `user`.
    fn on_package_installed(&self, package: &PackageName, user: UserId);

    /// A package was removed for `user`. `removed_entirely` is set once no
    /// user has it installed any more.
    fn on_package_uninstalled(&self, package: &PackageName, removed_entirely: bool, user: UserId);
}

/// Registration handle for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(Uuid);

impl WatcherId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

type Entries = Vec<(WatcherId, Arc<dyn PackageWatcher>)>;

/// Ordered set of watchers.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: RwLock<Entries>,
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watcher_count", &self.len())
            .finish()
    }
}

impl WatcherRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher at the end of the delivery order.
    pub fn register(&self, watcher: Arc<dyn PackageWatcher>) -> WatcherId {
        let id = WatcherId::new();
        let name = watcher.name().to_string();

        self.watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, watcher));

        debug!(watcher_name = %name, "Watcher registered");
        id
    }

    /// Unregister a watcher. Returns `true` if it was registered.
    pub fn unregister(&self, id: WatcherId) -> bool {
        let mut watchers = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
        let before = watchers.len();
        watchers.retain(|(existing, _)| *existing != id);
        let removed = watchers.len() != before;

        if removed {
            debug!("Watcher unregistered");
        }
        removed
    }

    /// Deliver an event to every watcher in registration order.
    ///
    /// The list is snapshotted first, so watchers may register or unregister
    /// from inside a callback. A panicking watcher is logged and skipped.
    pub fn notify(&self, event: &LifecycleEvent) {
        let snapshot: Entries = self
            .watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, watcher) in &snapshot {
            trace!(
                watcher_name = %watcher.name(),
                package = %event.package,
                user = %event.user,
                kind = ?event.kind,
                "Notifying watcher"
            );

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                match event.kind {
                    LifecycleKind::Installed => {
                        watcher.on_package_installed(&event.package, event.user);
                    },
                    LifecycleKind::Uninstalled => watcher.on_package_uninstalled(
                        &event.package,
                        event.removed_entirely,
                        event.user,
                    ),
                }
            }));

            if let Err(e) = result {
                error!(
                    watcher_id = ?id,
                    watcher_name = %watcher.name(),
                    package = %event.package,
                    error = ?e,
                    "Watcher panicked"
                );
            }
        }
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no watcher is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every watcher.
    pub fn clear(&self) {
        self.watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("All watchers cleared");
    }
}

/// A watcher backed by a single closure receiving the whole event.
pub struct FnWatcher<F>
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    name: String,
    handler: F,
}

impl<F> FnWatcher<F>
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    /// Create a closure-backed watcher.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> PackageWatcher for FnWatcher<F>
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_package_installed(&self, package: &PackageName, user: UserId) {
        (self.handler)(&LifecycleEvent::installed(package.clone(), user));
    }

    fn on_package_uninstalled(&self, package: &PackageName, removed_entirely: bool, user: UserId) {
        (self.handler)(&LifecycleEvent::uninstalled(
            package.clone(),
            user,
            removed_entirely,
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn pkg() -> PackageName {
        PackageName::parse("com.example.app").unwrap()
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let registry = WatcherRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.register(Arc::new(FnWatcher::new(label, move |_| {
                seen.lock().unwrap().push(label);
            })));
        }

        registry.notify(&LifecycleEvent::installed(pkg(), UserId::SYSTEM));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_watcher_does_not_block_others() {
        let registry = WatcherRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        registry.register(Arc::new(FnWatcher::new("boom", |_| panic!("watcher failure"))));
        let sink = Arc::clone(&seen);
        registry.register(Arc::new(FnWatcher::new("after", move |event| {
            sink.lock().unwrap().push(event.clone());
        })));

        registry.notify(&LifecycleEvent::uninstalled(pkg(), UserId(1), true));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, LifecycleKind::Uninstalled);
        assert!(seen[0].removed_entirely);
        assert_eq!(seen[0].user, UserId(1));
    }

    #[test]
    fn test_unregister() {
        let registry = WatcherRegistry::new();
        let id = registry.register(Arc::new(FnWatcher::new("w", |_| {})));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_event_serializes() {
        let event = LifecycleEvent::installed(pkg(), UserId(0));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["package"], "com.example.app");
        assert_eq!(json["kind"], "installed");
    }
}
