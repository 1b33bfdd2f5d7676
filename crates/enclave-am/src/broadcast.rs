//! Broadcast timeout watchdog.
//!
//! A broadcast delivered to a guest receiver is pending until the receiver
//! finishes it. Receivers that never finish are force-completed once their
//! deadline passes so the sender is not blocked forever.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use enclave_core::{ComponentName, UserId};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deadline::DeadlineQueue;
use crate::error::{AmError, AmResult};

/// How long a receiver may hold a broadcast.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_millis(9000);

/// Identifies one pending delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BroadcastToken {
    /// Unique delivery id.
    pub id: Uuid,
    /// Receiving component.
    pub receiver: ComponentName,
    /// User the receiver runs as.
    pub user: UserId,
}

impl BroadcastToken {
    /// A fresh token for a delivery to `receiver`.
    #[must_use]
    pub fn new(receiver: ComponentName, user: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            receiver,
            user,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    queue: DeadlineQueue<BroadcastToken>,
    shutdown: bool,
}

/// Tracks pending broadcasts and completes them on timeout.
///
/// `on_timeout` runs once per expired token, outside the tracker's lock.
pub struct PendingBroadcastTracker<F> {
    timeout: Duration,
    state: Mutex<TrackerState>,
    wakeup: Condvar,
    on_timeout: F,
}

impl<F> std::fmt::Debug for PendingBroadcastTracker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingBroadcastTracker")
            .field("timeout", &self.timeout)
            .field("pending", &self.lock().queue.len())
            .finish_non_exhaustive()
    }
}

impl<F> PendingBroadcastTracker<F>
where
    F: Fn(&BroadcastToken) + Send + Sync + 'static,
{
    /// A tracker with the given timeout.
    pub fn new(timeout: Duration, on_timeout: F) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            state: Mutex::new(TrackerState::default()),
            wakeup: Condvar::new(),
            on_timeout,
        })
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start tracking a delivery to `receiver`.
    pub fn begin(&self, receiver: ComponentName, user: UserId) -> BroadcastToken {
        let token = BroadcastToken::new(receiver, user);
        self.begin_at(token.clone(), Instant::now());
        token
    }

    /// Track `token` as if delivered at `sent`.
    pub fn begin_at(&self, token: BroadcastToken, sent: Instant) {
        let deadline = sent.checked_add(self.timeout).unwrap_or(sent);
        debug!(id = %token.id, receiver = %token.receiver, "Broadcast pending");
        self.lock().queue.schedule(token, deadline);
        self.wakeup.notify_all();
    }

    /// The receiver finished. Returns whether the broadcast was still
    /// pending; `false` means it already timed out or was never tracked.
    pub fn finish(&self, token: &BroadcastToken) -> bool {
        let pending = self.lock().queue.cancel(token);
        if pending {
            debug!(id = %token.id, receiver = %token.receiver, "Broadcast finished");
        }
        pending
    }

    /// Number of pending broadcasts.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Force-complete every broadcast due at or before `now`.
    pub fn expire_due(&self, now: Instant) -> Vec<BroadcastToken> {
        let due = self.lock().queue.pop_due(now);
        self.complete(&due);
        due
    }

    /// Run the watchdog on its own thread until [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn_watchdog(self: &Arc<Self>) -> AmResult<WatchdogHandle> {
        let tracker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("broadcast-watchdog".into())
            .spawn(move || tracker.watch())
            .map_err(AmError::Spawn)?;
        info!(timeout = ?self.timeout, "Broadcast watchdog started");
        Ok(WatchdogHandle {
            handle: Some(handle),
        })
    }

    /// Stop the watchdog. Pending broadcasts stay pending.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.wakeup.notify_all();
    }

    fn watch(&self) {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let due = state.queue.pop_due(now);
            if !due.is_empty() {
                drop(state);
                self.complete(&due);
                state = self.lock();
                continue;
            }

            state = match state.queue.next_deadline() {
                Some(at) => {
                    self.wakeup
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                },
                None => self.wakeup.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
        debug!("Broadcast watchdog stopped");
    }

    fn complete(&self, tokens: &[BroadcastToken]) {
        for token in tokens {
            warn!(
                id = %token.id,
                receiver = %token.receiver,
                user = %token.user,
                "Broadcast timed out, forcing completion"
            );
            (self.on_timeout)(token);
        }
    }
}

impl<F> PendingBroadcastTracker<F> {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Joins the watchdog thread when dropped.
///
/// Call [`PendingBroadcastTracker::shutdown`] first or the drop blocks.
#[derive(Debug)]
pub struct WatchdogHandle {
    handle: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    /// Wait for the watchdog thread to exit.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Broadcast watchdog panicked");
            }
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.join_inner();
    }
}
