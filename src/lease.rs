//! Scoped background-execution lease.
//!
//! A [`BackgroundLease`] is acquired before any network call for an event and
//! released exactly once: when it is dropped (the submission settled, either
//! way) or when the platform revokes it, whichever happens first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::platform::{LeaseHandle, LeaseProvider};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// `acquire` has not returned a handle yet.
    Pending,
    Held(LeaseHandle),
    Released,
}

struct Shared {
    provider: Arc<dyn LeaseProvider>,
    slot: Mutex<Slot>,
}

impl Shared {
    // ---
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, reason: &'static str) {
        // ---
        let previous = std::mem::replace(&mut *self.lock(), Slot::Released);
        match previous {
            Slot::Held(handle) => {
                debug!(lease = handle.0, reason, "background lease released");
                self.provider.release(handle);
            }
            Slot::Pending => debug!(reason, "background lease ended before it was granted"),
            Slot::Released => {}
        }
    }
}

pub struct BackgroundLease {
    shared: Arc<Shared>,
}

impl BackgroundLease {
    // ---
    pub fn acquire(provider: Arc<dyn LeaseProvider>) -> Self {
        // ---
        let shared = Arc::new(Shared {
            provider: provider.clone(),
            slot: Mutex::new(Slot::Pending),
        });

        let weak = Arc::downgrade(&shared);
        let handle = provider.acquire(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                warn!("background lease revoked by the platform");
                shared.release("expired");
            }
        }));

        let expired_early = {
            let mut slot = shared.lock();
            match *slot {
                Slot::Pending => {
                    *slot = Slot::Held(handle);
                    false
                }
                _ => true,
            }
        };
        if expired_early {
            // Revoked before we even saw the handle; hand it straight back.
            provider.release(handle);
        } else {
            debug!(lease = handle.0, "background lease acquired");
        }

        Self { shared }
    }

    /// Whether the lease still keeps the process alive.
    pub fn is_held(&self) -> bool {
        matches!(*self.shared.lock(), Slot::Held(_))
    }

    /// Release now. Equivalent to dropping the lease.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for BackgroundLease {
    fn drop(&mut self) {
        self.shared.release("settled");
    }
}

impl std::fmt::Debug for BackgroundLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundLease")
            .field("slot", &*self.shared.lock())
            .finish()
    }
}
