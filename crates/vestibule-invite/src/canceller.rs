//! Canceller registry
//!
//! A canceller is an opaque token a caller can create up front, pass into
//! any long-running invitation operation, and later fire from another task
//! to interrupt that operation. Cancellation is cooperative: the in-flight
//! operation observes the signal at its next suspension point and returns
//! its own `Cancelled` tag; no partial work is rolled back.
//!
//! Binding is exclusive. A canceller is bound to at most one operation at a
//! time, and an operation holds at most one canceller; binding a token that
//! is already bound fails with [`AlreadyBound`] instead of stealing the
//! in-flight operation's signal. Firing an unbound canceller is an error
//! (`CancelError::NotBound`), never a no-op, so a caller that races its own
//! teardown finds out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::errors::CancelError;

/// A canceller token is already bound to an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("canceller {0} is already bound to an operation")]
pub struct AlreadyBound(pub u32);

// ============================================================================
// Registry
// ============================================================================

/// Process-wide table of cancellers, keyed by opaque numeric token.
///
/// Tokens are never reused within the registry's lifetime, so a stale token
/// held by a caller can never alias a newer canceller.
#[derive(Debug, Default)]
pub struct CancellerRegistry {
    next: AtomicU32,
    // token -> bound signal; `None` while the canceller exists but no
    // operation holds it
    slots: Mutex<HashMap<u32, Option<Arc<Notify>>>>,
}

impl CancellerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, unbound canceller and returns its token.
    pub fn new_canceller(&self) -> u32 {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock_slots().insert(token, None);
        token
    }

    /// Binds `token` to an operation, returning a guard the operation awaits
    /// on. A fresh signal is installed on every bind so a `cancel` fired
    /// against a previous, already-finished binding cannot leak through.
    ///
    /// Binding is exclusive: a token already bound to an in-flight operation
    /// refuses a second binding rather than silently stealing the first
    /// one's signal.
    ///
    /// Unknown tokens still produce a working guard: the operation runs
    /// uncancellable rather than failing, since the caller may legitimately
    /// pass a canceller it never intends to fire.
    pub fn bind(self: &Arc<Self>, token: u32) -> Result<CancellerGuard, AlreadyBound> {
        let notify = Arc::new(Notify::new());
        if let Some(slot) = self.lock_slots().get_mut(&token) {
            if slot.is_some() {
                return Err(AlreadyBound(token));
            }
            *slot = Some(notify.clone());
        }
        Ok(CancellerGuard {
            registry: self.clone(),
            token,
            notify,
        })
    }

    /// Fires the canceller bound to an in-flight operation.
    pub fn cancel(&self, token: u32) -> Result<(), CancelError> {
        match self.lock_slots().get(&token) {
            Some(Some(notify)) => {
                notify.notify_one();
                Ok(())
            }
            Some(None) | None => Err(CancelError::NotBound),
        }
    }

    /// Clears the binding only if `notify` is still the installed signal, so
    /// a late guard drop can never release someone else's binding.
    fn unbind(&self, token: u32, notify: &Arc<Notify>) {
        if let Some(slot) = self.lock_slots().get_mut(&token) {
            if slot.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, notify)) {
                *slot = None;
            }
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Option<Arc<Notify>>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            // Nothing held across a panic can leave the table inconsistent;
            // the map only ever holds plain values
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Live binding between a canceller token and one operation.
///
/// Unbinds on drop, so an operation that returns (or is itself dropped)
/// automatically releases the canceller for reuse.
#[derive(Debug)]
pub struct CancellerGuard {
    registry: Arc<CancellerRegistry>,
    token: u32,
    notify: Arc<Notify>,
}

impl CancellerGuard {
    /// Resolves when the bound canceller fires.
    pub async fn cancelled(&self) {
        self.notify.notified().await;
    }
}

impl Drop for CancellerGuard {
    fn drop(&mut self) {
        self.registry.unbind(self.token, &self.notify);
    }
}
