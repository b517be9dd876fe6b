//! Opaque handle registry
//!
//! Callers never hold state machine contexts directly; they hold numeric
//! handles into this arena. A stage operation *takes* the context out of its
//! slot (leaving a running marker), works on it, and *restores* the
//! follow-up context when done. Taking enforces two rules at once: only one
//! operation can be in flight per handle, and an operation can only run
//! against the stage the handle is actually at.
//!
//! Handles are never reused within a process, so a stale handle kept around
//! after release can never alias a newer exchange.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tracing::warn;

use crate::claimer::{
    ClaimerFinalizeCtx, ClaimerInProgress1Ctx, ClaimerInProgress2Ctx, ClaimerInProgress3Ctx,
    ClaimerInitialCtx,
};
use crate::greeter::{
    GreeterInProgress1Ctx, GreeterInProgress2Ctx, GreeterInProgress3Ctx, GreeterInProgress4Ctx,
    GreeterInitialCtx,
};

/// Opaque identifier for one live exchange.
pub type Handle = u32;

/// Everything a handle can point at: one variant per stage of either
/// machine. Stage operations match on the variant they expect and treat
/// anything else as a caller error.
#[derive(Clone)]
pub enum ExchangeContext {
    ClaimerInitial(ClaimerInitialCtx),
    ClaimerInProgress1(ClaimerInProgress1Ctx),
    ClaimerInProgress2(ClaimerInProgress2Ctx),
    ClaimerInProgress3(ClaimerInProgress3Ctx),
    ClaimerFinalize(ClaimerFinalizeCtx),
    GreeterInitial(GreeterInitialCtx),
    GreeterInProgress1(GreeterInProgress1Ctx),
    GreeterInProgress2(GreeterInProgress2Ctx),
    GreeterInProgress3(GreeterInProgress3Ctx),
    GreeterInProgress4(GreeterInProgress4Ctx),
}

impl ExchangeContext {
    /// Stage name for diagnostics and progress events.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ClaimerInitial(_) => "claimer_initial",
            Self::ClaimerInProgress1(_) => "claimer_in_progress_1",
            Self::ClaimerInProgress2(_) => "claimer_in_progress_2",
            Self::ClaimerInProgress3(_) => "claimer_in_progress_3",
            Self::ClaimerFinalize(_) => "claimer_finalize",
            Self::GreeterInitial(_) => "greeter_initial",
            Self::GreeterInProgress1(_) => "greeter_in_progress_1",
            Self::GreeterInProgress2(_) => "greeter_in_progress_2",
            Self::GreeterInProgress3(_) => "greeter_in_progress_3",
            Self::GreeterInProgress4(_) => "greeter_in_progress_4",
        }
    }
}

/// Why a take failed. The service layer folds both cases into the
/// operation's `Internal` tag; they are caller bugs, not runtime conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    /// The handle was never issued, or was already released
    NotFound,
    /// Another operation is currently running against this handle
    Busy,
}

enum Slot<T> {
    Available(T),
    Running,
}

/// Arena of live exchanges, keyed by non-reused numeric handle.
///
/// Generic over the stored context so the take/restore discipline can be
/// exercised on its own; the service instantiates it with
/// [`ExchangeContext`].
#[derive(Default)]
pub struct HandleRegistry<T = ExchangeContext> {
    next: AtomicU32,
    slots: Mutex<HashMap<Handle, Slot<T>>>,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a fresh context and issues its handle.
    pub fn register(&self, ctx: T) -> Handle {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock_slots().insert(handle, Slot::Available(ctx));
        handle
    }

    /// Removes the context for exclusive use, leaving a running marker.
    pub fn take(&self, handle: Handle) -> Result<T, TakeError> {
        let mut slots = self.lock_slots();
        match slots.get_mut(&handle) {
            None => Err(TakeError::NotFound),
            Some(Slot::Running) => Err(TakeError::Busy),
            Some(slot @ Slot::Available(_)) => {
                match std::mem::replace(slot, Slot::Running) {
                    Slot::Available(ctx) => Ok(ctx),
                    // Just matched Available above
                    Slot::Running => Err(TakeError::Busy),
                }
            }
        }
    }

    /// Puts a context back after an operation finishes.
    ///
    /// If the handle was released while the operation ran (abort during
    /// flight) the context is simply dropped; the abort wins.
    pub fn restore(&self, handle: Handle, ctx: T) {
        let mut slots = self.lock_slots();
        match slots.get_mut(&handle) {
            Some(slot) => *slot = Slot::Available(ctx),
            None => {
                warn!(handle, "dropping context restored to a released handle");
            }
        }
    }

    /// Frees the handle. Idempotent; releasing mid-flight makes the
    /// eventual restore drop its context.
    pub fn release(&self, handle: Handle) {
        self.lock_slots().remove(&handle);
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<Handle, Slot<T>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
