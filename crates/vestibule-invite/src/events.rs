//! Outbound event channel
//!
//! Invitation lifecycle changes are surfaced as events on a bounded channel
//! rather than callbacks, so subscribers consume at their own pace on their
//! own tasks. Publishing never blocks: a subscriber whose buffer is full
//! misses the event, and a subscriber whose receiver was dropped is pruned
//! on the next publish.

use tokio::sync::mpsc;
use tracing::debug;

use vestibule_core::{InvitationStatus, InvitationToken};

const EVENT_BUFFER: usize = 256;

/// Invitation lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteEvent {
    /// An invitation's server-side status changed
    InvitationChanged {
        token: InvitationToken,
        status: InvitationStatus,
    },
    /// A greet or claim exchange advanced to its next stage
    ExchangeProgress {
        token: InvitationToken,
        stage: &'static str,
    },
}

/// Fan-out bus for [`InviteEvent`].
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: std::sync::Mutex<Vec<mpsc::Sender<InviteEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> mpsc::Receiver<InviteEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.lock_subscribers().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber, dropping it for any
    /// subscriber whose buffer is saturated.
    pub fn publish(&self, event: InviteEvent) {
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?event, "dropping event for saturated subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<InviteEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
