use std::sync::{Mutex, PoisonError};

use flume::{Receiver, Sender, TrySendError};
use ucremote_core::{OutputState, ProgrammeInfo};

use crate::engine::ConnectionState;

const CHANNEL_BUFFER_SIZE: usize = 100;

/// Change notifications published by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(ConnectionState),
    CatalogReplaced,
    OutputChanged(OutputState),
    ProgrammeChanged(ProgrammeInfo),
}

/// A subscription to the engine's change notifications
pub struct Subscription {
    receiver: Receiver<SyncEvent>,
}

impl Subscription {
    /// Receive the next event. Fails once the engine has been dropped.
    pub async fn recv(&self) -> Result<SyncEvent, flume::RecvError> {
        self.receiver.recv_async().await
    }

    pub fn try_recv(&self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out of events to every live subscription.
#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<Sender<SyncEvent>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> Subscription {
        let (sender, receiver) = flume::bounded(CHANNEL_BUFFER_SIZE);
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.push(sender);
        tracing::debug!("new subscription, subscriber count {}", senders.len());
        Subscription { receiver }
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("subscriber is not keeping up, dropping {event:?}");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
