//! Subscription types for feature change notifications.

use crate::types::Version;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An observer told that a feature's committed state changed.
///
/// Features hold subscribers weakly; dropping the last `Arc` is enough to
/// stop notifications.
pub trait Subscriber: Send + Sync {
    fn state_changed(&self, feature: &str);
}

impl<F> Subscriber for F
where
    F: Fn(&str) + Send + Sync,
{
    fn state_changed(&self, feature: &str) {
        self(feature)
    }
}

/// Unique identifier for a subscriber registration. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

/// Unique identifier for a change listener or change stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// A committed state change, as seen by listeners and streams.
#[derive(Debug)]
pub struct StateChange<S> {
    pub feature: Arc<str>,
    pub version: Version,
    pub state: Arc<S>,
}

impl<S> Clone for StateChange<S> {
    fn clone(&self) -> Self {
        Self {
            feature: Arc::clone(&self.feature),
            version: self.version,
            state: Arc::clone(&self.state),
        }
    }
}

/// Events delivered on a change stream.
#[derive(Debug)]
pub enum ChangeEvent<S> {
    /// Committed state reference changed.
    Changed(StateChange<S>),

    /// Stream was detached from the feature.
    Dropped { reason: DropReason },
}

impl<S> Clone for ChangeEvent<S> {
    fn clone(&self) -> Self {
        match self {
            ChangeEvent::Changed(change) => ChangeEvent::Changed(change.clone()),
            ChangeEvent::Dropped { reason } => ChangeEvent::Dropped {
                reason: reason.clone(),
            },
        }
    }
}

/// Why a change stream was detached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly closed.
    Unsubscribed,
}

/// Handle to a live change stream.
///
/// Not restartable: events committed before the stream was opened are
/// never delivered.
pub struct ChangeStream<S> {
    pub id: ListenerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ChangeEvent<S>>,
}

impl<S> ChangeStream<S> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ChangeEvent<S>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeEvent<S>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ChangeEvent<S>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<ChangeEvent<S>> {
        self.receiver.try_iter().collect()
    }
}
