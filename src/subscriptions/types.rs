//! Subscription types for subject streams.

use super::manager::{StreamSink, SubscriptionManager};
use crate::error::{DomainError, Result};
use crate::subjects::{Subject, SubjectFields};
use crate::types::SubjectId;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Events emitted by a subject stream.
#[derive(Clone, Debug)]
pub enum StreamEvent<S: SubjectFields> {
    /// A live subject: one that existed when the stream was opened, or one
    /// that became live afterwards. Each id is emitted at most once.
    Added(Subject<S>),
    /// A previously emitted subject was deleted. Sent at most once per id.
    Deleted(SubjectId),
    /// The stream was terminated by the publisher.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The domain was dropped.
    DomainClosed,
    /// Explicitly cancelled.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Cancellable stream of subjects of one kind.
///
/// The stream never completes on its own. It is independent of the snapshot
/// that opened it and keeps forwarding after that snapshot is released.
/// Dropping the stream cancels it.
pub struct SubjectStream<S: SubjectFields> {
    id: SubscriptionId,
    receiver: Receiver<StreamEvent<S>>,
    sink: Arc<StreamSink<S>>,
    manager: Weak<SubscriptionManager>,
}

impl<S: SubjectFields> SubjectStream<S> {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: Receiver<StreamEvent<S>>,
        sink: Arc<StreamSink<S>>,
        manager: Weak<SubscriptionManager>,
    ) -> Self {
        Self {
            id,
            receiver,
            sink,
            manager,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StreamEvent<S>> {
        self.receiver.recv().map_err(|_| self.dropped())
    }

    /// Try to receive an event (non-blocking). `Ok(None)` if nothing is
    /// buffered yet.
    pub fn try_recv(&self) -> Result<Option<StreamEvent<S>>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.dropped()),
        }
    }

    /// Receive with timeout. `Ok(None)` if the timeout elapsed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<StreamEvent<S>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.dropped()),
        }
    }

    /// Drain every event buffered right now.
    pub fn try_iter(&self) -> impl Iterator<Item = StreamEvent<S>> + '_ {
        self.receiver.try_iter()
    }

    /// True once the publisher stopped forwarding to this stream.
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Stop receiving. Nothing else in the domain is affected.
    pub fn cancel(self) {}

    fn dropped(&self) -> DomainError {
        DomainError::SubscriptionDropped(self.sink.reason().unwrap_or(DropReason::Unsubscribed))
    }
}

impl<S: SubjectFields> Drop for SubjectStream<S> {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
        self.sink.close(DropReason::Unsubscribed);
    }
}

impl<S: SubjectFields> fmt::Debug for SubjectStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectStream")
            .field("id", &self.id)
            .field("kind", &S::KIND)
            .field("closed", &self.sink.is_closed())
            .finish()
    }
}
