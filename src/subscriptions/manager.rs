//! Subscription manager for publishing subjects to streams.

use crate::subjects::{DeletionWatcher, Subject, SubjectCell, SubjectFields};
use crate::types::{SubjectId, SubjectKind};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::types::{DropReason, StreamEvent, SubjectStream, SubscriptionConfig, SubscriptionId};

/// Sending side of one stream.
///
/// The sender lives only here. Deletion watchers reach it through a weak
/// reference, so closing the sink disconnects the receiver once the buffer
/// is drained.
pub(crate) struct StreamSink<S: SubjectFields> {
    sender: Mutex<Option<Sender<StreamEvent<S>>>>,
    reason: Mutex<Option<DropReason>>,
}

impl<S: SubjectFields> StreamSink<S> {
    fn new(sender: Sender<StreamEvent<S>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            reason: Mutex::new(None),
        }
    }

    /// Try to send an event. Returns false if the sink is (now) closed.
    fn send(&self, event: StreamEvent<S>) -> bool {
        let result = match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(event),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.close(DropReason::BufferOverflow);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.close(DropReason::Unsubscribed);
                false
            }
        }
    }

    /// Stop forwarding. The first reason given wins.
    pub(crate) fn close(&self, reason: DropReason) {
        let sender = self.sender.lock().take();
        if let Some(sender) = sender {
            if reason == DropReason::BufferOverflow {
                warn!("dropping {} stream: buffer overflow", S::KIND);
            }
            // Best effort: a full buffer cannot take the notice
            let _ = sender.try_send(StreamEvent::Dropped {
                reason: reason.clone(),
            });
            *self.reason.lock() = Some(reason);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub(crate) fn reason(&self) -> Option<DropReason> {
        self.reason.lock().clone()
    }
}

/// Type-erased view of a stream, so one manager serves every kind.
trait Emitter: Send + Sync {
    fn kind(&self) -> SubjectKind;

    /// Emit a live subject and watch it for deletion. Returns false if the
    /// stream is closed.
    fn emit(&self, cell: &Arc<SubjectCell>) -> bool;

    fn close(&self, reason: DropReason);

    fn is_closed(&self) -> bool;
}

impl<S: SubjectFields> Emitter for Arc<StreamSink<S>> {
    fn kind(&self) -> SubjectKind {
        S::KIND
    }

    fn emit(&self, cell: &Arc<SubjectCell>) -> bool {
        cell.attach(|| {
            if !self.send(StreamEvent::Added(Subject::from_cell(Arc::clone(cell)))) {
                return None;
            }
            let watcher: Box<dyn DeletionWatcher> = Box::new(Arc::downgrade(self));
            Some(watcher)
        });
        !self.is_closed()
    }

    fn close(&self, reason: DropReason) {
        StreamSink::<S>::close(self, reason)
    }

    fn is_closed(&self) -> bool {
        StreamSink::<S>::is_closed(self)
    }
}

/// Emitted subjects watch the sink weakly. A cancelled or dropped stream
/// stops counting as a watcher, so subjects prune it.
impl<S: SubjectFields> DeletionWatcher for Weak<StreamSink<S>> {
    fn is_live(&self) -> bool {
        self.upgrade().map_or(false, |sink| !sink.is_closed())
    }

    fn deleted(&self, id: &SubjectId) {
        if let Some(sink) = self.upgrade() {
            sink.send(StreamEvent::Deleted(id.clone()));
        }
    }
}

/// Internal subscription state.
struct Subscription {
    emitter: Box<dyn Emitter>,
}

/// Manages subject streams and publishes newly live subjects to them.
///
/// Callers must hold the registry lock across [`subscribe`] and [`publish`]
/// so that a stream neither misses nor duplicates a subject.
///
/// [`subscribe`]: SubscriptionManager::subscribe
/// [`publish`]: SubscriptionManager::publish
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a stream of kind `S`, first emitting `existing` in order.
    ///
    /// The existing subjects do not count against `buffer_size`: the channel
    /// is sized to hold all of them plus a full buffer of later events.
    pub(crate) fn subscribe<S, I>(
        self: &Arc<Self>,
        config: &SubscriptionConfig,
        existing: I,
    ) -> SubjectStream<S>
    where
        S: SubjectFields,
        I: IntoIterator<Item = Arc<SubjectCell>>,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let existing: Vec<Arc<SubjectCell>> = existing
            .into_iter()
            .filter(|cell| cell.kind() == S::KIND)
            .collect();
        let (sender, receiver) = bounded(config.buffer_size.max(1) + existing.len());
        let sink = Arc::new(StreamSink::new(sender));

        let mut emitted = 0usize;
        for cell in &existing {
            if !sink.emit(cell) {
                break;
            }
            emitted += 1;
        }

        if !sink.is_closed() {
            self.subscriptions.write().insert(
                id,
                Subscription {
                    emitter: Box::new(Arc::clone(&sink)),
                },
            );
        }
        let kind = S::KIND;
        debug!(subscription = id.0, %kind, emitted, "stream opened");

        SubjectStream::new(id, receiver, sink, Arc::downgrade(self))
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscriptions.write().remove(&id);
        if let Some(sub) = removed {
            sub.emitter.close(DropReason::Unsubscribed);
            debug!(subscription = id.0, "stream cancelled");
        }
    }

    /// Get the number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| !sub.emitter.is_closed())
            .count()
    }

    /// Publish a subject that just became live to every stream of its kind.
    /// Drops subscribers that fail to receive.
    pub(crate) fn publish(&self, cell: &Arc<SubjectCell>) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.emitter.kind() == cell.kind() && !sub.emitter.emit(cell) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                subs.remove(&id);
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for (_, sub) in self.subscriptions.get_mut().drain() {
            sub.emitter.close(DropReason::DomainClosed);
        }
    }
}
