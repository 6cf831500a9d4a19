//! Canonical subject instances and typed handles onto them.

use super::kinds::{Fields, SubjectFields};
use crate::error::{DomainError, Result};
use crate::types::{Applied, ChangeBody, SubjectId, SubjectKind, DELETED_KEY, ID_KEY, TYPE_KEY};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Observer of one subject's deletion.
pub(crate) trait DeletionWatcher: Send + Sync {
    /// False once nobody can receive the notification. Dead watchers are
    /// pruned whenever another one is registered on the same subject.
    fn is_live(&self) -> bool;

    /// Called at most once, with the cell lock held.
    fn deleted(&self, id: &SubjectId);
}

/// Whether a subject exists in the domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// Minted by a lookup; never populated.
    Absent,
    /// Populated and not deleted.
    Live,
    /// Deleted. Terminal.
    Deleted,
}

struct CellState {
    presence: Presence,
    /// Last-known fields. Kept after deletion.
    fields: Option<Fields>,
    /// Bumped on every mutation.
    version: u64,
    watchers: Vec<Box<dyn DeletionWatcher>>,
}

/// The single canonical instance for one id.
pub(crate) struct SubjectCell {
    id: SubjectId,
    kind: SubjectKind,
    state: RwLock<CellState>,
}

impl SubjectCell {
    /// A tombstone for an id nobody has populated yet.
    pub(crate) fn absent(id: SubjectId, kind: SubjectKind) -> Self {
        Self {
            id,
            kind,
            state: RwLock::new(CellState {
                presence: Presence::Absent,
                fields: None,
                version: 0,
                watchers: Vec::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> &SubjectId {
        &self.id
    }

    pub(crate) fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub(crate) fn presence(&self) -> Presence {
        self.state.read().presence
    }

    /// Apply a change record body in place.
    ///
    /// A payload is fully decoded before the cell is touched, so a decode
    /// failure leaves fields and version unchanged.
    pub(crate) fn apply(&self, body: &ChangeBody) -> Result<Applied> {
        match body {
            ChangeBody::Deleted => Ok(self.mark_deleted()),
            ChangeBody::Payload(payload) => {
                let decoded = Fields::decode(&self.id, self.kind, payload)?;
                Ok(self.store(decoded))
            }
        }
    }

    /// Replace the fields of an absent or live subject.
    pub(crate) fn store(&self, fields: Fields) -> Applied {
        let mut state = self.state.write();
        match state.presence {
            Presence::Deleted => Applied::Ignored,
            Presence::Absent => {
                state.fields = Some(fields);
                state.presence = Presence::Live;
                state.version += 1;
                Applied::Created
            }
            Presence::Live => {
                state.fields = Some(fields);
                state.version += 1;
                Applied::Updated
            }
        }
    }

    /// Mark deleted, keeping the last-known fields, and fire watchers.
    pub(crate) fn mark_deleted(&self) -> Applied {
        let mut state = self.state.write();
        let applied = match state.presence {
            Presence::Deleted => return Applied::Ignored,
            Presence::Absent => Applied::Tombstoned,
            Presence::Live => Applied::Deleted,
        };
        state.presence = Presence::Deleted;
        state.version += 1;
        for watcher in state.watchers.drain(..) {
            watcher.deleted(&self.id);
        }
        applied
    }

    /// Run `emit` while the subject is known to be live, registering the
    /// deletion watcher it returns. Returns false without calling `emit` when
    /// the subject is not live.
    ///
    /// Holding the cell lock across `emit` means a deletion cannot be
    /// observed before the emission it follows.
    pub(crate) fn attach<F>(&self, emit: F) -> bool
    where
        F: FnOnce() -> Option<Box<dyn DeletionWatcher>>,
    {
        let mut state = self.state.write();
        if state.presence != Presence::Live {
            return false;
        }
        if let Some(watcher) = emit() {
            state.watchers.retain(|w| w.is_live());
            state.watchers.push(watcher);
        }
        true
    }

    /// Register a watcher, firing it at once if the subject is already deleted.
    pub(crate) fn watch(&self, watcher: Box<dyn DeletionWatcher>) {
        let mut state = self.state.write();
        if state.presence == Presence::Deleted {
            drop(state);
            watcher.deleted(&self.id);
        } else {
            state.watchers.retain(|w| w.is_live());
            state.watchers.push(watcher);
        }
    }

    /// Copy of the fields, taken under the read lock. No caller code runs
    /// while a cell lock is held.
    fn cloned_fields(&self) -> Option<Fields> {
        self.state.read().fields.clone()
    }

    /// Fields of a live subject for a local write, with the version they
    /// were taken at.
    fn check_out(&self) -> Result<(Fields, u64)> {
        let state = self.state.read();
        match state.presence {
            Presence::Absent => Err(DomainError::NotPopulated(self.id.clone())),
            Presence::Deleted => Err(DomainError::SubjectDeleted(self.id.clone())),
            Presence::Live => {
                let fields = state
                    .fields
                    .clone()
                    .ok_or_else(|| DomainError::NotPopulated(self.id.clone()))?;
                Ok((fields, state.version))
            }
        }
    }

    /// Write back fields checked out at `version`. Fails if the subject was
    /// deleted or changed in between.
    fn check_in(&self, fields: Fields, version: u64) -> Result<()> {
        let mut state = self.state.write();
        match state.presence {
            Presence::Absent => return Err(DomainError::NotPopulated(self.id.clone())),
            Presence::Deleted => return Err(DomainError::SubjectDeleted(self.id.clone())),
            Presence::Live => {}
        }
        if state.version != version {
            return Err(DomainError::UpdateConflict(self.id.clone()));
        }
        state.fields = Some(fields);
        state.version += 1;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.state.read().watchers.len()
    }

    fn version(&self) -> u64 {
        self.state.read().version
    }
}

impl fmt::Debug for SubjectCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("SubjectCell")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("presence", &state.presence)
            .field("version", &state.version)
            .finish()
    }
}

/// Typed handle onto a canonical subject.
///
/// Clones share the same instance: a mutation through any handle, local or
/// from the change source, is visible through all of them. Equality is by id.
pub struct Subject<S> {
    cell: Arc<SubjectCell>,
    _fields: PhantomData<fn() -> S>,
}

impl<S: SubjectFields> Subject<S> {
    /// Wrap a cell already checked to be of kind `S::KIND`.
    pub(crate) fn from_cell(cell: Arc<SubjectCell>) -> Self {
        debug_assert_eq!(cell.kind(), S::KIND);
        Self {
            cell,
            _fields: PhantomData,
        }
    }

    pub fn id(&self) -> &SubjectId {
        self.cell.id()
    }

    pub fn kind(&self) -> SubjectKind {
        S::KIND
    }

    /// True when the subject is deleted or was never populated.
    pub fn deleted(&self) -> bool {
        self.cell.presence() != Presence::Live
    }

    pub fn presence(&self) -> Presence {
        self.cell.presence()
    }

    /// Mutation counter, bumped by every applied change and local write.
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    /// Last-known fields. Still available after deletion.
    pub fn fields(&self) -> Option<S> {
        self.cell
            .cloned_fields()
            .as_ref()
            .and_then(S::from_fields)
            .cloned()
    }

    /// Read a value out of a copy of the fields.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.fields().as_ref().map(f)
    }

    /// Local write. Applies immediately, whether or not leases are held.
    ///
    /// `f` edits a copy of the fields and runs without any lock held, so it
    /// may read this subject or open a snapshot. The copy is written back
    /// only if the subject did not change meanwhile; otherwise the write is
    /// discarded with `UpdateConflict` and may be retried.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        let (mut fields, version) = self.cell.check_out()?;
        let registered = fields.kind();
        let typed = S::from_fields_mut(&mut fields).ok_or_else(|| DomainError::TypeMismatch {
            id: self.id().clone(),
            requested: S::KIND,
            registered,
        })?;
        let result = f(typed);
        self.cell.check_in(fields, version)?;
        Ok(result)
    }

    /// Local deletion. Returns true if this call deleted the subject.
    pub fn delete(&self) -> bool {
        matches!(
            self.cell.mark_deleted(),
            Applied::Deleted | Applied::Tombstoned
        )
    }

    /// Notification of this subject's deletion.
    pub fn deletion(&self) -> DeletionWatch {
        let (sender, receiver) = bounded(1);
        let fired = Arc::new(AtomicBool::new(false));
        self.cell.watch(Box::new(WatchSignal {
            fired: Arc::downgrade(&fired),
            sender,
        }));
        DeletionWatch { fired, receiver }
    }

    /// Encode to the wire form of a change record.
    pub fn encode(&self) -> Result<Value> {
        let mut obj = if self.cell.presence() == Presence::Deleted {
            let mut obj = serde_json::Map::new();
            obj.insert(DELETED_KEY.to_string(), Value::Bool(true));
            obj
        } else {
            match self.cell.cloned_fields() {
                Some(fields) => fields.encode()?,
                None => return Err(DomainError::NotPopulated(self.id().clone())),
            }
        };
        obj.insert(ID_KEY.to_string(), Value::String(self.id().to_string()));
        obj.insert(TYPE_KEY.to_string(), Value::String(S::KIND.tag().to_string()));
        Ok(Value::Object(obj))
    }

    /// True if both handles point at the same canonical instance.
    pub fn same_instance(&self, other: &Subject<S>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<S> Clone for Subject<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _fields: PhantomData,
        }
    }
}

impl<S> PartialEq for Subject<S> {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id() == other.cell.id()
    }
}

impl<S> Eq for Subject<S> {}

impl<S> Hash for Subject<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cell.id().hash(state);
    }
}

impl<S> fmt::Debug for Subject<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subject").field(&self.cell).finish()
    }
}

/// Cell-side half of a [`DeletionWatch`].
struct WatchSignal {
    fired: Weak<AtomicBool>,
    sender: Sender<()>,
}

impl DeletionWatcher for WatchSignal {
    fn is_live(&self) -> bool {
        self.fired.strong_count() > 0
    }

    fn deleted(&self, _id: &SubjectId) {
        if let Some(fired) = self.fired.upgrade() {
            fired.store(true, Ordering::SeqCst);
        }
        let _ = self.sender.try_send(());
    }
}

/// Fires once when the watched subject is deleted.
///
/// A dropped watch is pruned from the subject when the next watcher is
/// registered there.
pub struct DeletionWatch {
    fired: Arc<AtomicBool>,
    receiver: Receiver<()>,
}

impl DeletionWatch {
    /// Non-blocking check. Stays true once the deletion was seen.
    pub fn is_deleted(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Block until deleted. Returns false if the subject was dropped without
    /// ever being deleted.
    pub fn wait(&self) -> bool {
        self.is_deleted() || self.receiver.recv().is_ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.is_deleted() || self.receiver.recv_timeout(timeout).is_ok()
    }
}
