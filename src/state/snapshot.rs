//! Snapshot leases.

use crate::domain::DomainShared;
use crate::error::Result;
use crate::subjects::{Subject, SubjectFields};
use crate::subscriptions::{SubjectStream, SubscriptionConfig};
use crate::types::{LeaseId, SubjectId};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Outcome of releasing a lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Leases still outstanding after this release.
    pub remaining_leases: usize,
    /// Deferred changes applied (zero unless this was the last lease).
    pub replayed: usize,
    /// Deferred changes that had no effect.
    pub ignored: usize,
}

/// A snapshot of the domain, held as a lease.
///
/// While any snapshot is held, changes from the change source are deferred,
/// so every subject keeps the fields it had when the first lease was taken
/// (local writes excepted). The lease is given back by [`State::release`]
/// or, failing that, when the snapshot is dropped, including on early
/// return and unwinding.
pub struct State {
    domain: Arc<DomainShared>,
    lease: LeaseId,
    released: bool,
}

impl State {
    pub(crate) fn new(domain: Arc<DomainShared>, lease: LeaseId) -> Self {
        Self {
            domain,
            lease,
            released: false,
        }
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease
    }

    /// Retrieve the canonical subject for `id`.
    ///
    /// An unseen id is not an error: a tombstone reporting `deleted()` is
    /// minted and registered. Fails with `TypeMismatch` if `id` is
    /// registered under another kind.
    pub fn get<S: SubjectFields>(&self, id: impl Into<SubjectId>) -> Result<Subject<S>> {
        self.domain.get(&id.into())
    }

    /// Stream every live subject of kind `S`, then every one that becomes
    /// live later. The stream outlives this snapshot.
    pub fn all<S: SubjectFields>(&self) -> SubjectStream<S> {
        self.domain.subscribe(&self.domain.stream_config())
    }

    /// [`State::all`] with an explicit subscription config.
    pub fn all_with<S: SubjectFields>(&self, config: &SubscriptionConfig) -> SubjectStream<S> {
        self.domain.subscribe(config)
    }

    /// Create a subject locally. Streams of its kind see it at once.
    pub fn insert<S: SubjectFields>(&self, id: impl Into<SubjectId>, fields: S) -> Result<Subject<S>> {
        self.domain.insert(&id.into(), fields)
    }

    /// Flush point for grouped local writes.
    ///
    /// Local writes already apply immediately, so there is nothing to flush
    /// yet; the hook exists so that transactional grouping can be added
    /// without changing callers.
    pub fn commit(&self) -> Result<()> {
        debug!(lease = self.lease.0, "commit");
        Ok(())
    }

    /// Release the lease, reporting the outcome of any deferred replay.
    pub fn release(mut self) -> Result<ReleaseSummary> {
        self.released = true;
        self.domain.release(self.lease)
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.domain.release(self.lease) {
            error!(lease = self.lease.0, error = %e, "replay after dropped snapshot failed");
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("lease", &self.lease)
            .field("released", &self.released)
            .finish()
    }
}
