//! The domain: registry, leases and streams tied together.

use crate::error::{DomainError, RejectedChange, Result};
use crate::registry::SubjectRegistry;
use crate::state::{LeaseBook, ReleaseSummary, State};
use crate::subjects::{Presence, Subject, SubjectCell, SubjectFields};
use crate::subscriptions::{SubjectStream, SubscriptionConfig, SubscriptionManager};
use crate::types::{Applied, ChangeRecord, DomainStats, LeaseId, Receipt, SubjectId};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Domain configuration.
#[derive(Clone, Debug)]
pub struct DomainConfig {
    /// Buffer size of streams opened with [`State::all`].
    pub stream_buffer_size: usize,

    /// Max changes deferred while leases are held (None = unbounded).
    /// When full, [`Domain::receive`] fails and the change source retries.
    pub max_pending: Option<usize>,

    /// Name of the thread spawned by [`Domain::attach_feed`].
    pub feed_thread_name: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            stream_buffer_size: SubscriptionConfig::default().buffer_size,
            max_pending: None,
            feed_thread_name: "meld-feed".to_string(),
        }
    }
}

/// Counters for inbound change records.
#[derive(Debug, Default)]
struct ChangeCounters {
    applied: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
}

/// State shared by a domain handle, its snapshots and its feed thread.
pub(crate) struct DomainShared {
    config: DomainConfig,

    /// Serialization point for lease accounting and change application.
    leases: Mutex<LeaseBook>,

    /// Canonical subjects. Always locked after `leases` when both are held.
    registry: RwLock<SubjectRegistry>,

    /// Streams; they hold only a weak reference back.
    subscriptions: Arc<SubscriptionManager>,

    counters: ChangeCounters,
}

/// A shared collection of subjects with snapshot leases.
///
/// Changes from the change source are applied at once while no snapshot is
/// held, and deferred in receipt order while any is. Local writes through a
/// [`Subject`] handle are never deferred.
///
/// Cloning gives another handle onto the same domain.
#[derive(Clone)]
pub struct Domain {
    shared: Arc<DomainShared>,
}

impl Domain {
    /// Create an empty domain.
    pub fn new(config: DomainConfig) -> Self {
        Self {
            shared: Arc::new(DomainShared {
                config,
                leases: Mutex::new(LeaseBook::new()),
                registry: RwLock::new(SubjectRegistry::new()),
                subscriptions: Arc::new(SubscriptionManager::new()),
                counters: ChangeCounters::default(),
            }),
        }
    }

    /// Create a domain from a single finite batch of changes.
    ///
    /// Fails with the first record that cannot be applied.
    pub fn load<I>(config: DomainConfig, batch: I) -> Result<Self>
    where
        I: IntoIterator<Item = ChangeRecord>,
    {
        let domain = Self::new(config);
        domain.receive_all(batch)?;
        debug!(subjects = domain.shared.registry.read().len(), "domain loaded");
        Ok(domain)
    }

    pub fn config(&self) -> &DomainConfig {
        &self.shared.config
    }

    /// Acquire a snapshot lease.
    ///
    /// Blocks only while another caller holds the serialization point.
    pub fn state(&self) -> State {
        let lease = self.shared.leases.lock().acquire();
        debug!(lease = lease.0, "lease acquired");
        State::new(Arc::clone(&self.shared), lease)
    }

    /// Accept one change record from the change source.
    pub fn receive(&self, record: ChangeRecord) -> Result<Receipt> {
        self.shared.receive(record)
    }

    /// Accept records in order, stopping at the first failure.
    pub fn receive_all<I>(&self, records: I) -> Result<Vec<Receipt>>
    where
        I: IntoIterator<Item = ChangeRecord>,
    {
        records
            .into_iter()
            .map(|record| self.shared.receive(record))
            .collect()
    }

    /// Pump a live feed of change records on a dedicated thread.
    ///
    /// Rejected records are logged and skipped. The thread exits when every
    /// sender of `feed` is dropped.
    pub fn attach_feed(&self, feed: Receiver<ChangeRecord>) -> Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.shared.config.feed_thread_name.clone())
            .spawn(move || {
                for record in feed.iter() {
                    let id = record.id.clone();
                    if let Err(e) = shared.receive(record) {
                        error!(%id, error = %e, "change from feed rejected");
                    }
                }
                debug!("change feed disconnected");
            })?;
        Ok(handle)
    }

    /// Number of outstanding leases.
    pub fn lease_count(&self) -> usize {
        self.shared.leases.lock().active()
    }

    /// Number of changes waiting for the last lease to be released.
    pub fn pending_len(&self) -> usize {
        self.shared.leases.lock().pending_len()
    }

    pub fn stats(&self) -> DomainStats {
        let (lease_count, pending_changes) = {
            let leases = self.shared.leases.lock();
            (leases.active(), leases.pending_len())
        };
        let counts = self.shared.registry.read().counts();
        let counters = &self.shared.counters;

        DomainStats {
            live_subjects: counts.live,
            deleted_subjects: counts.deleted,
            absent_subjects: counts.absent,
            lease_count,
            pending_changes,
            subscriptions: self.shared.subscriptions.subscription_count(),
            changes_applied: counters.applied.load(Ordering::Relaxed),
            changes_ignored: counters.ignored.load(Ordering::Relaxed),
            changes_rejected: counters.rejected.load(Ordering::Relaxed),
        }
    }
}

impl DomainShared {
    fn receive(&self, record: ChangeRecord) -> Result<Receipt> {
        let mut leases = self.leases.lock();

        if leases.active() > 0 {
            let id = record.id.clone();
            let position = leases.defer(record, self.config.max_pending)?;
            debug!(%id, position, "change deferred");
            return Ok(Receipt::Buffered { position });
        }

        let applied = self.apply_external(&record)?;
        Ok(Receipt::Applied(applied))
    }

    /// Apply one change record. Callers hold the `leases` lock.
    fn apply_external(&self, record: &ChangeRecord) -> Result<Applied> {
        let mut registry = self.registry.write();

        let (cell, applied) = match registry.apply(record) {
            Ok(result) => result,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        match applied {
            Applied::Ignored => {
                warn!(id = %record.id, kind = %record.kind, "change for deleted subject ignored");
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            }
            Applied::Created => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                self.subscriptions.publish(&cell);
            }
            Applied::Updated | Applied::Deleted | Applied::Tombstoned => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(applied)
    }

    /// Give back a lease, replaying deferred changes if it was the last.
    ///
    /// The serialization point is held for the whole replay, so no new lease
    /// can observe a partly replayed queue.
    pub(crate) fn release(&self, lease: LeaseId) -> Result<ReleaseSummary> {
        let mut leases = self.leases.lock();
        let drained = leases.release();
        let remaining_leases = leases.active();
        debug!(lease = lease.0, remaining = remaining_leases, "lease released");

        let Some(pending) = drained else {
            return Ok(ReleaseSummary {
                remaining_leases,
                replayed: 0,
                ignored: 0,
            });
        };

        let mut replayed = 0;
        let mut ignored = 0;
        let mut failures = Vec::new();

        for (index, record) in pending.into_iter().enumerate() {
            match self.apply_external(&record) {
                Ok(Applied::Ignored) => ignored += 1,
                Ok(_) => replayed += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "deferred change rejected");
                    failures.push(RejectedChange {
                        position: index + 1,
                        id: record.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if replayed + ignored + failures.len() > 0 {
            debug!(replayed, ignored, rejected = failures.len(), "deferred changes replayed");
        }

        if failures.is_empty() {
            Ok(ReleaseSummary {
                remaining_leases,
                replayed,
                ignored,
            })
        } else {
            Err(DomainError::ReplayRejected {
                applied: replayed + ignored,
                failures,
            })
        }
    }

    /// Canonical subject for `id`, minting a tombstone if unseen.
    pub(crate) fn get<S: SubjectFields>(&self, id: &SubjectId) -> Result<Subject<S>> {
        if let Some(cell) = self.registry.read().lookup(id, S::KIND)? {
            return Ok(Subject::from_cell(cell));
        }
        let cell = self.registry.write().get_or_mint(id, S::KIND)?;
        Ok(Subject::from_cell(cell))
    }

    /// Local creation. Applied immediately, never deferred.
    pub(crate) fn insert<S: SubjectFields>(&self, id: &SubjectId, fields: S) -> Result<Subject<S>> {
        let mut registry = self.registry.write();
        let cell: Arc<SubjectCell> = registry.get_or_mint(id, S::KIND)?;

        match cell.presence() {
            Presence::Live => return Err(DomainError::AlreadyExists(id.clone())),
            Presence::Deleted => return Err(DomainError::SubjectDeleted(id.clone())),
            Presence::Absent => {}
        }

        if cell.store(fields.into_fields()) == Applied::Created {
            self.subscriptions.publish(&cell);
        }
        let kind = S::KIND;
        debug!(%id, %kind, "subject created locally");
        Ok(Subject::from_cell(cell))
    }

    /// Open a stream over the registry as it is now.
    pub(crate) fn subscribe<S: SubjectFields>(&self, config: &SubscriptionConfig) -> SubjectStream<S> {
        let registry = self.registry.read();
        self.subscriptions
            .subscribe::<S, _>(config, registry.live_of_kind(S::KIND))
    }

    pub(crate) fn stream_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            buffer_size: self.config.stream_buffer_size,
        }
    }
}
