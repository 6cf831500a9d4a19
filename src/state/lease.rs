//! Lease accounting and the pending change queue.

use crate::error::{DomainError, Result};
use crate::types::{ChangeRecord, LeaseId};
use std::collections::VecDeque;

/// Outstanding leases and the changes deferred while any is held.
///
/// Invariant: `pending` is empty whenever `active` is zero.
#[derive(Debug, Default)]
pub(crate) struct LeaseBook {
    active: usize,
    next_id: u64,
    pending: VecDeque<ChangeRecord>,
}

impl LeaseBook {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn acquire(&mut self) -> LeaseId {
        self.active += 1;
        self.next_id += 1;
        LeaseId(self.next_id)
    }

    /// Give back one lease. When it was the last, returns the deferred
    /// changes in receipt order, leaving the queue empty.
    pub(crate) fn release(&mut self) -> Option<VecDeque<ChangeRecord>> {
        debug_assert!(self.active > 0, "lease released more often than acquired");
        self.active = self.active.saturating_sub(1);
        if self.active == 0 {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Defer a change until the last lease is released. Returns its 1-based
    /// queue position.
    pub(crate) fn defer(&mut self, record: ChangeRecord, limit: Option<usize>) -> Result<usize> {
        debug_assert!(self.active > 0, "changes are only deferred under a lease");
        if let Some(limit) = limit {
            if self.pending.len() >= limit {
                return Err(DomainError::PendingQueueFull { limit });
            }
        }
        self.pending.push_back(record);
        Ok(self.pending.len())
    }
}
