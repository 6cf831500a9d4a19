//! Subject registry: the canonical instance for every id.

use crate::error::{DomainError, Result};
use crate::subjects::{Presence, SubjectCell};
use crate::types::{Applied, ChangeRecord, SubjectId, SubjectKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-domain map from id to its single canonical subject.
///
/// Entries are never removed. Registration order is kept for streams.
#[derive(Debug, Default)]
pub(crate) struct SubjectRegistry {
    /// Id to position in `cells`.
    by_id: HashMap<SubjectId, usize>,
    /// Cells in registration order.
    cells: Vec<Arc<SubjectCell>>,
}

/// Subject counts by presence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PresenceCounts {
    pub(crate) live: usize,
    pub(crate) deleted: usize,
    pub(crate) absent: usize,
}

impl SubjectRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    /// Existing cell for `id`, checked against `kind`.
    pub(crate) fn lookup(&self, id: &SubjectId, kind: SubjectKind) -> Result<Option<Arc<SubjectCell>>> {
        match self.by_id.get(id) {
            Some(&index) => {
                let cell = &self.cells[index];
                check_kind(cell, kind)?;
                Ok(Some(Arc::clone(cell)))
            }
            None => Ok(None),
        }
    }

    /// Existing cell for `id`, or a newly registered tombstone.
    pub(crate) fn get_or_mint(&mut self, id: &SubjectId, kind: SubjectKind) -> Result<Arc<SubjectCell>> {
        if let Some(cell) = self.lookup(id, kind)? {
            return Ok(cell);
        }
        let cell = Arc::new(SubjectCell::absent(id.clone(), kind));
        self.insert(Arc::clone(&cell));
        Ok(cell)
    }

    /// Apply a change record in place.
    ///
    /// On failure nothing is registered or modified: a fresh cell is only
    /// inserted after its first record applied cleanly.
    pub(crate) fn apply(&mut self, record: &ChangeRecord) -> Result<(Arc<SubjectCell>, Applied)> {
        if let Some(cell) = self.lookup(&record.id, record.kind)? {
            let applied = cell.apply(&record.body)?;
            return Ok((cell, applied));
        }

        let cell = Arc::new(SubjectCell::absent(record.id.clone(), record.kind));
        let applied = cell.apply(&record.body)?;
        self.insert(Arc::clone(&cell));
        Ok((cell, applied))
    }

    /// Live cells of `kind` in registration order.
    pub(crate) fn live_of_kind(&self, kind: SubjectKind) -> impl Iterator<Item = Arc<SubjectCell>> + '_ {
        self.cells
            .iter()
            .filter(move |cell| cell.kind() == kind && cell.presence() == Presence::Live)
            .cloned()
    }

    pub(crate) fn counts(&self) -> PresenceCounts {
        let mut counts = PresenceCounts::default();
        for cell in &self.cells {
            match cell.presence() {
                Presence::Live => counts.live += 1,
                Presence::Deleted => counts.deleted += 1,
                Presence::Absent => counts.absent += 1,
            }
        }
        counts
    }

    fn insert(&mut self, cell: Arc<SubjectCell>) {
        debug_assert!(!self.by_id.contains_key(cell.id()));
        self.by_id.insert(cell.id().clone(), self.cells.len());
        self.cells.push(cell);
    }
}

fn check_kind(cell: &SubjectCell, requested: SubjectKind) -> Result<()> {
    if cell.kind() == requested {
        Ok(())
    } else {
        Err(DomainError::TypeMismatch {
            id: cell.id().clone(),
            requested,
            registered: cell.kind(),
        })
    }
}
