//! Per-subscription snapshot of last-published rows.

use std::collections::HashMap;

use crate::document::DocumentId;

use super::projector::VisibleRow;

/// The rows most recently emitted to one subscriber, keyed by document id.
///
/// Owned by exactly one subscription and driven serially, so there is no
/// internal locking.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    rows: HashMap<DocumentId, VisibleRow>,
}

impl SnapshotStore {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The published row for `id`.
    #[must_use]
    pub fn get(&self, id: &DocumentId) -> Option<&VisibleRow> {
        self.rows.get(id)
    }

    /// Unconditional upsert.
    pub fn put(&mut self, id: DocumentId, row: VisibleRow) {
        self.rows.insert(id, row);
    }

    /// Forget `id`, returning its row if it was published.
    pub fn remove(&mut self, id: &DocumentId) -> Option<VisibleRow> {
        self.rows.remove(id)
    }

    /// True if `id` is currently published.
    #[must_use]
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.rows.contains_key(id)
    }

    /// All rows, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &VisibleRow> {
        self.rows.values()
    }

    /// All rows sorted by rank.
    #[must_use]
    pub fn rows_by_rank(&self) -> Vec<&VisibleRow> {
        let mut rows: Vec<&VisibleRow> = self.rows.values().collect();
        rows.sort_by_key(|r| r.rank());
        rows
    }

    /// True when ranks are exactly `0..len` with no gaps or duplicates.
    #[must_use]
    pub fn ranks_contiguous(&self) -> bool {
        self.rows_by_rank()
            .iter()
            .enumerate()
            .all(|(expected, row)| row.rank() == expected)
    }

    /// Number of published rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop every row.
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
