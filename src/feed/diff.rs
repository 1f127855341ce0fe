//! Full-rescan diff between a recomputed window and the snapshot.

use std::collections::HashSet;

use crate::document::DocumentId;

use super::projector::VisibleRow;
use super::snapshot::SnapshotStore;

/// The minimal unit of synchronization sent to a subscriber.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    Added(DocumentId, VisibleRow),
    Changed(DocumentId, VisibleRow),
    Removed(DocumentId),
}

impl DeltaEvent {
    /// The document the event is about.
    #[must_use]
    pub const fn id(&self) -> &DocumentId {
        match self {
            Self::Added(id, _) | Self::Changed(id, _) | Self::Removed(id) => id,
        }
    }
}

/// Equality-based reconciliation of ordered rows against a snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

impl DiffEngine {
    /// Bring `snapshot` up to date with `new_rows` and return what changed.
    ///
    /// Walks `new_rows` in order: unknown ids become `Added`, rows that are not
    /// structurally equal to their snapshot entry become `Changed` (a rank
    /// shift alone counts), equal rows emit nothing. Rows absent from
    /// `new_rows` are left alone; removals arrive as explicit notifications.
    pub fn reconcile(new_rows: Vec<VisibleRow>, snapshot: &mut SnapshotStore) -> Vec<DeltaEvent> {
        let mut events = Vec::new();
        for row in new_rows {
            let event = match snapshot.get(row.id()) {
                None => DeltaEvent::Added(row.id().clone(), row.clone()),
                Some(existing) if *existing != row => {
                    DeltaEvent::Changed(row.id().clone(), row.clone())
                }
                Some(_) => continue,
            };
            snapshot.put(row.id().clone(), row);
            events.push(event);
        }
        events
    }

    /// Drop snapshot rows whose ids are missing from `new_rows`.
    ///
    /// Only used when notifications were lost and explicit removals can no
    /// longer be trusted to arrive.
    pub fn evict_missing(new_rows: &[VisibleRow], snapshot: &mut SnapshotStore) -> Vec<DeltaEvent> {
        let keep: HashSet<&DocumentId> = new_rows.iter().map(VisibleRow::id).collect();
        let mut stale: Vec<(usize, DocumentId)> = snapshot
            .all()
            .filter(|row| !keep.contains(row.id()))
            .map(|row| (row.rank(), row.id().clone()))
            .collect();
        stale.sort();

        stale
            .into_iter()
            .map(|(_, id)| {
                snapshot.remove(&id);
                DeltaEvent::Removed(id)
            })
            .collect()
    }
}
