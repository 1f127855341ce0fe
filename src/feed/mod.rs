//! The incremental diff-and-publish engine.
//!
//! A feed keeps a snapshot of the rows it has published, recomputes the
//! visible window whenever its change source reports a change, and emits
//! only the difference. Components, leaf first:
//!
//! - `projector`: raw document + rank to `VisibleRow`
//! - `snapshot`: last-published rows of one subscription
//! - `diff`: recomputed window vs snapshot to `DeltaEvent`s
//! - `lifecycle`: the `Initializing -> Active -> Stopped` state machine
//! - `worker`: one dispatch thread per running feed

/// Full-rescan reconciliation.
pub mod diff;
/// Subscription state machine.
pub mod lifecycle;
/// Row projection.
pub mod projector;
/// Published-row snapshot.
pub mod snapshot;
/// Serial dispatch worker and feed handle.
pub mod worker;

pub use diff::{DeltaEvent, DiffEngine};
pub use lifecycle::{FeedStats, LifecycleState, Subscription};
pub use projector::{RowProjector, VisibleRow};
pub use snapshot::SnapshotStore;
pub use worker::FeedHandle;
