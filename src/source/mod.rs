//! Change sources: live queries that push membership notifications.
//!
//! A `ChangeSource` evaluates a selector with sort/skip/limit once and then
//! notifies the opener whenever a document enters, leaves or changes within
//! the result window. Notifications flow through a bounded per-subscription
//! queue; a source never blocks on a slow subscriber.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, RawDocument};
use crate::error::FeedResult;
use crate::query::QueryOptions;
use crate::selector::Selector;

/// In-process reference collection.
pub mod memory;

pub use memory::MemoryCollection;

/// A membership or field change inside a live query's result window.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChangeNotification {
    /// A document now belongs to the window.
    Added(DocumentId),
    /// A document left the window or was deleted.
    Removed(DocumentId),
    /// A window member's fields changed in place.
    Changed(DocumentId),
}

impl ChangeNotification {
    /// The document the notification is about.
    #[must_use]
    pub const fn id(&self) -> &DocumentId {
        match self {
            Self::Added(id) | Self::Removed(id) | Self::Changed(id) => id,
        }
    }
}

/// Producer half of a subscription's notification queue, handed to the source.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: Sender<ChangeNotification>,
    overflowed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl NotificationSender {
    /// Non-blocking enqueue.
    ///
    /// Returns false when the notification could not be queued. A full queue
    /// flags the subscription for a resync; a closed queue means the
    /// subscription is gone.
    pub fn notify(&self, notification: ChangeNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer half of a subscription's notification queue.
#[derive(Debug)]
pub(crate) struct NotificationQueue {
    rx: Receiver<ChangeNotification>,
    overflowed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl NotificationQueue {
    pub(crate) const fn receiver(&self) -> &Receiver<ChangeNotification> {
        &self.rx
    }

    /// Clear and return the overflow flag.
    pub(crate) fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

pub(crate) fn notification_channel(capacity: usize) -> (NotificationSender, NotificationQueue) {
    let (tx, rx) = bounded(capacity.max(1));
    let overflowed = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        NotificationSender {
            tx,
            overflowed: Arc::clone(&overflowed),
            dropped: Arc::clone(&dropped),
        },
        NotificationQueue {
            rx,
            overflowed,
            dropped,
        },
    )
}

/// Handle to one open live query.
pub trait LiveQuery: Send {
    /// Number of documents currently in the window.
    fn count(&self) -> FeedResult<usize>;

    /// The window's documents in sort order.
    fn fetch_all(&self) -> FeedResult<Vec<RawDocument>>;

    /// Release the query. Must be idempotent.
    fn stop(&mut self);
}

/// Something that can open live queries.
pub trait ChangeSource: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Open a live query.
    ///
    /// Implementations may deliver the initial window members as `Added`
    /// notifications before returning; subscribers treat everything queued
    /// during their initialization as already covered by the first fetch.
    fn open(
        &self,
        selector: &Selector,
        options: &QueryOptions,
        notifications: NotificationSender,
    ) -> FeedResult<Box<dyn LiveQuery>>;
}
