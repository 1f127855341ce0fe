//! Subscription lifecycle: `Initializing -> Active -> Stopped`.
//!
//! A `Subscription` owns everything one feed needs: the live query handle,
//! the notification queue, the snapshot and the sink. Notification handlers
//! take `&mut self`, so processing for one subscription is serial by
//! construction. Subscriptions share nothing with each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};
use serde::Serialize;

use crate::config::FeedConfig;
use crate::document::PublicationId;
use crate::error::{ExecutionError, FeedResult, ValidationError};
use crate::query::QueryOptions;
use crate::selector::Selector;
use crate::sink::EventSink;
use crate::source::{notification_channel, ChangeNotification, ChangeSource, LiveQuery, NotificationQueue};

use super::diff::{DeltaEvent, DiffEngine};
use super::projector::{RowProjector, VisibleRow};
use super::snapshot::SnapshotStore;

/// Lifecycle state of a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Initializing,
    Active,
    Stopped,
}

/// Counters shared between a subscription and its handle.
#[derive(Debug)]
pub(crate) struct FeedCounters {
    processed: AtomicU64,
    discarded: AtomicU64,
    resyncs: AtomicU64,
    dropped: Arc<AtomicU64>,
}

/// Point-in-time view of a subscription's counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// Notifications handled while active.
    pub processed: u64,
    /// Notifications ignored while initializing or after stop.
    pub discarded: u64,
    /// Notifications the source could not enqueue.
    pub dropped: u64,
    /// Full resyncs performed after queue overflow.
    pub resyncs: u64,
}

impl FeedCounters {
    fn new(dropped: Arc<AtomicU64>) -> Self {
        Self {
            processed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            dropped,
        }
    }

    pub(crate) fn snapshot(&self) -> FeedStats {
        FeedStats {
            processed: self.processed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

/// One live feed over a change source.
pub struct Subscription {
    publication: PublicationId,
    state: LifecycleState,
    snapshot: SnapshotStore,
    projector: RowProjector,
    query: Option<Box<dyn LiveQuery>>,
    queue: NotificationQueue,
    sink: Arc<dyn EventSink>,
    counters: Arc<FeedCounters>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("publication", &self.publication)
            .field("state", &self.state)
            .field("rows", &self.snapshot.len())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Open a live query and materialize the initial feed.
    ///
    /// On success the sink has received one count event, an `Added` burst in
    /// rank order and the ready signal, and the subscription is `Active`.
    /// Notifications queued while opening are discarded: the initial fetch
    /// already reflects them.
    pub fn open(
        publication: PublicationId,
        source: &dyn ChangeSource,
        selector: &Selector,
        options: &QueryOptions,
        sink: Arc<dyn EventSink>,
        config: &FeedConfig,
    ) -> FeedResult<Self> {
        if publication.is_blank() {
            return Err(ValidationError::EmptyPublicationId.into());
        }
        config.validate()?;
        options.validate()?;

        let (tx, queue) = notification_channel(config.notification_queue_capacity);
        let counters = Arc::new(FeedCounters::new(queue.dropped_handle()));
        let query = source.open(selector, options, tx)?;

        let mut sub = Self {
            publication,
            state: LifecycleState::Initializing,
            snapshot: SnapshotStore::new(),
            projector: RowProjector::from_config(config),
            query: Some(query),
            queue,
            sink,
            counters,
        };

        sub.discard_queued();
        if let Err(e) = sub.seed() {
            sub.stop();
            return Err(e);
        }

        sub.state = LifecycleState::Active;
        sub.sink.signal_ready(&sub.publication);
        tracing::debug!(
            publication = %sub.publication,
            source = source.name(),
            rows = sub.snapshot.len(),
            "subscription ready"
        );
        Ok(sub)
    }

    /// The publication this subscription serves.
    #[must_use]
    pub const fn publication(&self) -> &PublicationId {
        &self.publication
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// The rows most recently published.
    #[must_use]
    pub const fn snapshot(&self) -> &SnapshotStore {
        &self.snapshot
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> FeedStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<FeedCounters> {
        Arc::clone(&self.counters)
    }

    pub(crate) fn notifications(&self) -> Receiver<ChangeNotification> {
        self.queue.receiver().clone()
    }

    fn live_query(&self) -> FeedResult<&dyn LiveQuery> {
        self.query.as_deref().ok_or_else(|| {
            ExecutionError::SubscriptionStopped {
                publication: self.publication.clone(),
            }
            .into()
        })
    }

    fn discard_queued(&mut self) {
        let discarded = self.queue.receiver().try_iter().count() as u64;
        self.queue.take_overflow();
        if discarded > 0 {
            self.counters.discarded.fetch_add(discarded, Ordering::Relaxed);
            tracing::trace!(
                publication = %self.publication,
                discarded,
                "discarded notifications queued during initialization"
            );
        }
    }

    /// Initial materialization, bypassing the diff: every row is added.
    fn seed(&mut self) -> FeedResult<()> {
        let query = self.live_query()?;
        let count = query.count()?;
        let docs = query.fetch_all()?;
        let rows = self.projector.project_all(&docs, &self.publication);

        self.sink.emit_count(&self.publication, count);
        for row in rows {
            self.sink.emit_added(&self.publication, row.id(), &row);
            self.snapshot.put(row.id().clone(), row);
        }
        Ok(())
    }

    fn recompute(&self) -> FeedResult<Vec<VisibleRow>> {
        let docs = self.live_query()?.fetch_all()?;
        Ok(self.projector.project_all(&docs, &self.publication))
    }

    fn emit_count(&self) -> FeedResult<()> {
        let count = self.live_query()?.count()?;
        self.sink.emit_count(&self.publication, count);
        Ok(())
    }

    fn forward(&self, events: Vec<DeltaEvent>) {
        for event in events {
            match event {
                DeltaEvent::Added(id, row) => self.sink.emit_added(&self.publication, &id, &row),
                DeltaEvent::Changed(id, row) => self.sink.emit_changed(&self.publication, &id, &row),
                DeltaEvent::Removed(id) => self.sink.emit_removed(&self.publication, &id),
            }
        }
    }

    fn reconcile(&mut self) -> FeedResult<()> {
        let rows = self.recompute()?;
        let events = DiffEngine::reconcile(rows, &mut self.snapshot);
        self.forward(events);
        Ok(())
    }

    /// React to one change notification.
    ///
    /// Outside `Active` the notification is discarded. Within one call the
    /// count event, when there is one, precedes the row deltas.
    pub fn handle(&mut self, notification: ChangeNotification) -> FeedResult<()> {
        if self.state != LifecycleState::Active {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                publication = %self.publication,
                state = ?self.state,
                ?notification,
                "discarding notification"
            );
            return Ok(());
        }

        if self.queue.take_overflow() {
            self.resync()?;
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        match notification {
            ChangeNotification::Added(_) => {
                self.emit_count()?;
                self.reconcile()
            }
            ChangeNotification::Removed(id) => {
                self.emit_count()?;
                if self.snapshot.remove(&id).is_some() {
                    self.sink.emit_removed(&self.publication, &id);
                }
                self.reconcile()
            }
            // Recomputes the whole window even for a single-document change;
            // rank shifts are only visible that way.
            ChangeNotification::Changed(_) => self.reconcile(),
        }
    }

    /// Handle every queued notification without blocking.
    ///
    /// Returns how many were taken off the queue. Stops at the first handler
    /// error, leaving the rest queued.
    pub fn process_pending(&mut self) -> FeedResult<usize> {
        let mut handled = 0;
        loop {
            if self.state == LifecycleState::Active && self.queue.take_overflow() {
                self.resync()?;
            }
            match self.queue.receiver().try_recv() {
                Ok(notification) => {
                    handled += 1;
                    self.handle(notification)?;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(handled),
            }
        }
    }

    /// Rebuild the feed after notifications were lost.
    fn resync(&mut self) -> FeedResult<()> {
        tracing::warn!(
            publication = %self.publication,
            dropped = self.queue.dropped(),
            "notification queue overflowed; resyncing feed"
        );
        self.counters.resyncs.fetch_add(1, Ordering::Relaxed);

        self.emit_count()?;
        let rows = self.recompute()?;
        let mut events = DiffEngine::evict_missing(&rows, &mut self.snapshot);
        events.extend(DiffEngine::reconcile(rows, &mut self.snapshot));
        self.forward(events);
        Ok(())
    }

    /// Release the live query. Idempotent; safe from any state.
    pub fn stop(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        self.state = LifecycleState::Stopped;
        if let Some(mut query) = self.query.take() {
            query.stop();
        }
        self.snapshot.clear();
        tracing::debug!(publication = %self.publication, "subscription stopped");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
