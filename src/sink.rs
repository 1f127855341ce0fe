//! Outbound event delivery.
//!
//! The engine hands every result to an `EventSink`. Transports implement the
//! trait to put events on the wire; `ChannelSink` is the in-process variant
//! and pairs with a `FeedStream` receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use uuid::Uuid;

use crate::document::{DocumentId, PublicationId};
use crate::error::{ExecutionError, FeedResult};
use crate::feed::VisibleRow;

/// Consumer of feed results. Calls for one publication arrive serially.
///
/// Calls are made from the feed's dispatch path and must not block: a sink
/// that waits on its consumer also delays `FeedHandle::stop`.
pub trait EventSink: Send + Sync {
    /// A row entered the feed.
    fn emit_added(&self, row_set: &PublicationId, id: &DocumentId, row: &VisibleRow);

    /// A published row changed (fields or rank).
    fn emit_changed(&self, row_set: &PublicationId, id: &DocumentId, row: &VisibleRow);

    /// A published row left the feed.
    fn emit_removed(&self, row_set: &PublicationId, id: &DocumentId);

    /// The live number of matching rows.
    fn emit_count(&self, row_set: &PublicationId, count: usize);

    /// Initial materialization is complete.
    fn signal_ready(&self, row_set: &PublicationId);
}

/// One outbound event, as a value.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Added {
        row_set: PublicationId,
        id: DocumentId,
        row: VisibleRow,
    },
    Changed {
        row_set: PublicationId,
        id: DocumentId,
        row: VisibleRow,
    },
    Removed {
        row_set: PublicationId,
        id: DocumentId,
    },
    Count {
        row_set: PublicationId,
        count: usize,
    },
    Ready {
        row_set: PublicationId,
    },
}

impl FeedEvent {
    /// The publication the event belongs to.
    #[must_use]
    pub const fn row_set(&self) -> &PublicationId {
        match self {
            Self::Added { row_set, .. }
            | Self::Changed { row_set, .. }
            | Self::Removed { row_set, .. }
            | Self::Count { row_set, .. }
            | Self::Ready { row_set } => row_set,
        }
    }
}

/// A `FeedEvent` stamped for delivery.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEnvelope {
    pub event_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub event: FeedEvent,
}

impl FeedEnvelope {
    /// Stamp `event` with a fresh id and the current time.
    #[must_use]
    pub fn new(event: FeedEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Sink that forwards events over a bounded channel.
///
/// Never blocks. When the stream is full the event is dropped and counted;
/// a stream that has dropped anything no longer mirrors the feed and its
/// consumer should resubscribe. Events sent after the stream is dropped are
/// discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<FeedEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink and its receiving stream.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, FeedStream) {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: Arc::clone(&dropped),
            },
            FeedStream { rx, dropped },
        )
    }

    fn send(&self, event: FeedEvent) {
        match self.tx.try_send(FeedEnvelope::new(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    tracing::warn!(
                        row_set = %envelope.event.row_set(),
                        "feed stream full; dropping events until the consumer resubscribes"
                    );
                } else {
                    tracing::trace!(row_set = %envelope.event.row_set(), dropped, "dropped feed event");
                }
            }
            Err(TrySendError::Disconnected(envelope)) => {
                tracing::trace!(
                    row_set = %envelope.event.row_set(),
                    "feed stream closed; discarding event"
                );
            }
        }
    }
}

impl EventSink for ChannelSink {
    fn emit_added(&self, row_set: &PublicationId, id: &DocumentId, row: &VisibleRow) {
        self.send(FeedEvent::Added {
            row_set: row_set.clone(),
            id: id.clone(),
            row: row.clone(),
        });
    }

    fn emit_changed(&self, row_set: &PublicationId, id: &DocumentId, row: &VisibleRow) {
        self.send(FeedEvent::Changed {
            row_set: row_set.clone(),
            id: id.clone(),
            row: row.clone(),
        });
    }

    fn emit_removed(&self, row_set: &PublicationId, id: &DocumentId) {
        self.send(FeedEvent::Removed {
            row_set: row_set.clone(),
            id: id.clone(),
        });
    }

    fn emit_count(&self, row_set: &PublicationId, count: usize) {
        self.send(FeedEvent::Count {
            row_set: row_set.clone(),
            count,
        });
    }

    fn signal_ready(&self, row_set: &PublicationId) {
        self.send(FeedEvent::Ready {
            row_set: row_set.clone(),
        });
    }
}

/// Receiving end of a `ChannelSink`.
#[derive(Debug)]
pub struct FeedStream {
    rx: Receiver<FeedEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl FeedStream {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> FeedResult<FeedEnvelope> {
        self.rx.recv().map_err(|_| {
            ExecutionError::Disconnected {
                path: "feed_stream".to_string(),
            }
            .into()
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> FeedResult<FeedEnvelope> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }
            .into(),
            RecvTimeoutError::Disconnected => ExecutionError::Disconnected {
                path: "feed_stream".to_string(),
            }
            .into(),
        })
    }

    /// Number of events the sink dropped because this stream was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True once any event was dropped; the stream no longer mirrors the feed.
    #[must_use]
    pub fn is_lagged(&self) -> bool {
        self.dropped() > 0
    }

    /// Take every event queued right now, without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<FeedEvent> {
        self.rx.try_iter().map(|env| env.event).collect()
    }
}
