//! Per-subscription dispatch worker.
//!
//! Each running feed gets one thread that owns its `Subscription` and drains
//! the notification queue in arrival order. Stopping goes through a control
//! channel and waits for the worker's acknowledgement, so the live query is
//! released before `FeedHandle::stop` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::document::PublicationId;
use crate::error::{FeedError, FeedResult};

use super::lifecycle::{FeedCounters, FeedStats, Subscription};

#[derive(Debug)]
enum ControlMsg {
    Stop { reply: Sender<()> },
}

#[derive(Debug)]
struct WorkerLink {
    control_tx: Sender<ControlMsg>,
    join: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<FeedCounters>,
}

/// Handle to a running feed.
///
/// Dropping the handle stops the feed.
#[derive(Debug)]
pub struct FeedHandle {
    publication: PublicationId,
    link: Option<WorkerLink>,
    stopped: AtomicBool,
}

impl FeedHandle {
    /// Move `subscription` onto its own worker thread.
    pub fn spawn(subscription: Subscription, control_queue_capacity: usize) -> FeedResult<Self> {
        let publication = subscription.publication().clone();
        let counters = subscription.counters();
        let (control_tx, control_rx) = bounded::<ControlMsg>(control_queue_capacity.max(1));

        let join = thread::Builder::new()
            .name(format!("livetable-feed-{publication}"))
            .spawn(move || worker_loop(subscription, control_rx))
            .map_err(|e| FeedError::internal(format!("failed to spawn feed worker: {e}")))?;

        Ok(Self {
            publication,
            link: Some(WorkerLink {
                control_tx,
                join: Mutex::new(Some(join)),
                counters,
            }),
            stopped: AtomicBool::new(false),
        })
    }

    /// A handle for a feed that never had a live query (empty feed).
    #[must_use]
    pub fn detached(publication: PublicationId) -> Self {
        Self {
            publication,
            link: None,
            stopped: AtomicBool::new(false),
        }
    }

    /// The publication this feed serves.
    #[must_use]
    pub const fn publication(&self) -> &PublicationId {
        &self.publication
    }

    /// True once `stop` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Current counters; zero for a detached handle.
    #[must_use]
    pub fn stats(&self) -> FeedStats {
        match &self.link {
            Some(link) => link.counters.snapshot(),
            None => FeedStats::default(),
        }
    }

    /// Stop the feed and release its live query.
    ///
    /// Blocks until the worker has released the query. Calling it again is a
    /// no-op. Must not be called from inside the feed's own sink.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(link) = &self.link else {
            return;
        };

        let (reply_tx, reply_rx) = bounded::<()>(1);
        let acked = link.control_tx.send(ControlMsg::Stop { reply: reply_tx }).is_ok()
            && reply_rx.recv().is_ok();
        if !acked {
            tracing::debug!(
                publication = %self.publication,
                "feed worker exited before acknowledging stop"
            );
        }

        if let Ok(mut guard) = link.join.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    tracing::warn!(publication = %self.publication, "feed worker panicked");
                }
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(mut sub: Subscription, control_rx: Receiver<ControlMsg>) {
    let notifications = sub.notifications();

    loop {
        select! {
            recv(notifications) -> msg => {
                match msg {
                    Ok(notification) => {
                        if let Err(e) = sub.handle(notification) {
                            tracing::warn!(
                                publication = %sub.publication(),
                                error = %e,
                                "failed to process change notification"
                            );
                        }
                    }
                    Err(_) => {
                        // Source released the queue; only a stop can follow.
                        let msg = control_rx.recv();
                        shutdown(&mut sub, msg.ok());
                        break;
                    }
                }
            }
            recv(control_rx) -> msg => {
                shutdown(&mut sub, msg.ok());
                break;
            }
        }
    }
}

fn shutdown(sub: &mut Subscription, msg: Option<ControlMsg>) {
    sub.stop();
    if let Some(ControlMsg::Stop { reply }) = msg {
        if reply.send(()).is_err() {
            tracing::trace!(publication = %sub.publication(), "stop requester went away");
        }
    }
}
