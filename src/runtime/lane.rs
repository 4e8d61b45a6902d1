//! Serial execution lane.
//!
//! A [`Lane`] is a tokio task draining an unbounded queue of jobs. Jobs
//! posted to the same lane run one at a time, in the order they were
//! posted, and never concurrently with each other.
//!
//! # Drain Marker
//!
//! [`Lane::drain`] enqueues a marker and resolves once every job posted
//! before it has run. Teardown uses it as a join point: after the drain
//! resolves nothing queued earlier can still be executing.
//!
//! # Panics in Jobs
//!
//! A panicking job is caught and logged; the lane keeps running.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// A unit of work run on a lane.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue entry.
enum LaneMessage {
    /// Run a job.
    Run(Job),
    /// Signal once everything before this marker has run.
    Drain(oneshot::Sender<()>),
}

// ============================================================================
// Lane
// ============================================================================

/// Handle to a serial execution lane.
///
/// Cloning shares the queue. The lane task exits once every handle is
/// dropped and the queue is empty.
#[derive(Clone)]
pub struct Lane {
    /// Label for logs.
    label: &'static str,
    /// Queue into the lane task.
    tx: mpsc::UnboundedSender<LaneMessage>,
}

impl Lane {
    /// Spawns a lane task on `handle`.
    #[must_use]
    pub fn spawn(handle: &Handle, label: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(Self::run(label, rx));
        trace!(label, "Lane spawned");
        Self { label, tx }
    }

    /// Enqueues a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if the lane task has exited.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(LaneMessage::Run(Box::new(job)))
            .map_err(|_| Error::NotRunning)
    }

    /// Waits until every job posted before this call has run.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the lane task has exited
    /// - [`Error::ChannelClosed`] if the lane stopped before reaching the marker
    pub async fn drain(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LaneMessage::Drain(done_tx))
            .map_err(|_| Error::NotRunning)?;
        done_rx.await?;
        Ok(())
    }

    /// Returns `true` if the lane task has exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Lane task body.
    async fn run(label: &'static str, mut rx: mpsc::UnboundedReceiver<LaneMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                LaneMessage::Run(job) => {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(label, "Job panicked on lane");
                    }
                }
                LaneMessage::Drain(done) => {
                    let _ = done.send(());
                }
            }
        }

        debug!(label, "Lane terminated");
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_jobs_run_in_post_order() {
        let lane = Lane::spawn(&Handle::current(), "test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            lane.post(move || seen.lock().push(i)).expect("post");
        }

        lane.drain().await.expect("drain");
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jobs_never_overlap() {
        let lane = Lane::spawn(&Handle::current(), "test");
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let posters: Vec<_> = (0..4)
            .map(|_| {
                let lane = lane.clone();
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let active = Arc::clone(&active);
                        let overlaps = Arc::clone(&overlaps);
                        lane.post(move || {
                            if active.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            std::thread::yield_now();
                            active.fetch_sub(1, Ordering::SeqCst);
                        })
                        .expect("post");
                    }
                })
            })
            .collect();

        for poster in posters {
            poster.await.expect("poster");
        }
        lane.drain().await.expect("drain");

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_lane() {
        let lane = Lane::spawn(&Handle::current(), "test");
        let ran = Arc::new(AtomicUsize::new(0));

        lane.post(|| panic!("handler failure")).expect("post");
        let counter = Arc::clone(&ran);
        lane.post(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("post");

        lane.drain().await.expect("drain");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!lane.is_closed());
    }

    #[tokio::test]
    async fn test_drain_on_empty_lane() {
        let lane = Lane::spawn(&Handle::current(), "test");
        lane.drain().await.expect("drain");
    }
}
