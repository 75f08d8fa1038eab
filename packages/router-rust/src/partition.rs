//! Sequential execution lane for one partition.
//!
//! Each `Partition` owns a tokio task that pulls jobs from an unbounded mpsc
//! channel and runs them one at a time:
//!
//! 1. `submit()` enqueues a job without blocking and hands back a [`Completion`]
//! 2. The worker awaits each job to completion before receiving the next
//! 3. `shutdown()` closes the channel (moving to `Draining`), and the worker
//!    exits once the queue is empty (moving to `Stopped`)
//!
//! Lifecycle state is published through a `watch` channel so that shutdown
//! can await `Stopped` and probes can read it without blocking.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use keyroute_core::{PartitionProbe, PartitionState};
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::error::{PartitionError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    faulted: AtomicU64,
}

impl Counters {
    fn started(&self) {
        // Raise in_flight before lowering queued: `is_idle` loads queued
        // first, so a job moving between the two is always seen by one load.
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    fn finished(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::AcqRel);
        } else {
            self.faulted.fetch_add(1, Ordering::AcqRel);
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_idle(&self) -> bool {
        // Order matters; see `started`.
        self.queued.load(Ordering::Acquire) == 0 && self.in_flight.load(Ordering::Acquire) == 0
    }
}

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// An independently serialized execution lane.
///
/// Guarantees, for items submitted to the same partition:
/// - a continuation does not start until every earlier one has finished
/// - the returned [`Completion`] resolves only after that item's continuation
///   has finished, successfully or not
///
/// Partitions share no mutable state with each other.
pub struct Partition {
    index: u32,
    tx: RwLock<Option<mpsc::UnboundedSender<Job>>>,
    state: Arc<watch::Sender<PartitionState>>,
    counters: Arc<Counters>,
}

impl Partition {
    /// Spawn the worker task for partition `index` on the given runtime.
    pub(crate) fn spawn(index: u32, partitioner_id: &str, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let (state, _) = watch::channel(PartitionState::Running);
        let state = Arc::new(state);

        let span = info_span!("partition", index, partitioner = %partitioner_id);
        runtime.spawn(run_worker(rx, Arc::clone(&state)).instrument(span));

        Self {
            index,
            tx: RwLock::new(Some(tx)),
            state,
            counters: Arc::new(Counters::default()),
        }
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn state(&self) -> PartitionState {
        *self.state.borrow()
    }

    /// Enqueue `continuation(item)` on this lane.
    ///
    /// Never blocks: the item is queued and a [`Completion`] is returned
    /// immediately. Await the completion for the continuation's result.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::PartitionClosed` if the partition has been
    /// shut down.
    pub fn submit<T, F, Fut, R, E>(&self, item: T, continuation: F) -> Result<Completion<R>>
    where
        T: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let index = self.index;
        let (done_tx, done_rx) = oneshot::channel();
        let counters = Arc::clone(&self.counters);

        let job: Job = Box::pin(async move {
            counters.started();
            let outcome = AssertUnwindSafe(async move { continuation(item).await })
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(PartitionError::WorkItemFailure(err.into())),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(partition = index, panic = %message, "continuation panicked");
                    Err(PartitionError::WorkItemFailure(anyhow::anyhow!(
                        "continuation panicked: {message}"
                    )))
                }
            };
            counters.finished(result.is_ok());
            // The caller may have dropped its Completion; the work still ran.
            let _ = done_tx.send(result);
        });

        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(PartitionError::PartitionClosed { index });
        };
        // Count before sending so the worker's decrement never underflows.
        self.counters.queued.fetch_add(1, Ordering::AcqRel);
        if tx.send(job).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(PartitionError::PartitionClosed { index });
        }
        trace!(partition = index, "item queued");

        Ok(Completion {
            index,
            rx: done_rx,
        })
    }

    /// Non-blocking snapshot of this partition's occupancy.
    #[must_use]
    pub fn probe(&self) -> PartitionProbe {
        PartitionProbe {
            index: self.index,
            state: self.state(),
            queued: self.counters.queued.load(Ordering::Acquire),
            in_flight: self.counters.in_flight.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Acquire),
            faulted: self.counters.faulted.load(Ordering::Acquire),
        }
    }

    /// Stop accepting work and wait for queued and in-flight work to finish.
    ///
    /// Running work is never interrupted. If `cancel` fires while work is
    /// still pending the partition keeps draining in the background, but this
    /// call returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::ShutdownAborted` if `cancel` fired before the
    /// partition drained.
    pub async fn shutdown(&self, cancel: CancellationToken) -> Result<()> {
        self.close();
        let mut state = self.state.subscribe();

        tokio::select! {
            biased;
            _ = state.wait_for(|s| *s == PartitionState::Stopped) => Ok(()),
            () = cancel.cancelled() => {
                if self.counters.is_idle() {
                    Ok(())
                } else {
                    warn!(partition = self.index, "shutdown cancelled before partition drained");
                    Err(PartitionError::ShutdownAborted {
                        partitions: vec![self.index],
                    })
                }
            }
        }
    }

    /// Move to `Draining` and drop the sender so the worker exits once empty.
    fn close(&self) {
        // Draining must be published before the channel closes, otherwise the
        // worker's `Stopped` could be overwritten.
        self.state.send_if_modified(|s| {
            if *s == PartitionState::Running {
                *s = PartitionState::Draining;
                true
            } else {
                false
            }
        });
        if self.tx.write().take().is_some() {
            debug!(partition = self.index, "partition closed for new work");
        }
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("index", &self.index)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, state: Arc<watch::Sender<PartitionState>>) {
    debug!("partition worker started");
    while let Some(job) = rx.recv().await {
        job.await;
    }
    state.send_replace(PartitionState::Stopped);
    debug!("partition worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Resolves once the submitted item's continuation has finished.
///
/// Yields the continuation's value, `PartitionError::WorkItemFailure` if it
/// failed or panicked, or `PartitionError::PartitionClosed` if the lane went
/// away before running it (e.g. the runtime shut down).
#[derive(Debug)]
#[must_use = "a Completion does nothing unless awaited; dropping it does not cancel the work"]
pub struct Completion<R> {
    index: u32,
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> Completion<R> {
    /// Index of the partition the item was routed to.
    #[must_use]
    pub fn partition(&self) -> u32 {
        self.index
    }
}

impl<R> Future for Completion<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(PartitionError::PartitionClosed { index })),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
