//! Concurrent tile fetching.
//!
//! The coordinator fans a planned descriptor set out to a bounded pool of
//! fetch tasks and streams every outcome back to a single consumer as soon as
//! it is available.
//!
//! # Flow
//!
//! ```text
//!                        ┌──────────────┐
//!  descriptors ──▶ dispatcher ──permit──▶│ fetch task 1 │──┐
//!                  (Semaphore)          │ fetch task 2 │──┼──▶ mpsc ──▶ FetchRun::next()
//!                                       │     ...      │──┘
//!                                       └──────────────┘
//! ```
//!
//! - At most `concurrency` fetches are in flight; a task keeps its permit
//!   until its result has been handed to the channel, so no more than
//!   `2 * concurrency` payloads are held in memory at any time.
//! - A failed tile never affects its siblings.
//! - Cancellation stops dispatch only; fetches already running finish or
//!   time out on their own and their results are still delivered.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::FetchError;

use super::fetcher::TileFetcher;
use super::grid::TileDescriptor;

/// Default number of concurrent tile fetches.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Outcome of fetching one descriptor.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub descriptor: TileDescriptor,
    pub outcome: Result<Bytes, FetchError>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Observable progress of a run.
///
/// The completed count covers successes and failures alike and never
/// decreases.
#[derive(Debug, Clone)]
pub struct Progress {
    completed: watch::Receiver<usize>,
    total: usize,
}

impl Progress {
    /// Descriptors whose fetch has finished.
    pub fn completed(&self) -> usize {
        *self.completed.borrow()
    }

    /// Descriptors in the run.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Wait until the completed count changes.
    ///
    /// Returns `false` once the run is over and no further change can happen.
    pub async fn changed(&mut self) -> bool {
        self.completed.changed().await.is_ok()
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Descriptors handed to a fetch task
    pub dispatched: usize,

    /// Fetch tasks that produced a result
    pub completed: usize,

    /// Whether dispatch stopped early on cancellation
    pub cancelled: bool,

    /// Fetch tasks that died without producing a result
    pub lost: usize,
}

// =============================================================================
// Fetch Run
// =============================================================================

/// Handle on a running dispatch.
///
/// Results arrive in completion order, not in plan order.
pub struct FetchRun {
    results: mpsc::Receiver<FetchResult>,
    progress: Progress,
    dispatcher: JoinHandle<RunSummary>,
}

impl FetchRun {
    /// Next available result, or `None` once every dispatched fetch has
    /// reported.
    pub async fn next(&mut self) -> Option<FetchResult> {
        self.results.recv().await
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Wait for the dispatcher and every fetch task to finish.
    ///
    /// Results not consumed yet are discarded.
    pub async fn finish(self) -> RunSummary {
        let completed = self.progress.completed();
        drop(self.results);

        match self.dispatcher.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Tile dispatcher failed");
                RunSummary {
                    dispatched: completed,
                    completed,
                    cancelled: false,
                    lost: 0,
                }
            }
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Schedules tile fetches over a bounded worker pool.
pub struct FetchCoordinator<F: TileFetcher + ?Sized + 'static> {
    fetcher: Arc<F>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<F: TileFetcher + ?Sized + 'static> FetchCoordinator<F> {
    /// Create a coordinator; a concurrency of 0 is raised to 1.
    pub fn new(fetcher: Arc<F>, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop dispatching when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start fetching `descriptors` in the background.
    pub fn dispatch(&self, descriptors: Vec<TileDescriptor>) -> FetchRun {
        let total = descriptors.len();
        let (tx, rx) = mpsc::channel(self.concurrency);
        let (completed_tx, completed_rx) = watch::channel(0usize);

        info!(
            tiles = total,
            concurrency = self.concurrency,
            "Dispatching tile fetches"
        );

        let dispatcher = tokio::spawn(dispatch_all(
            Arc::clone(&self.fetcher),
            descriptors,
            Arc::new(Semaphore::new(self.concurrency)),
            tx,
            Arc::new(completed_tx),
            self.cancel.clone(),
        ));

        FetchRun {
            results: rx,
            progress: Progress {
                completed: completed_rx,
                total,
            },
            dispatcher,
        }
    }

    /// Fetch every descriptor and collect the results.
    pub async fn run(&self, descriptors: Vec<TileDescriptor>) -> Vec<FetchResult> {
        let mut run = self.dispatch(descriptors);
        let mut results = Vec::with_capacity(run.progress.total());
        while let Some(result) = run.next().await {
            results.push(result);
        }
        run.finish().await;
        results
    }
}

async fn dispatch_all<F: TileFetcher + ?Sized + 'static>(
    fetcher: Arc<F>,
    descriptors: Vec<TileDescriptor>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::Sender<FetchResult>,
    completed: Arc<watch::Sender<usize>>,
    cancel: CancellationToken,
) -> RunSummary {
    let mut workers = JoinSet::new();
    let mut dispatched = 0;
    let mut cancelled = false;
    let mut lost = 0;

    for descriptor in descriptors {
        let permit = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // Reap finished tasks so the set does not grow with the plan.
        while let Some(joined) = workers.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Tile fetch task died");
                lost += 1;
            }
        }

        let fetcher = Arc::clone(&fetcher);
        let tx = tx.clone();
        let completed = Arc::clone(&completed);

        workers.spawn(async move {
            let outcome = fetcher.fetch(&descriptor).await;
            match &outcome {
                Ok(bytes) => debug!(
                    col = descriptor.coordinate.col,
                    row = descriptor.coordinate.row,
                    bytes = bytes.len(),
                    "Tile fetched"
                ),
                Err(e) => warn!(
                    col = descriptor.coordinate.col,
                    row = descriptor.coordinate.row,
                    reason = %e.reason,
                    attempts = e.attempts,
                    "Tile failed"
                ),
            }

            completed.send_modify(|n| *n += 1);
            // The consumer may have gone away; the result is then dropped.
            let _ = tx.send(FetchResult { descriptor, outcome }).await;
            drop(permit);
        });
        dispatched += 1;
    }

    if cancelled {
        info!(dispatched, "Cancelled, waiting for in-flight fetches");
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Tile fetch task died");
            lost += 1;
        }
    }

    let completed = *completed.borrow();
    RunSummary {
        dispatched,
        completed,
        cancelled,
        lost,
    }
}
