//! Polling a job row until the worker reports a terminal status.
//!
//! [`spawn`] starts one background task per job. The task fetches the row
//! immediately, hands each snapshot to the [`PollHandle`], waits the poll
//! interval and repeats until the status is `completed` or `failed`, a read
//! fails, the optional deadline passes, or the handle cancels.
//!
//! Ticks never overlap: each fetch completes and is delivered before the
//! wait for the next one starts.

use futures::Stream;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::services::job_table::{JobTable, TableError};

/// Default delay between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How a poll sequence is paced and bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Wait between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Stop with [`PollError::TimedOut`] once this much time has passed
    /// without a terminal status. `None` polls until terminal.
    pub max_duration: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
        }
    }
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }
}

/// Single read failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Failed to fetch job: {0}")]
    Table(TableError),
}

impl From<TableError> for FetchError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::NotFound(id) => FetchError::NotFound(id),
            other => FetchError::Table(other),
        }
    }
}

/// Polling could not start, or lost contact with the job.
///
/// A job whose status is `failed` is not an error here; it arrives as a
/// normal snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Job {0} is already being polled")]
    AlreadyPolling(Uuid),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Job {job_id} did not finish within {after:?}")]
    TimedOut { job_id: Uuid, after: Duration },

    #[error("Polling for job {0} was cancelled")]
    Cancelled(Uuid),
}

/// Job ids with a live poll task, shared by all polls of one client.
#[derive(Debug, Clone, Default)]
pub struct ActivePolls {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl ActivePolls {
    /// Claim `job_id`; `None` if another poll already holds it.
    fn claim(&self, job_id: Uuid) -> Option<PollGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if ids.insert(job_id) {
            Some(PollGuard {
                ids: Arc::clone(&self.ids),
                job_id,
            })
        } else {
            None
        }
    }

    pub fn is_active(&self, job_id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&job_id)
    }
}

struct PollGuard {
    ids: Arc<Mutex<HashSet<Uuid>>>,
    job_id: Uuid,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

/// Caller's side of a running poll.
///
/// Yields one `Ok(Job)` per tick and ends after the terminal snapshot. A
/// read failure or timeout arrives as a single `Err` and ends the sequence.
/// Dropping the handle cancels the poll.
pub struct PollHandle {
    job_id: Uuid,
    items: mpsc::Receiver<Result<Job, PollError>>,
    latest: watch::Receiver<Option<Arc<Job>>>,
    cancel: CancellationToken,
}

impl PollHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next snapshot, or `None` once the sequence has ended or was cancelled.
    pub async fn next(&mut self) -> Option<Result<Job, PollError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.items.recv().await
    }

    /// Stop issuing ticks. The remote job keeps running.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this poll, for handing to other tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Most recent snapshot, readable by any number of observers.
    pub fn latest(&self) -> watch::Receiver<Option<Arc<Job>>> {
        self.latest.clone()
    }

    /// Drain the sequence and return its terminal snapshot.
    pub async fn wait(mut self) -> Result<Job, PollError> {
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        match last {
            Some(job) if job.is_terminal() => Ok(job),
            _ => Err(PollError::Cancelled(self.job_id)),
        }
    }
}

impl Stream for PollHandle {
    type Item = Result<Job, PollError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.items.poll_recv(cx)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start polling `job_id` on a background task.
pub fn spawn(
    table: Arc<dyn JobTable>,
    active: &ActivePolls,
    job_id: Uuid,
    options: PollOptions,
) -> Result<PollHandle, PollError> {
    let guard = active
        .claim(job_id)
        .ok_or(PollError::AlreadyPolling(job_id))?;

    let (items_tx, items_rx) = mpsc::channel(1);
    let (latest_tx, latest_rx) = watch::channel(None);
    let cancel = CancellationToken::new();

    tokio::spawn(run(
        table,
        job_id,
        options,
        items_tx,
        latest_tx,
        cancel.clone(),
        guard,
    ));

    Ok(PollHandle {
        job_id,
        items: items_rx,
        latest: latest_rx,
        cancel,
    })
}

async fn run(
    table: Arc<dyn JobTable>,
    job_id: Uuid,
    options: PollOptions,
    items: mpsc::Sender<Result<Job, PollError>>,
    latest: watch::Sender<Option<Arc<Job>>>,
    cancel: CancellationToken,
    guard: PollGuard,
) {
    let deadline = options.max_duration.map(|max| Instant::now() + max);
    let mut guard = Some(guard);
    let mut tick: u64 = 0;
    let mut previous: Option<JobStatus> = None;

    tracing::debug!(
        job_id = %job_id,
        interval_ms = options.interval.as_millis() as u64,
        "Polling started"
    );

    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %job_id, tick, "Polling cancelled during fetch");
                break;
            }
            _ = until(deadline) => {
                time_out(&items, &cancel, &mut guard, job_id, options, tick).await;
                break;
            }
            result = table.fetch(job_id) => result,
        };

        let job = match fetched {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %job_id, tick, error = %e, "Poll tick failed");
                guard.take();
                deliver(&items, &cancel, Err(FetchError::from(e).into())).await;
                break;
            }
        };

        if let Some(prev) = previous {
            if prev.regresses_to(job.status) {
                tracing::warn!(
                    job_id = %job_id,
                    from = %prev,
                    to = %job.status,
                    "Job status moved backwards"
                );
            }
        }
        if job.status == JobStatus::Unknown {
            tracing::warn!(job_id = %job_id, tick, "Unrecognized job status, continuing to poll");
        }
        previous = Some(job.status);

        tracing::debug!(job_id = %job_id, tick, status = %job.status, "Poll tick");

        let terminal = job.is_terminal();
        latest.send_replace(Some(Arc::new(job.clone())));

        if terminal {
            // Free the job id before the caller can see the last snapshot.
            guard.take();
            deliver(&items, &cancel, Ok(job)).await;
            tracing::info!(job_id = %job_id, ticks = tick + 1, "Job reached terminal status");
            break;
        }

        if !deliver(&items, &cancel, Ok(job)).await {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %job_id, tick, "Polling cancelled while waiting");
                break;
            }
            _ = until(deadline) => {
                time_out(&items, &cancel, &mut guard, job_id, options, tick).await;
                break;
            }
            _ = tokio::time::sleep(options.interval) => {}
        }

        tick += 1;
    }

    // Release the job id before closing the channel so a caller that saw
    // the end of the sequence can start a new poll right away.
    drop(guard);
    drop(items);
}

/// Resolves at `deadline`, or never when there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn time_out(
    items: &mpsc::Sender<Result<Job, PollError>>,
    cancel: &CancellationToken,
    guard: &mut Option<PollGuard>,
    job_id: Uuid,
    options: PollOptions,
    tick: u64,
) {
    let after = options.max_duration.unwrap_or_default();
    tracing::warn!(job_id = %job_id, ticks = tick, after_ms = after.as_millis() as u64, "Polling timed out");
    guard.take();
    deliver(items, cancel, Err(PollError::TimedOut { job_id, after })).await;
}

/// Hand one item to the caller. `false` when the caller is gone.
async fn deliver(
    items: &mpsc::Sender<Result<Job, PollError>>,
    cancel: &CancellationToken,
    item: Result<Job, PollError>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = items.send(item) => sent.is_ok(),
    }
}
