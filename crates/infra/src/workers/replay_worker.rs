//! Replay worker: executes one replay request end to end.
//!
//! ```text
//! acquire lease
//!   -> status InProgress
//!   -> load request (tree, job, project secrets)
//!   -> clear every job of the flattened tree over its run range
//!   -> status Replayed
//! ```
//!
//! Processing is fail-fast: the first failing clear stops the run, the replay is
//! marked `Failed` with the reason, and the error is returned. Clears already
//! issued are not rolled back.
//!
//! Every repository and scheduler call races the caller's
//! [`CancellationToken`]. Once the replay is `InProgress`, an interrupted run is
//! marked `Failed` on a best-effort basis, bounded by
//! [`WorkerConfig::cleanup_timeout`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use replayer_core::{ProjectSpec, ReplayId, ReplayMessage, ReplayStatus, RunRange};

use super::lease::ReplayLeases;
use crate::replay_store::{ReplayRepository, ReplayStoreError};
use crate::scheduler::{Scheduler, SchedulerError};

/// Replay worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Deadline for a single scheduler clear. `None` waits indefinitely.
    pub clear_timeout: Option<Duration>,
    /// Deadline for recording `Failed` after a run was interrupted.
    pub cleanup_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            clear_timeout: Some(Duration::from_secs(300)),
            cleanup_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayWorkerError {
    #[error(transparent)]
    Store(#[from] ReplayStoreError),

    #[error("error while clearing runs for job {job_name}: {source}")]
    SchedulerClear {
        job_name: String,
        #[source]
        source: SchedulerError,
    },

    /// Processing failed and the `Failed` status could not be written either.
    #[error("{cause} (recording Failed status also failed: {update})")]
    StatusNotRecorded {
        cause: Box<ReplayWorkerError>,
        update: ReplayStoreError,
    },

    #[error("invalid execution tree: {0}")]
    InvalidTree(String),

    #[error("replay processing was cancelled")]
    Cancelled,

    #[error("replay {0} is already being processed")]
    AlreadyProcessing(ReplayId),
}

impl ReplayWorkerError {
    /// The error that stopped processing, looking through a failed status write.
    pub fn root_cause(&self) -> &ReplayWorkerError {
        match self {
            ReplayWorkerError::StatusNotRecorded { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Executes replay requests against a repository and a scheduler.
///
/// Requests are independent: a worker may process any number of different
/// replays concurrently. The same replay id is processed at most once at a time
/// across all workers sharing a [`ReplayLeases`] set.
pub struct ReplayWorker<R, S> {
    repository: R,
    scheduler: S,
    config: WorkerConfig,
    leases: ReplayLeases,
}

impl<R, S> ReplayWorker<R, S>
where
    R: ReplayRepository,
    S: Scheduler,
{
    pub fn new(repository: R, scheduler: S) -> Self {
        Self {
            repository,
            scheduler,
            config: WorkerConfig::default(),
            leases: ReplayLeases::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a lease set with other workers in this process.
    pub fn with_leases(mut self, leases: ReplayLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process a replay without external cancellation.
    pub async fn process(&self, id: ReplayId) -> Result<(), ReplayWorkerError> {
        self.process_with_cancellation(id, &CancellationToken::new())
            .await
    }

    /// Process a replay, stopping early if `cancel` fires.
    ///
    /// On success the replay is `Replayed`. On error it is `Failed` with a
    /// message naming the reason, except when the failure happened before the
    /// request could be loaded (it then stays as the repository left it).
    #[instrument(skip(self, cancel), fields(replay_id = %id))]
    pub async fn process_with_cancellation(
        &self,
        id: ReplayId,
        cancel: &CancellationToken,
    ) -> Result<(), ReplayWorkerError> {
        let _lease = self
            .leases
            .try_acquire(id)
            .ok_or(ReplayWorkerError::AlreadyProcessing(id))?;

        match until_cancelled(
            cancel,
            self.repository
                .update_status(id, ReplayStatus::InProgress, ReplayMessage::empty()),
        )
        .await
        {
            Some(result) => result?,
            None => {
                warn!("replay cancelled before it started");
                return Err(ReplayWorkerError::Cancelled);
            }
        }

        let replay = match until_cancelled(cancel, self.repository.get_by_id(id)).await {
            Some(result) => result?,
            None => return self.record_cancellation(id).await,
        };

        let Some(tree) = replay.execution_tree.as_ref() else {
            let err = ReplayWorkerError::InvalidTree("replay has no execution tree".to_string());
            return self
                .record_failure(id, ReplayMessage::INVALID_EXECUTION_TREE, err)
                .await;
        };

        let nodes = tree.flatten();
        debug!(job_count = nodes.len(), "clearing execution tree");

        for node in &nodes {
            let Some(range) = node.run_range() else {
                let err = ReplayWorkerError::InvalidTree(format!("job '{}' has no runs", node.name()));
                return self
                    .record_failure(id, ReplayMessage::INVALID_EXECUTION_TREE, err)
                    .await;
            };

            match until_cancelled(cancel, self.clear(&replay.job.project, node.name(), range)).await
            {
                Some(Ok(())) => {
                    debug!(job_name = node.name(), start = %range.start, end = %range.end, "cleared runs");
                }
                Some(Err(source)) => {
                    let err = ReplayWorkerError::SchedulerClear {
                        job_name: node.name().to_string(),
                        source,
                    };
                    warn!(error = %err, "error while running replay");
                    return self
                        .record_failure(id, ReplayMessage::SCHEDULER_CLEAR_FAILED, err)
                        .await;
                }
                None => return self.record_cancellation(id).await,
            }
        }

        // Every clear has been issued at this point; an interrupted final write is
        // reported without overwriting whatever status landed.
        match until_cancelled(
            cancel,
            self.repository
                .update_status(id, ReplayStatus::Replayed, ReplayMessage::empty()),
        )
        .await
        {
            Some(result) => result?,
            None => {
                warn!("replay cancelled while recording completion");
                return Err(ReplayWorkerError::Cancelled);
            }
        }

        info!(job_count = nodes.len(), "successfully cleared instances during replay");
        Ok(())
    }

    async fn clear(
        &self,
        project: &ProjectSpec,
        job_name: &str,
        range: RunRange,
    ) -> Result<(), SchedulerError> {
        let call = self.scheduler.clear(project, job_name, range.start, range.end);
        match self.config.clear_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| SchedulerError::Timeout(limit))?,
            None => call.await,
        }
    }

    async fn record_cancellation(&self, id: ReplayId) -> Result<(), ReplayWorkerError> {
        warn!("replay cancelled while in progress");
        self.record_failure(id, ReplayMessage::REPLAY_CANCELLED, ReplayWorkerError::Cancelled)
            .await
    }

    /// Mark the replay `Failed` and return `cause`, or both errors if the write fails.
    async fn record_failure(
        &self,
        id: ReplayId,
        kind: &str,
        cause: ReplayWorkerError,
    ) -> Result<(), ReplayWorkerError> {
        let message = ReplayMessage::new(kind, cause.to_string());
        let limit = self.config.cleanup_timeout;

        let update = match tokio::time::timeout(
            limit,
            self.repository
                .update_status(id, ReplayStatus::Failed, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ReplayStoreError::Persistence(format!(
                "status update timed out after {limit:?}"
            ))),
        };

        match update {
            Ok(()) => Err(cause),
            Err(update) => {
                error!(error = %cause, update_error = %update, "failed to record Failed status");
                Err(ReplayWorkerError::StatusNotRecorded {
                    cause: Box::new(cause),
                    update,
                })
            }
        }
    }
}

/// Run `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
