use std::sync::Arc;

use thiserror::Error;

use replayer_core::{JobId, ReplayId, ReplayMessage, ReplaySpec, ReplayStatus};

/// Replay repository operation error.
///
/// ## Error Categories
///
/// - **NotFound**: no replay with the requested id (lookups and status updates)
/// - **AlreadyExists**: insert with an id that is already stored
/// - **UnknownJob**: insert for a job the store has no record of
/// - **Serialization**: a stored payload (tree, message, job spec, status) is malformed,
///   or a spec could not be encoded for storage
/// - **SecretResolution**: project secrets could not be resolved while loading a replay
/// - **Persistence**: any other storage failure (connection, constraint, timeout)
#[derive(Debug, Clone, Error)]
pub enum ReplayStoreError {
    #[error("replay not found: {0}")]
    NotFound(ReplayId),

    #[error("replay already exists: {0}")]
    AlreadyExists(ReplayId),

    #[error("replay references unknown job: {0}")]
    UnknownJob(JobId),

    #[error("replay serialization failed: {0}")]
    Serialization(String),

    #[error("secret resolution failed: {0}")]
    SecretResolution(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Durable store of replay requests.
///
/// The repository is the only authority on replay state; workers hold a
/// transient copy for the duration of one run.
///
/// ## Reconstruction
///
/// `get_by_id` and `get_by_status` return fully reconstructed requests: root job
/// spec, owning project and its resolved secrets, decoded execution tree and
/// message. `get_by_job_id_and_status` is the cheap variant and leaves project
/// secrets empty.
///
/// ## Bulk queries
///
/// Bulk queries return an empty vector when nothing matches; they never report
/// `NotFound`.
#[async_trait::async_trait]
pub trait ReplayRepository: Send + Sync {
    /// Persist a new replay request.
    ///
    /// Fails with `AlreadyExists` if the id is taken, leaving stored state unchanged.
    /// The root job must be known to the store: the in-memory adapter registers it
    /// as part of the insert, the Postgres adapter requires a prior
    /// [`upsert_job`](super::PostgresReplayRepository::upsert_job) and otherwise
    /// fails with `UnknownJob`.
    async fn insert(&self, replay: &ReplaySpec) -> Result<(), ReplayStoreError>;

    /// Load one replay request with project secrets resolved.
    async fn get_by_id(&self, id: ReplayId) -> Result<ReplaySpec, ReplayStoreError>;

    /// Overwrite status and message of an existing replay in a single atomic write.
    ///
    /// Returns `NotFound` if no replay has this id.
    async fn update_status(
        &self,
        id: ReplayId,
        status: ReplayStatus,
        message: ReplayMessage,
    ) -> Result<(), ReplayStoreError>;

    /// All replays whose status is one of `statuses`, secrets resolved.
    async fn get_by_status(
        &self,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError>;

    /// Replays of one job whose status is one of `statuses`, without secrets.
    async fn get_by_job_id_and_status(
        &self,
        job_id: JobId,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError>;
}

#[async_trait::async_trait]
impl<R> ReplayRepository for Arc<R>
where
    R: ReplayRepository + ?Sized,
{
    async fn insert(&self, replay: &ReplaySpec) -> Result<(), ReplayStoreError> {
        (**self).insert(replay).await
    }

    async fn get_by_id(&self, id: ReplayId) -> Result<ReplaySpec, ReplayStoreError> {
        (**self).get_by_id(id).await
    }

    async fn update_status(
        &self,
        id: ReplayId,
        status: ReplayStatus,
        message: ReplayMessage,
    ) -> Result<(), ReplayStoreError> {
        (**self).update_status(id, status, message).await
    }

    async fn get_by_status(
        &self,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        (**self).get_by_status(statuses).await
    }

    async fn get_by_job_id_and_status(
        &self,
        job_id: JobId,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        (**self).get_by_job_id_and_status(job_id, statuses).await
    }
}
