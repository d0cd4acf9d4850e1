use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use replayer_core::{JobId, JobSpec, ReplayId, ReplayMessage, ReplaySpec, ReplayStatus};

use super::r#trait::{ReplayRepository, ReplayStoreError};
use super::record::{decode_status, encode_message, ReplayRecord};
use crate::secrets::{resolve_project_secrets, InMemorySecretStore, SecretStore};

/// In-memory replay repository.
///
/// Intended for tests/dev. Not optimized for performance.
///
/// Keeps a small job catalog next to the replays, standing in for the job and
/// project tables of the Postgres schema. Jobs are registered explicitly with
/// [`InMemoryReplayRepository::register_job`] or implicitly on `insert`.
pub struct InMemoryReplayRepository {
    replays: RwLock<HashMap<ReplayId, ReplayRecord>>,
    jobs: RwLock<HashMap<JobId, JobSpec>>,
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for InMemoryReplayRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReplayRepository").finish_non_exhaustive()
    }
}

impl Default for InMemoryReplayRepository {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySecretStore::new()))
    }
}

impl InMemoryReplayRepository {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            replays: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            secrets,
        }
    }

    /// Add or replace a job in the catalog. Project secrets are dropped.
    pub fn register_job(&self, job: &JobSpec) -> Result<(), ReplayStoreError> {
        let mut stored = job.clone();
        stored.project = stored.project.without_secrets();

        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ReplayStoreError::Persistence("lock poisoned".to_string()))?;
        jobs.insert(stored.id, stored);
        Ok(())
    }

    /// Snapshot matching records with their jobs, oldest first.
    fn select<F>(&self, mut keep: F) -> Result<Vec<(ReplayRecord, JobSpec)>, ReplayStoreError>
    where
        F: FnMut(&ReplayRecord) -> bool,
    {
        let replays = self
            .replays
            .read()
            .map_err(|_| ReplayStoreError::Persistence("lock poisoned".to_string()))?;
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ReplayStoreError::Persistence("lock poisoned".to_string()))?;

        let mut out = Vec::new();
        for record in replays.values().filter(|r| keep(*r)) {
            let job = jobs.get(&record.job_id).cloned().ok_or_else(|| {
                ReplayStoreError::Persistence(format!(
                    "replay {} references unknown job {}",
                    record.id, record.job_id
                ))
            })?;
            out.push((record.clone(), job));
        }
        out.sort_by(|(a, _), (b, _)| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    async fn hydrate(
        &self,
        rows: Vec<(ReplayRecord, JobSpec)>,
        with_secrets: bool,
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        let mut out = Vec::with_capacity(rows.len());
        for (record, job) in rows {
            let job = if with_secrets {
                resolve_project_secrets(self.secrets.as_ref(), job).await?
            } else {
                job
            };
            out.push(record.into_spec(job)?);
        }
        Ok(out)
    }
}

fn has_status(record: &ReplayRecord, statuses: &[ReplayStatus]) -> bool {
    statuses.iter().any(|s| s.as_str() == record.status)
}

#[async_trait::async_trait]
impl ReplayRepository for InMemoryReplayRepository {
    async fn insert(&self, replay: &ReplaySpec) -> Result<(), ReplayStoreError> {
        let record = ReplayRecord::from_spec(replay)?;

        // Duplicate check precedes job registration; a rejected insert changes nothing.
        let mut replays = self
            .replays
            .write()
            .map_err(|_| ReplayStoreError::Persistence("lock poisoned".to_string()))?;
        if replays.contains_key(&record.id) {
            return Err(ReplayStoreError::AlreadyExists(record.id));
        }
        self.register_job(&replay.job)?;
        replays.insert(record.id, record);
        Ok(())
    }

    async fn get_by_id(&self, id: ReplayId) -> Result<ReplaySpec, ReplayStoreError> {
        let rows = self.select(|r| r.id == id)?;
        if rows.is_empty() {
            return Err(ReplayStoreError::NotFound(id));
        }
        self.hydrate(rows, true)
            .await?
            .pop()
            .ok_or(ReplayStoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: ReplayId,
        status: ReplayStatus,
        message: ReplayMessage,
    ) -> Result<(), ReplayStoreError> {
        let message = encode_message(&message)?;

        let mut replays = self
            .replays
            .write()
            .map_err(|_| ReplayStoreError::Persistence("lock poisoned".to_string()))?;
        let record = replays.get_mut(&id).ok_or(ReplayStoreError::NotFound(id))?;

        if let Ok(current) = decode_status(&record.status) {
            if !current.can_transition_to(status) {
                warn!(replay_id = %id, from = %current, to = %status, "replay status moved outside its lifecycle");
            }
        }

        record.status = status.as_str().to_string();
        record.message = message;
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_by_status(
        &self,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        let rows = self.select(|r| has_status(r, statuses))?;
        self.hydrate(rows, true).await
    }

    async fn get_by_job_id_and_status(
        &self,
        job_id: JobId,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        let rows = self.select(|r| r.job_id == job_id && has_status(r, statuses))?;
        self.hydrate(rows, false).await
    }
}
