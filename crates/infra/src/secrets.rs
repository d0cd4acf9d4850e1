//! Project secret resolution.
//!
//! Replay requests loaded for execution need the project's secrets so the
//! scheduler can authenticate against the project's deployment. Secrets are
//! never persisted alongside the replay; repositories ask a [`SecretStore`].

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use replayer_core::{JobSpec, ProjectId, ProjectSecret};

use crate::replay_store::ReplayStoreError;

#[derive(Debug, Clone, Error)]
pub enum SecretStoreError {
    #[error("secret backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// All secrets of a project. A project without secrets yields an empty vector.
    async fn secrets_for(&self, project_id: ProjectId) -> Result<Vec<ProjectSecret>, SecretStoreError>;
}

impl From<SecretStoreError> for ReplayStoreError {
    fn from(err: SecretStoreError) -> Self {
        ReplayStoreError::SecretResolution(err.to_string())
    }
}

/// Attach the owning project's secrets to a job loaded from storage.
pub(crate) async fn resolve_project_secrets(
    store: &dyn SecretStore,
    mut job: JobSpec,
) -> Result<JobSpec, ReplayStoreError> {
    job.project.secrets = store.secrets_for(job.project.id).await?;
    Ok(job)
}

/// In-memory secret store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<ProjectId, Vec<ProjectSecret>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the secrets of a project.
    pub fn set(&self, project_id: ProjectId, secrets: Vec<ProjectSecret>) {
        let mut map = self.secrets.write().unwrap_or_else(|p| p.into_inner());
        map.insert(project_id, secrets);
    }
}

#[async_trait::async_trait]
impl SecretStore for InMemorySecretStore {
    async fn secrets_for(&self, project_id: ProjectId) -> Result<Vec<ProjectSecret>, SecretStoreError> {
        let map = self
            .secrets
            .read()
            .map_err(|_| SecretStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(map.get(&project_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_project_has_no_secrets() {
        let store = InMemorySecretStore::new();
        assert!(store.secrets_for(ProjectId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_replaces_previous_secrets() {
        let store = InMemorySecretStore::new();
        let project = ProjectId::new();
        store.set(project, vec![ProjectSecret::new("A", "1")]);
        store.set(project, vec![ProjectSecret::new("B", "2")]);

        let secrets = store.secrets_for(project).await.unwrap();
        assert_eq!(secrets, vec![ProjectSecret::new("B", "2")]);
    }
}
