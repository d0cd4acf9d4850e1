//! Replay repository boundary.
//!
//! [`ReplayRepository`] is the persistence contract the replay worker depends
//! on. Two adapters implement it: [`InMemoryReplayRepository`] for tests/dev and
//! [`PostgresReplayRepository`] for production.

pub mod in_memory;
pub mod postgres;
pub mod record;
pub mod r#trait;

use std::sync::Arc;

use tracing::info;

pub use in_memory::InMemoryReplayRepository;
pub use postgres::PostgresReplayRepository;
pub use record::{ExecutionTreeRecord, ReplayRecord};
pub use r#trait::{ReplayRepository, ReplayStoreError};

use crate::config::ReplayConfig;
use crate::secrets::SecretStore;

/// Build the repository selected by `config`.
///
/// With `use_persistent_stores` this connects to Postgres and bootstraps the
/// schema; otherwise it returns an empty in-memory repository.
pub async fn build_repository(
    config: &ReplayConfig,
    secrets: Arc<dyn SecretStore>,
) -> Result<Arc<dyn ReplayRepository>, ReplayStoreError> {
    match (config.use_persistent_stores, &config.database) {
        (true, Some(database)) => {
            let pool = crate::db::connect(database).await?;
            crate::db::ensure_schema(&pool).await?;
            info!("using postgres replay repository");
            Ok(Arc::new(PostgresReplayRepository::new(pool, secrets)))
        }
        (true, None) => Err(ReplayStoreError::Persistence(
            "persistent stores requested but no database configured".to_string(),
        )),
        (false, _) => {
            info!("using in-memory replay repository");
            Ok(Arc::new(InMemoryReplayRepository::new(secrets)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;

    #[tokio::test]
    async fn default_config_builds_in_memory_repository() {
        let repo = build_repository(&ReplayConfig::default(), Arc::new(InMemorySecretStore::new()))
            .await
            .unwrap();

        assert!(repo
            .get_by_status(&replayer_core::ReplayStatus::ALL)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn persistent_config_without_database_is_rejected() {
        let config = ReplayConfig {
            use_persistent_stores: true,
            ..ReplayConfig::default()
        };

        let result = build_repository(&config, Arc::new(InMemorySecretStore::new())).await;
        assert!(matches!(result, Err(ReplayStoreError::Persistence(_))));
    }
}
