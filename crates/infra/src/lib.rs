//! Infrastructure layer: storage, scheduler adapters, config, and the replay worker.

pub mod config;
pub mod db;
pub mod replay_store;
pub mod scheduler;
pub mod secrets;
pub mod workers;


pub use config::{ConfigError, DatabaseConfig, ReplayConfig};
pub use replay_store::{
    build_repository, InMemoryReplayRepository, PostgresReplayRepository, ReplayRepository,
    ReplayStoreError,
};
pub use scheduler::{InMemoryScheduler, Scheduler, SchedulerError};
pub use secrets::{InMemorySecretStore, SecretStore, SecretStoreError};
pub use workers::{ReplayLeases, ReplayWorker, ReplayWorkerError, WorkerConfig};

/// Initialize logging from `config` and build the configured repository.
///
/// Convenience for binaries embedding the replay worker.
pub async fn bootstrap(
    config: &ReplayConfig,
    secrets: std::sync::Arc<dyn SecretStore>,
) -> Result<std::sync::Arc<dyn ReplayRepository>, ReplayStoreError> {
    replayer_observability::init_with(config.log_format);
    build_repository(config, secrets).await
}
