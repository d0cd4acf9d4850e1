//! Scheduler boundary.
//!
//! The replay worker only needs one capability from the external workflow
//! scheduler: clearing the recorded runs of a job over a time window so the
//! scheduler executes them again.

pub mod in_memory;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use replayer_core::ProjectSpec;

pub use in_memory::{ClearCall, InMemoryScheduler};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The scheduler answered and refused the request.
    #[error("scheduler rejected request: {0}")]
    Rejected(String),

    /// The scheduler could not be reached.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("scheduler call timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    /// Reset every run of `job_name` whose time falls in `[start, end]` so it executes again.
    ///
    /// `project` carries the configuration and secrets needed to reach the
    /// project's scheduler deployment.
    async fn clear(
        &self,
        project: &ProjectSpec,
        job_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;
}

#[async_trait::async_trait]
impl<S> Scheduler for Arc<S>
where
    S: Scheduler + ?Sized,
{
    async fn clear(
        &self,
        project: &ProjectSpec,
        job_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        (**self).clear(project, job_name, start, end).await
    }
}
