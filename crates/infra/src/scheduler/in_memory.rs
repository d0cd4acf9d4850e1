use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use replayer_core::{ProjectId, ProjectSpec};

use super::{Scheduler, SchedulerError};

/// One recorded `clear` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearCall {
    pub project_id: ProjectId,
    pub job_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Whether the project arrived with secrets attached.
    pub had_secrets: bool,
}

/// In-memory scheduler.
///
/// Intended for tests/dev. Records every call, and can be told to fail for
/// specific jobs or to stall before answering.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    calls: Mutex<Vec<ClearCall>>,
    failures: Mutex<HashMap<String, SchedulerError>>,
    delay: Option<Duration>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `clear` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `clear` fail with `error` whenever it is called for `job_name`.
    pub fn fail_for(&self, job_name: impl Into<String>, error: SchedulerError) {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.insert(job_name.into(), error);
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<ClearCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn cleared_jobs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.job_name).collect()
    }
}

#[async_trait::async_trait]
impl Scheduler for InMemoryScheduler {
    async fn clear(
        &self,
        project: &ProjectSpec,
        job_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
            calls.push(ClearCall {
                project_id: project.id,
                job_name: job_name.to_string(),
                start,
                end,
                had_secrets: !project.secrets.is_empty(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        match failures.get(job_name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn records_calls_and_fails_on_request() {
        let scheduler = InMemoryScheduler::new();
        scheduler.fail_for("report", SchedulerError::Rejected("dag not found".into()));

        let project = ProjectSpec::new("analytics");
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        scheduler.clear(&project, "ingest", start, end).await.unwrap();
        let err = scheduler.clear(&project, "report", start, end).await.unwrap_err();

        assert_eq!(err, SchedulerError::Rejected("dag not found".into()));
        assert_eq!(scheduler.cleared_jobs(), vec!["ingest", "report"]);
        assert_eq!(scheduler.calls()[0].start, start);
        assert_eq!(scheduler.calls()[0].end, end);
    }
}
