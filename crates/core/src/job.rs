//! Job and project specifications referenced by replay requests.
//!
//! These are denormalized snapshots of what the orchestrator knows about a job
//! when a replay is created. Building them from job definitions is handled
//! elsewhere; the replay engine only carries and persists them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{JobId, ProjectId};

/// A named secret attached to a project (already decrypted).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSecret {
    pub name: String,
    pub value: String,
}

impl ProjectSecret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl core::fmt::Debug for ProjectSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectSecret")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Project owning a set of jobs.
///
/// `secrets` is only populated when the project was loaded with secret
/// resolution; lightweight queries leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<ProjectSecret>,
}

impl ProjectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            config: BTreeMap::new(),
            secrets: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<ProjectSecret>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Copy of this project with secrets stripped.
    pub fn without_secrets(&self) -> Self {
        Self {
            secrets: Vec::new(),
            ..self.clone()
        }
    }

    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.as_str())
    }
}

/// When a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Cron expression understood by the scheduler.
    pub interval: String,
}

/// What a job executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTask {
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Job specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub name: String,
    pub version: u32,
    pub owner: String,
    pub schedule: JobSchedule,
    pub task: JobTask,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Names of upstream jobs this job depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub project: ProjectSpec,
}

impl JobSpec {
    /// Minimal job spec with a daily schedule.
    pub fn new(name: impl Into<String>, project: ProjectSpec, start_date: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            id: JobId::new(),
            task: JobTask {
                name: name.clone(),
                config: BTreeMap::new(),
            },
            name,
            version: 1,
            owner: String::new(),
            schedule: JobSchedule {
                start_date,
                end_date: None,
                interval: "0 0 * * *".to_string(),
            },
            labels: BTreeMap::new(),
            dependencies: Vec::new(),
            project,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.schedule.interval = interval.into();
        self
    }

    pub fn with_dependency(mut self, upstream: impl Into<String>) -> Self {
        self.dependencies.push(upstream.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl Entity for JobSpec {
    type Id = JobId;

    fn id(&self) -> &JobId {
        &self.id
    }
}
