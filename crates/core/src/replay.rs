//! Replay requests and their lifecycle.
//!
//! ```text
//! Created --> InProgress --> Replayed
//!                  \-------> Failed
//! ```
//!
//! `Replayed` and `Failed` are terminal. Retrying a replay means creating a new
//! request.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::id::ReplayId;
use crate::job::JobSpec;
use crate::tree::ExecutionTreeNode;
use crate::value_object::ValueObject;

/// Status of a replay request.
///
/// The serialized names are stored as-is in the database and read by other
/// services; do not rename them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplayStatus {
    Created,
    InProgress,
    Replayed,
    Failed,
}

impl ReplayStatus {
    pub const ALL: [ReplayStatus; 4] = [
        ReplayStatus::Created,
        ReplayStatus::InProgress,
        ReplayStatus::Replayed,
        ReplayStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStatus::Created => "Created",
            ReplayStatus::InProgress => "InProgress",
            ReplayStatus::Replayed => "Replayed",
            ReplayStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayStatus::Replayed | ReplayStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ReplayStatus) -> bool {
        matches!(
            (self, next),
            (ReplayStatus::Created, ReplayStatus::InProgress)
                | (ReplayStatus::InProgress, ReplayStatus::Replayed)
                | (ReplayStatus::InProgress, ReplayStatus::Failed)
        )
    }
}

impl core::fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplayStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReplayStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown replay status '{s}'")))
    }
}

/// Why a replay failed. Empty while nothing has failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl ReplayMessage {
    pub const SCHEDULER_CLEAR_FAILED: &'static str = "scheduler clear failed";
    pub const REPLAY_CANCELLED: &'static str = "replay cancelled";
    pub const INVALID_EXECUTION_TREE: &'static str = "invalid execution tree";

    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.detail.is_empty()
    }
}

impl ValueObject for ReplayMessage {}

/// A replay request: which job, which window, and how far it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySpec {
    pub id: ReplayId,
    /// Root job, including its owning project.
    pub job: JobSpec,
    /// Inclusive UTC date bounds of the requested window.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: ReplayStatus,
    pub message: ReplayMessage,
    pub execution_tree: Option<ExecutionTreeNode>,
    pub created_at: DateTime<Utc>,
}

impl ReplaySpec {
    /// New request in `Created` status.
    pub fn new(
        job: JobSpec,
        start_date: NaiveDate,
        end_date: NaiveDate,
        execution_tree: Option<ExecutionTreeNode>,
    ) -> Result<Self, DomainError> {
        if end_date < start_date {
            return Err(DomainError::validation(format!(
                "replay end date {end_date} is before start date {start_date}"
            )));
        }
        if let Some(tree) = &execution_tree {
            if tree.name() != job.name {
                return Err(DomainError::invariant(format!(
                    "execution tree root '{}' does not match replayed job '{}'",
                    tree.name(),
                    job.name
                )));
            }
        }

        Ok(Self {
            id: ReplayId::new(),
            job,
            start_date,
            end_date,
            status: ReplayStatus::Created,
            message: ReplayMessage::empty(),
            execution_tree,
            created_at: Utc::now(),
        })
    }
}

impl Entity for ReplaySpec {
    type Id = ReplayId;

    fn id(&self) -> &ReplayId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ProjectSpec;
    use crate::tree::RunSet;
    use chrono::TimeZone;

    fn job(name: &str) -> JobSpec {
        JobSpec::new(
            name,
            ProjectSpec::new("analytics"),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn status_wire_names_are_stable() {
        for (status, literal) in [
            (ReplayStatus::Created, "\"Created\""),
            (ReplayStatus::InProgress, "\"InProgress\""),
            (ReplayStatus::Replayed, "\"Replayed\""),
            (ReplayStatus::Failed, "\"Failed\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), literal);
            assert_eq!(literal.trim_matches('"').parse::<ReplayStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_literal_is_rejected() {
        assert!(matches!(
            "in_progress".parse::<ReplayStatus>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn lifecycle_transitions() {
        use ReplayStatus::*;
        assert!(Created.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Replayed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Created.can_transition_to(Replayed));
        assert!(!Replayed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(Replayed.is_terminal() && Failed.is_terminal());
        assert!(!Created.is_terminal() && !InProgress.is_terminal());
    }

    #[test]
    fn empty_message_serializes_as_empty_object() {
        assert_eq!(serde_json::to_string(&ReplayMessage::empty()).unwrap(), "{}");
        let decoded: ReplayMessage = serde_json::from_str("{}").unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn failure_message_keeps_kind_and_detail() {
        let msg = ReplayMessage::new(ReplayMessage::SCHEDULER_CLEAR_FAILED, "boom");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "scheduler clear failed");
        assert_eq!(json["detail"], "boom");
    }

    #[test]
    fn new_replay_starts_created() {
        let tree = ExecutionTreeNode::new(
            job("ingest"),
            [Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()]
                .into_iter()
                .collect::<RunSet>(),
        )
        .unwrap();
        let replay = ReplaySpec::new(job("ingest"), date(1), date(3), Some(tree)).unwrap();

        assert_eq!(replay.status, ReplayStatus::Created);
        assert!(replay.message.is_empty());
    }

    #[test]
    fn identity_survives_status_changes() {
        let replay = ReplaySpec::new(job("ingest"), date(1), date(1), None).unwrap();
        let mut failed = replay.clone();
        failed.status = ReplayStatus::Failed;
        failed.message = ReplayMessage::new(ReplayMessage::SCHEDULER_CLEAR_FAILED, "boom");

        assert_ne!(failed, replay);
        assert_eq!(Entity::id(&failed), Entity::id(&replay));
    }

    #[test]
    fn rejects_inverted_window() {
        let err = ReplaySpec::new(job("ingest"), date(3), date(1), None).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_tree_rooted_at_another_job() {
        let tree = ExecutionTreeNode::new(
            job("transform"),
            [Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()]
                .into_iter()
                .collect::<RunSet>(),
        )
        .unwrap();
        let err = ReplaySpec::new(job("ingest"), date(1), date(1), Some(tree)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
