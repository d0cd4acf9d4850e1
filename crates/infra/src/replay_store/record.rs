//! Storage representation of replay requests.
//!
//! Both repository adapters persist the same flat record: scalar columns plus
//! two JSON documents (`message` and `execution_tree`). Job specs inside the
//! stored tree never carry project secrets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use replayer_core::{
    ExecutionTreeNode, JobId, JobSpec, ReplayId, ReplayMessage, ReplaySpec, ReplayStatus, RunSet,
};

use super::r#trait::ReplayStoreError;

/// Persisted form of one execution tree node: `{data, dependents, runs}`.
///
/// Decoding a record built by [`from_node`](Self::from_node) yields the original
/// tree with one exception: project secrets are never stored, so every decoded
/// job has an empty secret list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTreeRecord {
    pub data: JobSpec,
    #[serde(default)]
    pub dependents: Vec<ExecutionTreeRecord>,
    pub runs: Vec<DateTime<Utc>>,
}

impl ExecutionTreeRecord {
    pub fn from_node(node: &ExecutionTreeNode) -> Self {
        let mut data = node.job().clone();
        data.project = data.project.without_secrets();

        Self {
            data,
            dependents: node.dependents().iter().map(Self::from_node).collect(),
            runs: node.runs().iter().collect(),
        }
    }

    fn into_node(self) -> Result<ExecutionTreeNode, ReplayStoreError> {
        let name = self.data.name.clone();
        let runs: RunSet = self.runs.into_iter().collect();
        let mut node = ExecutionTreeNode::new(self.data, runs)
            .map_err(|e| ReplayStoreError::Serialization(format!("tree node '{name}': {e}")))?;
        for dependent in self.dependents {
            node.add_dependent(dependent.into_node()?);
        }
        Ok(node)
    }
}

pub fn encode_tree(
    tree: Option<&ExecutionTreeNode>,
) -> Result<Option<serde_json::Value>, ReplayStoreError> {
    tree.map(|node| {
        serde_json::to_value(ExecutionTreeRecord::from_node(node))
            .map_err(|e| ReplayStoreError::Serialization(format!("encode execution tree: {e}")))
    })
    .transpose()
}

/// Decode a stored tree and check it before handing it to a worker.
pub fn decode_tree(
    value: Option<serde_json::Value>,
) -> Result<Option<ExecutionTreeNode>, ReplayStoreError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(None);
    };

    let record: ExecutionTreeRecord = serde_json::from_value(value)
        .map_err(|e| ReplayStoreError::Serialization(format!("decode execution tree: {e}")))?;
    let node = record.into_node()?;
    node.validate()
        .map_err(|e| ReplayStoreError::Serialization(format!("invalid execution tree: {e}")))?;
    Ok(Some(node))
}

pub fn encode_message(message: &ReplayMessage) -> Result<serde_json::Value, ReplayStoreError> {
    serde_json::to_value(message)
        .map_err(|e| ReplayStoreError::Serialization(format!("encode replay message: {e}")))
}

/// `NULL` and `{}` both decode to the empty message.
pub fn decode_message(value: Option<serde_json::Value>) -> Result<ReplayMessage, ReplayStoreError> {
    match value.filter(|v| !v.is_null()) {
        None => Ok(ReplayMessage::empty()),
        Some(v) => serde_json::from_value(v)
            .map_err(|e| ReplayStoreError::Serialization(format!("decode replay message: {e}"))),
    }
}

pub fn decode_status(raw: &str) -> Result<ReplayStatus, ReplayStoreError> {
    raw.parse()
        .map_err(|e| ReplayStoreError::Serialization(format!("{e}")))
}

/// One stored replay row, independent of the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRecord {
    pub id: ReplayId,
    pub job_id: JobId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
    pub message: serde_json::Value,
    pub execution_tree: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplayRecord {
    pub fn from_spec(replay: &ReplaySpec) -> Result<Self, ReplayStoreError> {
        Ok(Self {
            id: replay.id,
            job_id: replay.job.id,
            start_date: replay.start_date,
            end_date: replay.end_date,
            status: replay.status.as_str().to_string(),
            message: encode_message(&replay.message)?,
            execution_tree: encode_tree(replay.execution_tree.as_ref())?,
            created_at: replay.created_at,
            updated_at: Utc::now(),
        })
    }

    /// Rebuild the domain request around an already loaded root job.
    pub fn into_spec(self, job: JobSpec) -> Result<ReplaySpec, ReplayStoreError> {
        if job.id != self.job_id {
            return Err(ReplayStoreError::Persistence(format!(
                "replay {} references job {}, got {}",
                self.id, self.job_id, job.id
            )));
        }

        Ok(ReplaySpec {
            id: self.id,
            status: decode_status(&self.status)?,
            message: decode_message(Some(self.message))?,
            execution_tree: decode_tree(self.execution_tree)?,
            job,
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use replayer_core::{ProjectSecret, ProjectSpec};
    use serde_json::json;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn project() -> ProjectSpec {
        ProjectSpec::new("analytics").with_secrets(vec![ProjectSecret::new("TOKEN", "hunter2")])
    }

    fn node(name: &str, days: &[u32]) -> ExecutionTreeNode {
        ExecutionTreeNode::new(
            JobSpec::new(name, project(), day(1)),
            days.iter().map(|d| day(*d)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn stored_tree_uses_data_dependents_runs_layout() {
        let tree = node("ingest", &[1, 2]).with_dependent(node("report", &[2]));
        let value = encode_tree(Some(&tree)).unwrap().unwrap();

        assert_eq!(value["data"]["name"], "ingest");
        assert_eq!(value["runs"].as_array().unwrap().len(), 2);
        assert_eq!(value["dependents"][0]["data"]["name"], "report");
    }

    #[test]
    fn stored_tree_never_contains_secrets() {
        let tree = node("ingest", &[1]).with_dependent(node("report", &[1]));
        let value = encode_tree(Some(&tree)).unwrap().unwrap();
        let rendered = value.to_string();

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("TOKEN"));

        let decoded = decode_tree(Some(value)).unwrap().unwrap();
        assert!(decoded.flatten().iter().all(|n| n.job().project.secrets.is_empty()));
        assert_eq!(decoded.flatten().len(), 2);
    }

    #[test]
    fn decode_rejects_node_without_runs() {
        let mut value = encode_tree(Some(&node("ingest", &[1]))).unwrap().unwrap();
        value["runs"] = json!([]);

        let err = decode_tree(Some(value)).unwrap_err();
        assert!(matches!(err, ReplayStoreError::Serialization(_)));
    }

    #[test]
    fn decode_rejects_job_that_is_its_own_ancestor() {
        let tree = node("ingest", &[1])
            .with_dependent(node("transform", &[1]).with_dependent(node("ingest", &[1])));
        let value = encode_tree(Some(&tree)).unwrap();

        let err = decode_tree(value).unwrap_err();
        assert!(matches!(err, ReplayStoreError::Serialization(ref m) if m.contains("depends on itself")));
    }

    #[test]
    fn decode_rejects_malformed_payload() {
        let err = decode_tree(Some(json!({"data": 42}))).unwrap_err();
        assert!(matches!(err, ReplayStoreError::Serialization(_)));
    }

    #[test]
    fn null_tree_decodes_to_none() {
        assert!(decode_tree(Some(serde_json::Value::Null)).unwrap().is_none());
        assert!(decode_tree(None).unwrap().is_none());
    }

    #[test]
    fn message_decoding_treats_null_and_empty_object_alike() {
        assert!(decode_message(None).unwrap().is_empty());
        assert!(decode_message(Some(json!({}))).unwrap().is_empty());
        assert!(decode_message(Some(json!("oops"))).is_err());
    }

    #[test]
    fn unknown_status_is_a_serialization_error() {
        assert!(matches!(
            decode_status("Paused"),
            Err(ReplayStoreError::Serialization(_))
        ));
    }

    #[test]
    fn record_round_trips_replay() {
        let job = JobSpec::new("ingest", project(), day(1));
        let tree = node("ingest", &[1, 3]);
        let replay = ReplaySpec::new(
            job.clone(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            Some(tree),
        )
        .unwrap();

        let record = ReplayRecord::from_spec(&replay).unwrap();
        assert_eq!(record.status, "Created");
        assert_eq!(record.message, json!({}));

        let restored = record.into_spec(job).unwrap();
        assert_eq!(restored.id, replay.id);
        assert_eq!(restored.status, ReplayStatus::Created);
        let restored_tree = restored.execution_tree.unwrap();
        assert_eq!(restored_tree.run_range(), Some(replayer_core::RunRange { start: day(1), end: day(3) }));
    }

    fn arb_tree() -> impl Strategy<Value = ExecutionTreeNode> {
        arb_tree_in(|| ProjectSpec::new("analytics"))
    }

    fn arb_tree_in(project: fn() -> ProjectSpec) -> impl Strategy<Value = ExecutionTreeNode> {
        let leaf = (0usize..50, prop::collection::vec(0i64..500, 1..5)).prop_map(move |(n, hours)| {
            let runs: RunSet = hours.iter().map(|h| day(1) + Duration::hours(*h)).collect();
            ExecutionTreeNode::new(JobSpec::new(format!("job-{n}"), project(), day(1)), runs)
                .unwrap()
        });
        leaf.prop_recursive(3, 24, 4, |inner| {
            (inner.clone(), prop::collection::vec(inner, 0..4)).prop_map(|(mut root, children)| {
                for child in children {
                    root.add_dependent(child);
                }
                root
            })
        })
    }

    fn strip_secrets(node: &ExecutionTreeNode) -> ExecutionTreeNode {
        let mut job = node.job().clone();
        job.project = job.project.without_secrets();
        let mut stripped = ExecutionTreeNode::new(job, node.runs().clone()).unwrap();
        for dependent in node.dependents() {
            stripped.add_dependent(strip_secrets(dependent));
        }
        stripped
    }

    proptest! {
        #[test]
        fn tree_with_secrets_round_trips_without_them(tree in arb_tree_in(project)) {
            let value = serde_json::to_value(ExecutionTreeRecord::from_node(&tree)).unwrap();
            let record: ExecutionTreeRecord = serde_json::from_value(value).unwrap();
            let decoded = record.into_node().unwrap();

            prop_assert!(decoded.flatten().iter().all(|n| n.job().project.secrets.is_empty()));
            prop_assert_ne!(&decoded, &tree);
            prop_assert_eq!(decoded, strip_secrets(&tree));
        }

        #[test]
        fn tree_survives_storage_round_trip(tree in arb_tree()) {
            let encoded = ExecutionTreeRecord::from_node(&tree);
            let value = serde_json::to_value(&encoded).unwrap();
            let decoded: ExecutionTreeRecord = serde_json::from_value(value).unwrap();

            prop_assert_eq!(&decoded, &encoded);
            prop_assert_eq!(decoded.into_node().unwrap(), tree);
        }
    }
}
