//! Execution tree: the job being replayed plus every job downstream of it.
//!
//! Each node owns its dependents outright, so the structure is a tree by
//! construction. The same job may still show up under several parents (diamond
//! dependencies); [`ExecutionTreeNode::flatten`] collapses those repeats so each
//! job is cleared once.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::job::JobSpec;
use crate::value_object::ValueObject;

/// Distinct run instants of a job, kept in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSet(BTreeSet<DateTime<Utc>>);

impl RunSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a run; returns `false` if it was already present.
    pub fn insert(&mut self, run: DateTime<Utc>) -> bool {
        self.0.insert(run)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<DateTime<Utc>> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.0.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.0.iter().copied()
    }

    /// Earliest and latest run, or `None` for an empty set.
    pub fn range(&self) -> Option<RunRange> {
        Some(RunRange {
            start: self.first()?,
            end: self.last()?,
        })
    }
}

impl FromIterator<DateTime<Utc>> for RunSet {
    fn from_iter<I: IntoIterator<Item = DateTime<Utc>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl ValueObject for RunSet {}

/// Inclusive time span handed to the scheduler's clear operation.
///
/// Covers every instant between the first and last run, including instants
/// that were not themselves selected for replay.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One job in the execution tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTreeNode {
    job: JobSpec,
    dependents: Vec<ExecutionTreeNode>,
    runs: RunSet,
}

impl ExecutionTreeNode {
    /// Create a leaf node. Fails if `runs` is empty.
    pub fn new(job: JobSpec, runs: RunSet) -> DomainResult<Self> {
        if runs.is_empty() {
            return Err(DomainError::invariant(format!(
                "execution tree node '{}' has no runs",
                job.name
            )));
        }
        Ok(Self {
            job,
            dependents: Vec::new(),
            runs,
        })
    }

    pub fn with_dependent(mut self, dependent: ExecutionTreeNode) -> Self {
        self.dependents.push(dependent);
        self
    }

    pub fn add_dependent(&mut self, dependent: ExecutionTreeNode) {
        self.dependents.push(dependent);
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn dependents(&self) -> &[ExecutionTreeNode] {
        &self.dependents
    }

    pub fn runs(&self) -> &RunSet {
        &self.runs
    }

    /// Span from this node's earliest to latest run.
    ///
    /// Always `Some` for nodes built through [`ExecutionTreeNode::new`].
    pub fn run_range(&self) -> Option<RunRange> {
        self.runs.range()
    }

    /// Every node in the tree (this one included), one entry per job name.
    ///
    /// Nodes are returned in pre-order; when a job is reachable along several
    /// paths the first occurrence is kept.
    pub fn flatten(&self) -> Vec<&ExecutionTreeNode> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            if !seen.insert(node.name()) {
                continue;
            }
            out.push(node);
            // Reverse so the first dependent is visited first.
            stack.extend(node.dependents.iter().rev());
        }

        out
    }

    /// Check structural invariants of a tree that came from outside (e.g. storage).
    ///
    /// - every node has at least one run
    /// - no job is its own ancestor
    pub fn validate(&self) -> DomainResult<()> {
        let mut path: Vec<&str> = Vec::new();
        self.validate_at(&mut path)
    }

    fn validate_at<'a>(&'a self, path: &mut Vec<&'a str>) -> DomainResult<()> {
        if self.runs.is_empty() {
            return Err(DomainError::invariant(format!(
                "execution tree node '{}' has no runs",
                self.name()
            )));
        }
        if path.contains(&self.name()) {
            return Err(DomainError::invariant(format!(
                "job '{}' depends on itself ({} -> {})",
                self.name(),
                path.join(" -> "),
                self.name()
            )));
        }

        path.push(self.name());
        for dependent in &self.dependents {
            dependent.validate_at(path)?;
        }
        path.pop();
        Ok(())
    }
}
