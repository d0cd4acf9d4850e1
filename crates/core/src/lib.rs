//! `replayer-core`: replay domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): the
//! execution tree, replay requests and their status lifecycle, and the job and
//! project specifications they reference.

pub mod entity;
pub mod error;
pub mod id;
pub mod job;
pub mod replay;
pub mod tree;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{JobId, ProjectId, ReplayId};
pub use job::{JobSchedule, JobSpec, JobTask, ProjectSecret, ProjectSpec};
pub use replay::{ReplayMessage, ReplaySpec, ReplayStatus};
pub use tree::{ExecutionTreeNode, RunRange, RunSet};
pub use value_object::ValueObject;
