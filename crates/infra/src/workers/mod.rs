//! Background workers.

pub mod lease;
pub mod replay_worker;

pub use lease::{ReplayLease, ReplayLeases};
pub use replay_worker::{ReplayWorker, ReplayWorkerError, WorkerConfig};
