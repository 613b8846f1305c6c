#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Core, transport-agnostic logic for a malleable distributed SAT-solving
//! platform: per-job binary trees embedded across permuted worker ranks, a
//! local scheduler deciding which tree nodes a rank should hold, a global
//! balancer apportioning cluster capacity across competing jobs, and an
//! anytime tree-bounded clause-sharing protocol between them.
//!
//! Real cluster transport and the native SAT solver binary are both
//! out-of-scope collaborators; this crate depends only on the `Transport`
//! trait and on `distsat-solver-ipc`'s process boundary, so the scheduling
//! and sharing logic here can be driven and tested in-process.

/// Public API for the worker run loop.
pub mod api;

/// Global balancer apportioning cluster capacity across competing jobs.
pub mod balancer;
/// Buffering of clauses awaiting export/import.
pub mod clause_buffer;
/// Clause-sharing protocol between tree nodes.
pub mod clause_comm;
/// Error types shared across this crate's public API.
pub mod error;
/// Entry points for messages arriving from the transport layer.
pub mod ingress;
/// Per-job state tracked by a rank.
pub mod job;
/// Per-job binary tree embedded across permuted worker ranks.
pub mod job_tree;
/// Wire messages exchanged between ranks.
pub mod message;
mod permutation;
/// Local scheduler deciding which tree nodes a rank should hold.
pub mod scheduler;
/// Adapter bridging `distsat-solver-ipc` processes into the worker runtime.
pub mod solver_adapter;
/// Cluster transport abstraction.
pub mod transport;
mod worker_runtime;

pub use api::{start_worker, StatusSnapshot, WorkerConfig, WorkerEvent, WorkerHandle};
pub use error::PlatformError;
pub use permutation::RankPermutation;
