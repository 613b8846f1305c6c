//! Public API types for the in-process worker runtime.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use distsat_common::JobId;

use crate::transport::Transport;

/// Configuration for one worker's run loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// This worker's own cluster rank.
    pub rank: u32,
    /// Total number of ranks in the cluster.
    pub world_size: u32,
    /// Cluster-wide volume cap enforced by the Global Balancer.
    pub global_capacity: u32,
    /// How often the run loop advances job temperatures and reassesses demand.
    pub scheduling_tick: Duration,
    /// Path to the solver binary this worker forks for each job it hosts.
    pub solver_program: String,
    /// Extra arguments passed to `solver_program` on every spawn.
    pub solver_args: Vec<String>,
}

impl WorkerConfig {
    /// Default scheduling tick, matching the cadence the teacher's engine
    /// samples worker progress at.
    pub const DEFAULT_SCHEDULING_TICK: Duration = Duration::from_millis(200);
}

/// Worker event stream payload, published as jobs move through the tree and
/// the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// The run loop has started.
    Started,
    /// Graceful shutdown has been requested.
    StopRequested,
    /// This rank adopted a tree node for the named job.
    NodeAdopted {
        /// The job whose node was adopted.
        job_id: JobId,
        /// The logical tree position adopted.
        tree_position: u32,
    },
    /// This rank released a tree node for the named job.
    NodeReleased {
        /// The job whose node was released.
        job_id: JobId,
        /// The logical tree position released.
        tree_position: u32,
    },
    /// A job's volume assignment changed after a balancing round.
    VolumeUpdated {
        /// The job whose volume changed.
        job_id: JobId,
        /// The balancing epoch the update was computed under.
        balancing_epoch: u64,
        /// The job's new volume.
        volume: u32,
    },
    /// A job concluded with a verdict.
    JobFinished {
        /// The job that finished.
        job_id: JobId,
        /// The verdict code.
        result_code: i32,
    },
    /// A non-fatal warning.
    Warning {
        /// Warning message.
        message: String,
    },
    /// A non-fatal error.
    Error {
        /// Error message.
        message: String,
    },
    /// The run loop has stopped.
    Stopped,
}

/// Current run loop state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Whether shutdown has been requested.
    pub stop_requested: bool,
    /// Tree positions this rank currently holds, keyed by job.
    pub held_positions: Vec<(JobId, u32)>,
    /// The Global Balancer's current epoch, if this rank is the coordinator.
    pub balancing_epoch: u64,
}

/// Handle to a running worker run loop.
pub struct WorkerHandle {
    pub(crate) inner: Arc<crate::worker_runtime::WorkerInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Start a worker run loop over the given transport.
pub fn start_worker(config: WorkerConfig, transport: Arc<dyn Transport>) -> WorkerHandle {
    crate::worker_runtime::start_worker(config, transport)
}

impl WorkerHandle {
    /// Subscribe to the worker's event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Read the latest status snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Request a graceful shutdown.
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the run loop to exit.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("worker task join error: {err}")),
        }
    }
}
