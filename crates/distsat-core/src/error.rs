use thiserror::Error;

use distsat_common::JobId;
use distsat_solver_ipc::{ProcessControlError, ShmemIpcError};

/// Errors surfaced by the clause-sharing wire codec (§6).
#[derive(Debug, Error)]
pub enum ClauseBufferError {
    /// A bucket claimed more clauses than remain in the buffer.
    #[error("clause buffer bucket for size {size} claims {claimed} clauses but only {remaining} ints remain")]
    TruncatedBucket {
        /// The literal-count bucket being decoded.
        size: i32,
        /// Number of clauses the bucket header claimed.
        claimed: i32,
        /// Ints actually left in the buffer.
        remaining: usize,
    },
    /// The trailing checksum did not match the recomputed one.
    #[error("clause buffer checksum mismatch: header={header:#x} computed={computed:#x}")]
    ChecksumMismatch {
        /// Checksum read from the wire.
        header: u64,
        /// Checksum recomputed from the payload.
        computed: u64,
    },
}

/// Errors raised while driving a job through the Job State Machine (§4.3).
#[derive(Debug, Error)]
pub enum JobError {
    /// Requested a state transition the state machine does not allow.
    #[error("job {job_id} cannot transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// The job the transition was attempted on.
        job_id: JobId,
        /// The state the job was in.
        from: &'static str,
        /// The state requested.
        to: &'static str,
    },
}

/// Errors raised by the Local Scheduler (§4.4).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A `JobRequest` named a job the scheduler has no tree position for.
    #[error("no local job tree state for job {job_id}")]
    UnknownJob {
        /// The job named in the request.
        job_id: JobId,
    },
}

/// Errors raised by the Global Balancer (§4.6).
#[derive(Debug, Error)]
pub enum BalancerError {
    /// A balancing round was started while one was already in progress.
    #[error("balancing epoch {epoch} already in progress")]
    EpochInProgress {
        /// The epoch that is mid-flight.
        epoch: u64,
    },
}

/// Errors raised while ingesting an externally submitted job description (§7).
#[derive(Debug, Error)]
pub enum IngressError {
    /// The submitted payload failed to parse as a job description.
    #[error("malformed job submission: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The submitted payload parsed but violated a domain constraint.
    #[error("invalid job submission: {0}")]
    Invalid(String),
}

/// Top-level error type a worker's run loop can surface. Component errors
/// convert into this via `?`; each variant names the component so a fatal
/// error's log line always identifies where in the pipeline it originated.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Error from the clause-sharing wire codec.
    #[error("clause buffer: {0}")]
    ClauseBuffer(#[from] ClauseBufferError),
    /// Error from the Job State Machine.
    #[error("job: {0}")]
    Job(#[from] JobError),
    /// Error from the Local Scheduler.
    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
    /// Error from the Global Balancer.
    #[error("balancer: {0}")]
    Balancer(#[from] BalancerError),
    /// Error from job ingress.
    #[error("ingress: {0}")]
    Ingress(#[from] IngressError),
    /// Error from the solver process boundary.
    #[error("solver ipc: {0}")]
    Process(#[from] ProcessControlError),
    /// Error mapping or opening a shared-memory segment.
    #[error("shared memory: {0}")]
    Shmem(#[from] ShmemIpcError),
    /// Catch-all for composition-boundary failures (I/O, channel closure).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
