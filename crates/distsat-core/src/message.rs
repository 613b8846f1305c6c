use serde::{Deserialize, Serialize};

use distsat_common::{ApplicationKind, JobId, Priority, Revision};

/// Whether a `JobRequest` is a one-shot directed request to a specific rank
/// or an undirected request eligible to be forwarded on a random walk if the
/// receiving rank can't or won't accept it.
///
/// Mallob encodes this as a raw `hopCount` integer (`-2` for directed,
/// incrementing from `0` for undirected hops); this enum makes the
/// distinction a type instead of a magic number, with the hop count
/// recovered only where the undirected forwarding path actually needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// A specific rank has been chosen (e.g. a known idle child); forward
    /// exactly once and give up if rejected.
    Directed,
    /// No specific target; may be forwarded along a random walk of
    /// candidate ranks, with `hops` counting how many times it already has.
    Undirected {
        /// Number of ranks this request has already visited.
        hops: u32,
    },
}

/// A request to adopt a job tree node, sent by a rank with spare capacity
/// looking for work, or generated by the tree itself looking for a missing
/// child (§4.4, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// The job whose tree node is being requested.
    pub job_id: JobId,
    /// The rank that should receive the `OfferAdoption`/`RejectAdoption` reply.
    pub requester_rank: u32,
    /// The physical rank hosting this job's root, so the receiver can record
    /// it on its own `JobTree` without a separate round trip (always the
    /// requester itself when `tree_position == 0`).
    pub root_rank: u32,
    /// 0-based logical tree position being requested.
    pub tree_position: u32,
    /// The job's priority, used for acceptance comparisons at the receiver.
    pub priority: Priority,
    /// The balancing epoch this request was generated under; receivers
    /// compare this against their own epoch to detect staleness.
    pub balancing_epoch: u64,
    /// Revision of the job description the requester expects to run;
    /// never negative once sent (`desired_revision = max(0, desired_revision)`).
    pub desired_revision: Revision,
    /// Directed vs. undirected dispatch, see [`RequestKind`].
    pub kind: RequestKind,
}

impl JobRequest {
    /// Tie-break ordering used when a rank holds multiple competing
    /// requests for the same tree node: newer (higher) epoch wins; ties on
    /// epoch are broken by priority; remaining ties go to the *lower* job
    /// id (wrapped in `Reverse` so the overall key still orders largest-wins),
    /// so the outcome is deterministic cluster-wide without any extra
    /// coordination.
    pub fn tie_break_key(&self) -> (u64, Priority, std::cmp::Reverse<JobId>) {
        (self.balancing_epoch, self.priority, std::cmp::Reverse(self.job_id))
    }
}

/// All message kinds exchanged between worker ranks (§4.1, §4.4, §4.5, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// See [`JobRequest`].
    RequestNode(JobRequest),
    /// The receiver accepts the request and will host the described node.
    OfferAdoption {
        /// The job whose node is being offered.
        job_id: JobId,
        /// The tree position being offered.
        tree_position: u32,
        /// The rank making the offer, so the requester can record it as a
        /// child on its own `JobTree` and address `SendJobDescription` to it.
        responder_rank: u32,
    },
    /// The receiver declines; the requester must try elsewhere.
    RejectAdoption {
        /// The job whose node was rejected.
        job_id: JobId,
        /// The tree position that was rejected.
        tree_position: u32,
        /// The rank declining, for diagnostics/logging only.
        responder_rank: u32,
        /// Why the receiver declined, for diagnostics/logging only.
        reason: String,
    },
    /// The job description payload itself, sent once a node has accepted an offer.
    SendJobDescription {
        /// The job being described.
        job_id: JobId,
        /// Revision this description corresponds to.
        revision: Revision,
        /// Serialized formula/assumption payload (opaque at this layer).
        payload: Vec<u8>,
    },
    /// Upward pass of the clause-sharing protocol: a node's locally learned
    /// clauses plus everything already gathered from its subtree.
    GatherClauses {
        /// The job these clauses belong to.
        job_id: JobId,
        /// Encoded clause buffer, see `clause_buffer`.
        buffer: Vec<u8>,
    },
    /// Downward pass: the globally selected clause buffer broadcast back
    /// down the tree.
    DistributeClauses {
        /// The job these clauses belong to.
        job_id: JobId,
        /// Encoded clause buffer, see `clause_buffer`.
        buffer: Vec<u8>,
    },
    /// A leaf (or subtree) reports that its solver has finished.
    NotifyJobDone {
        /// The job that finished.
        job_id: JobId,
        /// The verdict code, see `distsat_common::Verdict`.
        result_code: i32,
    },
    /// Ask the tree root (or any ancestor) for the job's currently assigned
    /// volume (number of occupied tree nodes).
    QueryVolume {
        /// The job being queried.
        job_id: JobId,
        /// The rank that should receive the `NotifyVolumeUpdate` reply.
        requester_rank: u32,
    },
    /// Broadcast of a job's updated volume assignment after a balancing round.
    NotifyVolumeUpdate {
        /// The job whose volume changed.
        job_id: JobId,
        /// The balancing epoch this volume was computed under.
        balancing_epoch: u64,
        /// The new volume (number of tree nodes this job may occupy).
        volume: u32,
    },
    /// External ingress (§7): a client hands a job's full description
    /// directly to the rank its root should land on, since there is no
    /// parent yet to offer it through the usual request/offer dance.
    SubmitJob {
        /// The job being submitted.
        job_id: JobId,
        /// Which application should run the payload.
        application: ApplicationKind,
        /// The job's scheduling priority.
        priority: Priority,
        /// Revision this initial description corresponds to (always `0` for
        /// a freshly submitted job).
        revision: Revision,
        /// Growth period in seconds for the job's demand curve, see `job::compute_demand`.
        growth_period_secs: f64,
        /// The job's own declared maximum demand, see `job::compute_demand`.
        max_demand: Option<u32>,
        /// Encoded formula/assumption payload, see `ingress::split_description`.
        payload: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_break_prefers_newer_epoch_first() {
        let older = JobRequest {
            job_id: 5,
            requester_rank: 0,
            root_rank: 0,
            tree_position: 0,
            priority: Priority(10.0),
            balancing_epoch: 1,
            desired_revision: 0,
            kind: RequestKind::Directed,
        };
        let newer = JobRequest {
            balancing_epoch: 2,
            priority: Priority(0.0),
            ..older.clone()
        };
        assert!(newer.tie_break_key() > older.tie_break_key());
    }

    #[test]
    fn tie_break_falls_back_to_priority_then_lower_job_id() {
        let a = JobRequest {
            job_id: 1,
            requester_rank: 0,
            root_rank: 0,
            tree_position: 0,
            priority: Priority(5.0),
            balancing_epoch: 3,
            desired_revision: 0,
            kind: RequestKind::Undirected { hops: 0 },
        };
        let b = JobRequest {
            job_id: 2,
            priority: Priority(5.0),
            ..a.clone()
        };
        assert!(a.tie_break_key() > b.tie_break_key(), "lower job id should win the tie-break");
    }
}
