use std::collections::HashMap;

use distsat_common::{JobId, Priority, Revision};

use crate::message::{JobRequest, RequestKind};

/// Maximum number of ranks an undirected `JobRequest` is allowed to visit
/// before the local scheduler gives up forwarding it further.
pub const MAX_UNDIRECTED_HOPS: u32 = 16;

/// A job request this rank is currently holding a node for, used to decide
/// whether an incoming competing request should displace it.
#[derive(Debug, Clone)]
struct HeldNode {
    job_id: JobId,
    priority: Priority,
    balancing_epoch: u64,
}

/// Outcome of presenting an incoming `JobRequest` to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptanceDecision {
    /// Accept and adopt the node, evicting whatever was previously held (if
    /// anything) at that tree position.
    Accept,
    /// Reject: a currently held node wins the tie-break, or this rank is
    /// not idle and the request cannot be forwarded further.
    Reject {
        /// Human-readable reason, carried back for diagnostics.
        reason: &'static str,
    },
    /// This rank is occupied but the request is undirected and has hops
    /// left; forward it on rather than rejecting outright.
    Forward {
        /// The request with its hop count incremented.
        forwarded: JobRequest,
    },
}

/// The per-rank Local Scheduler (§4.4): tracks which tree node(s) this rank
/// currently holds and decides whether to accept, reject, or forward each
/// incoming `JobRequest`.
#[derive(Debug, Default)]
pub struct LocalScheduler {
    held: HashMap<u32, HeldNode>,
}

impl LocalScheduler {
    /// A scheduler for a rank holding nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this rank currently holds any tree node.
    pub fn is_idle(&self) -> bool {
        self.held.is_empty()
    }

    /// Build a directed request for a specific known-idle rank (e.g. a tree
    /// node's own child, discovered via `QueryVolume`). Directed requests
    /// are one-shot: if rejected, the sender must pick a new target rather
    /// than retry the same one.
    pub fn build_directed_request(
        job_id: JobId,
        requester_rank: u32,
        root_rank: u32,
        tree_position: u32,
        priority: Priority,
        balancing_epoch: u64,
        desired_revision: Revision,
    ) -> JobRequest {
        JobRequest {
            job_id,
            requester_rank,
            root_rank,
            tree_position,
            priority,
            balancing_epoch,
            desired_revision: desired_revision.max(0),
            kind: RequestKind::Directed,
        }
    }

    /// Build an undirected request with no specific target, eligible for
    /// random-walk forwarding by receivers that can't accept it themselves.
    pub fn build_undirected_request(
        job_id: JobId,
        requester_rank: u32,
        root_rank: u32,
        tree_position: u32,
        priority: Priority,
        balancing_epoch: u64,
        desired_revision: Revision,
    ) -> JobRequest {
        JobRequest {
            job_id,
            requester_rank,
            root_rank,
            tree_position,
            priority,
            balancing_epoch,
            desired_revision: desired_revision.max(0),
            kind: RequestKind::Undirected { hops: 0 },
        }
    }

    /// Present an incoming request to this rank's scheduler and decide its fate.
    ///
    /// Acceptance policy: if this rank holds nothing at the requested tree
    /// position, accept. If it holds a node there already, the incoming
    /// request only displaces it if its tie-break key
    /// (epoch, then priority, then job id) beats the held node's; otherwise
    /// reject, or forward onward if the request is undirected and has hops
    /// left.
    pub fn evaluate(&mut self, request: &JobRequest) -> AcceptanceDecision {
        match self.held.get(&request.tree_position) {
            None => AcceptanceDecision::Accept,
            Some(held) => {
                let held_key = (held.balancing_epoch, held.priority, std::cmp::Reverse(held.job_id));
                if request.tie_break_key() > held_key {
                    AcceptanceDecision::Accept
                } else {
                    self.forward_or_reject(request, "a higher-priority node is already held here")
                }
            }
        }
    }

    fn forward_or_reject(&self, request: &JobRequest, reason: &'static str) -> AcceptanceDecision {
        match request.kind {
            RequestKind::Directed => AcceptanceDecision::Reject { reason },
            RequestKind::Undirected { hops } if hops + 1 < MAX_UNDIRECTED_HOPS => {
                let mut forwarded = request.clone();
                forwarded.kind = RequestKind::Undirected { hops: hops + 1 };
                AcceptanceDecision::Forward { forwarded }
            }
            RequestKind::Undirected { .. } => AcceptanceDecision::Reject {
                reason: "undirected request exhausted its hop budget",
            },
        }
    }

    /// Record that this rank now holds `tree_position` for `job_id`, e.g.
    /// after `evaluate` returned `Accept`.
    pub fn adopt(&mut self, request: &JobRequest) {
        self.held.insert(
            request.tree_position,
            HeldNode {
                job_id: request.job_id,
                priority: request.priority,
                balancing_epoch: request.balancing_epoch,
            },
        );
    }

    /// All (job, tree position) pairs this rank currently holds.
    pub fn held_positions(&self) -> Vec<(JobId, u32)> {
        self.held
            .iter()
            .map(|(&position, held)| (held.job_id, position))
            .collect()
    }

    /// Release every tree position held for `job_id`, e.g. once it finishes.
    pub fn release_job(&mut self, job_id: JobId) {
        self.held.retain(|_, held| held.job_id != job_id);
    }

    /// Release a previously held tree position, e.g. once its job finishes.
    pub fn release(&mut self, tree_position: u32) {
        self.held.remove(&tree_position);
    }
}
