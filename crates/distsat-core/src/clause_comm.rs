use distsat_common::JobId;

use crate::clause_buffer::ClauseBuffer;

/// Starting per-node export budget, in wire ints, before any gather round has
/// run. Matches `CLAUSE_EXCHANGE_INITIAL_SIZE` from the original sharing
/// configuration.
pub const CLAUSE_EXCHANGE_INITIAL_SIZE: usize = 1500;

/// Growth multiplier applied to the sum of a node's children's buffer sizes
/// to compute its own outgoing size budget. Matches `CLAUSE_EXCHANGE_MULTIPLIER`.
pub const CLAUSE_EXCHANGE_MULTIPLIER: usize = 3;

/// Upper bound no node's outgoing buffer may exceed regardless of how much
/// its subtree produced, keeping a single gather round's bandwidth bounded
/// independent of job size ("tree-bounded" in §4.5).
#[derive(Debug, Clone, Copy)]
pub struct SizeBudget {
    max_size: usize,
}

impl SizeBudget {
    /// A budget capped at `max_size` wire ints.
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// `outSize = min(max, multiplier * sum(inSizes))`, with a node that has
    /// no children yet (a leaf, or a node still waiting on offers) using the
    /// initial size instead of a multiple of zero.
    pub fn grow(&self, child_sizes: &[usize]) -> usize {
        if child_sizes.is_empty() {
            return self.max_size.min(CLAUSE_EXCHANGE_INITIAL_SIZE);
        }
        let summed: usize = child_sizes.iter().sum();
        self.max_size.min(CLAUSE_EXCHANGE_MULTIPLIER * summed)
    }
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self::new(CLAUSE_EXCHANGE_INITIAL_SIZE * CLAUSE_EXCHANGE_MULTIPLIER * CLAUSE_EXCHANGE_MULTIPLIER)
    }
}

/// Drives one job's anytime, tree-bounded clause exchange: gathers each
/// node's own learned clauses plus everything already gathered from its
/// children, shrinks the result to the node's current size budget, and
/// (at the root) hands the merged buffer back down for broadcast (§4.5).
///
/// "Anytime" means a gather round that times out with some children not
/// yet reported is not wasted: whatever was gathered so far is still used,
/// just omitting the stragglers' contributions for this round.
pub struct ClauseCommunicator {
    job_id: JobId,
    budget: SizeBudget,
    child_sizes: Vec<usize>,
    pending: Vec<ClauseBuffer>,
}

impl ClauseCommunicator {
    /// Start a fresh communicator for `job_id` bounded by `budget`.
    pub fn new(job_id: JobId, budget: SizeBudget) -> Self {
        Self {
            job_id,
            budget,
            child_sizes: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// The job this communicator serves.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Record a child's contribution to the current gather round. Children
    /// that never report (crashed, still busy) simply never call this, and
    /// `finish_round` proceeds without them — the "anytime" property.
    pub fn receive_from_child(&mut self, buffer: ClauseBuffer) {
        self.child_sizes.push(buffer.payload_size());
        self.pending.push(buffer);
    }

    /// This node's own newly learned clauses, always included regardless of
    /// how many children reported.
    pub fn receive_own(&mut self, buffer: ClauseBuffer) {
        self.pending.push(buffer);
    }

    /// Merge everything gathered so far and shrink it to this node's size
    /// budget (computed from however many children actually reported this
    /// round), keeping the clauses with the lowest LBD first since those are
    /// the most valuable to propagate further up or back down the tree.
    pub fn finish_round(&mut self) -> ClauseBuffer {
        let mut merged: Vec<_> = self
            .pending
            .drain(..)
            .flat_map(ClauseBuffer::into_clauses)
            .collect();
        merged.sort_by_key(|c| (c.lbd, c.size()));

        let limit = self.budget.grow(&self.child_sizes);
        self.child_sizes.clear();

        let mut out = ClauseBuffer::new();
        let mut used = 0usize;
        for clause in merged {
            let cost = if clause.size() <= crate::clause_buffer::MAX_LBD_PARTITIONED_SIZE {
                clause.literals.len()
            } else if clause.size() <= crate::clause_buffer::MAX_FIXED_BUCKET_SIZE {
                1 + clause.literals.len()
            } else {
                2 + clause.literals.len()
            };
            if used + cost > limit {
                break;
            }
            used += cost;
            out.push(clause);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause_buffer::Clause;

    fn clause(literals: &[i32], lbd: i32) -> Clause {
        Clause {
            literals: literals.to_vec(),
            lbd,
        }
    }

    #[test]
    fn leaf_with_no_children_uses_initial_budget() {
        let budget = SizeBudget::new(10_000_000);
        assert_eq!(budget.grow(&[]), CLAUSE_EXCHANGE_INITIAL_SIZE);
    }

    #[test]
    fn growth_is_bounded_by_max_size() {
        let budget = SizeBudget::new(100);
        assert_eq!(budget.grow(&[1000, 1000]), 100);
    }

    #[test]
    fn growth_multiplies_summed_child_sizes() {
        let budget = SizeBudget::new(10_000);
        assert_eq!(budget.grow(&[10, 20]), 90);
    }

    #[test]
    fn finish_round_proceeds_without_stragglers() {
        let mut comm = ClauseCommunicator::new(1, SizeBudget::default());
        comm.receive_own(ClauseBuffer::from_clauses(vec![clause(&[1, 2], 2)]));
        comm.receive_from_child(ClauseBuffer::from_clauses(vec![clause(&[3, 4], 2)]));
        // A third child never reports this round.
        let merged = comm.finish_round();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn finish_round_prefers_low_lbd_clauses_under_pressure() {
        let mut comm = ClauseCommunicator::new(1, SizeBudget::new(2));
        comm.receive_own(ClauseBuffer::from_clauses(vec![
            clause(&[1, 2], 5),
            clause(&[3, 4], 1),
        ]));
        let merged = comm.finish_round();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.clauses()[0].lbd, 1);
    }
}
