use distsat_common::JobId;

/// One worker's record of its own position in a single job's tree (§4.1).
///
/// This is real per-worker state, not a pure function of the job's
/// [`RankPermutation`](crate::RankPermutation): a node's actual children are
/// whichever ranks accepted an offer to adopt them, which may land on a rank
/// other than the permutation's raw mapping once an undirected request has
/// walked a few hops. Children are populated by `set_left_child`/
/// `set_right_child` once an offer is accepted and cleared by
/// `unset_left_child`/`unset_right_child` on suspend or terminate; the
/// permutation itself is only ever consulted to pick *where to send* a
/// request for a still-missing child, never to answer "who is my child".
#[derive(Debug, Clone)]
pub struct JobTree {
    job_id: JobId,
    comm_size: u32,
    own_rank: u32,
    index: Option<u32>,
    root_rank: Option<u32>,
    parent_rank: Option<u32>,
    left_child_rank: Option<u32>,
    right_child_rank: Option<u32>,
}

impl JobTree {
    /// A tree for `job_id` over a `comm_size`-rank cluster, with no tree
    /// position recorded yet. `update` populates the position once this
    /// worker's `RequestNode` for it is accepted.
    pub fn new(comm_size: u32, own_rank: u32, job_id: JobId) -> Self {
        Self {
            job_id,
            comm_size,
            own_rank,
            index: None,
            root_rank: None,
            parent_rank: None,
            left_child_rank: None,
            right_child_rank: None,
        }
    }

    /// The job this tree belongs to.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The cluster size this tree was built over.
    pub fn comm_size(&self) -> u32 {
        self.comm_size
    }

    /// This worker's logical tree position, once committed.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// The physical rank hosting this job's root. The root's own index is
    /// always 0 and needs no stored root rank: at index 0 this is simply
    /// `own_rank`; everywhere else it is whatever `update` was told.
    pub fn root_rank(&self) -> Option<u32> {
        if self.index == Some(0) {
            Some(self.own_rank)
        } else {
            self.root_rank
        }
    }

    /// The physical rank of this node's parent, `None` at the root or before
    /// this tree has been committed to a position.
    pub fn parent_rank(&self) -> Option<u32> {
        self.parent_rank
    }

    /// The physical rank currently occupying the left child, if adopted.
    pub fn left_child_rank(&self) -> Option<u32> {
        self.left_child_rank
    }

    /// The physical rank currently occupying the right child, if adopted.
    pub fn right_child_rank(&self) -> Option<u32> {
        self.right_child_rank
    }

    /// Logical index of the left child (`2i+1`), `None` before this tree is committed.
    pub fn left_child_index(&self) -> Option<u32> {
        self.index.and_then(|i| i.checked_mul(2)?.checked_add(1))
    }

    /// Logical index of the right child (`2i+2`), `None` before this tree is committed.
    pub fn right_child_index(&self) -> Option<u32> {
        self.index.and_then(|i| i.checked_mul(2)?.checked_add(2))
    }

    /// Whether this worker holds the job's root position.
    pub fn is_root(&self) -> bool {
        self.index == Some(0)
    }

    /// Whether this node should stay childless given the job's current
    /// `demand` (its requested tree-node count): both child slots are
    /// unoccupied, and even the left child's index falls outside the
    /// demanded volume, so there's nothing left to request.
    pub fn is_leaf(&self, demand: u32) -> bool {
        if self.left_child_rank.is_some() || self.right_child_rank.is_some() {
            return false;
        }
        match self.left_child_index() {
            Some(index) => index >= demand,
            None => true,
        }
    }

    /// Record this worker as occupying `index`, with the root/parent ranks
    /// reported by whoever offered the node. Any previously recorded
    /// children are cleared: a fresh commit starts childless until adoption
    /// (re)populates them.
    pub fn update(&mut self, index: u32, root_rank: u32, parent_rank: Option<u32>) {
        self.index = Some(index);
        self.root_rank = if index == 0 { None } else { Some(root_rank) };
        self.parent_rank = parent_rank;
        self.left_child_rank = None;
        self.right_child_rank = None;
    }

    /// Record that `rank` adopted this node's left child.
    pub fn set_left_child(&mut self, rank: u32) {
        self.left_child_rank = Some(rank);
    }

    /// Clear the left child, e.g. on suspend or terminate.
    pub fn unset_left_child(&mut self) {
        self.left_child_rank = None;
    }

    /// Record that `rank` adopted this node's right child.
    pub fn set_right_child(&mut self, rank: u32) {
        self.right_child_rank = Some(rank);
    }

    /// Clear the right child, e.g. on suspend or terminate.
    pub fn unset_right_child(&mut self) {
        self.right_child_rank = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_tree_has_no_position() {
        let tree = JobTree::new(32, 5, 1);
        assert_eq!(tree.index(), None);
        assert_eq!(tree.root_rank(), None);
        assert!(tree.is_leaf(1000), "an uncommitted tree has no children to request");
    }

    #[test]
    fn committing_to_the_root_needs_no_stored_root_rank() {
        let mut tree = JobTree::new(32, 5, 1);
        tree.update(0, 999, None);
        assert!(tree.is_root());
        assert_eq!(tree.root_rank(), Some(5));
        assert_eq!(tree.parent_rank(), None);
    }

    #[test]
    fn committing_to_a_non_root_position_keeps_the_reported_root_and_parent() {
        let mut tree = JobTree::new(32, 5, 1);
        tree.update(2, 11, Some(0));
        assert!(!tree.is_root());
        assert_eq!(tree.root_rank(), Some(11));
        assert_eq!(tree.parent_rank(), Some(0));
        assert_eq!(tree.left_child_index(), Some(5));
        assert_eq!(tree.right_child_index(), Some(6));
    }

    #[test]
    fn children_are_set_and_unset_independently() {
        let mut tree = JobTree::new(32, 5, 1);
        tree.update(0, 5, None);
        assert!(tree.is_leaf(1));

        tree.set_left_child(7);
        assert_eq!(tree.left_child_rank(), Some(7));
        assert!(!tree.is_leaf(10));

        tree.unset_left_child();
        assert_eq!(tree.left_child_rank(), None);
        assert!(tree.is_leaf(1));
    }

    #[test]
    fn is_leaf_reflects_demand_not_just_occupancy() {
        let mut tree = JobTree::new(32, 0, 1);
        tree.update(0, 0, None);
        // Left child index is 1; a demand of 1 only covers this node itself.
        assert!(tree.is_leaf(1));
        // A demand of 2 covers the left child's index too.
        assert!(!tree.is_leaf(2));
    }

    #[test]
    fn a_fresh_commit_clears_stale_children() {
        let mut tree = JobTree::new(32, 5, 1);
        tree.update(0, 5, None);
        tree.set_left_child(7);
        tree.set_right_child(9);

        tree.update(0, 5, None);
        assert_eq!(tree.left_child_rank(), None);
        assert_eq!(tree.right_child_rank(), None);
    }
}
