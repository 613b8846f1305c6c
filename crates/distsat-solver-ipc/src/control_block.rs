use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};

/// The fixed-layout struct mapped onto the control-block shared-memory
/// segment (§4.2). Every field has exactly one writer: fields whose name
/// starts with `do_` are written by the worker and polled by the solver
/// child; fields starting with `did_` are written by the child and polled
/// by the worker. This mirrors the `do*`/`did*` handshake pairs of the
/// original `HordeSharedMemory` struct rather than using a mutex, since the
/// worker must never block on a wedged or crashed child.
#[repr(C)]
pub struct SharedControlBlock {
    // Worker -> child commands.
    /// Worker has requested the child terminate.
    pub do_terminate: AtomicBool,
    /// Worker has requested the child start the next revision.
    pub do_start_next_revision: AtomicBool,
    /// Worker has requested the child dump its stats.
    pub do_dump_stats: AtomicBool,
    /// Worker has requested the child export clauses.
    pub do_export: AtomicBool,
    /// Worker has requested the child import clauses.
    pub do_import: AtomicBool,

    // Child -> worker acknowledgements.
    /// Child has acknowledged `do_terminate`.
    pub did_terminate: AtomicBool,
    /// Child has acknowledged `do_start_next_revision`.
    pub did_start_next_revision: AtomicBool,
    /// Child has acknowledged `do_dump_stats`.
    pub did_dump_stats: AtomicBool,
    /// Child has acknowledged `do_export`.
    pub did_export: AtomicBool,
    /// Child has acknowledged `do_import`.
    pub did_import: AtomicBool,

    // Child -> worker liveness and result flags.
    /// Child process has been spawned.
    pub is_spawned: AtomicBool,
    /// Child has finished initializing.
    pub is_initialized: AtomicBool,
    /// Child has produced a solution for the current revision.
    pub has_solution: AtomicBool,

    // Revision bookkeeping.
    /// Current revision number.
    pub revision: AtomicI32,
    /// Revision number the current solution corresponds to.
    pub solution_revision: AtomicI32,

    // Sizes of the current formula/assumption payloads, in ints.
    /// Size of the current formula payload, in ints.
    pub formula_size: AtomicI64,
    /// Size of the current assumption payload, in ints.
    pub assumption_size: AtomicI64,

    // Clause exchange buffer sizing, shared with `clause_comm`.
    /// Maximum size of the export buffer.
    pub export_buffer_max_size: AtomicI64,
    /// Actual size of the data written into the export buffer.
    pub export_buffer_true_size: AtomicI64,
    /// Size of the import buffer.
    pub import_buffer_size: AtomicI64,
    /// Checksum of the export buffer contents.
    pub export_checksum: AtomicU64,
    /// Checksum of the import buffer contents.
    pub import_checksum: AtomicU64,

    /// The verdict code, see `distsat_common::Verdict`. `0` (`Unknown`) until
    /// `has_solution` is set.
    pub result_code: AtomicI32,

    /// Size in bytes of the model/solution the child wrote into this
    /// revision's solution segment. Meaningful only once `has_solution` is set.
    pub solution_size: AtomicI64,
}

impl SharedControlBlock {
    /// Zero/false-initialized control block, as laid down by the worker
    /// before the child process attaches to the segment.
    pub const fn new() -> Self {
        Self {
            do_terminate: AtomicBool::new(false),
            do_start_next_revision: AtomicBool::new(false),
            do_dump_stats: AtomicBool::new(false),
            do_export: AtomicBool::new(false),
            do_import: AtomicBool::new(false),
            did_terminate: AtomicBool::new(false),
            did_start_next_revision: AtomicBool::new(false),
            did_dump_stats: AtomicBool::new(false),
            did_export: AtomicBool::new(false),
            did_import: AtomicBool::new(false),
            is_spawned: AtomicBool::new(false),
            is_initialized: AtomicBool::new(false),
            has_solution: AtomicBool::new(false),
            revision: AtomicI32::new(0),
            solution_revision: AtomicI32::new(-1),
            formula_size: AtomicI64::new(0),
            assumption_size: AtomicI64::new(0),
            export_buffer_max_size: AtomicI64::new(0),
            export_buffer_true_size: AtomicI64::new(0),
            import_buffer_size: AtomicI64::new(0),
            export_checksum: AtomicU64::new(0),
            import_checksum: AtomicU64::new(0),
            result_code: AtomicI32::new(0),
            solution_size: AtomicI64::new(0),
        }
    }

    /// Write `SAFETY`-bearing raw pointer access into a typed reference over
    /// an already-mapped, already-sized shared memory region. Callers must
    /// ensure `ptr` is aligned and that the region outlives the reference.
    ///
    /// # Safety
    /// `ptr` must point to a region at least `size_of::<SharedControlBlock>()`
    /// bytes long, aligned to `align_of::<SharedControlBlock>()`, and not
    /// concurrently read/written by anything other than atomic accesses on
    /// this struct's fields.
    pub unsafe fn from_raw<'a>(ptr: *mut u8) -> &'a SharedControlBlock {
        unsafe { &*(ptr as *const SharedControlBlock) }
    }

    /// The worker has asked the child to discard any outstanding import and
    /// shut down (resolving the abort-during-import race: a `do_import` the
    /// child never got to consume is simply dropped rather than serviced).
    pub fn request_abort(&self, order: Ordering) {
        self.do_import.store(false, order);
        self.do_terminate.store(true, order);
    }
}

impl Default for SharedControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_block_has_no_solution() {
        let block = SharedControlBlock::new();
        assert!(!block.has_solution.load(Ordering::Relaxed));
        assert_eq!(block.result_code.load(Ordering::Relaxed), 0);
        assert_eq!(block.solution_revision.load(Ordering::Relaxed), -1);
    }

    #[test]
    fn abort_drops_pending_import_and_requests_termination() {
        let block = SharedControlBlock::new();
        block.do_import.store(true, Ordering::Relaxed);
        block.request_abort(Ordering::Relaxed);
        assert!(!block.do_import.load(Ordering::Relaxed));
        assert!(block.do_terminate.load(Ordering::Relaxed));
    }
}
