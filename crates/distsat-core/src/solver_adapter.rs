use std::collections::HashMap;
use std::sync::atomic::Ordering;

use distsat_common::{Checksum, JobId, Revision, Verdict};
use distsat_solver_ipc::{
    ControlBlockSegment, PayloadSegment, ProcessControlError, SegmentNamer, ShmemIpcError, SolverProcess,
};

use crate::clause_comm::{CLAUSE_EXCHANGE_INITIAL_SIZE, CLAUSE_EXCHANGE_MULTIPLIER};

/// Fixed capacity (in bytes) given to every formula/assumption/export/
/// import/solution segment this adapter creates. Reuses `clause_comm`'s
/// worst-case gather size (times 4 bytes/int) so a job's largest plausible
/// clause exchange round always fits without a resize.
pub const TRANSFER_SEGMENT_CAPACITY: usize =
    CLAUSE_EXCHANGE_INITIAL_SIZE * CLAUSE_EXCHANGE_MULTIPLIER * CLAUSE_EXCHANGE_MULTIPLIER * 4;

/// The lifecycle state a `SolverProcessAdapter` believes its child is in,
/// mirroring the Job State Machine's `Active`/`Suspended` distinction but
/// scoped to just this one process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvingState {
    /// Running normally.
    Active,
    /// Stopped via `SIGSTOP`, retaining its memory.
    Suspended,
    /// Shutting down; any outstanding import has been discarded.
    Aborting,
}

/// Errors from `solver_adapter`, wrapping the lower-level IPC crate's errors
/// with the job context they occurred under.
#[derive(Debug, thiserror::Error)]
pub enum SolverAdapterError {
    /// Forwarded from process control.
    #[error(transparent)]
    Process(#[from] ProcessControlError),
    /// Forwarded from shared memory mapping.
    #[error(transparent)]
    Shmem(#[from] ShmemIpcError),
}

/// Owns one job's solver child process, its control-block segment, and the
/// per-revision/export/import payload segments the control block's
/// `do_*`/`did_*` flags gate access to, translating the Job State Machine's
/// intent (start a revision, request an export/import round, abort) into the
/// shared-memory handshake the child polls, and the child's acknowledgements
/// back into facts the worker's run loop can act on (§4.2, §6).
pub struct SolverProcessAdapter {
    job_id: JobId,
    namer: SegmentNamer,
    process: SolverProcess,
    control: ControlBlockSegment,
    state: SolvingState,
    formulae: HashMap<Revision, PayloadSegment>,
    assumptions: HashMap<Revision, PayloadSegment>,
    solutions: HashMap<Revision, PayloadSegment>,
    export: Option<PayloadSegment>,
    import: Option<PayloadSegment>,
}

impl SolverProcessAdapter {
    /// Fork the solver binary and lay down its control-block segment under
    /// the naming convention in `naming::SegmentNamer`.
    pub fn spawn(
        job_id: JobId,
        namer: &SegmentNamer,
        program: &str,
        args: &[String],
    ) -> Result<Self, SolverAdapterError> {
        let control = ControlBlockSegment::create(&namer.control_block())?;
        let process = SolverProcess::spawn(program, args)?;
        Ok(Self {
            job_id,
            namer: namer.clone(),
            process,
            control,
            state: SolvingState::Active,
            formulae: HashMap::new(),
            assumptions: HashMap::new(),
            solutions: HashMap::new(),
            export: None,
            import: None,
        })
    }

    /// The job this adapter drives.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Current solving state as tracked by the worker.
    pub fn state(&self) -> SolvingState {
        self.state
    }

    /// Ask the child to begin solving `revision`: stage `formula` and
    /// `assumptions` into freshly created segments (pre-creating that
    /// revision's solution segment too, since the child never creates
    /// segments itself), then flip the handshake flags.
    pub fn start_revision(
        &mut self,
        revision: Revision,
        formula: &[u8],
        assumptions: &[u8],
    ) -> Result<(), SolverAdapterError> {
        let mut formula_segment = PayloadSegment::create(&self.namer.formulae(revision), TRANSFER_SEGMENT_CAPACITY)?;
        formula_segment.write(formula);
        self.formulae.insert(revision, formula_segment);

        let mut assumption_segment =
            PayloadSegment::create(&self.namer.assumptions(revision), TRANSFER_SEGMENT_CAPACITY)?;
        assumption_segment.write(assumptions);
        self.assumptions.insert(revision, assumption_segment);

        self.solutions.entry(revision).or_insert(
            PayloadSegment::create(&self.namer.solution(revision), TRANSFER_SEGMENT_CAPACITY)?,
        );

        let block = self.control.block();
        block.revision.store(revision, Ordering::SeqCst);
        block.formula_size.store(formula.len() as i64, Ordering::SeqCst);
        block.assumption_size.store(assumptions.len() as i64, Ordering::SeqCst);
        block.did_start_next_revision.store(false, Ordering::SeqCst);
        block.do_start_next_revision.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the child has acknowledged the most recently requested revision.
    pub fn revision_started(&mut self) -> bool {
        self.control.block().did_start_next_revision.load(Ordering::SeqCst)
    }

    /// Evict the solver from the CPU without losing its state (Active -> Suspended).
    pub fn suspend(&mut self) -> Result<(), SolverAdapterError> {
        self.process.suspend()?;
        self.state = SolvingState::Suspended;
        Ok(())
    }

    /// Reinstate a previously suspended solver (Suspended -> Active).
    pub fn resume(&mut self) -> Result<(), SolverAdapterError> {
        self.process.resume()?;
        self.state = SolvingState::Active;
        Ok(())
    }

    /// Ask the child to gather its learned clauses into the export segment,
    /// creating it on first use.
    pub fn request_export(&mut self, max_size: i64) -> Result<(), SolverAdapterError> {
        if self.export.is_none() {
            self.export = Some(PayloadSegment::create(&self.namer.clause_export(), TRANSFER_SEGMENT_CAPACITY)?);
        }
        let block = self.control.block();
        block.export_buffer_max_size.store(max_size, Ordering::SeqCst);
        block.did_export.store(false, Ordering::SeqCst);
        block.do_export.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the child has finished writing the export segment, and its
    /// true (used) clause literal bytes and checksum if so.
    pub fn exported(&mut self) -> Option<(Vec<u8>, u64)> {
        let block = self.control.block();
        if !block.did_export.load(Ordering::SeqCst) {
            return None;
        }
        let size = block.export_buffer_true_size.load(Ordering::SeqCst).max(0) as usize;
        let checksum = block.export_checksum.load(Ordering::SeqCst);
        let bytes = self.export.as_mut()?.read(size.min(TRANSFER_SEGMENT_CAPACITY));
        Some((bytes, checksum))
    }

    /// Ask the child to ingest a distributed clause buffer, staging `payload`
    /// into the import segment (created on first use). If the adapter is
    /// mid-`Aborting`, the request is dropped instead (see `abort`): a child
    /// shutting down should never be asked to service one more import round.
    pub fn request_import(&mut self, payload: &[u8], checksum: u64) -> Result<(), SolverAdapterError> {
        if self.state == SolvingState::Aborting {
            return Ok(());
        }
        if self.import.is_none() {
            self.import = Some(PayloadSegment::create(&self.namer.clause_import(), TRANSFER_SEGMENT_CAPACITY)?);
        }
        self.import.as_mut().expect("just created above").write(payload);

        let block = self.control.block();
        block.import_buffer_size.store(payload.len() as i64, Ordering::SeqCst);
        block.import_checksum.store(checksum, Ordering::SeqCst);
        block.did_import.store(false, Ordering::SeqCst);
        block.do_import.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the child has finished consuming the most recent import.
    pub fn imported(&mut self) -> bool {
        self.control.block().did_import.load(Ordering::SeqCst)
    }

    /// Non-blocking check for a solution. Returns the verdict and model
    /// bytes once the child has set `has_solution`.
    pub fn poll_solution(&mut self) -> Option<(Revision, Verdict, Vec<u8>)> {
        let block = self.control.block();
        if !block.has_solution.load(Ordering::SeqCst) {
            return None;
        }
        let revision = block.solution_revision.load(Ordering::SeqCst);
        let code = block.result_code.load(Ordering::SeqCst);
        let size = block.solution_size.load(Ordering::SeqCst).max(0) as usize;
        let model = match self.solutions.get_mut(&revision) {
            Some(segment) => segment.read(size.min(TRANSFER_SEGMENT_CAPACITY)),
            None => Vec::new(),
        };
        Some((revision, Verdict::from_code(code).unwrap_or(Verdict::Unknown), model))
    }

    /// Tear the solver down: discard any import the child hasn't yet
    /// consumed (resolving the abort-vs-import race by always preferring
    /// abort), then request termination and send `SIGTERM` as a backstop.
    pub fn abort(&mut self) -> Result<(), SolverAdapterError> {
        self.state = SolvingState::Aborting;
        self.control.block().request_abort(Ordering::SeqCst);
        self.process.terminate()?;
        Ok(())
    }

    /// Whether the child has exited.
    pub fn has_exited(&mut self) -> bool {
        self.process.poll_exited()
    }

    /// Drop every mapped segment (formulae, assumptions, solutions, export,
    /// import), unlinking each from the OS once no other handle references
    /// it. Called once the job this adapter drives reaches `Destructible`.
    pub fn free_shared_memory(&mut self) {
        self.formulae.clear();
        self.assumptions.clear();
        self.solutions.clear();
        self.export = None;
        self.import = None;
    }
}

/// Checksum a byte payload the same way the clause-sharing wire format does,
/// for callers staging an import/export segment outside a `ClauseBuffer`.
pub fn checksum_bytes(bytes: &[u8]) -> u64 {
    let mut checksum = Checksum::new();
    for chunk in bytes.chunks(4) {
        let mut buf = [0u8; 4];
        buf[..chunk.len()].copy_from_slice(chunk);
        checksum.combine_i32(i32::from_le_bytes(buf));
    }
    checksum.value()
}
