use distsat_common::{JobId, Revision};

/// Builds the path-like shared-memory segment keys from §6:
/// `<prefix>.<pid>.<rank>.#<jobid>[.<suffix>]`.
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    base: String,
}

impl SegmentNamer {
    /// `prefix` is the platform-wide namespace (e.g. `distsat`), `pid` is the
    /// worker process id, `rank` is this worker's rank, `job_id` the job.
    pub fn new(prefix: &str, pid: u32, rank: u32, job_id: JobId) -> Self {
        Self {
            base: format!("{prefix}.{pid}.{rank}.#{job_id}"),
        }
    }

    /// The bare control-block segment key (no suffix).
    pub fn control_block(&self) -> String {
        self.base.clone()
    }

    fn suffixed(&self, suffix: &str) -> String {
        format!("{}.{}", self.base, suffix)
    }

    /// `<base>.formulae.<rev>`
    pub fn formulae(&self, revision: Revision) -> String {
        self.suffixed(&format!("formulae.{revision}"))
    }

    /// `<base>.assumptions.<rev>`
    pub fn assumptions(&self, revision: Revision) -> String {
        self.suffixed(&format!("assumptions.{revision}"))
    }

    /// `<base>.fsize.<rev>`
    pub fn fsize(&self, revision: Revision) -> String {
        self.suffixed(&format!("fsize.{revision}"))
    }

    /// `<base>.asize.<rev>`
    pub fn asize(&self, revision: Revision) -> String {
        self.suffixed(&format!("asize.{revision}"))
    }

    /// `<base>.checksum.<rev>`
    pub fn checksum(&self, revision: Revision) -> String {
        self.suffixed(&format!("checksum.{revision}"))
    }

    /// `<base>.solution.<rev>`
    pub fn solution(&self, revision: Revision) -> String {
        self.suffixed(&format!("solution.{revision}"))
    }

    /// `<base>.solutionsize.<rev>`
    pub fn solution_size(&self, revision: Revision) -> String {
        self.suffixed(&format!("solutionsize.{revision}"))
    }

    /// `<base>.clauseexport`
    pub fn clause_export(&self) -> String {
        self.suffixed("clauseexport")
    }

    /// `<base>.clauseimport`
    pub fn clause_import(&self) -> String {
        self.suffixed("clauseimport")
    }
}
