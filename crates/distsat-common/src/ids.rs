use serde::{Deserialize, Serialize};

/// Globally unique job identifier.
pub type JobId = i32;

/// Monotonically growing index of incremental formula updates for a job.
pub type Revision = i32;

/// Job scheduling priority; higher sorts first in acceptance/tie-break decisions.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Priority(pub f32);

impl Priority {
    /// The default priority assigned to a job with no explicit priority field.
    pub const DEFAULT: Priority = Priority(1.0);
}

impl Eq for Priority {}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// The application a job's payload should be run under.
///
/// Only `Sat` is implemented by this platform; the cube-and-conquer variant
/// is an out-of-scope collaborator named for completeness of the wire enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationKind {
    /// Plain portfolio SAT solving.
    Sat,
    /// Cube-and-conquer SAT solving (out of scope; carried for wire compatibility).
    SatCubeAndConquer,
}
