#![deny(missing_docs)]
#![deny(unreachable_pub)]

//! The process boundary between a worker and its solver child: named
//! shared-memory control blocks and POSIX process control.
//!
//! This crate deliberately has no knowledge of SAT, clauses, or jobs: it
//! only knows how to stand up a segment under a given key, lay down (or
//! attach to) a [`control_block::SharedControlBlock`], and fork/suspend/
//! resume/terminate the process on the other end. The domain logic that
//! drives these primitives (revision handshakes, import/export buffer
//! staging) lives one layer up.

/// Fixed-layout control-block struct shared between a worker and its solver child.
pub mod control_block;
/// Naming scheme for shared-memory segments.
pub mod naming;
/// POSIX process control (fork/suspend/resume/terminate) for the solver child.
pub mod process;
/// Shared-memory segment creation and attachment.
pub mod shmem;

pub use control_block::SharedControlBlock;
pub use naming::SegmentNamer;
pub use process::{ProcessControlError, ProcessState, SolverProcess};
pub use shmem::{ControlBlockSegment, PayloadSegment, ShmemIpcError, SharedSegment};
