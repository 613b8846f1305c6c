use std::process::{Child, Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors controlling the child solver process.
#[derive(Debug, Error)]
pub enum ProcessControlError {
    /// Spawning the child binary failed.
    #[error("failed to spawn solver process {program}: {source}")]
    Spawn {
        /// Path or name of the program that could not be spawned.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Sending a POSIX signal to the child failed (e.g. it already exited).
    #[error("failed to signal solver process {pid}: {source}")]
    Signal {
        /// The pid the signal was sent to.
        pid: i32,
        /// The underlying errno.
        #[source]
        source: nix::Error,
    },
}

/// Lifecycle state of the child solver process as tracked by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Forked and running.
    Running,
    /// Stopped with `SIGSTOP`; resumable with `SIGCONT`.
    Suspended,
    /// Exited, normally or by signal.
    Terminated,
}

/// Owns a forked solver child process and exposes the suspend/resume/
/// terminate operations the Local Scheduler drives a job's solver through
/// as it moves between `Active` and `Suspended` (§4.2, §4.4).
///
/// Unlike Mallob's `fork`+`exec` into the same address space via a custom
/// loader, this spawns a genuine child process via `std::process::Command`
/// and controls it purely through POSIX process-group signals, which is the
/// idiomatic Rust equivalent for an out-of-tree solver binary.
pub struct SolverProcess {
    child: Child,
    state: ProcessState,
}

impl SolverProcess {
    /// Fork-exec the solver binary with the given arguments. The child
    /// inherits no stdio beyond what's explicitly wired, matching how a
    /// supervised worker would avoid leaking its own terminal to the solver.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ProcessControlError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessControlError::Spawn {
                program: program.to_string(),
                source,
            })?;
        debug!(pid = child.id(), program, "spawned solver process");
        Ok(Self {
            child,
            state: ProcessState::Running,
        })
    }

    /// OS process id of the solver child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Current tracked lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Stop scheduling the child on the CPU without losing its state, via
    /// `SIGSTOP`. Used when the Local Scheduler evicts a job's solver to
    /// make room for a higher-priority one (`Active` -> `Suspended`).
    pub fn suspend(&mut self) -> Result<(), ProcessControlError> {
        self.signal(Signal::SIGSTOP)?;
        self.state = ProcessState::Suspended;
        Ok(())
    }

    /// Resume a previously suspended child via `SIGCONT`.
    pub fn resume(&mut self) -> Result<(), ProcessControlError> {
        self.signal(Signal::SIGCONT)?;
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Ask the child to exit. The control-block `do_terminate` flag should
    /// be set first so a healthy child shuts down cleanly; this sends
    /// `SIGTERM` as the enforcement backstop for a wedged or unresponsive
    /// one. A suspended process must be resumed before it can act on either.
    pub fn terminate(&mut self) -> Result<(), ProcessControlError> {
        if self.state == ProcessState::Suspended {
            self.resume()?;
        }
        self.signal(Signal::SIGTERM)?;
        Ok(())
    }

    /// Non-blocking check for exit, updating and returning the tracked state.
    pub fn poll_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_status)) => {
                self.state = ProcessState::Terminated;
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(pid = self.pid(), %err, "failed to poll solver process exit status");
                false
            }
        }
    }

    fn signal(&self, signal: Signal) -> Result<(), ProcessControlError> {
        let pid = Pid::from_raw(self.child.id() as i32);
        signal::kill(pid, signal).map_err(|source| ProcessControlError::Signal {
            pid: self.child.id() as i32,
            source,
        })
    }
}

impl Drop for SolverProcess {
    fn drop(&mut self) {
        if self.state != ProcessState::Terminated {
            let _ = self.terminate();
            let _ = self.child.wait();
        }
    }
}
