use serde::{Deserialize, Serialize};

/// Satisfiability verdict reported by a solver child process.
///
/// Numeric values mirror the result codes used on the wire
/// (`RESULT_UNKNOWN`/`RESULT_SAT`/`RESULT_UNSAT`): `Unknown = 0`,
/// `Sat = 10`, `Unsat = 20`. Keeping the original gaps leaves room for the
/// cube-and-conquer job variant's extra result codes without renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum Verdict {
    /// No conclusive result yet (or the job was concluded without one).
    Unknown = 0,
    /// Satisfiable; a model accompanies this verdict.
    Sat = 10,
    /// Unsatisfiable, optionally with a certified UNSAT assumption subset.
    Unsat = 20,
}

impl Verdict {
    /// Decode a raw result code as read out of the shared control block.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Verdict::Unknown),
            10 => Some(Verdict::Sat),
            20 => Some(Verdict::Unsat),
            _ => None,
        }
    }

    /// Encode back to the raw wire/control-block representation.
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_codes() {
        for v in [Verdict::Unknown, Verdict::Sat, Verdict::Unsat] {
            assert_eq!(Verdict::from_code(v.code()), Some(v));
        }
    }

    #[test]
    fn rejects_unknown_codes() {
        assert_eq!(Verdict::from_code(7), None);
    }
}
