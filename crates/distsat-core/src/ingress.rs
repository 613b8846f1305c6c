use serde::{Deserialize, Serialize};

use distsat_common::{ApplicationKind, JobId, Priority};

use crate::clause_buffer::ints_to_bytes;
use crate::error::IngressError;

/// Pack `formula` and `assumptions` (already wire-encoded little-endian int
/// bytes) into the single payload `Message::SendJobDescription`/`SubmitJob`
/// carry: a 4-byte little-endian formula length prefix, the formula bytes,
/// then the assumption bytes.
pub fn encode_description(formula: &[u8], assumptions: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + formula.len() + assumptions.len());
    out.extend_from_slice(&(formula.len() as u32).to_le_bytes());
    out.extend_from_slice(formula);
    out.extend_from_slice(assumptions);
    out
}

/// Inverse of [`encode_description`]. A payload shorter than the length
/// prefix claims is treated as an empty assumption tail rather than an error,
/// since the worker runtime never has a reason to reject its own wire format.
pub fn split_description(payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
    if payload.len() < 4 {
        return (Vec::new(), Vec::new());
    }
    let formula_len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let rest = &payload[4..];
    let formula_len = formula_len.min(rest.len());
    let (formula, assumptions) = rest.split_at(formula_len);
    (formula.to_vec(), assumptions.to_vec())
}

/// The externally submitted description of a job to run (§7). This is the
/// JSON shape a client posts; it is translated into a `job::Job` plus its
/// initial formula/assumption payload once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Caller-assigned job identifier; must be unique cluster-wide.
    pub job_id: JobId,
    /// Which application should run the payload.
    #[serde(default = "default_application")]
    pub application: ApplicationKind,
    /// Scheduling priority; defaults to `Priority::DEFAULT` if omitted.
    #[serde(default = "default_priority")]
    pub priority: Priority,
    /// Growth period in seconds for the job's demand curve; `0` disables
    /// growth (the job always demands its maximum immediately).
    #[serde(default)]
    pub growth_period_secs: f64,
    /// The job's own declared maximum demand (tree node count), applied as
    /// the final clamp after the cluster-wide cap.
    pub max_demand: Option<u32>,
    /// Base64-free raw DIMACS-style literal ints for the formula.
    pub formula: Vec<i32>,
    /// Optional assumption literals for incremental solving.
    #[serde(default)]
    pub assumptions: Vec<i32>,
}

fn default_application() -> ApplicationKind {
    ApplicationKind::Sat
}

fn default_priority() -> Priority {
    Priority::DEFAULT
}

impl JobSubmission {
    /// Parse and validate a job submission from its JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, IngressError> {
        let submission: JobSubmission = serde_json::from_slice(bytes)?;
        submission.validate()?;
        Ok(submission)
    }

    fn validate(&self) -> Result<(), IngressError> {
        if self.formula.is_empty() {
            return Err(IngressError::Invalid(format!(
                "job {} submitted with an empty formula",
                self.job_id
            )));
        }
        if self.growth_period_secs < 0.0 {
            return Err(IngressError::Invalid(format!(
                "job {} submitted with a negative growth period",
                self.job_id
            )));
        }
        if let Some(max) = self.max_demand {
            if max == 0 {
                return Err(IngressError::Invalid(format!(
                    "job {} submitted with a zero max demand",
                    self.job_id
                )));
            }
        }
        Ok(())
    }

    /// Encode this submission's formula and assumptions into the single
    /// payload a `SubmitJob`/`SendJobDescription` message carries.
    pub fn to_description_payload(&self) -> Vec<u8> {
        encode_description(&ints_to_bytes(&self.formula), &ints_to_bytes(&self.assumptions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause_buffer::bytes_to_ints;

    #[test]
    fn parses_a_minimal_submission() {
        let json = br#"{"job_id": 1, "formula": [1, -2, 0]}"#;
        let submission = JobSubmission::from_json(json).unwrap();
        assert_eq!(submission.job_id, 1);
        assert_eq!(submission.priority, Priority::DEFAULT);
        assert_eq!(submission.application, ApplicationKind::Sat);
    }

    #[test]
    fn rejects_an_empty_formula() {
        let json = br#"{"job_id": 1, "formula": []}"#;
        assert!(JobSubmission::from_json(json).is_err());
    }

    #[test]
    fn rejects_a_negative_growth_period() {
        let json = br#"{"job_id": 1, "formula": [1, 0], "growth_period_secs": -1.0}"#;
        assert!(JobSubmission::from_json(json).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(JobSubmission::from_json(b"not json").is_err());
    }

    #[test]
    fn description_payload_round_trips_formula_and_assumptions() {
        let json = br#"{"job_id": 1, "formula": [1, -2, 0], "assumptions": [3]}"#;
        let submission = JobSubmission::from_json(json).unwrap();
        let payload = submission.to_description_payload();
        let (formula, assumptions) = split_description(&payload);
        assert_eq!(bytes_to_ints(&formula), submission.formula);
        assert_eq!(bytes_to_ints(&assumptions), submission.assumptions);
    }

    #[test]
    fn a_payload_shorter_than_its_length_prefix_claims_yields_empty_assumptions() {
        let (formula, assumptions) = split_description(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3]);
        assert_eq!(formula, vec![1, 2, 3]);
        assert!(assumptions.is_empty());
    }
}
