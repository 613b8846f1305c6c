use distsat_common::{ApplicationKind, JobId, PlatformClock, Priority};

use crate::error::JobError;

/// A job's position in the Job State Machine (§4.3).
///
/// `Active` and `Suspended` form a cycle: the Local Scheduler evicts an
/// active job's solver to make room for a higher-priority one (suspend) and
/// reinstates it later (resume) any number of times before the job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Committed to a worker but its solver has not yet been spawned.
    Inactive,
    /// Accepted by a worker; transitioning towards running.
    Committed,
    /// Solver process running and contributing to the search.
    Active,
    /// Solver process stopped (not killed) to free the worker for other work.
    Suspended,
    /// The job has concluded (solved, cancelled, or failed) but its
    /// resources have not yet been reclaimed.
    Past,
    /// Fully torn down; safe to forget.
    Destructible,
}

impl JobState {
    fn allows(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Inactive, Committed)
                | (Committed, Active)
                | (Active, Suspended)
                | (Suspended, Active)
                | (Active, Past)
                | (Suspended, Past)
                | (Committed, Past)
                | (Inactive, Past)
                | (Past, Destructible)
        )
    }

    fn label(self) -> &'static str {
        match self {
            JobState::Inactive => "inactive",
            JobState::Committed => "committed",
            JobState::Active => "active",
            JobState::Suspended => "suspended",
            JobState::Past => "past",
            JobState::Destructible => "destructible",
        }
    }
}

/// Demand growth formula controlling how fast a job's requested volume
/// expands with age while it is active (§4.3). Both kinds follow the same
/// doubling recurrence `d(0) = 1, d(k) = 2*d(k-1) + 1`, i.e.
/// `demand = 2^(periods+1) - 1`; they differ only in how `periods` (elapsed
/// growth periods) is computed from the job's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GrowthKind {
    /// `periods` is the unfloored `age / period`, so demand climbs smoothly
    /// within a period rather than jumping only at period boundaries.
    Continuous,
    /// `periods` is `floor(age / period)`: demand jumps once per whole
    /// growth period and holds steady in between.
    Discrete,
}

/// Computes a job's current demand (how many tree nodes it would like to
/// occupy) from its age and growth configuration, then clamps it — first to
/// the cluster-wide cap, then to the job's own declared maximum, which is
/// always the last clamp applied so an unusually generous global cap never
/// lets a job exceed what it asked for.
pub fn compute_demand(
    age_secs: f64,
    growth_period_secs: f64,
    growth: GrowthKind,
    global_cap: u32,
    job_max_demand: Option<u32>,
) -> u32 {
    let raw = if growth_period_secs <= 0.0 {
        global_cap
    } else {
        let raw_periods = (age_secs / growth_period_secs).max(0.0);
        let periods = match growth {
            GrowthKind::Continuous => raw_periods,
            GrowthKind::Discrete => raw_periods.floor(),
        };
        let doubled = 2f64.powf(periods + 1.0) - 1.0;
        if doubled >= u32::MAX as f64 {
            u32::MAX
        } else {
            doubled as u32
        }
    };
    let after_global_cap = raw.min(global_cap);
    match job_max_demand {
        Some(max) => after_global_cap.min(max),
        None => after_global_cap,
    }
}

const TEMPERATURE_FIXED_POINT: f64 = 0.95;
const TEMPERATURE_DECAY: f64 = 0.99;
const TEMPERATURE_TAIL_EPSILON_PER_SEC: f64 = f64::EPSILON;

/// A job's scheduling "temperature": starts away from equilibrium and
/// exponentially converges towards a fixed point as the job ages, then
/// (once convergence would otherwise make two jobs' temperatures compare
/// equal) keeps decreasing by a machine-epsilon tail so priority tie-breaks
/// in the Global Balancer still have a strict, deterministic order (§4.6,
/// resolving the "does temperature ever become constant" open question by
/// keeping it strictly monotonic for all time).
#[derive(Debug, Clone, Copy)]
pub struct Temperature {
    value: f64,
    converged: bool,
}

impl Temperature {
    /// Start at `initial`, e.g. a priority-derived starting value above the
    /// fixed point.
    pub fn new(initial: f64) -> Self {
        Self {
            value: initial,
            converged: false,
        }
    }

    /// Current value.
    pub fn value(self) -> f64 {
        self.value
    }

    /// Advance the temperature by one scheduling step (`dt` seconds).
    /// Before convergence this applies exponential decay towards the fixed
    /// point; once the gap closes to machine epsilon it switches to a
    /// strictly decreasing linear tail so the value never stops moving.
    pub fn step(&mut self, dt_secs: f64) {
        if !self.converged {
            let next = TEMPERATURE_FIXED_POINT + (self.value - TEMPERATURE_FIXED_POINT) * TEMPERATURE_DECAY;
            if (next - TEMPERATURE_FIXED_POINT).abs() <= f64::EPSILON {
                self.converged = true;
                self.value = TEMPERATURE_FIXED_POINT;
            } else {
                self.value = next;
            }
        } else {
            self.value -= TEMPERATURE_TAIL_EPSILON_PER_SEC * dt_secs.max(0.0);
        }
    }

    /// Whether the exponential phase has finished and the epsilon tail has
    /// taken over.
    pub fn has_converged(self) -> bool {
        self.converged
    }
}

/// The scheduling-relevant state of one job as tracked by a worker (§4.3).
#[derive(Debug, Clone)]
pub struct Job {
    job_id: JobId,
    application: ApplicationKind,
    priority: Priority,
    state: JobState,
    temperature: Temperature,
    clock: PlatformClock,
    growth_period_secs: f64,
    growth: GrowthKind,
    max_demand: Option<u32>,
}

impl Job {
    /// A freshly committed job (state machine entry point is `Inactive`),
    /// with its demand-growth clock starting now.
    pub fn new(
        job_id: JobId,
        application: ApplicationKind,
        priority: Priority,
        growth_period_secs: f64,
        growth: GrowthKind,
        max_demand: Option<u32>,
    ) -> Self {
        Self {
            job_id,
            application,
            priority,
            state: JobState::Inactive,
            temperature: Temperature::new(1.0),
            clock: PlatformClock::start(),
            growth_period_secs,
            growth,
            max_demand,
        }
    }

    /// Seconds since this job was created, the `age_secs` input to `compute_demand`.
    pub fn age_secs(&self) -> f64 {
        self.clock.elapsed_secs()
    }

    /// This job's current demand, clamped to `global_cap`.
    pub fn current_demand(&self, global_cap: u32) -> u32 {
        compute_demand(self.age_secs(), self.growth_period_secs, self.growth, global_cap, self.max_demand)
    }

    /// The job's identifier.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Which application runs this job's payload.
    pub fn application(&self) -> ApplicationKind {
        self.application
    }

    /// The job's static priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Current state-machine state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Current temperature value.
    pub fn temperature(&self) -> f64 {
        self.temperature.value()
    }

    /// Advance this job's temperature by `dt_secs`.
    pub fn tick_temperature(&mut self, dt_secs: f64) {
        self.temperature.step(dt_secs);
    }

    /// Attempt a state transition, rejecting it if the state machine
    /// disallows it from the job's current state.
    pub fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.allows(next) {
            return Err(JobError::IllegalTransition {
                job_id: self.job_id,
                from: self.state.label(),
                to: next.label(),
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_active_suspended_cycling() {
        let mut job = Job::new(1, ApplicationKind::Sat, Priority::DEFAULT, 60.0, GrowthKind::Discrete, None);
        job.transition(JobState::Committed).unwrap();
        job.transition(JobState::Active).unwrap();
        job.transition(JobState::Suspended).unwrap();
        job.transition(JobState::Active).unwrap();
        job.transition(JobState::Past).unwrap();
        job.transition(JobState::Destructible).unwrap();
    }

    #[test]
    fn state_machine_rejects_skipping_committed() {
        let mut job = Job::new(1, ApplicationKind::Sat, Priority::DEFAULT, 60.0, GrowthKind::Discrete, None);
        assert!(job.transition(JobState::Active).is_err());
    }

    #[test]
    fn state_machine_rejects_reviving_a_destructible_job() {
        let mut job = Job::new(1, ApplicationKind::Sat, Priority::DEFAULT, 60.0, GrowthKind::Discrete, None);
        job.transition(JobState::Committed).unwrap();
        job.transition(JobState::Past).unwrap();
        job.transition(JobState::Destructible).unwrap();
        assert!(job.transition(JobState::Active).is_err());
    }

    #[test]
    fn continuous_demand_grows_exponentially_with_unfloored_periods() {
        let demand = compute_demand(305.0, 100.0, GrowthKind::Continuous, 1000, None);
        assert_eq!(demand, 15);
    }

    #[test]
    fn discrete_demand_doubles_only_at_whole_periods() {
        let demand = compute_demand(250.0, 100.0, GrowthKind::Discrete, 1000, None);
        assert_eq!(demand, 7);
    }

    #[test]
    fn global_cap_applies_before_job_max_demand() {
        let demand = compute_demand(10_000.0, 1.0, GrowthKind::Discrete, 64, Some(1000));
        assert_eq!(demand, 64);
    }

    #[test]
    fn job_max_demand_is_the_final_clamp() {
        let demand = compute_demand(10_000.0, 1.0, GrowthKind::Continuous, 1000, Some(5));
        assert_eq!(demand, 5);
    }

    #[test]
    fn temperature_converges_then_keeps_strictly_decreasing() {
        let mut temp = Temperature::new(2.0);
        for _ in 0..10_000 {
            temp.step(1.0);
        }
        assert!(temp.has_converged());
        let after_convergence = temp.value();
        temp.step(1.0);
        assert!(temp.value() < after_convergence);
    }
}
