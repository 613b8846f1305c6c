use std::collections::BTreeMap;

use distsat_common::{JobId, Priority};

use crate::error::BalancerError;

/// One job's balancing input for a round: its priority weight and current demand.
#[derive(Debug, Clone, Copy)]
pub struct Demand {
    /// The job this demand belongs to.
    pub job_id: JobId,
    /// Scheduling priority, used as the water-filling weight.
    pub priority: Priority,
    /// Requested volume (tree node count), see `job::compute_demand`.
    pub demand: u32,
}

/// The cluster-wide Global Balancer (§4.6): runs epoch-numbered rounds of
/// iterative, priority-weighted water-filling over all active jobs' demand,
/// producing a volume assignment with `sum(volumes) <= capacity`.
#[derive(Debug, Default)]
pub struct GlobalBalancer {
    epoch: u64,
    round_in_progress: bool,
}

impl GlobalBalancer {
    /// A balancer starting at epoch 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch number.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Begin a new balancing round, bumping the epoch. Errors if a round is
    /// already in progress (rounds don't overlap: a new one only starts once
    /// `finish_round` closes the previous one).
    pub fn start_round(&mut self) -> Result<u64, BalancerError> {
        if self.round_in_progress {
            return Err(BalancerError::EpochInProgress { epoch: self.epoch });
        }
        self.epoch += 1;
        self.round_in_progress = true;
        Ok(self.epoch)
    }

    /// Run the water-filling allocation for the round started by
    /// `start_round` and close it out. `capacity` is the cluster-wide volume
    /// cap (Σ V_j ≤ capacity).
    ///
    /// Jobs are first iteratively capped at their own demand wherever their
    /// priority-weighted share would exceed it, freeing capacity for the
    /// remaining jobs; what's left after every job is either capped or
    /// saturating its share is distributed proportionally, with any
    /// flooring remainder handed out one unit at a time in ascending job-id
    /// order so the result is fully deterministic.
    pub fn finish_round(
        &mut self,
        demands: &[Demand],
        capacity: u32,
    ) -> Result<BTreeMap<JobId, u32>, BalancerError> {
        self.round_in_progress = false;

        let mut volumes: BTreeMap<JobId, u32> = BTreeMap::new();
        let mut active: Vec<&Demand> = demands.iter().collect();
        let mut remaining_capacity = capacity as f64;

        loop {
            let total_weight: f64 = active.iter().map(|d| d.priority.0 as f64).sum();
            if active.is_empty() || total_weight <= 0.0 {
                break;
            }
            let share_per_weight = remaining_capacity / total_weight;

            let mut newly_capped = Vec::new();
            for d in &active {
                let tentative = share_per_weight * d.priority.0 as f64;
                if tentative >= d.demand as f64 {
                    newly_capped.push(d.job_id);
                }
            }

            if newly_capped.is_empty() {
                // Every remaining job is under its share; distribute proportionally.
                let mut fractional: Vec<(JobId, f64)> = Vec::new();
                let mut allocated = 0u32;
                for d in &active {
                    let exact = share_per_weight * d.priority.0 as f64;
                    let floor = exact.floor();
                    volumes.insert(d.job_id, floor as u32);
                    allocated += floor as u32;
                    fractional.push((d.job_id, exact - floor));
                }
                let mut leftover = (remaining_capacity.floor() as u32).saturating_sub(allocated);
                fractional.sort_by(|a, b| a.0.cmp(&b.0));
                let mut idx = 0;
                while leftover > 0 && !fractional.is_empty() {
                    let job_id = fractional[idx % fractional.len()].0;
                    *volumes.get_mut(&job_id).expect("inserted above") += 1;
                    leftover -= 1;
                    idx += 1;
                }
                break;
            }

            for job_id in &newly_capped {
                let d = active.iter().find(|d| d.job_id == *job_id).unwrap();
                volumes.insert(*job_id, d.demand);
                remaining_capacity -= d.demand as f64;
            }
            active.retain(|d| !newly_capped.contains(&d.job_id));
        }

        Ok(volumes)
    }

    /// Given a job shrinking from `old_volume` to `new_volume` tree nodes,
    /// the logical tree positions that must be released, highest first. The
    /// root (position 0) is never included unless the job's volume drops to
    /// zero entirely, since a job that still holds any node at all should
    /// keep coordinating through its root.
    pub fn release_order(old_volume: u32, new_volume: u32) -> Vec<u32> {
        if old_volume <= new_volume {
            return Vec::new();
        }
        let floor = if new_volume == 0 { 0 } else { new_volume };
        (floor..old_volume).rev().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_demand_jobs_get_capped_at_their_own_demand() {
        let mut balancer = GlobalBalancer::new();
        balancer.start_round().unwrap();
        let demands = vec![
            Demand { job_id: 1, priority: Priority(1.0), demand: 2 },
            Demand { job_id: 2, priority: Priority(1.0), demand: 100 },
        ];
        let volumes = balancer.finish_round(&demands, 20).unwrap();
        assert_eq!(volumes[&1], 2);
        assert_eq!(volumes[&2], 18);
    }

    #[test]
    fn total_volume_never_exceeds_capacity() {
        let mut balancer = GlobalBalancer::new();
        balancer.start_round().unwrap();
        let demands = vec![
            Demand { job_id: 1, priority: Priority(3.0), demand: 1000 },
            Demand { job_id: 2, priority: Priority(1.0), demand: 1000 },
            Demand { job_id: 3, priority: Priority(2.0), demand: 1000 },
        ];
        let volumes = balancer.finish_round(&demands, 17).unwrap();
        let total: u32 = volumes.values().sum();
        assert!(total <= 17);
    }

    #[test]
    fn higher_priority_jobs_receive_a_larger_share() {
        let mut balancer = GlobalBalancer::new();
        balancer.start_round().unwrap();
        let demands = vec![
            Demand { job_id: 1, priority: Priority(3.0), demand: 1000 },
            Demand { job_id: 2, priority: Priority(1.0), demand: 1000 },
        ];
        let volumes = balancer.finish_round(&demands, 40).unwrap();
        assert!(volumes[&1] > volumes[&2]);
    }

    #[test]
    fn cannot_start_a_round_while_one_is_in_progress() {
        let mut balancer = GlobalBalancer::new();
        balancer.start_round().unwrap();
        assert!(balancer.start_round().is_err());
    }

    #[test]
    fn release_order_keeps_root_until_volume_hits_zero() {
        let order = GlobalBalancer::release_order(5, 2);
        assert_eq!(order, vec![4, 3, 2]);
        assert!(!order.contains(&0));

        let order_to_zero = GlobalBalancer::release_order(3, 0);
        assert_eq!(order_to_zero, vec![2, 1, 0]);
    }
}
