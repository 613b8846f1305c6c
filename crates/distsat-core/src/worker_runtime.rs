use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, warn};

use distsat_common::{ApplicationKind, JobId, Revision};
use distsat_solver_ipc::SegmentNamer;

use crate::api::{StatusSnapshot, WorkerConfig, WorkerEvent, WorkerHandle};
use crate::balancer::{Demand, GlobalBalancer};
use crate::clause_buffer::{bytes_to_ints, ClauseBuffer};
use crate::clause_comm::{ClauseCommunicator, SizeBudget};
use crate::ingress::split_description;
use crate::job::{Job, JobState};
use crate::job_tree::JobTree;
use crate::message::Message;
use crate::permutation::RankPermutation;
use crate::scheduler::{AcceptanceDecision, LocalScheduler};
use crate::solver_adapter::{checksum_bytes, SolverProcessAdapter};
use crate::transport::Transport;

pub(crate) struct WorkerInner {
    pub(crate) event_tx: broadcast::Sender<WorkerEvent>,
    pub(crate) snapshot_rx: watch::Receiver<StatusSnapshot>,
    stop_requested: AtomicBool,
    notify: Notify,
}

impl WorkerInner {
    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            let _ = self.event_tx.send(WorkerEvent::StopRequested);
            self.notify.notify_waiters();
        }
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// The per-rank run loop: owns the Local Scheduler's held-node bookkeeping,
/// this rank's position in every job tree it participates in, the solver
/// process driving each job it actually hosts, and the Global Balancer state
/// if this rank happens to be coordinating a round. Structured around a
/// single `tokio::select!` loop reacting to inbound transport messages and a
/// periodic scheduling tick, the same shape the teacher's in-process engine
/// drives its worker pool through.
struct WorkerRuntime {
    transport: Arc<dyn Transport>,
    scheduler: LocalScheduler,
    communicators: HashMap<JobId, ClauseCommunicator>,
    balancer: GlobalBalancer,
    world_size: u32,
    global_capacity: u32,
    scheduling_tick: Duration,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    inner: Arc<WorkerInner>,
    jobs: HashMap<JobId, Job>,
    trees: HashMap<JobId, JobTree>,
    descriptions: HashMap<JobId, (Revision, Vec<u8>)>,
    solvers: HashMap<JobId, SolverProcessAdapter>,
    volumes: HashMap<JobId, (u64, u32)>,
    solver_program: String,
    solver_args: Vec<String>,
}

impl WorkerRuntime {
    fn build_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            stop_requested: self.inner.should_stop(),
            held_positions: self.scheduler.held_positions(),
            balancing_epoch: self.balancer.epoch(),
        }
    }

    fn push_snapshot(&self) {
        let _ = self.snapshot_tx.send(self.build_snapshot());
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn own_rank(&self) -> u32 {
        self.transport.rank()
    }

    fn namer_for(&self, job_id: JobId) -> SegmentNamer {
        SegmentNamer::new("distsat", std::process::id(), self.own_rank(), job_id)
    }

    async fn send(&self, destination: u32, message: Message) {
        if let Err(err) = self.transport.send(destination, message).await {
            warn!(destination, %err, "failed to deliver message");
        }
    }

    async fn handle_request_node(&mut self, request: crate::message::JobRequest) {
        let decision = self.scheduler.evaluate(&request);
        match decision {
            AcceptanceDecision::Accept => {
                self.scheduler.adopt(&request);
                let world_size = self.world_size;
                let own_rank = self.own_rank();
                let tree = self
                    .trees
                    .entry(request.job_id)
                    .or_insert_with(|| JobTree::new(world_size, own_rank, request.job_id));
                tree.update(request.tree_position, request.root_rank, Some(request.requester_rank));
                self.jobs.entry(request.job_id).or_insert_with(|| {
                    Job::new(
                        request.job_id,
                        ApplicationKind::Sat,
                        request.priority,
                        0.0,
                        crate::job::GrowthKind::Continuous,
                        None,
                    )
                });
                self.emit(WorkerEvent::NodeAdopted {
                    job_id: request.job_id,
                    tree_position: request.tree_position,
                });
                self.send(
                    request.requester_rank,
                    Message::OfferAdoption {
                        job_id: request.job_id,
                        tree_position: request.tree_position,
                        responder_rank: self.own_rank(),
                    },
                )
                .await;
            }
            AcceptanceDecision::Reject { reason } => {
                self.send(
                    request.requester_rank,
                    Message::RejectAdoption {
                        job_id: request.job_id,
                        tree_position: request.tree_position,
                        responder_rank: self.own_rank(),
                        reason: reason.to_string(),
                    },
                )
                .await;
            }
            AcceptanceDecision::Forward { forwarded } => {
                // No cluster membership view at this layer; a real deployment
                // would pick a random live rank. The loopback transport used
                // in tests and local scenarios only ever has a handful of
                // ranks, so a simple next-rank walk is enough to exercise
                // the forwarding path end to end.
                let next = (self.own_rank() + 1) % self.world_size.max(1);
                self.send(next, Message::RequestNode(forwarded)).await;
            }
        }
        self.push_snapshot();
    }

    async fn handle_offer_adoption(&mut self, job_id: JobId, tree_position: u32, responder_rank: u32) {
        let is_left = match self.trees.get(&job_id) {
            Some(tree) => tree.left_child_index() == Some(tree_position),
            None => {
                warn!(job_id, tree_position, "offer received for an untracked tree");
                return;
            }
        };
        if let Some(tree) = self.trees.get_mut(&job_id) {
            if is_left {
                tree.set_left_child(responder_rank);
            } else {
                tree.set_right_child(responder_rank);
            }
        }
        if let Some((revision, payload)) = self.descriptions.get(&job_id).cloned() {
            self.send(
                responder_rank,
                Message::SendJobDescription {
                    job_id,
                    revision,
                    payload,
                },
            )
            .await;
        }
    }

    fn handle_gather_clauses(&mut self, job_id: JobId, buffer: Vec<u8>) {
        let ints = bytes_to_ints(&buffer);
        match ClauseBuffer::decode(&ints, true) {
            Ok(decoded) => {
                self.communicators
                    .entry(job_id)
                    .or_insert_with(|| ClauseCommunicator::new(job_id, SizeBudget::default()))
                    .receive_from_child(decoded);
            }
            Err(err) => {
                self.emit(WorkerEvent::Warning {
                    message: format!("dropped malformed clause buffer for job {job_id}: {err}"),
                });
            }
        }
    }

    async fn handle_distribute_clauses(&mut self, job_id: JobId, buffer: Vec<u8>) {
        let children = self.children_of(job_id);
        for child in children {
            self.send(
                child,
                Message::DistributeClauses {
                    job_id,
                    buffer: buffer.clone(),
                },
            )
            .await;
        }
        if let Some(solver) = self.solvers.get_mut(&job_id) {
            let ints = bytes_to_ints(&buffer);
            match ClauseBuffer::decode(&ints, true) {
                Ok(_) => {
                    let checksum = checksum_bytes(&buffer);
                    if let Err(err) = solver.request_import(&buffer, checksum) {
                        warn!(job_id, %err, "failed to stage clause import");
                    }
                }
                Err(err) => {
                    self.emit(WorkerEvent::Warning {
                        message: format!("dropped malformed distributed clause buffer for job {job_id}: {err}"),
                    });
                }
            }
        }
    }

    fn children_of(&self, job_id: JobId) -> Vec<u32> {
        match self.trees.get(&job_id) {
            Some(tree) => [tree.left_child_rank(), tree.right_child_rank()]
                .into_iter()
                .flatten()
                .collect(),
            None => Vec::new(),
        }
    }

    async fn handle_send_job_description(&mut self, job_id: JobId, revision: Revision, payload: Vec<u8>) {
        self.descriptions.insert(job_id, (revision, payload.clone()));

        let job = self.jobs.entry(job_id).or_insert_with(|| {
            Job::new(job_id, ApplicationKind::Sat, distsat_common::Priority::DEFAULT, 0.0, crate::job::GrowthKind::Continuous, None)
        });
        let _ = job.transition(JobState::Committed);
        let _ = job.transition(JobState::Active);

        let (formula, assumptions) = split_description(&payload);
        if !self.solvers.contains_key(&job_id) {
            let namer = self.namer_for(job_id);
            match SolverProcessAdapter::spawn(job_id, &namer, &self.solver_program, &self.solver_args) {
                Ok(adapter) => {
                    self.solvers.insert(job_id, adapter);
                }
                Err(err) => {
                    self.emit(WorkerEvent::Error {
                        message: format!("failed to spawn solver for job {job_id}: {err}"),
                    });
                    return;
                }
            }
        }
        if let Some(solver) = self.solvers.get_mut(&job_id) {
            if let Err(err) = solver.start_revision(revision, &formula, &assumptions) {
                self.emit(WorkerEvent::Error {
                    message: format!("failed to start revision {revision} for job {job_id}: {err}"),
                });
            }
        }

        for child in self.children_of(job_id) {
            self.send(
                child,
                Message::SendJobDescription {
                    job_id,
                    revision,
                    payload: payload.clone(),
                },
            )
            .await;
        }
    }

    async fn handle_query_volume(&mut self, job_id: JobId, requester_rank: u32) {
        if let Some(&(balancing_epoch, volume)) = self.volumes.get(&job_id) {
            self.send(
                requester_rank,
                Message::NotifyVolumeUpdate {
                    job_id,
                    balancing_epoch,
                    volume,
                },
            )
            .await;
        }
    }

    async fn handle_notify_volume_update(&mut self, job_id: JobId, balancing_epoch: u64, volume: u32) {
        self.volumes.insert(job_id, (balancing_epoch, volume));
        self.emit(WorkerEvent::VolumeUpdated {
            job_id,
            balancing_epoch,
            volume,
        });
        for child in self.children_of(job_id) {
            self.send(
                child,
                Message::NotifyVolumeUpdate {
                    job_id,
                    balancing_epoch,
                    volume,
                },
            )
            .await;
        }
    }

    async fn handle_submit_job(
        &mut self,
        job_id: JobId,
        application: ApplicationKind,
        priority: distsat_common::Priority,
        revision: Revision,
        growth_period_secs: f64,
        max_demand: Option<u32>,
        payload: Vec<u8>,
    ) {
        let mut tree = JobTree::new(self.world_size, self.own_rank(), job_id);
        tree.update(0, self.own_rank(), None);
        self.trees.insert(job_id, tree);

        let mut job = Job::new(job_id, application, priority, growth_period_secs, crate::job::GrowthKind::Continuous, max_demand);
        let _ = job.transition(JobState::Committed);
        let _ = job.transition(JobState::Active);
        self.jobs.insert(job_id, job);

        self.emit(WorkerEvent::NodeAdopted { job_id, tree_position: 0 });
        self.handle_send_job_description(job_id, revision, payload).await;
        self.push_snapshot();
    }

    async fn handle_notify_job_done(&mut self, job_id: JobId, result_code: i32) {
        self.scheduler.release_job(job_id);
        self.communicators.remove(&job_id);
        self.volumes.remove(&job_id);
        if let Some(mut solver) = self.solvers.remove(&job_id) {
            let _ = solver.abort();
            solver.free_shared_memory();
        }
        if let Some(mut job) = self.jobs.remove(&job_id) {
            let _ = job.transition(JobState::Past);
            let _ = job.transition(JobState::Destructible);
        }
        self.trees.remove(&job_id);
        self.emit(WorkerEvent::JobFinished { job_id, result_code });
        self.push_snapshot();
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::RequestNode(request) => self.handle_request_node(request).await,
            Message::GatherClauses { job_id, buffer } => self.handle_gather_clauses(job_id, buffer),
            Message::DistributeClauses { job_id, buffer } => self.handle_distribute_clauses(job_id, buffer).await,
            Message::NotifyVolumeUpdate {
                job_id,
                balancing_epoch,
                volume,
            } => self.handle_notify_volume_update(job_id, balancing_epoch, volume).await,
            Message::NotifyJobDone { job_id, result_code } => self.handle_notify_job_done(job_id, result_code).await,
            Message::OfferAdoption {
                job_id,
                tree_position,
                responder_rank,
            } => self.handle_offer_adoption(job_id, tree_position, responder_rank).await,
            Message::RejectAdoption {
                job_id,
                tree_position,
                responder_rank,
                reason,
            } => {
                debug!(job_id, tree_position, responder_rank, reason, "adoption rejected");
            }
            Message::SendJobDescription { job_id, revision, payload } => {
                self.handle_send_job_description(job_id, revision, payload).await
            }
            Message::QueryVolume { job_id, requester_rank } => self.handle_query_volume(job_id, requester_rank).await,
            Message::SubmitJob {
                job_id,
                application,
                priority,
                revision,
                growth_period_secs,
                max_demand,
                payload,
            } => {
                self.handle_submit_job(job_id, application, priority, revision, growth_period_secs, max_demand, payload)
                    .await
            }
        }
    }

    /// Seek a still-missing child for every tree node this rank holds whose
    /// job currently demands more volume than it has children for, by
    /// directing a request at the rank the job's permutation assigns to
    /// that logical position.
    async fn seek_children(&mut self) {
        let job_ids: Vec<JobId> = self.trees.keys().copied().collect();
        for job_id in job_ids {
            let Some(job) = self.jobs.get(&job_id) else { continue };
            let demand = job.current_demand(self.global_capacity);
            let priority = job.priority();
            let Some(tree) = self.trees.get(&job_id) else { continue };
            let Some(root_rank) = tree.root_rank() else { continue };
            let Some(revision) = self.descriptions.get(&job_id).map(|(rev, _)| *rev) else {
                continue;
            };
            let permutation = RankPermutation::for_job(job_id, self.world_size);
            let epoch = self.balancer.epoch();

            let mut wanted = Vec::new();
            if tree.left_child_rank().is_none() {
                if let Some(index) = tree.left_child_index() {
                    if index < demand {
                        wanted.push(index);
                    }
                }
            }
            if tree.right_child_rank().is_none() {
                if let Some(index) = tree.right_child_index() {
                    if index < demand {
                        wanted.push(index);
                    }
                }
            }

            for index in wanted {
                let target = permutation.to_rank(index, self.world_size);
                let request = LocalScheduler::build_directed_request(
                    job_id,
                    self.own_rank(),
                    root_rank,
                    index,
                    priority,
                    epoch,
                    revision,
                );
                self.send(target, Message::RequestNode(request)).await;
            }
        }
    }

    fn tick_temperatures(&mut self) {
        let dt = self.scheduling_tick.as_secs_f64();
        for job in self.jobs.values_mut() {
            job.tick_temperature(dt);
        }
    }

    async fn tick_balancer(&mut self) {
        let demands: Vec<Demand> = self
            .trees
            .iter()
            .filter(|(_, tree)| tree.is_root())
            .filter_map(|(job_id, _)| {
                self.jobs.get(job_id).map(|job| Demand {
                    job_id: *job_id,
                    priority: job.priority(),
                    demand: job.current_demand(self.global_capacity),
                })
            })
            .collect();
        if demands.is_empty() {
            return;
        }
        let epoch = match self.balancer.start_round() {
            Ok(epoch) => epoch,
            Err(_) => return,
        };
        let volumes = match self.balancer.finish_round(&demands, self.global_capacity) {
            Ok(volumes) => volumes,
            Err(_) => return,
        };
        for (job_id, volume) in volumes {
            self.volumes.insert(job_id, (epoch, volume));
            self.emit(WorkerEvent::VolumeUpdated {
                job_id,
                balancing_epoch: epoch,
                volume,
            });
            for child in self.children_of(job_id) {
                self.send(
                    child,
                    Message::NotifyVolumeUpdate {
                        job_id,
                        balancing_epoch: epoch,
                        volume,
                    },
                )
                .await;
            }
        }
    }

    async fn poll_solvers(&mut self) {
        let finished: Vec<(JobId, Revision, i32)> = self
            .solvers
            .iter_mut()
            .filter_map(|(job_id, solver)| {
                solver
                    .poll_solution()
                    .map(|(revision, verdict, _model)| (*job_id, revision, verdict.code()))
            })
            .collect();

        for (job_id, _revision, result_code) in finished {
            let parent = self.trees.get(&job_id).and_then(|tree| tree.parent_rank());
            match parent {
                Some(parent_rank) => self.send(parent_rank, Message::NotifyJobDone { job_id, result_code }).await,
                None => self.handle_notify_job_done(job_id, result_code).await,
            }
        }
    }

    async fn on_tick(&mut self) {
        self.tick_temperatures();
        self.tick_balancer().await;
        self.seek_children().await;
        self.poll_solvers().await;
        self.push_snapshot();
    }

    async fn run(mut self) -> anyhow::Result<()> {
        self.emit(WorkerEvent::Started);
        self.push_snapshot();

        let mut tick = tokio::time::interval(self.scheduling_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if self.inner.should_stop() {
                break;
            }

            tokio::select! {
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                _ = self.inner.notify.notified() => {}
                received = self.transport.recv() => {
                    match received {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }

        self.emit(WorkerEvent::Stopped);
        self.push_snapshot();
        Ok(())
    }
}

pub(crate) fn start_worker(config: WorkerConfig, transport: Arc<dyn Transport>) -> WorkerHandle {
    let (event_tx, _) = broadcast::channel(1024);
    let (snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::default());

    let inner = Arc::new(WorkerInner {
        event_tx,
        snapshot_rx,
        stop_requested: AtomicBool::new(false),
        notify: Notify::new(),
    });

    let runtime = WorkerRuntime {
        transport,
        scheduler: LocalScheduler::new(),
        communicators: HashMap::new(),
        balancer: GlobalBalancer::new(),
        world_size: config.world_size,
        global_capacity: config.global_capacity,
        scheduling_tick: config.scheduling_tick,
        snapshot_tx,
        inner: inner.clone(),
        jobs: HashMap::new(),
        trees: HashMap::new(),
        descriptions: HashMap::new(),
        solvers: HashMap::new(),
        volumes: HashMap::new(),
        solver_program: config.solver_program,
        solver_args: config.solver_args,
    };

    let join = tokio::spawn(runtime.run());
    WorkerHandle { inner, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JobRequest, RequestKind};
    use distsat_common::Priority;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn accepts_a_directed_request_and_replies_with_an_offer() {
        let mut cluster = crate::transport::ChannelTransport::build_cluster(2);
        let requester = cluster.remove(0);
        let responder = Arc::new(cluster.remove(0));

        let config = WorkerConfig {
            rank: 1,
            world_size: 2,
            global_capacity: 8,
            scheduling_tick: StdDuration::from_millis(50),
            solver_program: "true".to_string(),
            solver_args: Vec::new(),
        };
        let handle = crate::api::start_worker(config, responder);

        let request = JobRequest {
            job_id: 1,
            requester_rank: 0,
            root_rank: 1,
            tree_position: 0,
            priority: Priority::DEFAULT,
            balancing_epoch: 1,
            desired_revision: 0,
            kind: RequestKind::Directed,
        };
        requester.send(1, Message::RequestNode(request)).await.unwrap();

        let reply = requester.recv().await.unwrap();
        assert_eq!(
            reply,
            Message::OfferAdoption {
                job_id: 1,
                tree_position: 0,
                responder_rank: 1,
            }
        );

        handle.request_stop();
        handle.wait().await.unwrap();
    }
}
