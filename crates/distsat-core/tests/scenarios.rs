//! End-to-end scenarios exercising several modules together: a job's tree
//! taking shape across ranks, clause sharing between tree nodes, a global
//! balancing round, and the solver process boundary's revision handshake.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use distsat_common::{Priority, Verdict};
use distsat_core::api::{start_worker, WorkerConfig, WorkerEvent};
use distsat_core::balancer::{Demand, GlobalBalancer};
use distsat_core::clause_buffer::{Clause, ClauseBuffer};
use distsat_core::clause_comm::{ClauseCommunicator, SizeBudget};
use distsat_core::job::{Job, JobState};
use distsat_core::message::Message;
use distsat_core::scheduler::LocalScheduler;
use distsat_core::solver_adapter::SolverProcessAdapter;
use distsat_core::transport::{ChannelTransport, Transport};
use distsat_core::RankPermutation;
use distsat_solver_ipc::{ControlBlockSegment, SegmentNamer};

fn cluster(world_size: u32) -> Vec<Arc<dyn Transport>> {
    ChannelTransport::build_cluster(world_size)
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn Transport>)
        .collect()
}

fn worker_config(rank: u32, world_size: u32, global_capacity: u32) -> WorkerConfig {
    WorkerConfig {
        rank,
        world_size,
        global_capacity,
        scheduling_tick: Duration::from_millis(20),
        solver_program: "/bin/sleep".to_string(),
        solver_args: vec!["5".to_string()],
    }
}

async fn next_matching(
    events: &mut tokio::sync::broadcast::Receiver<WorkerEvent>,
    pred: impl Fn(&WorkerEvent) -> bool,
) -> Option<WorkerEvent> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(RecvError::Lagged(_))) => continue,
            _ => return None,
        }
    }
}

/// A two-worker cluster adopts a job's root at whichever rank the job's
/// permutation assigns to position 0, then reports the job finished with a
/// SAT verdict.
#[tokio::test]
async fn two_workers_settle_a_job_as_satisfiable() {
    let transports = cluster(2);
    let client = transports[0].clone();

    let mut handles = Vec::new();
    let mut subscriptions = Vec::new();
    for (rank, transport) in transports.into_iter().enumerate() {
        let handle = start_worker(worker_config(rank as u32, 2, 2), transport);
        subscriptions.push(handle.subscribe());
        handles.push(handle);
    }

    let job_id = 101;
    let root = RankPermutation::for_job(job_id, 2).to_rank(0, 2);
    let request = LocalScheduler::build_directed_request(job_id, client.rank(), root, 0, Priority::DEFAULT, 1, 0);
    client.send(root, Message::RequestNode(request)).await.unwrap();

    let adopted = next_matching(&mut subscriptions[root as usize], |event| {
        matches!(event, WorkerEvent::NodeAdopted { job_id: j, .. } if *j == job_id)
    })
    .await;
    assert!(adopted.is_some(), "root rank never adopted the job's root node");

    client
        .send(
            root,
            Message::NotifyJobDone {
                job_id,
                result_code: Verdict::Sat.code(),
            },
        )
        .await
        .unwrap();

    let finished = next_matching(&mut subscriptions[root as usize], |event| {
        matches!(event, WorkerEvent::JobFinished { job_id: j, .. } if *j == job_id)
    })
    .await
    .expect("job never reported finished");
    match finished {
        WorkerEvent::JobFinished { result_code, .. } => {
            assert_eq!(Verdict::from_code(result_code), Some(Verdict::Sat));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    for handle in handles {
        handle.request_stop();
        handle.wait().await.unwrap();
    }
}

/// Same shape as the satisfiable scenario, but the solver concludes UNSAT.
#[tokio::test]
async fn two_workers_settle_a_job_as_unsatisfiable() {
    let transports = cluster(2);
    let client = transports[0].clone();

    let mut handles = Vec::new();
    let mut subscriptions = Vec::new();
    for (rank, transport) in transports.into_iter().enumerate() {
        let handle = start_worker(worker_config(rank as u32, 2, 2), transport);
        subscriptions.push(handle.subscribe());
        handles.push(handle);
    }

    let job_id = 102;
    let root = RankPermutation::for_job(job_id, 2).to_rank(0, 2);
    let request = LocalScheduler::build_directed_request(job_id, client.rank(), root, 0, Priority::DEFAULT, 1, 0);
    client.send(root, Message::RequestNode(request)).await.unwrap();
    next_matching(&mut subscriptions[root as usize], |event| {
        matches!(event, WorkerEvent::NodeAdopted { job_id: j, .. } if *j == job_id)
    })
    .await
    .expect("root rank never adopted the job's root node");

    client
        .send(
            root,
            Message::NotifyJobDone {
                job_id,
                result_code: Verdict::Unsat.code(),
            },
        )
        .await
        .unwrap();

    let finished = next_matching(&mut subscriptions[root as usize], |event| {
        matches!(event, WorkerEvent::JobFinished { job_id: j, .. } if *j == job_id)
    })
    .await
    .expect("job never reported finished");
    match finished {
        WorkerEvent::JobFinished { result_code, .. } => {
            assert_eq!(Verdict::from_code(result_code), Some(Verdict::Unsat));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    for handle in handles {
        handle.request_stop();
        handle.wait().await.unwrap();
    }
}

/// A four-rank cluster's worth of capacity is entirely handed to one job: a
/// balancing round grows its volume to 4, and each of the four tree
/// positions it now spans can be accepted by a distinct rank's scheduler.
#[test]
fn a_lone_job_grows_to_occupy_the_whole_cluster() {
    let world_size = 4;
    let job_id = 7;

    let mut balancer = GlobalBalancer::new();
    let epoch = balancer.start_round().unwrap();
    let demands = vec![Demand {
        job_id,
        priority: Priority::DEFAULT,
        demand: world_size,
    }];
    let volumes = balancer.finish_round(&demands, world_size).unwrap();
    assert_eq!(volumes[&job_id], world_size);

    let root = RankPermutation::for_job(job_id, world_size).to_rank(0, world_size);
    for position in 0..world_size {
        let mut scheduler = LocalScheduler::new();
        let request =
            LocalScheduler::build_directed_request(job_id, 0, root, position, Priority::DEFAULT, epoch, 0);
        assert_eq!(
            scheduler.evaluate(&request),
            distsat_core::scheduler::AcceptanceDecision::Accept,
            "scheduler refused tree position {position}"
        );
        scheduler.adopt(&request);
        assert_eq!(scheduler.held_positions(), vec![(job_id, position)]);
    }
}

/// Two leaves each contribute one unit clause -- `[7]` and `[-7]` -- and the
/// root's gather round merges both into the buffer it would hand back down
/// for distribution, surviving an encode/decode trip over the wire format.
#[test]
fn root_gathers_and_would_redistribute_both_leaves_unit_clauses() {
    let job_id = 9;
    let mut root_comm = ClauseCommunicator::new(job_id, SizeBudget::default());

    let left = ClauseBuffer::from_clauses(vec![Clause {
        literals: vec![7],
        lbd: 1,
    }]);
    let right = ClauseBuffer::from_clauses(vec![Clause {
        literals: vec![-7],
        lbd: 1,
    }]);
    root_comm.receive_from_child(left);
    root_comm.receive_from_child(right);

    let merged = root_comm.finish_round();
    assert_eq!(merged.len(), 2);
    assert!(merged.clauses().contains(&Clause {
        literals: vec![7],
        lbd: 1
    }));
    assert!(merged.clauses().contains(&Clause {
        literals: vec![-7],
        lbd: 1
    }));

    // What the root would broadcast back down as `DistributeClauses`.
    let wire = merged.encode(true);
    let redecoded = ClauseBuffer::decode(&wire, true).unwrap();
    assert_eq!(redecoded.len(), 2);
}

/// A solver killed mid-solve tears down through the Job State Machine to
/// `Destructible`, and its OS process actually exits once asked to
/// terminate.
#[test]
fn a_killed_solver_tears_down_to_destructible() {
    let job_id = 501;
    let namer = SegmentNamer::new("distsat-scenario", std::process::id(), 0, job_id);
    let mut adapter =
        SolverProcessAdapter::spawn(job_id, &namer, "/bin/sleep", &["5".to_string()]).unwrap();

    let mut job = Job::new(
        job_id,
        distsat_common::ApplicationKind::Sat,
        Priority::DEFAULT,
        60.0,
        distsat_core::job::GrowthKind::Discrete,
        None,
    );
    job.transition(JobState::Committed).unwrap();
    job.transition(JobState::Active).unwrap();

    adapter.abort().unwrap();
    job.transition(JobState::Past).unwrap();

    let mut exited = false;
    for _ in 0..100 {
        if adapter.has_exited() {
            exited = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(exited, "solver process was never reaped after SIGTERM");

    job.transition(JobState::Destructible).unwrap();
    assert!(job.transition(JobState::Active).is_err());
}

/// A second revision (r=1) requested while the solver is suspended only
/// becomes visible to a solution check once it's actually the revision the
/// child published a solution for -- the caller, not the control block,
/// enforces that comparison.
#[test]
fn a_solution_for_an_earlier_revision_is_not_mistaken_for_the_requested_one() {
    let job_id = 502;
    let namer = SegmentNamer::new("distsat-scenario", std::process::id(), 0, job_id);
    let mut adapter =
        SolverProcessAdapter::spawn(job_id, &namer, "/bin/sleep", &["5".to_string()]).unwrap();

    adapter.start_revision(0, &[1, 0, 0, 0, 10, 0, 0, 0], &[]).unwrap();
    adapter.suspend().unwrap();
    adapter.start_revision(1, &[1, 0, 0, 0, 12, 0, 0, 0], &[]).unwrap();
    adapter.resume().unwrap();

    // Simulate the child's side of the handshake through a second handle
    // onto the same named segment, as a real solver process would.
    let mut child_view = ControlBlockSegment::open(&namer.control_block()).unwrap();
    let block = child_view.block();
    block.solution_revision.store(0, Ordering::SeqCst);
    block.result_code.store(Verdict::Sat.code(), Ordering::SeqCst);
    block.solution_size.store(0, Ordering::SeqCst);
    block.has_solution.store(true, Ordering::SeqCst);

    let (revision, verdict, _model) = adapter.poll_solution().expect("solution flag is set");
    assert_eq!(revision, 0);
    assert_ne!(revision, 1, "revision 1 was requested, not published yet");
    assert_eq!(verdict, Verdict::Sat);

    block.solution_revision.store(1, Ordering::SeqCst);
    let (revision, _, _) = adapter.poll_solution().unwrap();
    assert_eq!(revision, 1);

    adapter.abort().unwrap();
}
