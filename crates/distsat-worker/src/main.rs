mod logging;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use distsat_common::Params;
use distsat_core::api::{WorkerConfig, WorkerEvent};
use distsat_core::ingress::JobSubmission;
use distsat_core::message::Message;
use distsat_core::transport::{ChannelTransport, Transport};
use distsat_core::{start_worker, RankPermutation};

/// Build the one job-submission request this binary knows how to issue at
/// startup, and hand it directly to the job's root rank: a freshly submitted
/// job has no parent yet to request adoption through, so `SubmitJob` is sent
/// straight to whichever rank the job's permutation assigns to position 0.
/// With no file-watcher or network ingress in scope, `--submit-job` is the
/// one-shot substitute for both.
async fn submit_job(
    transport: &Arc<dyn Transport>,
    world_size: u32,
    default_growth_period_secs: f64,
    path: &str,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let submission = JobSubmission::from_json(&bytes)?;
    let root = RankPermutation::for_job(submission.job_id, world_size).to_rank(0, world_size);
    let growth_period_secs = if submission.growth_period_secs > 0.0 {
        submission.growth_period_secs
    } else {
        default_growth_period_secs
    };

    info!(job_id = submission.job_id, root_rank = root, "submitting job");
    transport
        .send(
            root,
            Message::SubmitJob {
                job_id: submission.job_id,
                application: submission.application,
                priority: submission.priority,
                revision: 0,
                growth_period_secs,
                max_demand: submission.max_demand,
                payload: submission.to_description_payload(),
            },
        )
        .await
        .map_err(|err| anyhow::anyhow!("failed to submit job: {err}"))
}

/// How many times the operator has asked this process to stop; a second
/// Ctrl+C escalates from graceful to immediate exit.
struct ShutdownCount(AtomicU8);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let params = Params::parse();
    logging::init(&params.log_filter);

    if params.world_size == 0 {
        anyhow::bail!("--world-size must be >= 1");
    }

    let transports: Vec<Arc<dyn Transport>> = ChannelTransport::build_cluster(params.world_size)
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn Transport>)
        .collect();
    let submit_transport = transports[0].clone();

    let mut handles = Vec::with_capacity(transports.len());
    for (rank, transport) in transports.into_iter().enumerate() {
        let config = WorkerConfig {
            rank: rank as u32,
            world_size: params.world_size,
            global_capacity: params.global_capacity,
            scheduling_tick: params.scheduling_tick(),
            solver_program: params.solver_program.clone(),
            solver_args: params.solver_args.clone(),
        };
        let handle = start_worker(config, transport);
        let mut events = handle.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WorkerEvent::Warning { message }) => warn!(rank, %message),
                    Ok(WorkerEvent::Error { message }) => error!(rank, %message),
                    Ok(event) => info!(rank, ?event, "worker event"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        handles.push(handle);
    }

    info!(world_size = params.world_size, "cluster started");

    if let Some(path) = &params.submit_job {
        if let Err(err) = submit_job(
            &submit_transport,
            params.world_size,
            params.default_growth_period_secs,
            path,
        )
        .await
        {
            error!(%err, "job submission failed");
        }
    }

    let shutdown = Arc::new(ShutdownCount(AtomicU8::new(0)));
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<bool>();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let n = shutdown.0.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    let _ = shutdown_tx.send(false);
                } else {
                    let _ = shutdown_tx.send(true);
                    return;
                }
            }
        });
    }

    match shutdown_rx.recv().await {
        Some(true) => {
            warn!("stop requested twice, exiting immediately");
            std::process::exit(130);
        }
        Some(false) | None => {
            info!("stop requested, finishing in-flight rounds");
            for handle in &handles {
                handle.request_stop();
            }
        }
    }

    for handle in handles {
        handle.wait().await?;
    }
    Ok(())
}
