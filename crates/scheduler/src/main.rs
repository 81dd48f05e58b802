mod config;
mod job;
mod job_queue;
mod node;
mod tracker;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use api_types::WireEvent;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use utils::version;

use crate::config::Cli;
use crate::job::Job;
use crate::job_queue::PendingJobQueue;
use crate::tracker::NodeTracker;

struct SchedulerState {
    jobs: PendingJobQueue,
    tracker: NodeTracker,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let cli = Cli::parse();
    tracing::info!("starting cluster scheduler {}", &**version::VERSION);

    let state = Arc::new(Mutex::new(SchedulerState {
        jobs: PendingJobQueue::default(),
        tracker: NodeTracker::new(cli.metric_buf_size),
    }));

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                token.cancel();
            }
        });
    }

    let listener = TcpListener::bind(&cli.listen_addr)
        .await
        .with_context(|| format!("bind listener on {}", cli.listen_addr))?;
    tracing::info!("listening on {}", cli.listen_addr);

    {
        let state = state.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::info!("stream connected from {peer}");
                            tokio::spawn(consume_stream(stream, state.clone()));
                        }
                        Err(e) => tracing::warn!("accept failed: {e}"),
                    }
                }
            }
        });
    }

    dispatch_loop(
        state,
        Duration::from_millis(cli.dispatch_interval_ms),
        shutdown,
    )
    .await;
    Ok(())
}

/// Reads newline-delimited JSON events from one connection.
async fn consume_stream(stream: TcpStream, state: Arc<Mutex<SchedulerState>>) {
    let mut lines = tokio::io::BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("stream read failed: {e}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WireEvent>(&line) {
            Ok(WireEvent::JobSubmission(spec)) => {
                state.lock().expect("poisoned").jobs.add(Job::new(spec));
            }
            Ok(WireEvent::NodeStatus(status)) => {
                state.lock().expect("poisoned").tracker.on_status(&status);
            }
            Ok(other) => {
                tracing::debug!("ignoring event not addressed to the scheduler: {other:?}");
            }
            Err(e) => tracing::debug!("discarding malformed event line: {e}"),
        }
    }
}

/// Periodically drains pending jobs onto the least-contended nodes.
async fn dispatch_loop(
    state: Arc<Mutex<SchedulerState>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!("starting cluster scheduler loop");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("scheduler loop stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let pending = state.lock().expect("poisoned").jobs.len();
        if pending > 0 {
            tracing::info!("{pending} pending jobs to dispatch");
        }

        loop {
            // snapshot job and destination without holding the lock across I/O
            let next = {
                let mut state = state.lock().expect("poisoned");
                let Some(job) = state.jobs.pop() else { break };
                let dest = state
                    .tracker
                    .least_contended(job.spec().preference)
                    .map(|node| (node.addr().to_string(), node.port()));
                match dest {
                    Some((addr, port)) => Some((job, addr, port)),
                    None => {
                        tracing::debug!("no destination node for {job}, holding it back");
                        state.jobs.push_back(job);
                        None
                    }
                }
            };
            let Some((mut job, addr, port)) = next else { break };

            match forward_job(&job, &addr, port).await {
                Ok(()) => {
                    tracing::info!("{job} dispatched to {addr}:{port}");
                    job.mark_dispatched(addr, port);
                }
                Err(e) => {
                    tracing::warn!("dispatch of {job} to {addr}:{port} failed: {e}");
                    state.lock().expect("poisoned").jobs.push_back(job);
                    break;
                }
            }
        }
    }
}

async fn forward_job(job: &Job, addr: &str, port: u16) -> Result<()> {
    let mut stream = TcpStream::connect((addr, port)).await?;
    let mut line = serde_json::to_string(&WireEvent::JobSubmission(job.spec().clone()))?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
