mod config;
mod control_loop;
mod enforcement;
mod ingest;
mod isolation;
mod logging;
mod pending_queue;
mod workload;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use utils::version;

use crate::config::Cli;
use crate::config::NodeSpec;
use crate::control_loop::ControlLoop;
use crate::enforcement::EnforcementBackend;
use crate::enforcement::SysfsBackend;
use crate::ingest::Ingestor;
use crate::ingest::JsonLineSource;
use crate::pending_queue::PendingQueue;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(cli.metrics_file.clone());

    tracing::info!("starting interference controller {}", &**version::VERSION);

    let node = Arc::new(NodeSpec::resolve(
        cli.node_class,
        cli.node_profile.as_deref(),
    )?);
    tracing::info!("node class: {}", node.class);

    let backend: Arc<dyn EnforcementBackend> = Arc::new(SysfsBackend::default());
    let pending = Arc::new(Mutex::new(PendingQueue::new(node.clone(), backend.clone())));

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

    let control = ControlLoop::new(
        pending.clone(),
        Duration::from_millis(cli.control_interval_ms),
        Duration::from_millis(cli.profile_interval_ms),
        Duration::from_millis(cli.solorun_interval_ms),
    );
    let control_task = tokio::spawn(control.run(shutdown.clone()));

    let listener = TcpListener::bind(&cli.listen_addr)
        .await
        .with_context(|| format!("bind event listener on {}", cli.listen_addr))?;
    tracing::info!("listening for workload events on {}", cli.listen_addr);

    let mut ingestor = Ingestor::new(
        node,
        backend,
        pending,
        cli.metric_buf_size,
        cli.max_workloads,
    );
    let ingest_token = shutdown.clone();
    let ingest_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ingest_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("event stream connected from {peer}");
                        let source = JsonLineSource::new(tokio::io::BufReader::new(stream));
                        tokio::select! {
                            _ = ingest_token.cancelled() => break,
                            result = ingestor.consume(source) => match result {
                                Ok(()) => tracing::info!("event stream from {peer} ended"),
                                Err(e) => tracing::warn!("event stream from {peer} failed: {e}"),
                            }
                        }
                    }
                    Err(e) => tracing::warn!("accept failed: {e}"),
                }
            }
        }
    });

    let result = control_task.await.context("control loop task panicked")?;
    shutdown.cancel();
    let _ = ingest_task.await;
    result
}
