//! Workload event ingestion: assembles workloads from creation events and
//! routes raw counter samples into per-workload bounded channels, keeping
//! transport threading away from the control loop's scheduling.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use api_types::MetricReport;
use api_types::MetricSample;
use api_types::RawCounters;
use api_types::WireEvent;
use api_types::WorkloadCreation;
use api_types::WorkloadKind;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::Lines;
use tokio::sync::mpsc;

use crate::config::NodeSpec;
use crate::enforcement::EnforcementBackend;
use crate::pending_queue::PendingQueue;
use crate::workload::Workload;

const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// Abstract source of workload events. The controller does not care
/// whether the transport behind it is a message queue or a socket.
pub(crate) trait EventSource {
    async fn recv(&mut self) -> Result<Option<WireEvent>>;
}

/// Newline-delimited JSON adapter over any buffered reader.
pub(crate) struct JsonLineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> JsonLineSource<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLineSource<R> {
    async fn recv(&mut self) -> Result<Option<WireEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => tracing::debug!("discarding malformed event line: {e}"),
            }
        }
        Ok(None)
    }
}

/// Consumes one event stream: registers workloads with the pending queue
/// and fans samples out to their buffer-writer tasks.
pub(crate) struct Ingestor {
    node: Arc<NodeSpec>,
    backend: Arc<dyn EnforcementBackend>,
    pending: Arc<Mutex<PendingQueue>>,
    metric_buf_size: usize,
    max_workloads: usize,
    routes: HashMap<u32, mpsc::Sender<RawCounters>>,
}

impl Ingestor {
    pub(crate) fn new(
        node: Arc<NodeSpec>,
        backend: Arc<dyn EnforcementBackend>,
        pending: Arc<Mutex<PendingQueue>>,
        metric_buf_size: usize,
        max_workloads: usize,
    ) -> Self {
        Self {
            node,
            backend,
            pending,
            metric_buf_size,
            max_workloads,
            routes: HashMap::new(),
        }
    }

    /// Drain a source until it ends. Routes survive across sources, so a
    /// reconnecting transport keeps feeding existing workloads.
    pub(crate) async fn consume<S: EventSource>(&mut self, mut source: S) -> Result<()> {
        while let Some(event) = source.recv().await? {
            match event {
                WireEvent::WorkloadCreation(creation) => self.on_creation(creation),
                WireEvent::MetricSample(report) => self.on_sample(report).await,
                other => {
                    tracing::debug!("ignoring event not addressed to this node: {other:?}");
                }
            }
        }
        Ok(())
    }

    fn on_creation(&mut self, creation: WorkloadCreation) {
        // lazily drop routes of workloads that died since the last creation
        self.routes.retain(|pid, _| utils::procfs::pid_alive(*pid));

        if !utils::procfs::pid_alive(creation.pid) {
            tracing::warn!(
                "workload {} (pid {}) is not running, ignored",
                creation.identifier,
                creation.pid
            );
            return;
        }

        let name = creation
            .identifier
            .split('_')
            .next()
            .unwrap_or(&creation.identifier)
            .to_string();
        let group = format!("{}_{}", name, creation.pid);
        let bound_cores = match self.backend.read_assigned_cores(&group) {
            Ok(cores) => cores,
            Err(e) => {
                tracing::warn!("cannot read assigned cores of {group}: {e}");
                BTreeSet::new()
            }
        };

        let workload = Arc::new(Workload::new(
            name,
            creation.kind,
            creation.pid,
            creation.perf_pid,
            creation.interval_ms,
            bound_cores,
            self.node.class,
            self.metric_buf_size,
        ));
        match creation.kind {
            WorkloadKind::Fg => tracing::info!("{workload} is a foreground process"),
            WorkloadKind::Bg => tracing::info!("{workload} is a background process"),
        }

        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        self.routes.insert(creation.pid, tx);
        tokio::spawn(buffer_writer(workload.clone(), rx));

        self.pending
            .lock()
            .expect("poisoned")
            .add(workload, self.max_workloads);
    }

    async fn on_sample(&mut self, report: MetricReport) {
        let Some(tx) = self.routes.get(&report.pid) else {
            tracing::debug!("sample for unknown pid {}, dropped", report.pid);
            return;
        };
        if tx.send(report.counters).await.is_err() {
            self.routes.remove(&report.pid);
        }
    }
}

/// Per-workload buffer writer: converts raw counters into samples. Paused
/// workloads stop accumulating, which is how the "feed stops while
/// profiling" contract is honored on this side of the transport.
async fn buffer_writer(workload: Arc<Workload>, mut rx: mpsc::Receiver<RawCounters>) {
    while let Some(raw) = rx.recv().await {
        if workload.is_paused() {
            continue;
        }
        workload.push_sample(sample_from(&raw, workload.interval_ms()));
    }
}

fn sample_from(raw: &RawCounters, interval_ms: u64) -> MetricSample {
    MetricSample {
        llc_references: raw.llc_references,
        llc_misses: raw.llc_misses,
        instructions: raw.instructions,
        cycles: raw.cycles,
        gpu_core_util: raw.gpu_core_util,
        gpu_core_freq: raw.gpu_core_freq,
        gpu_mem_util: raw.gpu_mem_util,
        gpu_mem_freq: raw.gpu_mem_freq,
        interval_ms: interval_ms as f64,
    }
}
