use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::RwLock;

use api_types::MetricDelta;
use api_types::MetricSample;
use api_types::NodeClass;
use api_types::WorkloadKind;

/// A monitored process: identity, bounded counter history, pause state and
/// the solo-run baseline its contention deltas are computed against.
///
/// The sample buffer is written by the ingestion task and read by the
/// control loop, so all mutable state sits behind locks and the type is
/// shared as `Arc<Workload>`.
pub(crate) struct Workload {
    name: String,
    kind: WorkloadKind,
    pid: u32,
    perf_pid: u32,
    interval_ms: u64,
    node_class: NodeClass,
    buf_size: usize,

    /// newest-first bounded history
    metrics: RwLock<VecDeque<MetricSample>>,
    paused: AtomicBool,
    avg_solorun: RwLock<Option<MetricSample>>,

    orig_bound_cores: BTreeSet<usize>,
    bound_cores: RwLock<BTreeSet<usize>>,
}

impl Workload {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: WorkloadKind,
        pid: u32,
        perf_pid: u32,
        interval_ms: u64,
        bound_cores: BTreeSet<usize>,
        node_class: NodeClass,
        buf_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            pid,
            perf_pid,
            interval_ms,
            node_class,
            buf_size,
            metrics: RwLock::new(VecDeque::with_capacity(buf_size)),
            paused: AtomicBool::new(false),
            avg_solorun: RwLock::new(None),
            orig_bound_cores: bound_cores.clone(),
            bound_cores: RwLock::new(bound_cores),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> WorkloadKind {
        self.kind
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    #[allow(dead_code)]
    pub(crate) fn perf_pid(&self) -> u32 {
        self.perf_pid
    }

    pub(crate) fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// cgroup name the enforcement backend addresses this workload by
    pub(crate) fn group_name(&self) -> String {
        format!("{}_{}", self.name, self.pid)
    }

    /// Whether the underlying process still exists.
    pub(crate) fn is_running(&self) -> bool {
        utils::procfs::pid_alive(self.pid)
    }

    pub(crate) fn number_of_threads(&self) -> u32 {
        utils::procfs::thread_count(self.pid)
    }

    // -- sample buffer ----------------------------------------------------

    /// Insert the newest sample, evicting the oldest at capacity.
    pub(crate) fn push_sample(&self, sample: MetricSample) {
        let mut metrics = self.metrics.write().expect("poisoned");
        if metrics.len() == self.buf_size {
            metrics.pop_back();
        }
        metrics.push_front(sample);
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.metrics.read().expect("poisoned").len()
    }

    pub(crate) fn clear_metrics(&self) {
        self.metrics.write().expect("poisoned").clear();
    }

    /// Mean over the `n` most recent samples; `n` must not exceed
    /// `sample_count()`.
    pub(crate) fn average(&self, n: usize) -> MetricSample {
        let metrics = self.metrics.read().expect("poisoned");
        MetricSample::average(metrics.iter(), n)
    }

    /// Contention delta of the averaged current buffer against the solo-run
    /// baseline.
    ///
    /// Callers must guarantee `sample_count() > 0` and a present baseline;
    /// violating either is a programming error in the control loop.
    pub(crate) fn calc_metric_diff(&self) -> MetricDelta {
        let metrics = self.metrics.read().expect("poisoned");
        assert!(!metrics.is_empty(), "no metric samples for {self}");
        let baseline = (*self.avg_solorun.read().expect("poisoned"))
            .unwrap_or_else(|| panic!("no solorun baseline for {self}"));

        let cur = MetricSample::average(metrics.iter(), metrics.len());
        MetricDelta::new(&cur, &baseline, 1.0, self.node_class)
    }

    // -- pause state -------------------------------------------------------

    /// Marks the workload paused. The metric feed for a paused workload is
    /// expected to stop; the ingestion writer drops samples accordingly.
    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    // -- solorun baseline ---------------------------------------------------

    pub(crate) fn solorun_baseline(&self) -> Option<MetricSample> {
        *self.avg_solorun.read().expect("poisoned")
    }

    pub(crate) fn set_solorun_baseline(&self, baseline: MetricSample) {
        *self.avg_solorun.write().expect("poisoned") = Some(baseline);
    }

    // -- core affinity -------------------------------------------------------

    pub(crate) fn orig_bound_cores(&self) -> &BTreeSet<usize> {
        &self.orig_bound_cores
    }

    pub(crate) fn bound_cores(&self) -> BTreeSet<usize> {
        self.bound_cores.read().expect("poisoned").clone()
    }

    pub(crate) fn set_bound_cores(&self, cores: BTreeSet<usize>) {
        *self.bound_cores.write().expect("poisoned") = cores;
    }

    #[allow(dead_code)]
    pub(crate) fn num_cores(&self) -> usize {
        self.bound_cores.read().expect("poisoned").len()
    }
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.pid)
    }
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("samples", &self.sample_count())
            .field("paused", &self.is_paused())
            .finish()
    }
}
