//! Wire events consumed by the ingestion adapters.
//!
//! Both daemons read one logical stream of newline-delimited JSON objects;
//! the `event` tag selects the variant. The controller consumes workload
//! creations and metric samples, the cluster scheduler consumes node status
//! reports and job submissions.

use serde::Deserialize;
use serde::Serialize;

use crate::node::NodeClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Latency-sensitive, its QoS is protected
    Fg,
    /// Throughput-oriented, may be throttled
    Bg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireEvent {
    WorkloadCreation(WorkloadCreation),
    MetricSample(MetricReport),
    NodeStatus(NodeStatus),
    JobSubmission(JobSubmission),
}

/// A newly launched process to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadCreation {
    /// Workload identifier, `<name>_<suffix>`; only the name part is kept
    pub identifier: String,
    pub kind: WorkloadKind,
    pub pid: u32,
    /// Pid of the perf agent feeding this workload's counters
    pub perf_pid: u32,
    /// Counter sampling interval in milliseconds
    pub interval_ms: u64,
}

/// One raw counter tuple for a registered workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub pid: u32,
    #[serde(flatten)]
    pub counters: RawCounters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCounters {
    pub llc_references: f64,
    pub llc_misses: f64,
    pub instructions: f64,
    pub cycles: f64,
    #[serde(default)]
    pub gpu_core_util: f64,
    #[serde(default)]
    pub gpu_core_freq: f64,
    #[serde(default)]
    pub gpu_mem_util: f64,
    #[serde(default)]
    pub gpu_mem_freq: f64,
}

/// Periodic self-report of a node, used for least-contended placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub addr: String,
    pub port: u16,
    pub class: NodeClass,
    pub aggr_contention: f64,
    pub num_workloads: u32,
    pub num_fg_wls: u32,
    pub num_bg_wls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum JobPreference {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum JobObjective {
    Latency,
    Throughput,
}

/// A job waiting for cluster-level placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: String,
    pub kind: WorkloadKind,
    pub preference: JobPreference,
    pub objective: JobObjective,
}
