use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use api_types::NodeClass;
use clap::Parser;
use serde::Deserialize;
use utils::version;

#[derive(Parser)]
#[command(about = "per-node resource-interference controller", version = &**version::VERSION)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "CONTROLLER_LISTEN_ADDR",
        default_value = "0.0.0.0:10010",
        help = "TCP address the workload event stream connects to"
    )]
    pub listen_addr: String,

    #[arg(
        short = 'b',
        long,
        default_value_t = 50,
        help = "metric buffer size per workload"
    )]
    pub metric_buf_size: usize,

    #[arg(
        long,
        env = "CONTROLLER_MAX_WORKLOADS",
        default_value_t = 3,
        help = "number of workloads forming one isolation group"
    )]
    pub max_workloads: usize,

    #[arg(long, default_value_t = 200, help = "control tick interval in ms")]
    pub control_interval_ms: u64,

    #[arg(
        long,
        default_value_t = 1000,
        help = "interval between phase-change checks in ms"
    )]
    pub profile_interval_ms: u64,

    #[arg(
        long,
        default_value_t = 2000,
        help = "length of a solorun profiling window in ms"
    )]
    pub solorun_interval_ms: u64,

    #[arg(
        long,
        env = "NODE_CLASS",
        value_parser = parse_node_class,
        help = "node hardware class (cpu, integrated_gpu, discrete_gpu); detected when unset"
    )]
    pub node_class: Option<NodeClass>,

    #[arg(
        long,
        env = "NODE_PROFILE_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML node profile overriding the default frequency ladders"
    )]
    pub node_profile: Option<PathBuf>,

    #[arg(
        long,
        env = "CONTENTION_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Path for contention metrics lines, e.g. logs/contention.log"
    )]
    pub metrics_file: Option<PathBuf>,
}

fn parse_node_class(s: &str) -> Result<NodeClass, String> {
    match s {
        "cpu" => Ok(NodeClass::Cpu),
        "integrated_gpu" => Ok(NodeClass::IntegratedGpu),
        "discrete_gpu" => Ok(NodeClass::DiscreteGpu),
        other => Err(format!("unknown node class: {other:?}")),
    }
}

/// Resolved per-node constants the isolators run with.
#[derive(Debug, Clone)]
pub(crate) struct NodeSpec {
    pub class: NodeClass,
    /// ascending GPU DVFS ladder in Hz
    pub gpu_freq_table_hz: Vec<u64>,
    /// ascending CPU DVFS ladder in kHz
    pub cpu_freq_table_khz: Vec<u64>,
}

/// On-disk YAML shape of a node profile.
#[derive(Debug, Deserialize)]
struct NodeProfile {
    class: NodeClass,
    gpu_freq_table_hz: Option<Vec<u64>>,
    cpu_freq_table_khz: Option<Vec<u64>>,
}

impl NodeSpec {
    pub(crate) fn for_class(class: NodeClass) -> Self {
        Self {
            class,
            gpu_freq_table_hz: class.gpu_freq_table_hz().to_vec(),
            cpu_freq_table_khz: class.cpu_freq_table_khz().to_vec(),
        }
    }

    /// Resolve the node spec from, in order of precedence: the CLI class
    /// override, the YAML profile, sysfs detection.
    pub(crate) fn resolve(
        class_override: Option<NodeClass>,
        profile_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let Some(path) = profile_path else {
            return Ok(Self::for_class(
                class_override.unwrap_or_else(detect_node_class),
            ));
        };

        tracing::info!("loading node profile from {path:?}");
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read node profile {path:?}"))?;
        let profile: NodeProfile =
            serde_yaml::from_str(&yaml).with_context(|| format!("parse node profile {path:?}"))?;

        let mut spec = Self::for_class(class_override.unwrap_or(profile.class));
        if let Some(table) = profile.gpu_freq_table_hz {
            spec.gpu_freq_table_hz = table;
        }
        if let Some(table) = profile.cpu_freq_table_khz {
            spec.cpu_freq_table_khz = table;
        }
        Ok(spec)
    }
}

/// Best-effort hardware classification from sysfs.
fn detect_node_class() -> NodeClass {
    // integrated GPUs expose a devfreq domain; discrete ones a driver dir
    let has_devfreq = Path::new("/sys/class/devfreq")
        .read_dir()
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);

    if has_devfreq {
        NodeClass::IntegratedGpu
    } else if Path::new("/proc/driver/nvidia").exists() {
        NodeClass::DiscreteGpu
    } else {
        NodeClass::Cpu
    }
}
