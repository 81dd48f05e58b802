use serde::Deserialize;
use serde::Serialize;

/// Hardware class of a node, deciding which isolators are legal and which
/// memory-bandwidth ceiling applies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// CPU-only server, throttling happens on cores and cycle quotas
    Cpu,
    /// SoC with a GPU sharing the memory controller (e.g. Jetson-class)
    IntegratedGpu,
    /// Host with a discrete accelerator on its own memory
    DiscreteGpu,
}

/// Jetson-class integrated GPU frequency ladder (Hz), lowest first.
const INTEGRATED_GPU_FREQ_HZ: [u64; 14] = [
    140_250_000,
    229_500_000,
    318_750_000,
    408_000_000,
    497_250_000,
    586_500_000,
    675_750_000,
    765_000_000,
    854_250_000,
    943_500_000,
    1_032_750_000,
    1_122_000_000,
    1_211_250_000,
    1_300_500_000,
];

/// CPU frequency ladder (kHz), lowest first.
const CPU_FREQ_KHZ: [u64; 12] = [
    345_600, 499_200, 652_800, 806_400, 960_000, 1_113_600, 1_267_200, 1_420_800, 1_574_400,
    1_728_000, 1_881_600, 2_035_200,
];

impl NodeClass {
    /// Peak memory bandwidth in bytes/sec, used to normalize miss-rate
    /// deltas when one side of the comparison saw no traffic.
    pub fn max_mem_bandwidth(self) -> f64 {
        match self {
            // server-class DDR4 channel aggregate
            NodeClass::Cpu | NodeClass::DiscreteGpu => 68.0 * 1024.0 * 1024.0 * 1024.0,
            // LPDDR4 shared between CPU and integrated GPU
            NodeClass::IntegratedGpu => 59_700_000_000.0,
        }
    }

    /// Default GPU DVFS ladder for this class, lowest frequency first.
    pub fn gpu_freq_table_hz(self) -> &'static [u64] {
        &INTEGRATED_GPU_FREQ_HZ
    }

    /// Default CPU DVFS ladder for this class, lowest frequency first.
    pub fn cpu_freq_table_khz(self) -> &'static [u64] {
        &CPU_FREQ_KHZ
    }
}
