use serde::Deserialize;
use serde::Serialize;

use crate::node::NodeClass;

/// Snapshot of hardware performance counters over one sampling interval.
///
/// Immutable once constructed; derived rates are computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub llc_references: f64,
    pub llc_misses: f64,
    pub instructions: f64,
    pub cycles: f64,
    pub gpu_core_util: f64,
    pub gpu_core_freq: f64,
    pub gpu_mem_util: f64,
    pub gpu_mem_freq: f64,
    /// Length of the sampling interval in milliseconds.
    pub interval_ms: f64,
}

impl MetricSample {
    /// LLC miss ratio, 0 when no references were counted.
    pub fn llc_miss_ratio(&self) -> f64 {
        if self.llc_references == 0.0 {
            0.0
        } else {
            self.llc_misses / self.llc_references
        }
    }

    pub fn llc_hit_ratio(&self) -> f64 {
        1.0 - self.llc_miss_ratio()
    }

    pub fn llc_miss_per_sec(&self) -> f64 {
        self.llc_misses * (1000.0 / self.interval_ms)
    }

    pub fn instructions_per_sec(&self) -> f64 {
        self.instructions * (1000.0 / self.interval_ms)
    }

    pub fn ipc(&self) -> f64 {
        self.instructions / self.cycles
    }

    /// Arithmetic mean over the first `k` samples (storage is newest-first,
    /// so this averages the `k` most recent ones).
    ///
    /// Callers must guarantee `0 < k <= samples.len()`.
    pub fn average<'a, I>(samples: I, k: usize) -> MetricSample
    where
        I: IntoIterator<Item = &'a MetricSample>,
    {
        assert!(k > 0, "cannot average over an empty window");

        let mut acc = MetricSample {
            llc_references: 0.0,
            llc_misses: 0.0,
            instructions: 0.0,
            cycles: 0.0,
            gpu_core_util: 0.0,
            gpu_core_freq: 0.0,
            gpu_mem_util: 0.0,
            gpu_mem_freq: 0.0,
            interval_ms: 0.0,
        };
        let mut taken = 0usize;
        for sample in samples.into_iter().take(k) {
            acc.llc_references += sample.llc_references;
            acc.llc_misses += sample.llc_misses;
            acc.instructions += sample.instructions;
            acc.cycles += sample.cycles;
            acc.gpu_core_util += sample.gpu_core_util;
            acc.gpu_core_freq += sample.gpu_core_freq;
            acc.gpu_mem_util += sample.gpu_mem_util;
            acc.gpu_mem_freq += sample.gpu_mem_freq;
            acc.interval_ms += sample.interval_ms;
            taken += 1;
        }
        assert_eq!(taken, k, "window larger than available samples");

        let n = k as f64;
        acc.llc_references /= n;
        acc.llc_misses /= n;
        acc.instructions /= n;
        acc.cycles /= n;
        acc.gpu_core_util /= n;
        acc.gpu_core_freq /= n;
        acc.gpu_mem_util /= n;
        acc.gpu_mem_freq /= n;
        acc.interval_ms /= n;
        acc
    }
}

impl std::fmt::Display for MetricSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}",
            self.llc_references, self.llc_misses, self.instructions, self.cycles, self.interval_ms
        )
    }
}

/// Normalized difference of a current sample against a solo-run baseline.
///
/// Positive `mem_bw` means the workload is driving more memory traffic than
/// it did running alone; the sign conventions follow the ranking rules of
/// the isolation policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDelta {
    llc_hit_ratio: f64,
    mem_bw: f64,
    instructions_per_sec: f64,
}

impl MetricDelta {
    /// `core_norm` scales the baseline for workloads whose core allocation
    /// changed since profiling; 1.0 when unchanged.
    pub fn new(cur: &MetricSample, base: &MetricSample, core_norm: f64, class: NodeClass) -> Self {
        let max_bw = class.max_mem_bandwidth();

        let mem_bw = if cur.llc_miss_per_sec() == 0.0 {
            if base.llc_miss_per_sec() == 0.0 {
                0.0
            } else {
                base.llc_miss_per_sec() / max_bw
            }
        } else if base.llc_miss_per_sec() == 0.0 {
            // baseline had no traffic at all; report a negative fraction of
            // the hardware maximum rather than dividing by zero
            -cur.llc_miss_per_sec() / max_bw
        } else {
            cur.llc_miss_per_sec() / (base.llc_miss_per_sec() * core_norm) - 1.0
        };

        let instructions_per_sec = if base.instructions_per_sec() == 0.0 {
            if cur.instructions_per_sec() == 0.0 {
                // nothing retired on either side
                0.0
            } else {
                // a zero-IPS baseline is bogus data; an infinite delta fails
                // verify() and routes the policy into re-profiling
                f64::INFINITY
            }
        } else {
            cur.instructions_per_sec() / (base.instructions_per_sec() * core_norm) - 1.0
        };

        Self {
            llc_hit_ratio: cur.llc_hit_ratio() - base.llc_hit_ratio(),
            mem_bw,
            instructions_per_sec,
        }
    }

    pub fn llc_hit_ratio(&self) -> f64 {
        self.llc_hit_ratio
    }

    pub fn mem_bw(&self) -> f64 {
        self.mem_bw
    }

    pub fn instructions_per_sec(&self) -> f64 {
        self.instructions_per_sec
    }

    /// Sanity bound: a relative change above 1.0 means the current sample
    /// doubled its baseline, which a valid solo-run baseline cannot allow.
    pub fn verify(&self) -> bool {
        self.mem_bw <= 1.0 && self.instructions_per_sec <= 1.0
    }
}

impl std::fmt::Display for MetricDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LLC hit ratio diff: {:6.3}, memory bandwidth diff: {:6.3}, instructions/sec diff: {:6.3}",
            self.llc_hit_ratio, self.mem_bw, self.instructions_per_sec
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(references: f64, misses: f64, instructions: f64) -> MetricSample {
        MetricSample {
            llc_references: references,
            llc_misses: misses,
            instructions,
            cycles: 2000.0,
            gpu_core_util: 0.0,
            gpu_core_freq: 0.0,
            gpu_mem_util: 0.0,
            gpu_mem_freq: 0.0,
            interval_ms: 1000.0,
        }
    }

    #[test]
    fn test_miss_ratio_zero_references() {
        let s = sample(0.0, 0.0, 5000.0);
        assert_eq!(s.llc_miss_ratio(), 0.0);
        assert_eq!(s.llc_hit_ratio(), 1.0);
    }

    #[test]
    fn test_rates_scale_with_interval() {
        let mut s = sample(1000.0, 100.0, 5000.0);
        s.interval_ms = 500.0;
        assert_eq!(s.llc_miss_per_sec(), 200.0);
        assert_eq!(s.instructions_per_sec(), 10000.0);
    }

    #[test]
    fn test_average_over_most_recent() {
        let newest = sample(2000.0, 200.0, 8000.0);
        let older = sample(1000.0, 100.0, 4000.0);
        let oldest = sample(999_999.0, 999_999.0, 999_999.0);

        let avg = MetricSample::average([&newest, &older, &oldest], 2);
        assert_eq!(avg.llc_references, 1500.0);
        assert_eq!(avg.llc_misses, 150.0);
        assert_eq!(avg.instructions, 6000.0);
        assert_eq!(avg.interval_ms, 1000.0);
    }

    #[test]
    fn test_delta_identical_samples_is_zero_and_verifies() {
        let s = sample(1000.0, 100.0, 5000.0);
        let delta = MetricDelta::new(&s, &s, 1.0, NodeClass::Cpu);

        assert!(delta.llc_hit_ratio().abs() < 1e-9);
        assert!(delta.mem_bw().abs() < 1e-9);
        assert!(delta.instructions_per_sec().abs() < 1e-9);
        assert!(delta.verify());
    }

    #[test]
    fn test_delta_doubled_misses_hits_verify_boundary() {
        // current misses are exactly double the baseline: delta = 1.0,
        // which is still inside the verify bound (boundary inclusive)
        let cur = sample(1000.0, 100.0, 5000.0);
        let base = sample(1000.0, 50.0, 5000.0);
        let delta = MetricDelta::new(&cur, &base, 1.0, NodeClass::Cpu);

        assert_eq!(delta.mem_bw(), 1.0);
        assert!(delta.verify());
    }

    #[test]
    fn test_delta_beyond_baseline_fails_verify() {
        let cur = sample(1000.0, 101.0, 5000.0);
        let base = sample(1000.0, 50.0, 5000.0);
        let delta = MetricDelta::new(&cur, &base, 1.0, NodeClass::Cpu);

        assert!(delta.mem_bw() > 1.0);
        assert!(!delta.verify());
    }

    #[test]
    fn test_delta_zero_current_misses() {
        let cur = sample(1000.0, 0.0, 5000.0);
        let base = sample(1000.0, 50.0, 5000.0);
        let delta = MetricDelta::new(&cur, &base, 1.0, NodeClass::Cpu);

        let expected = base.llc_miss_per_sec() / NodeClass::Cpu.max_mem_bandwidth();
        assert_eq!(delta.mem_bw(), expected);

        let both_zero = MetricDelta::new(&cur, &cur, 1.0, NodeClass::Cpu);
        assert_eq!(both_zero.mem_bw(), 0.0);
    }

    #[test]
    fn test_delta_zero_baseline_misses_is_negative_sentinel() {
        let cur = sample(1000.0, 50.0, 5000.0);
        let base = sample(1000.0, 0.0, 5000.0);
        let delta = MetricDelta::new(&cur, &base, 1.0, NodeClass::Cpu);

        assert!(delta.mem_bw() < 0.0);
        assert!(delta.verify());
    }

    #[test]
    fn test_delta_zero_baseline_ips_fails_verify() {
        let cur = sample(1000.0, 100.0, 5000.0);
        let base = sample(1000.0, 100.0, 0.0);
        let delta = MetricDelta::new(&cur, &base, 1.0, NodeClass::Cpu);

        assert!(delta.instructions_per_sec().is_infinite());
        assert!(!delta.verify());
    }

    #[test]
    fn test_delta_core_norm_scales_baseline() {
        let cur = sample(1000.0, 100.0, 5000.0);
        let base = sample(1000.0, 50.0, 5000.0);
        let delta = MetricDelta::new(&cur, &base, 2.0, NodeClass::Cpu);

        // 100 / (50 * 2) - 1 = 0
        assert!(delta.mem_bw().abs() < 1e-9);
    }
}
