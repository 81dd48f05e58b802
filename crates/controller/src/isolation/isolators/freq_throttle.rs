use std::sync::Arc;

use super::Isolator;
use super::IsolatorKind;
use crate::enforcement::EnforceError;
use crate::enforcement::EnforcementBackend;
use crate::isolation::PolicyError;
use crate::workload::Workload;

/// Which frequency domain the throttle acts on.
///
/// Integrated-GPU nodes slow the GPU the backgrounds compute on; nodes with
/// a discrete accelerator instead scale down the backgrounds' CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FreqDomain {
    Cpu,
    Gpu,
}

/// DVFS throttle walking a frequency ladder one index at a time.
pub(crate) struct FreqThrottleIsolator {
    backend: Arc<dyn EnforcementBackend>,
    bg_wls: Vec<Arc<Workload>>,
    domain: FreqDomain,
    /// ascending frequency ladder; index 0 is the strongest throttle
    table: Vec<u64>,
    cur_idx: usize,
    stored_config: Option<usize>,
    prev_value: Option<f64>,
}

impl FreqThrottleIsolator {
    pub(crate) fn new(
        backend: Arc<dyn EnforcementBackend>,
        bg_wls: Vec<Arc<Workload>>,
        domain: FreqDomain,
        table: Vec<u64>,
    ) -> Self {
        assert!(!table.is_empty(), "frequency ladder must not be empty");
        let cur_idx = table.len() - 1;
        Self {
            backend,
            bg_wls,
            domain,
            table,
            cur_idx,
            stored_config: None,
            prev_value: None,
        }
    }

    fn apply(&self, idx: usize) -> Result<(), EnforceError> {
        let freq = self.table[idx];
        match self.domain {
            FreqDomain::Gpu => {
                for bg in &self.bg_wls {
                    tracing::info!(
                        "GPU frequency for {} is {:.3}GHz",
                        bg,
                        freq as f64 / 1_000_000_000.0
                    );
                }
                self.backend.set_gpu_frequency(freq)
            }
            FreqDomain::Cpu => {
                for bg in &self.bg_wls {
                    let cores = bg.bound_cores();
                    tracing::info!(
                        "CPU frequency of cores {} is {:.3}GHz",
                        utils::cores::format_core_list(&cores),
                        freq as f64 / 1_000_000.0
                    );
                    self.backend.set_cpu_frequency(&cores, freq)?;
                }
                Ok(())
            }
        }
    }
}

impl Isolator for FreqThrottleIsolator {
    fn kind(&self) -> IsolatorKind {
        IsolatorKind::FreqThrottle
    }

    fn prev_value(&self) -> Option<f64> {
        self.prev_value
    }

    fn record_value(&mut self, value: f64) {
        self.prev_value = Some(value);
    }

    fn clear_prev_value(&mut self) {
        self.prev_value = None;
    }

    fn strengthen(&mut self) {
        self.cur_idx = self.cur_idx.saturating_sub(1);
    }

    fn weaken(&mut self) {
        self.cur_idx = (self.cur_idx + 1).min(self.table.len() - 1);
    }

    fn is_max_level(&self) -> bool {
        self.cur_idx == 0
    }

    fn is_min_level(&self) -> bool {
        self.cur_idx == self.table.len() - 1
    }

    fn enforce(&self) -> Result<(), EnforceError> {
        self.apply(self.cur_idx)
    }

    fn reset(&self) -> Result<(), EnforceError> {
        self.apply(self.table.len() - 1)
    }

    fn store_cur_config(&mut self) {
        self.stored_config = Some(self.cur_idx);
    }

    fn load_cur_config(&mut self) -> Result<(), PolicyError> {
        self.cur_idx = self.stored_config.take().ok_or(PolicyError::NoStoredConfig)?;
        Ok(())
    }
}
