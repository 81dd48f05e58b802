use std::sync::Arc;

use super::Isolator;
use super::IsolatorKind;
use crate::enforcement::EnforceError;
use crate::enforcement::EnforcementBackend;
use crate::isolation::PolicyError;
use crate::workload::Workload;

const MAX_PERCENT: u32 = 100;
const MIN_PERCENT: u32 = 10;
const STEP: u32 = 10;
const CFS_PERIOD_US: u64 = 100_000;

/// Caps the CPU cycles of the background group through the cgroup cfs
/// quota, in steps of 10% of the group's assigned cores.
pub(crate) struct CycleLimitIsolator {
    backend: Arc<dyn EnforcementBackend>,
    bg_wls: Vec<Arc<Workload>>,
    /// percentage of a full core each assigned core may consume
    cur_step: u32,
    stored_config: Option<u32>,
    prev_value: Option<f64>,
}

impl CycleLimitIsolator {
    pub(crate) fn new(backend: Arc<dyn EnforcementBackend>, bg_wls: Vec<Arc<Workload>>) -> Self {
        Self {
            backend,
            bg_wls,
            cur_step: MAX_PERCENT,
            stored_config: None,
            prev_value: None,
        }
    }

    fn apply(&self, percent: u32) -> Result<(), EnforceError> {
        for bg in &self.bg_wls {
            let group = bg.group_name();
            let cores = self.backend.read_assigned_cores(&group)?;
            let quota = (CFS_PERIOD_US * u64::from(percent) / 100 * cores.len() as u64) as i64;
            tracing::info!("cycle limit of {group} is {percent}% over {} cores", cores.len());
            self.backend.set_cpu_quota(&group, quota, CFS_PERIOD_US)?;
        }
        Ok(())
    }
}

impl Isolator for CycleLimitIsolator {
    fn kind(&self) -> IsolatorKind {
        IsolatorKind::CycleLimit
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
        self.cur_step = self.cur_step.saturating_sub(STEP).max(MIN_PERCENT);
    }

    fn weaken(&mut self) {
        self.cur_step = (self.cur_step + STEP).min(MAX_PERCENT);
    }

    fn is_max_level(&self) -> bool {
        self.cur_step.saturating_sub(STEP) < MIN_PERCENT
    }

    fn is_min_level(&self) -> bool {
        MAX_PERCENT < self.cur_step + STEP
    }

    fn enforce(&self) -> Result<(), EnforceError> {
        self.apply(self.cur_step)
    }

    fn reset(&self) -> Result<(), EnforceError> {
        self.apply(MAX_PERCENT)
    }

    fn store_cur_config(&mut self) {
        self.stored_config = Some(self.cur_step);
    }

    fn load_cur_config(&mut self) -> Result<(), PolicyError> {
        self.cur_step = self.stored_config.take().ok_or(PolicyError::NoStoredConfig)?;
        Ok(())
    }
}
