use std::collections::BTreeSet;
use std::sync::Arc;

use super::Isolator;
use super::IsolatorKind;
use crate::enforcement::EnforceError;
use crate::enforcement::EnforcementBackend;
use crate::isolation::PolicyError;
use crate::workload::Workload;

/// Takes cores away from the background group one at a time, shrinking its
/// cpuset from the bottom of its original allocation.
pub(crate) struct SchedIsolator {
    backend: Arc<dyn EnforcementBackend>,
    fg: Arc<Workload>,
    bg_wls: Vec<Arc<Workload>>,
    /// lowest core index the backgrounds keep; [cur_step, orig_last] stays theirs
    cur_step: usize,
    orig_first: usize,
    orig_last: usize,
    stored_config: Option<usize>,
    prev_value: Option<f64>,
}

impl SchedIsolator {
    pub(crate) fn new(
        backend: Arc<dyn EnforcementBackend>,
        fg: Arc<Workload>,
        bg_wls: Vec<Arc<Workload>>,
    ) -> Self {
        let all: BTreeSet<usize> = bg_wls
            .iter()
            .flat_map(|bg| bg.orig_bound_cores().iter().copied())
            .collect();
        // an empty allocation degenerates to a permanently saturated isolator
        let orig_first = all.first().copied().unwrap_or(0);
        let orig_last = all.last().copied().unwrap_or(0);

        Self {
            backend,
            fg,
            bg_wls,
            cur_step: orig_first,
            orig_first,
            orig_last,
            stored_config: None,
            prev_value: None,
        }
    }
}

impl Isolator for SchedIsolator {
    fn kind(&self) -> IsolatorKind {
        IsolatorKind::SchedCore
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
        self.cur_step = (self.cur_step + 1).min(self.orig_last);
    }

    fn weaken(&mut self) {
        self.cur_step = self.cur_step.saturating_sub(1).max(self.orig_first);
    }

    /// The backgrounds are down to a single core.
    fn is_max_level(&self) -> bool {
        self.cur_step >= self.orig_last
    }

    /// Growing the range would leave the original allocation or collide
    /// with the foreground's cores, overcommitting the node's core budget.
    fn is_min_level(&self) -> bool {
        if self.cur_step <= self.orig_first {
            return true;
        }
        match self.fg.bound_cores().last().copied() {
            Some(fg_last) => self.cur_step - 1 <= fg_last,
            None => false,
        }
    }

    fn enforce(&self) -> Result<(), EnforceError> {
        let cores: BTreeSet<usize> = (self.cur_step..=self.orig_last).collect();
        tracing::info!(
            "affinity of background is {}-{}",
            self.cur_step,
            self.orig_last
        );
        for bg in &self.bg_wls {
            self.backend.set_core_affinity(&bg.group_name(), &cores)?;
            bg.set_bound_cores(cores.clone());
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), EnforceError> {
        for bg in &self.bg_wls {
            if !bg.is_running() {
                continue;
            }
            self.backend
                .set_core_affinity(&bg.group_name(), bg.orig_bound_cores())?;
            bg.set_bound_cores(bg.orig_bound_cores().clone());
        }
        Ok(())
    }

    fn store_cur_config(&mut self) {
        self.stored_config = Some(self.cur_step);
    }

    fn load_cur_config(&mut self) -> Result<(), PolicyError> {
        self.cur_step = self.stored_config.take().ok_or(PolicyError::NoStoredConfig)?;
        Ok(())
    }
}
