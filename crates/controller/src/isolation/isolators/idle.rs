use api_types::MetricDelta;

use super::Isolator;
use super::IsolatorKind;
use crate::enforcement::EnforceError;
use crate::isolation::NextStep;
use crate::isolation::PolicyError;

/// The no-op isolator a policy holds while nothing is being enforced.
pub(crate) struct IdleIsolator;

impl Isolator for IdleIsolator {
    fn kind(&self) -> IsolatorKind {
        IsolatorKind::Idle
    }

    fn prev_value(&self) -> Option<f64> {
        None
    }

    fn record_value(&mut self, _value: f64) {}

    fn clear_prev_value(&mut self) {}

    fn strengthen(&mut self) {}

    fn weaken(&mut self) {}

    fn is_max_level(&self) -> bool {
        false
    }

    fn is_min_level(&self) -> bool {
        false
    }

    fn enforce(&self) -> Result<(), EnforceError> {
        Ok(())
    }

    fn reset(&self) -> Result<(), EnforceError> {
        Ok(())
    }

    fn store_cur_config(&mut self) {}

    fn load_cur_config(&mut self) -> Result<(), PolicyError> {
        Ok(())
    }

    fn decide_next_step(&mut self, _delta: &MetricDelta) -> NextStep {
        NextStep::Idle
    }
}
