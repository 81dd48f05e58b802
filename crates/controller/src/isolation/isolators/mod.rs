//! Interchangeable enforcement strategies, one per resource-control axis.
//!
//! Each isolator owns a bounded step value on its axis and follows the same
//! feedback rules: the first decision after activation looks only at the
//! current delta, steady state compares against the previous one and stops
//! when the signal flattens out.

use api_types::MetricDelta;

use super::NextStep;
use super::PolicyError;
use crate::enforcement::EnforceError;

mod cycle_limit;
mod freq_throttle;
mod idle;
mod schedule;

pub(crate) use cycle_limit::CycleLimitIsolator;
pub(crate) use freq_throttle::FreqDomain;
pub(crate) use freq_throttle::FreqThrottleIsolator;
pub(crate) use idle::IdleIsolator;
pub(crate) use schedule::SchedIsolator;

/// Closed set of isolator kinds; dispatch and violation checks key off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub(crate) enum IsolatorKind {
    CycleLimit,
    SchedCore,
    FreqThrottle,
    Idle,
}

/// No further step when the delta moved less than this between decisions.
const DOD_THRESHOLD: f64 = 0.005;
/// First-decision fast path: a delta this small needs no isolation at all.
const FORCE_STOP_THRESHOLD: f64 = 0.1;

pub(crate) trait Isolator: Send {
    fn kind(&self) -> IsolatorKind;

    /// Component of the delta this isolator steers by.
    fn monitored_value(&self, delta: &MetricDelta) -> f64 {
        delta.mem_bw()
    }

    /// Previously observed monitored value, `None` right after activation.
    fn prev_value(&self) -> Option<f64>;
    fn record_value(&mut self, value: f64);
    fn clear_prev_value(&mut self);

    /// Move one quantum toward stronger isolation, clamped at the bound.
    fn strengthen(&mut self);
    /// Move one quantum toward weaker isolation, clamped at the bound.
    fn weaken(&mut self);

    /// Strongest setting reached; strengthening further is impossible.
    fn is_max_level(&self) -> bool;
    /// Most permissive setting reached; weakening further is impossible.
    fn is_min_level(&self) -> bool;

    /// Push the current step to the enforcement backend.
    fn enforce(&self) -> Result<(), EnforceError>;
    /// Restore the neutral, maximum-permissive configuration.
    fn reset(&self) -> Result<(), EnforceError>;

    /// Save the current step across a solorun profiling window.
    fn store_cur_config(&mut self);
    /// Restore the step saved by `store_cur_config`.
    fn load_cur_config(&mut self) -> Result<(), PolicyError>;

    /// Called when the policy deactivates this isolator.
    fn yield_isolation(&mut self) {
        self.clear_prev_value();
    }

    fn decide_next_step(&mut self, delta: &MetricDelta) -> NextStep {
        let cur = self.monitored_value(delta);
        let next = match self.prev_value() {
            None => self.first_decision(cur),
            Some(prev) => self.monitoring_result(cur, prev),
        };
        self.record_value(cur);
        next
    }

    fn first_decision(&self, cur: f64) -> NextStep {
        tracing::debug!("current diff: {cur:7.4}");

        if cur < 0.0 {
            if self.is_max_level() {
                NextStep::Stop
            } else {
                NextStep::Strengthen
            }
        } else if cur <= FORCE_STOP_THRESHOLD {
            NextStep::Stop
        } else if self.is_min_level() {
            NextStep::Stop
        } else {
            NextStep::Weaken
        }
    }

    fn monitoring_result(&self, cur: f64, prev: f64) -> NextStep {
        let diff_of_diff = cur - prev;
        tracing::debug!("current diff: {cur:7.4}, previous diff: {prev:7.4}");

        if self.is_max_level()
            || self.is_min_level()
            || diff_of_diff.abs() <= DOD_THRESHOLD
            || cur.abs() <= DOD_THRESHOLD
        {
            NextStep::Stop
        } else if cur > 0.0 {
            NextStep::Weaken
        } else {
            NextStep::Strengthen
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use api_types::NodeClass;
    use api_types::WorkloadKind;

    use super::*;
    use crate::enforcement::tests::MockBackend;
    use crate::enforcement::tests::MockCall;
    use crate::workload::tests::live_workload;
    use crate::workload::tests::test_sample;
    use crate::workload::Workload;

    fn delta_with_mem_bw(misses: f64, baseline_misses: f64) -> MetricDelta {
        let cur = test_sample(misses);
        let base = test_sample(baseline_misses);
        MetricDelta::new(&cur, &base, 1.0, NodeClass::Cpu)
    }

    fn bg_workloads() -> Vec<Arc<Workload>> {
        vec![Arc::new(live_workload("bench", WorkloadKind::Bg, 8))]
    }

    #[test]
    fn test_first_decision_negative_delta_strengthens() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        // negative delta: more isolation wanted
        let delta = delta_with_mem_bw(10.0, 100.0);
        assert_eq!(isolator.decide_next_step(&delta), NextStep::Strengthen);
    }

    #[test]
    fn test_first_decision_small_positive_delta_stops() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        // within the force-stop threshold
        let delta = delta_with_mem_bw(105.0, 100.0);
        assert_eq!(isolator.decide_next_step(&delta), NextStep::Stop);
    }

    #[test]
    fn test_steady_state_stops_when_signal_flattens() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        let first = delta_with_mem_bw(50.0, 100.0);
        assert_eq!(isolator.decide_next_step(&first), NextStep::Strengthen);
        isolator.strengthen();

        // same delta again: diff-of-diff is zero, stability detected
        assert_eq!(isolator.decide_next_step(&first), NextStep::Stop);
    }

    #[test]
    fn test_steady_state_follows_delta_sign() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        let first = delta_with_mem_bw(40.0, 100.0);
        assert_eq!(isolator.decide_next_step(&first), NextStep::Strengthen);
        isolator.strengthen();

        let second = delta_with_mem_bw(35.0, 100.0);
        assert_eq!(isolator.decide_next_step(&second), NextStep::Strengthen);
        isolator.strengthen();

        // the workload recovered past its baseline: back off
        let positive = delta_with_mem_bw(130.0, 100.0);
        assert_eq!(isolator.decide_next_step(&positive), NextStep::Weaken);
        isolator.weaken();

        // away from both bounds, a negative delta strengthens again
        let negative = delta_with_mem_bw(40.0, 100.0);
        assert_eq!(isolator.decide_next_step(&negative), NextStep::Strengthen);
    }

    #[test]
    fn test_yield_isolation_restarts_first_decision() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        let delta = delta_with_mem_bw(50.0, 100.0);
        assert_eq!(isolator.decide_next_step(&delta), NextStep::Strengthen);
        isolator.strengthen();
        isolator.yield_isolation();

        // after yielding, the small positive signal takes the first-decision
        // fast path instead of being compared against the stale delta
        let small = delta_with_mem_bw(105.0, 100.0);
        assert_eq!(isolator.decide_next_step(&small), NextStep::Stop);
    }

    #[test]
    fn test_strengthen_clamps_at_strongest_level() {
        let backend = Arc::new(MockBackend::default());
        let bgs = bg_workloads();
        backend
            .assigned_cores
            .lock()
            .expect("poisoned")
            .insert(bgs[0].group_name(), BTreeSet::from([4, 5]));
        let mut isolator = CycleLimitIsolator::new(backend.clone(), bgs);

        for _ in 0..32 {
            isolator.strengthen();
        }
        assert!(isolator.is_max_level());
        isolator.enforce().unwrap();

        // quota never drops below the 10% floor: period * 0.10 * 2 cores
        match backend.last_call() {
            Some(MockCall::CpuQuota { quota_us, .. }) => assert_eq!(quota_us, 20_000),
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_weaken_clamps_at_most_permissive_level() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        assert!(isolator.is_min_level());
        for _ in 0..4 {
            isolator.weaken();
        }
        assert!(isolator.is_min_level());
        assert!(!isolator.is_max_level());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let backend = Arc::new(MockBackend::default());
        let bgs = bg_workloads();
        let group = bgs[0].group_name();
        backend
            .assigned_cores
            .lock()
            .expect("poisoned")
            .insert(group, BTreeSet::from([4, 5, 6, 7]));
        let mut isolator = CycleLimitIsolator::new(backend.clone(), bgs);

        isolator.strengthen();
        isolator.strengthen();

        isolator.reset().unwrap();
        let first = backend.take_calls();
        isolator.reset().unwrap();
        let second = backend.take_calls();
        assert_eq!(first, second, "reset twice must enforce the same neutral config");
    }

    #[test]
    fn test_store_and_load_config_round_trip() {
        let backend = Arc::new(MockBackend::default());
        let mut isolator = CycleLimitIsolator::new(backend, bg_workloads());

        isolator.strengthen();
        let strengthened_is_min = isolator.is_min_level();
        isolator.store_cur_config();

        for _ in 0..8 {
            isolator.weaken();
        }
        isolator.load_cur_config().unwrap();
        assert_eq!(isolator.is_min_level(), strengthened_is_min);

        // a second load without a store is a contract violation
        assert_eq!(isolator.load_cur_config(), Err(PolicyError::NoStoredConfig));
    }

    #[test]
    fn test_gpu_freq_throttle_walks_the_ladder() {
        let backend = Arc::new(MockBackend::default());
        let table = NodeClass::IntegratedGpu.gpu_freq_table_hz().to_vec();
        let mut isolator =
            FreqThrottleIsolator::new(backend.clone(), bg_workloads(), FreqDomain::Gpu, table.clone());

        assert!(isolator.is_min_level());
        isolator.strengthen();
        isolator.enforce().unwrap();
        match backend.last_call() {
            Some(MockCall::GpuFreq { freq_hz }) => {
                assert_eq!(freq_hz, table[table.len() - 2]);
            }
            other => panic!("unexpected call: {other:?}"),
        }

        for _ in 0..64 {
            isolator.strengthen();
        }
        assert!(isolator.is_max_level());
        isolator.enforce().unwrap();
        match backend.last_call() {
            Some(MockCall::GpuFreq { freq_hz }) => assert_eq!(freq_hz, table[0]),
            other => panic!("unexpected call: {other:?}"),
        }

        isolator.reset().unwrap();
        match backend.last_call() {
            Some(MockCall::GpuFreq { freq_hz }) => {
                assert_eq!(freq_hz, *table.last().unwrap(), "reset returns to max frequency");
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_cpu_freq_throttle_targets_background_cores() {
        let backend = Arc::new(MockBackend::default());
        let bgs = bg_workloads();
        let table = NodeClass::DiscreteGpu.cpu_freq_table_khz().to_vec();
        let mut isolator =
            FreqThrottleIsolator::new(backend.clone(), bgs.clone(), FreqDomain::Cpu, table.clone());

        isolator.strengthen();
        isolator.enforce().unwrap();
        match backend.last_call() {
            Some(MockCall::CpuFreq { cores, freq_khz }) => {
                assert_eq!(cores, bgs[0].bound_cores());
                assert_eq!(freq_khz, table[table.len() - 2]);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_sched_isolator_shrinks_background_range() {
        let backend = Arc::new(MockBackend::default());
        let fg = Arc::new(Workload::new(
            "latency",
            WorkloadKind::Fg,
            std::process::id(),
            std::process::id(),
            1000,
            BTreeSet::from([0, 1, 2, 3]),
            NodeClass::Cpu,
            8,
        ));
        let bgs = bg_workloads(); // cores 4-7
        let mut isolator = SchedIsolator::new(backend.clone(), fg, bgs.clone());

        assert!(isolator.is_min_level(), "fresh isolator sits at its full allocation");

        isolator.strengthen();
        isolator.enforce().unwrap();
        match backend.last_call() {
            Some(MockCall::Affinity { cores, .. }) => {
                assert_eq!(cores, BTreeSet::from([5, 6, 7]));
            }
            other => panic!("unexpected call: {other:?}"),
        }
        assert_eq!(bgs[0].bound_cores(), BTreeSet::from([5, 6, 7]));

        // keep strengthening: the background never drops below one core
        for _ in 0..16 {
            isolator.strengthen();
        }
        assert!(isolator.is_max_level());
        isolator.enforce().unwrap();
        match backend.last_call() {
            Some(MockCall::Affinity { cores, .. }) => {
                assert_eq!(cores, BTreeSet::from([7]));
            }
            other => panic!("unexpected call: {other:?}"),
        }

        isolator.reset().unwrap();
        assert_eq!(bgs[0].bound_cores(), BTreeSet::from([4, 5, 6, 7]));
    }
}
