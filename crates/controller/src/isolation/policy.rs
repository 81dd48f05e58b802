use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::MetricDelta;
use api_types::NodeClass;

use super::isolators::CycleLimitIsolator;
use super::isolators::FreqDomain;
use super::isolators::FreqThrottleIsolator;
use super::isolators::IdleIsolator;
use super::isolators::Isolator;
use super::isolators::IsolatorKind;
use super::isolators::SchedIsolator;
use super::IsolationError;
use super::PolicyError;
use super::ResourceKind;
use crate::config::NodeSpec;
use crate::enforcement::EnforcementBackend;
use crate::workload::Workload;

const VERIFY_THRESHOLD: u32 = 3;
const VIOLATION_THRESHOLD: u32 = 3;

/// One isolation group: a foreground whose QoS is protected, the
/// backgrounds throttled on its behalf, and the isolators legal on this
/// node. Exactly one isolator is active at a time, initially Idle.
pub(crate) struct IsolationPolicy {
    fg: Arc<Workload>,
    bgs: Vec<Arc<Workload>>,
    node_class: NodeClass,

    isolators: BTreeMap<IsolatorKind, Box<dyn Isolator>>,
    idle: IdleIsolator,
    cur_kind: IsolatorKind,

    in_solorun_profile: bool,
    cached_fg_threads: u32,
    solorun_verify_violations: u32,
    violation_count: u32,
}

impl IsolationPolicy {
    pub(crate) fn new(
        fg: Arc<Workload>,
        bgs: Vec<Arc<Workload>>,
        node: &NodeSpec,
        backend: Arc<dyn EnforcementBackend>,
    ) -> Self {
        let mut isolators: BTreeMap<IsolatorKind, Box<dyn Isolator>> = BTreeMap::new();
        isolators.insert(
            IsolatorKind::CycleLimit,
            Box::new(CycleLimitIsolator::new(backend.clone(), bgs.clone())),
        );
        match node.class {
            NodeClass::Cpu => {
                isolators.insert(
                    IsolatorKind::SchedCore,
                    Box::new(SchedIsolator::new(backend, fg.clone(), bgs.clone())),
                );
            }
            NodeClass::IntegratedGpu => {
                isolators.insert(
                    IsolatorKind::FreqThrottle,
                    Box::new(FreqThrottleIsolator::new(
                        backend,
                        bgs.clone(),
                        FreqDomain::Gpu,
                        node.gpu_freq_table_hz.clone(),
                    )),
                );
            }
            NodeClass::DiscreteGpu => {
                isolators.insert(
                    IsolatorKind::FreqThrottle,
                    Box::new(FreqThrottleIsolator::new(
                        backend,
                        bgs.clone(),
                        FreqDomain::Cpu,
                        node.cpu_freq_table_khz.clone(),
                    )),
                );
            }
        }

        let cached_fg_threads = fg.number_of_threads();
        Self {
            fg,
            bgs,
            node_class: node.class,
            isolators,
            idle: IdleIsolator,
            cur_kind: IsolatorKind::Idle,
            in_solorun_profile: false,
            cached_fg_threads,
            solorun_verify_violations: 0,
            violation_count: 0,
        }
    }

    pub(crate) fn foreground(&self) -> &Arc<Workload> {
        &self.fg
    }

    pub(crate) fn backgrounds(&self) -> &[Arc<Workload>] {
        &self.bgs
    }

    pub(crate) fn cur_kind(&self) -> IsolatorKind {
        self.cur_kind
    }

    pub(crate) fn cur_isolator_mut(&mut self) -> &mut dyn Isolator {
        if self.cur_kind == IsolatorKind::Idle {
            &mut self.idle
        } else {
            self.isolators
                .get_mut(&self.cur_kind)
                .expect("active isolator kind must exist in the map")
                .as_mut()
        }
    }

    /// The group ends with its foreground.
    pub(crate) fn ended(&self) -> bool {
        !self.fg.is_running()
    }

    /// Decisions need a current window, a baseline, and healthy background
    /// feeds.
    pub(crate) fn has_enough_data(&self) -> bool {
        self.fg.sample_count() > 0
            && self.fg.solorun_baseline().is_some()
            && self.check_bg_wls_metrics()
    }

    pub(crate) fn check_bg_wls_metrics(&self) -> bool {
        self.bgs.iter().all(|bg| bg.sample_count() > 0)
    }

    pub(crate) fn foreground_delta(&self) -> MetricDelta {
        self.fg.calc_metric_diff()
    }

    // -- contention ranking and isolator selection --------------------------

    /// Resources ranked worst first: when everything degraded (all values
    /// positive) the largest wins, otherwise the most negative wins.
    pub(crate) fn contentious_resources(&self) -> Vec<(ResourceKind, f64)> {
        let diff = self.fg.calc_metric_diff();
        tracing::info!("foreground {}: {}", self.fg, diff);

        let mut resources = vec![
            (ResourceKind::Cache, diff.llc_hit_ratio()),
            (ResourceKind::Memory, diff.mem_bw()),
        ];
        if resources.iter().all(|(_, v)| *v > 0.0) {
            resources.sort_by(|a, b| b.1.total_cmp(&a.1));
        } else {
            resources.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        resources
    }

    pub(crate) fn contentious_resource(&self) -> ResourceKind {
        self.contentious_resources()[0].0
    }

    fn isolator_kind_for(&self, resource: ResourceKind) -> IsolatorKind {
        match resource {
            ResourceKind::Cache => IsolatorKind::CycleLimit,
            ResourceKind::Memory => match self.node_class {
                NodeClass::Cpu => IsolatorKind::SchedCore,
                NodeClass::IntegratedGpu | NodeClass::DiscreteGpu => IsolatorKind::FreqThrottle,
            },
        }
    }

    /// Pick the first ranked candidate that still has headroom in the
    /// direction the delta asks for. Returns whether one was activated.
    pub(crate) fn choose_next_isolator(&mut self) -> bool {
        for (resource, diff_value) in self.contentious_resources() {
            let kind = self.isolator_kind_for(resource);
            let isolator = self
                .isolators
                .get(&kind)
                .expect("ranked resource maps to an isolator of this node");

            if diff_value < 0.0 && !isolator.is_max_level()
                || diff_value > 0.0 && !isolator.is_min_level()
            {
                self.cur_kind = kind;
                self.violation_count = 0;
                tracing::info!("starting {kind} isolation for {self}");
                return true;
            }
        }

        tracing::debug!("no new isolator selected for {self}");
        false
    }

    /// The active isolator no longer matches the most contentious resource.
    fn is_violation(&self) -> bool {
        match self.contentious_resource() {
            ResourceKind::Cache => self.cur_kind != IsolatorKind::CycleLimit,
            ResourceKind::Memory => !matches!(
                self.cur_kind,
                IsolatorKind::SchedCore | IsolatorKind::FreqThrottle
            ),
        }
    }

    /// Idle always needs a selection; an active isolator is only replaced
    /// after repeated violations, so a single noisy sample cannot cause
    /// isolator thrashing.
    pub(crate) fn new_isolator_needed(&mut self) -> bool {
        if self.cur_kind == IsolatorKind::Idle {
            return true;
        }

        if self.is_violation() {
            tracing::info!(
                "violation detected for {self}, active isolator: {}",
                self.cur_kind
            );
            self.violation_count += 1;

            if self.violation_count >= VIOLATION_THRESHOLD {
                tracing::info!("new isolator required for {self} after repeated violations");
                self.set_idle_isolator();
                self.violation_count = 0;
                return true;
            }
        }

        false
    }

    pub(crate) fn set_idle_isolator(&mut self) {
        self.cur_isolator_mut().yield_isolation();
        self.cur_kind = IsolatorKind::Idle;
    }

    /// Restore every isolator to its neutral configuration. Failures are
    /// expected here (the group usually ends because its processes died)
    /// and only logged. A group retired mid-profiling also gets its
    /// backgrounds resumed.
    pub(crate) fn reset(&mut self) {
        for isolator in self.isolators.values_mut() {
            if let Err(e) = isolator.reset() {
                tracing::warn!("failed to reset {} of {}: {e}", isolator.kind(), self.fg);
            }
        }
        if self.in_solorun_profile {
            for bg in &self.bgs {
                bg.resume();
            }
            self.in_solorun_profile = false;
        }
    }

    // -- solorun profiling ---------------------------------------------------

    pub(crate) fn in_solorun_profiling(&self) -> bool {
        self.in_solorun_profile
    }

    /// Suspend the backgrounds and run the foreground undisturbed so a
    /// fresh baseline can be collected.
    pub(crate) fn start_solorun_profiling(&mut self) -> Result<(), IsolationError> {
        if self.in_solorun_profile {
            return Err(PolicyError::AlreadyProfiling.into());
        }

        self.in_solorun_profile = true;
        self.cached_fg_threads = self.fg.number_of_threads();
        self.solorun_verify_violations = 0;

        for bg in &self.bgs {
            bg.pause();
        }
        self.fg.clear_metrics();

        for isolator in self.isolators.values_mut() {
            isolator.store_cur_config();
            isolator.reset()?;
        }
        Ok(())
    }

    /// Average the window into a new baseline, restore the saved isolator
    /// configurations and resume the backgrounds.
    pub(crate) fn stop_solorun_profiling(&mut self) -> Result<(), IsolationError> {
        if !self.in_solorun_profile {
            return Err(PolicyError::NotProfiling.into());
        }

        let collected = self.fg.sample_count();
        tracing::debug!("collected {collected} solorun samples for {}", self.fg);
        if collected > 0 {
            self.fg.set_solorun_baseline(self.fg.average(collected));
        } else {
            // feed stalled during the window; keep the stale baseline
            tracing::warn!("no solorun samples collected for {}", self.fg);
        }

        for isolator in self.isolators.values_mut() {
            isolator.load_cur_config()?;
            isolator.enforce()?;
        }

        self.fg.clear_metrics();
        for bg in &self.bgs {
            bg.resume();
        }
        self.in_solorun_profile = false;
        Ok(())
    }

    /// Whether a (re-)profiling run is due: no baseline yet, the delta kept
    /// failing verification, or the foreground changed its thread count.
    pub(crate) fn profile_needed(&mut self) -> bool {
        if self.fg.solorun_baseline().is_none() {
            tracing::debug!("initializing solorun data for {}", self.fg);
            return true;
        }

        if self.fg.sample_count() > 0 {
            if self.fg.calc_metric_diff().verify() {
                self.solorun_verify_violations = 0;
            } else {
                self.solorun_verify_violations += 1;
                if self.solorun_verify_violations == VERIFY_THRESHOLD {
                    tracing::debug!(
                        "solorun data of {} failed verification: {}",
                        self.fg,
                        self.fg.calc_metric_diff()
                    );
                    return true;
                }
            }
        }

        let cur_threads = self.fg.number_of_threads();
        if cur_threads != 0 && cur_threads != self.cached_fg_threads {
            tracing::debug!(
                "thread count of {} changed: cached {}, current {}",
                self.fg,
                self.cached_fg_threads,
                cur_threads
            );
            return true;
        }

        false
    }
}

impl std::fmt::Display for IsolationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.fg.name(), self.fg.pid())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use api_types::MetricSample;
    use api_types::WorkloadKind;

    use super::*;
    use crate::enforcement::tests::MockBackend;
    use crate::workload::tests::live_workload;
    use crate::workload::tests::stable_workload;

    pub(crate) fn counters(references: f64, misses: f64) -> MetricSample {
        MetricSample {
            llc_references: references,
            llc_misses: misses,
            instructions: 5000.0,
            cycles: 2000.0,
            gpu_core_util: 0.0,
            gpu_core_freq: 0.0,
            gpu_mem_util: 0.0,
            gpu_mem_freq: 0.0,
            interval_ms: 1000.0,
        }
    }

    /// CPU-node policy over one live foreground and two live backgrounds,
    /// with the mock backend answering core queries for all groups.
    pub(crate) fn cpu_policy() -> (IsolationPolicy, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        let fg = Arc::new(stable_workload("latency", WorkloadKind::Fg, 8));
        let bgs = vec![
            Arc::new(live_workload("batch0", WorkloadKind::Bg, 8)),
            Arc::new(live_workload("batch1", WorkloadKind::Bg, 8)),
        ];
        {
            let mut cores = backend.assigned_cores.lock().expect("poisoned");
            for bg in &bgs {
                cores.insert(bg.group_name(), bg.bound_cores());
            }
            cores.insert(fg.group_name(), fg.bound_cores());
        }

        let node = NodeSpec::for_class(NodeClass::Cpu);
        let policy = IsolationPolicy::new(fg, bgs, &node, backend.clone());
        (policy, backend)
    }

    /// Replace the foreground window so `[cur vs base]` yields the wanted
    /// ranking.
    fn feed(policy: &IsolationPolicy, cur: MetricSample, base: MetricSample) {
        policy.fg.clear_metrics();
        policy.fg.push_sample(cur);
        policy.fg.set_solorun_baseline(base);
    }

    /// cache delta negative and worst: most contentious resource is CACHE
    fn cache_contentious(policy: &IsolationPolicy) {
        feed(policy, counters(1000.0, 150.0), counters(1000.0, 100.0));
    }

    /// memory delta most negative: most contentious resource is MEMORY
    fn memory_contentious(policy: &IsolationPolicy) {
        feed(policy, counters(1000.0, 10.0), counters(1000.0, 100.0));
    }

    /// both deltas positive, memory the larger: MEMORY ranks first
    fn memory_contentious_all_positive(policy: &IsolationPolicy) {
        feed(policy, counters(4000.0, 200.0), counters(1000.0, 100.0));
    }

    #[test]
    fn test_ranking_prefers_most_negative_on_mixed_signs() {
        let (policy, _) = cpu_policy();
        cache_contentious(&policy);

        let ranked = policy.contentious_resources();
        assert_eq!(ranked[0].0, ResourceKind::Cache);
        assert!(ranked[0].1 < 0.0);
        assert_eq!(policy.contentious_resource(), ResourceKind::Cache);
    }

    #[test]
    fn test_ranking_prefers_largest_when_all_positive() {
        let (policy, _) = cpu_policy();
        memory_contentious_all_positive(&policy);

        let ranked = policy.contentious_resources();
        assert_eq!(ranked[0].0, ResourceKind::Memory);
        assert!(ranked.iter().all(|(_, v)| *v > 0.0));
    }

    #[test]
    fn test_choose_isolator_maps_cache_to_cycle_limit() {
        let (mut policy, _) = cpu_policy();
        cache_contentious(&policy);

        assert!(policy.new_isolator_needed(), "idle policy always needs one");
        assert!(policy.choose_next_isolator());
        assert_eq!(policy.cur_kind(), IsolatorKind::CycleLimit);
    }

    #[test]
    fn test_choose_isolator_maps_memory_to_sched_on_cpu_node() {
        let (mut policy, _) = cpu_policy();
        memory_contentious(&policy);

        assert!(policy.choose_next_isolator());
        assert_eq!(policy.cur_kind(), IsolatorKind::SchedCore);
    }

    #[test]
    fn test_memory_maps_to_freq_throttle_on_gpu_nodes() {
        for class in [NodeClass::IntegratedGpu, NodeClass::DiscreteGpu] {
            let backend = Arc::new(MockBackend::default());
            let fg = Arc::new(stable_workload("latency", WorkloadKind::Fg, 8));
            let bgs = vec![Arc::new(live_workload("batch0", WorkloadKind::Bg, 8))];
            let node = NodeSpec::for_class(class);
            let mut policy = IsolationPolicy::new(fg, bgs, &node, backend);

            memory_contentious(&policy);
            assert!(policy.choose_next_isolator());
            assert_eq!(policy.cur_kind(), IsolatorKind::FreqThrottle);
        }
    }

    #[test]
    fn test_choose_isolator_skips_saturated_candidates() {
        let (mut policy, _) = cpu_policy();
        // all positive: the weaken direction is saturated on fresh isolators
        memory_contentious_all_positive(&policy);

        assert!(!policy.choose_next_isolator());
        assert_eq!(policy.cur_kind(), IsolatorKind::Idle);
    }

    #[test]
    fn test_violation_hysteresis_fires_on_third_detection() {
        let (mut policy, _) = cpu_policy();
        cache_contentious(&policy);
        assert!(policy.choose_next_isolator());
        assert_eq!(policy.cur_kind(), IsolatorKind::CycleLimit);

        // contention moves to memory while CycleLimit stays active
        memory_contentious(&policy);
        assert!(!policy.new_isolator_needed());
        assert!(!policy.new_isolator_needed());
        assert!(policy.new_isolator_needed(), "third consecutive violation");

        assert_eq!(policy.violation_count, 0, "counter resets after firing");
        assert_eq!(policy.cur_kind(), IsolatorKind::Idle);
    }

    #[test]
    fn test_matching_isolator_is_not_a_violation() {
        let (mut policy, _) = cpu_policy();
        memory_contentious(&policy);
        assert!(policy.choose_next_isolator());
        assert_eq!(policy.cur_kind(), IsolatorKind::SchedCore);

        for _ in 0..5 {
            assert!(!policy.new_isolator_needed());
        }
        assert_eq!(policy.violation_count, 0);
    }

    #[test]
    fn test_solorun_start_pauses_backgrounds_and_clears_window() {
        let (mut policy, _) = cpu_policy();
        cache_contentious(&policy);

        policy.start_solorun_profiling().unwrap();
        assert!(policy.in_solorun_profiling());
        assert!(policy.backgrounds().iter().all(|bg| bg.is_paused()));
        assert_eq!(policy.foreground().sample_count(), 0);
    }

    #[test]
    fn test_solorun_double_start_is_invalid_state() {
        let (mut policy, _) = cpu_policy();
        cache_contentious(&policy);

        policy.start_solorun_profiling().unwrap();
        let err = policy.start_solorun_profiling().unwrap_err();
        assert!(matches!(
            err,
            IsolationError::InvalidState(PolicyError::AlreadyProfiling)
        ));
    }

    #[test]
    fn test_solorun_stop_without_start_is_invalid_state() {
        let (mut policy, _) = cpu_policy();
        let err = policy.stop_solorun_profiling().unwrap_err();
        assert!(matches!(
            err,
            IsolationError::InvalidState(PolicyError::NotProfiling)
        ));
    }

    #[test]
    fn test_solorun_stop_installs_averaged_baseline_and_resumes() {
        let (mut policy, _) = cpu_policy();
        cache_contentious(&policy);
        policy.start_solorun_profiling().unwrap();

        // samples collected while the foreground ran alone
        policy.foreground().push_sample(counters(1000.0, 40.0));
        policy.foreground().push_sample(counters(1000.0, 60.0));

        policy.stop_solorun_profiling().unwrap();
        assert!(!policy.in_solorun_profiling());
        assert!(policy.backgrounds().iter().all(|bg| !bg.is_paused()));

        let baseline = policy.foreground().solorun_baseline().unwrap();
        assert_eq!(baseline.llc_misses, 50.0);
        assert_eq!(
            policy.foreground().sample_count(),
            0,
            "window cleared so only corun samples feed the next decision"
        );
    }

    #[test]
    fn test_profile_needed_without_baseline() {
        let (mut policy, _) = cpu_policy();
        assert!(policy.profile_needed());
    }

    #[test]
    fn test_profile_needed_after_repeated_verify_failures() {
        let (mut policy, _) = cpu_policy();
        // current misses far beyond double the baseline: verify() fails
        feed(&policy, counters(1000.0, 500.0), counters(1000.0, 100.0));
        policy.cached_fg_threads = policy.foreground().number_of_threads();

        assert!(!policy.profile_needed());
        assert!(!policy.profile_needed());
        assert!(policy.profile_needed(), "third consecutive failure");
    }

    #[test]
    fn test_verify_counter_resets_on_success() {
        let (mut policy, _) = cpu_policy();
        policy.cached_fg_threads = policy.foreground().number_of_threads();

        feed(&policy, counters(1000.0, 500.0), counters(1000.0, 100.0));
        assert!(!policy.profile_needed());
        assert!(!policy.profile_needed());

        // a healthy window breaks the streak
        feed(&policy, counters(1000.0, 100.0), counters(1000.0, 100.0));
        assert!(!policy.profile_needed());

        feed(&policy, counters(1000.0, 500.0), counters(1000.0, 100.0));
        assert!(!policy.profile_needed());
        assert!(!policy.profile_needed());
        assert!(policy.profile_needed());
    }

    #[test]
    fn test_profile_needed_on_thread_count_change() {
        // foreground backed by the test process, whose thread count is
        // always readable and nonzero
        let backend = Arc::new(MockBackend::default());
        let fg = Arc::new(live_workload("latency", WorkloadKind::Fg, 8));
        let node = NodeSpec::for_class(NodeClass::Cpu);
        let mut policy = IsolationPolicy::new(fg, vec![], &node, backend);
        feed(&policy, counters(1000.0, 100.0), counters(1000.0, 100.0));

        policy.cached_fg_threads = 0;
        assert!(policy.profile_needed());
    }

    #[test]
    fn test_ended_follows_foreground_liveness() {
        let (policy, _) = cpu_policy();
        assert!(!policy.ended());

        let backend = Arc::new(MockBackend::default());
        let fg = Arc::new(crate::workload::tests::dead_workload(
            "gone",
            WorkloadKind::Fg,
        ));
        let node = NodeSpec::for_class(NodeClass::Cpu);
        let dead = IsolationPolicy::new(fg, vec![], &node, backend);
        assert!(dead.ended());
    }
}
