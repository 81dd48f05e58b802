use std::sync::Arc;

use api_types::WorkloadKind;

use crate::config::NodeSpec;
use crate::enforcement::EnforcementBackend;
use crate::isolation::policy::IsolationPolicy;
use crate::workload::Workload;

/// Buffers newly observed workloads until a complete foreground+background
/// group is assembled, then holds the resulting policy until its workloads
/// have produced metric data and the control loop picks it up.
pub(crate) struct PendingQueue {
    node: Arc<NodeSpec>,
    backend: Arc<dyn EnforcementBackend>,
    ready_queue: Vec<Arc<Workload>>,
    pending: Vec<IsolationPolicy>,
}

impl PendingQueue {
    pub(crate) fn new(node: Arc<NodeSpec>, backend: Arc<dyn EnforcementBackend>) -> Self {
        Self {
            node,
            backend,
            ready_queue: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Register a workload; once `max_workloads` have accumulated, group
    /// them into one policy and start a fresh accumulation.
    pub(crate) fn add(&mut self, workload: Arc<Workload>, max_workloads: usize) {
        tracing::info!("{workload} is ready for activation");
        self.ready_queue.push(workload);

        if self.ready_queue.len() < max_workloads {
            return;
        }

        let mut fg = None;
        let mut bgs = Vec::new();
        for workload in self.ready_queue.drain(..) {
            match workload.kind() {
                WorkloadKind::Fg => fg = Some(workload),
                WorkloadKind::Bg => bgs.push(workload),
            }
        }

        match fg {
            Some(fg) => {
                let policy = IsolationPolicy::new(fg, bgs, &self.node, self.backend.clone());
                tracing::info!("isolation group {policy} assembled");
                self.pending.push(policy);
            }
            None => {
                tracing::warn!("discarding workload group without a foreground");
            }
        }
    }

    fn is_ready(policy: &IsolationPolicy) -> bool {
        policy.foreground().sample_count() > 0 && policy.check_bg_wls_metrics()
    }

    /// Number of assembled policies whose workloads all have metric data.
    pub(crate) fn len(&self) -> usize {
        self.pending.iter().filter(|p| Self::is_ready(p)).count()
    }

    /// Pop one policy that is ready for control, oldest first.
    pub(crate) fn pop(&mut self) -> Option<IsolationPolicy> {
        let idx = self.pending.iter().position(|p| Self::is_ready(p))?;
        Some(self.pending.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use api_types::NodeClass;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::enforcement::tests::MockBackend;
    use crate::workload::tests::live_workload;
    use crate::workload::tests::stable_workload;
    use crate::workload::tests::test_sample;

    fn queue() -> PendingQueue {
        PendingQueue::new(
            Arc::new(NodeSpec::for_class(NodeClass::Cpu)),
            Arc::new(MockBackend::default()),
        )
    }

    fn fill_buffers(policy: &IsolationPolicy) {
        policy.foreground().push_sample(test_sample(10.0));
        for bg in policy.backgrounds() {
            bg.push_sample(test_sample(10.0));
        }
    }

    #[test]
    fn test_group_emitted_once_complete() {
        let mut queue = queue();

        queue.add(Arc::new(stable_workload("fg", WorkloadKind::Fg, 8)), 3);
        queue.add(Arc::new(live_workload("bg0", WorkloadKind::Bg, 8)), 3);
        assert_eq!(queue.len(), 0, "incomplete group must not be visible");
        assert!(queue.pop().is_none());

        queue.add(Arc::new(live_workload("bg1", WorkloadKind::Bg, 8)), 3);
        // assembled, but no metric data yet
        assert_eq!(queue.len(), 0);

        let policy = &queue.pending[0];
        fill_buffers(policy);

        assert_eq!(queue.len(), 1);
        let popped = queue.pop().expect("one ready policy");
        assert_eq!(popped.backgrounds().len(), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_next_add_starts_independent_accumulation() {
        let mut queue = queue();

        queue.add(Arc::new(stable_workload("fg", WorkloadKind::Fg, 8)), 3);
        queue.add(Arc::new(live_workload("bg0", WorkloadKind::Bg, 8)), 3);
        queue.add(Arc::new(live_workload("bg1", WorkloadKind::Bg, 8)), 3);
        assert_eq!(queue.pending.len(), 1);

        // a fourth add lands in a new, empty accumulation
        queue.add(Arc::new(stable_workload("fg2", WorkloadKind::Fg, 8)), 3);
        assert_eq!(queue.pending.len(), 1);
        assert_eq!(queue.ready_queue.len(), 1);

        queue.add(Arc::new(live_workload("bg2", WorkloadKind::Bg, 8)), 3);
        queue.add(Arc::new(live_workload("bg3", WorkloadKind::Bg, 8)), 3);
        assert_eq!(queue.pending.len(), 2, "second group assembled independently");
    }

    #[test]
    fn test_group_without_foreground_is_discarded() {
        let mut queue = queue();

        queue.add(Arc::new(live_workload("bg0", WorkloadKind::Bg, 8)), 2);
        queue.add(Arc::new(live_workload("bg1", WorkloadKind::Bg, 8)), 2);

        assert_eq!(queue.pending.len(), 0);
        assert_eq!(queue.ready_queue.len(), 0);
    }
}
