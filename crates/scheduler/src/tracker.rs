use std::collections::HashMap;

use api_types::JobPreference;
use api_types::NodeClass;
use api_types::NodeStatus;

use crate::node::Node;

/// Keeps the last reported state of every controller node and answers the
/// single placement question: which node is least contended right now.
pub(crate) struct NodeTracker {
    nodes: HashMap<String, Node>,
    history_size: usize,
}

impl NodeTracker {
    pub(crate) fn new(history_size: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            history_size,
        }
    }

    pub(crate) fn on_status(&mut self, status: &NodeStatus) {
        match self.nodes.get_mut(&status.addr) {
            Some(node) => node.update(status),
            None => {
                tracing::info!("tracking node {}:{}", status.addr, status.port);
                self.nodes
                    .insert(status.addr.clone(), Node::new(status, self.history_size));
            }
        }
    }

    #[allow(dead_code)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Least-contended node matching the job's hardware preference; greedy
    /// linear scan, ties broken by report order.
    pub(crate) fn least_contended(&self, preference: JobPreference) -> Option<&Node> {
        self.nodes
            .values()
            .filter(|node| match preference {
                JobPreference::Gpu => {
                    matches!(node.class(), NodeClass::IntegratedGpu | NodeClass::DiscreteGpu)
                }
                JobPreference::Cpu => true,
            })
            .min_by(|a, b| a.aggr_contention().total_cmp(&b.aggr_contention()))
    }
}
