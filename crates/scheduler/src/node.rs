use std::collections::VecDeque;

use api_types::NodeClass;
use api_types::NodeStatus;

/// Cluster-side view of one controller node, refreshed by its status
/// reports. Contention history is bounded; only the window matters.
pub(crate) struct Node {
    addr: String,
    port: u16,
    class: NodeClass,
    num_workloads: u32,
    num_fg_wls: u32,
    num_bg_wls: u32,
    aggr_contention: f64,
    contention_history: VecDeque<f64>,
    history_size: usize,
}

impl Node {
    pub(crate) fn new(status: &NodeStatus, history_size: usize) -> Self {
        let mut node = Self {
            addr: status.addr.clone(),
            port: status.port,
            class: status.class,
            num_workloads: 0,
            num_fg_wls: 0,
            num_bg_wls: 0,
            aggr_contention: 0.0,
            contention_history: VecDeque::with_capacity(history_size),
            history_size,
        };
        node.update(status);
        node
    }

    pub(crate) fn update(&mut self, status: &NodeStatus) {
        self.class = status.class;
        self.num_workloads = status.num_workloads;
        self.num_fg_wls = status.num_fg_wls;
        self.num_bg_wls = status.num_bg_wls;
        self.aggr_contention = status.aggr_contention;

        if self.contention_history.len() == self.history_size {
            self.contention_history.pop_back();
        }
        self.contention_history.push_front(status.aggr_contention);
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn class(&self) -> NodeClass {
        self.class
    }

    pub(crate) fn aggr_contention(&self) -> f64 {
        self.aggr_contention
    }

    #[allow(dead_code)]
    pub(crate) fn num_workloads(&self) -> u32 {
        self.num_workloads
    }

    #[allow(dead_code)]
    pub(crate) fn contention_history(&self) -> &VecDeque<f64> {
        &self.contention_history
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.addr, self.port, self.class)
    }
}
