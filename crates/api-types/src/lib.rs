//! Shared type definitions
//!
//! This crate contains the data model shared between the per-node
//! interference controller and the cluster scheduler: hardware counter
//! samples and their normalized deltas, node hardware classification, and
//! the wire events exchanged over the ingestion streams.

mod events;
mod metrics;
mod node;

pub use events::JobObjective;
pub use events::JobPreference;
pub use events::JobSubmission;
pub use events::MetricReport;
pub use events::NodeStatus;
pub use events::RawCounters;
pub use events::WireEvent;
pub use events::WorkloadCreation;
pub use events::WorkloadKind;
pub use metrics::MetricDelta;
pub use metrics::MetricSample;
pub use node::NodeClass;
