use api_types::JobObjective;
use api_types::JobSubmission;

/// A submitted job on its way to a node.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    spec: JobSubmission,
    /// destination once dispatched
    dest: Option<(String, u16)>,
}

impl Job {
    pub(crate) fn new(spec: JobSubmission) -> Self {
        Self { spec, dest: None }
    }

    pub(crate) fn spec(&self) -> &JobSubmission {
        &self.spec
    }

    pub(crate) fn name(&self) -> &str {
        &self.spec.name
    }

    pub(crate) fn objective(&self) -> JobObjective {
        self.spec.objective
    }

    pub(crate) fn mark_dispatched(&mut self, addr: String, port: u16) {
        self.dest = Some((addr, port));
    }

    #[allow(dead_code)]
    pub(crate) fn dest(&self) -> Option<&(String, u16)> {
        self.dest.as_ref()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} {} job)",
            self.spec.name, self.spec.objective, self.spec.kind
        )
    }
}
