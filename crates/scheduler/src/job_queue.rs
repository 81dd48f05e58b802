use api_types::JobObjective;

use crate::job::Job;

/// Pending jobs split by objective; latency-critical jobs always leave the
/// queue before throughput-oriented ones.
#[derive(Default)]
pub(crate) struct PendingJobQueue {
    latency: Vec<Job>,
    throughput: Vec<Job>,
}

impl PendingJobQueue {
    pub(crate) fn add(&mut self, job: Job) {
        tracing::info!("job {} is pending", job.name());
        match job.objective() {
            JobObjective::Latency => self.latency.push(job),
            JobObjective::Throughput => self.throughput.push(job),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.latency.len() + self.throughput.len()
    }

    pub(crate) fn pop(&mut self) -> Option<Job> {
        if let Some(job) = self.latency.pop() {
            return Some(job);
        }
        self.throughput.pop()
    }

    /// Put a job back after a failed dispatch attempt.
    pub(crate) fn push_back(&mut self, job: Job) {
        match job.objective() {
            JobObjective::Latency => self.latency.insert(0, job),
            JobObjective::Throughput => self.throughput.insert(0, job),
        }
    }
}

#[cfg(test)]
mod tests {
    use api_types::JobPreference;
    use api_types::JobSubmission;
    use api_types::WorkloadKind;

    use super::*;

    fn job(name: &str, objective: JobObjective) -> Job {
        Job::new(JobSubmission {
            name: name.to_string(),
            kind: WorkloadKind::Bg,
            preference: JobPreference::Cpu,
            objective,
        })
    }

    #[test]
    fn test_latency_jobs_pop_first() {
        let mut queue = PendingJobQueue::default();
        queue.add(job("batch", JobObjective::Throughput));
        queue.add(job("web", JobObjective::Latency));
        queue.add(job("batch2", JobObjective::Throughput));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().name(), "web");
        assert_eq!(queue.pop().unwrap().objective(), JobObjective::Throughput);
        assert_eq!(queue.pop().unwrap().objective(), JobObjective::Throughput);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_back_keeps_ordering() {
        let mut queue = PendingJobQueue::default();
        queue.add(job("a", JobObjective::Throughput));
        let popped = queue.pop().unwrap();
        queue.add(job("b", JobObjective::Throughput));
        queue.push_back(popped);

        // the returned job goes to the back of its list
        assert_eq!(queue.pop().unwrap().name(), "b");
        assert_eq!(queue.pop().unwrap().name(), "a");
    }
}
