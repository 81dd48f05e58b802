use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::isolation::policy::IsolationPolicy;
use crate::isolation::IsolationError;
use crate::isolation::NextStep;
use crate::pending_queue::PendingQueue;

/// One isolation group under control, addressed by an opaque handle.
struct Group {
    policy: IsolationPolicy,
    iteration: u64,
    /// iteration at which the current solorun profiling window opened
    solorun_started: Option<u64>,
}

/// The periodic driver: retires ended groups, activates assembled ones and
/// runs one control step per group each tick.
pub(crate) struct ControlLoop {
    pending: Arc<Mutex<PendingQueue>>,
    groups: HashMap<u64, Group>,
    next_handle: u64,
    control_interval: Duration,
    /// control ticks between phase-change checks
    profile_ticks: u64,
    /// control ticks a solorun profiling window stays open
    solorun_ticks: u64,
}

impl ControlLoop {
    pub(crate) fn new(
        pending: Arc<Mutex<PendingQueue>>,
        control_interval: Duration,
        profile_interval: Duration,
        solorun_interval: Duration,
    ) -> Self {
        let ticks = |d: Duration| (d.as_millis() / control_interval.as_millis()).max(1) as u64;
        Self {
            pending,
            groups: HashMap::new(),
            next_handle: 0,
            control_interval,
            profile_ticks: ticks(profile_interval),
            solorun_ticks: ticks(solorun_interval),
        }
    }

    /// Run until cancelled; the token is honored at the top of each tick.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            "starting isolation loop, interval {:?}",
            self.control_interval
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("isolation loop stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.control_interval) => {
                    self.tick()?;
                }
            }
        }
    }

    /// One control tick. Ended groups are retired before pending ones are
    /// activated, which happens before any decision runs.
    pub(crate) fn tick(&mut self) -> Result<()> {
        self.remove_ended_groups();
        self.register_pending_workloads();
        self.isolate_workloads()
    }

    fn remove_ended_groups(&mut self) {
        let ended: Vec<u64> = self
            .groups
            .iter()
            .filter(|(_, g)| g.policy.ended())
            .map(|(handle, _)| *handle)
            .collect();

        for handle in ended {
            if let Some(mut group) = self.groups.remove(&handle) {
                tracing::info!("isolation group {} ended", group.policy);
                group.policy.reset();
            }
        }
    }

    fn register_pending_workloads(&mut self) {
        let mut pending = self.pending.lock().expect("poisoned");
        let ready = pending.len();
        if ready > 0 {
            tracing::debug!("{ready} isolation groups ready for activation");
        }
        while let Some(policy) = pending.pop() {
            tracing::info!("{policy} activated");
            let handle = self.next_handle;
            self.next_handle += 1;
            self.groups.insert(
                handle,
                Group {
                    policy,
                    iteration: 0,
                    solorun_started: None,
                },
            );
        }
    }

    fn isolate_workloads(&mut self) -> Result<()> {
        let mut handles: Vec<u64> = self.groups.keys().copied().collect();
        handles.sort_unstable();

        for handle in handles {
            let group = self.groups.get_mut(&handle).expect("handle just listed");
            tracing::debug!("isolation of {} #{}", group.policy, group.iteration);

            match Self::control_step(group, self.profile_ticks, self.solorun_ticks) {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!("skipping {} for this tick: {e}", group.policy);
                }
                Err(e) => return Err(e.into()),
            }
            group.iteration += 1;
        }
        Ok(())
    }

    fn control_step(
        group: &mut Group,
        profile_ticks: u64,
        solorun_ticks: u64,
    ) -> Result<(), IsolationError> {
        let policy = &mut group.policy;

        if policy.in_solorun_profiling() {
            let started = group
                .solorun_started
                .expect("profiling group has a start marker");
            if group.iteration.saturating_sub(started) >= solorun_ticks {
                tracing::info!("stopping solorun profiling of {policy}");
                policy.stop_solorun_profiling()?;
                group.solorun_started = None;
                // the corun window is empty now; decisions resume once it refills
            } else {
                tracing::debug!("skipping isolation of {policy}: solorun profiling");
            }
            return Ok(());
        }

        if group.iteration % profile_ticks == 0 && policy.profile_needed() {
            tracing::info!("starting solorun profiling of {policy}");
            policy.start_solorun_profiling()?;
            group.solorun_started = Some(group.iteration);
            return Ok(());
        }

        if !policy.has_enough_data() {
            tracing::debug!("skipping isolation of {policy}: insufficient metric data");
            return Ok(());
        }

        if policy.new_isolator_needed() {
            policy.choose_next_isolator();
        }

        let delta = policy.foreground_delta();
        tracing::info!(
            target: "metrics::contention",
            tag_group = %policy,
            llc_hit_ratio = delta.llc_hit_ratio(),
            mem_bw = delta.mem_bw(),
            instructions_per_sec = delta.instructions_per_sec(),
        );

        let next_step = policy.cur_isolator_mut().decide_next_step(&delta);
        tracing::info!("monitoring result of {policy}: {next_step}");

        match next_step {
            NextStep::Strengthen => {
                let isolator = policy.cur_isolator_mut();
                isolator.strengthen();
                isolator.enforce()?;
            }
            NextStep::Weaken => {
                let isolator = policy.cur_isolator_mut();
                isolator.weaken();
                isolator.enforce()?;
            }
            NextStep::Stop => policy.set_idle_isolator(),
            NextStep::Idle => {}
        }
        Ok(())
    }
}
