//! Platform resource controls behind a narrow backend interface.
//!
//! Isolators only talk to [`EnforcementBackend`]; the concrete
//! [`SysfsBackend`] writes cgroup and sysfs files the way the kernel
//! expects them, and tests substitute a recording mock.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum EnforceError {
    /// The target process or its control group vanished between decision
    /// and enforcement; treated as transient by the control loop.
    #[error("process or control group no longer exists: {0}")]
    ProcessLookup(String),
    #[error("failed to apply resource control: {0}")]
    Io(#[from] io::Error),
    #[error("malformed control file content: {0}")]
    Parse(String),
}

/// Resource-control primitives of the platform. Every call can fail with
/// [`EnforceError::ProcessLookup`] when the target is gone.
pub(crate) trait EnforcementBackend: Send + Sync {
    fn set_cpu_quota(&self, group: &str, quota_us: i64, period_us: u64)
        -> Result<(), EnforceError>;

    fn read_assigned_cores(&self, group: &str) -> Result<BTreeSet<usize>, EnforceError>;

    fn set_cpu_frequency(&self, cores: &BTreeSet<usize>, freq_khz: u64)
        -> Result<(), EnforceError>;

    fn set_gpu_frequency(&self, freq_hz: u64) -> Result<(), EnforceError>;

    fn set_core_affinity(&self, group: &str, cores: &BTreeSet<usize>)
        -> Result<(), EnforceError>;
}

/// cgroup-v1 + sysfs implementation. Roots are injectable so tests can
/// point it at a scratch directory.
pub(crate) struct SysfsBackend {
    cgroup_root: PathBuf,
    cpufreq_root: PathBuf,
    gpu_devfreq_file: PathBuf,
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            cpufreq_root: PathBuf::from("/sys/devices/system/cpu"),
            // integrated-GPU devfreq userspace governor knob
            gpu_devfreq_file: PathBuf::from(
                "/sys/devices/17000000.gp10b/devfreq/17000000.gp10b/userspace/set_freq",
            ),
        }
    }
}

impl SysfsBackend {
    #[cfg(test)]
    pub(crate) fn with_roots(
        cgroup_root: impl Into<PathBuf>,
        cpufreq_root: impl Into<PathBuf>,
        gpu_devfreq_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            cpufreq_root: cpufreq_root.into(),
            gpu_devfreq_file: gpu_devfreq_file.into(),
        }
    }

    fn write_value(path: &Path, value: impl std::fmt::Display) -> Result<(), EnforceError> {
        match fs::write(path, format!("{value}\n")) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EnforceError::ProcessLookup(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl EnforcementBackend for SysfsBackend {
    fn set_cpu_quota(
        &self,
        group: &str,
        quota_us: i64,
        period_us: u64,
    ) -> Result<(), EnforceError> {
        let dir = self.cgroup_root.join("cpu").join(group);
        Self::write_value(&dir.join("cpu.cfs_quota_us"), quota_us)?;
        Self::write_value(&dir.join("cpu.cfs_period_us"), period_us)
    }

    fn read_assigned_cores(&self, group: &str) -> Result<BTreeSet<usize>, EnforceError> {
        let path = self
            .cgroup_root
            .join("cpuset")
            .join(group)
            .join("cpuset.cpus");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EnforceError::ProcessLookup(group.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Err(EnforceError::ProcessLookup(group.to_string()));
        }
        utils::cores::parse_core_list(&content).map_err(|e| EnforceError::Parse(e.to_string()))
    }

    fn set_cpu_frequency(
        &self,
        cores: &BTreeSet<usize>,
        freq_khz: u64,
    ) -> Result<(), EnforceError> {
        for core in cores {
            let path = self
                .cpufreq_root
                .join(format!("cpu{core}"))
                .join("cpufreq")
                .join("scaling_max_freq");
            Self::write_value(&path, freq_khz)?;
        }
        Ok(())
    }

    fn set_gpu_frequency(&self, freq_hz: u64) -> Result<(), EnforceError> {
        Self::write_value(&self.gpu_devfreq_file, freq_hz)
    }

    fn set_core_affinity(&self, group: &str, cores: &BTreeSet<usize>) -> Result<(), EnforceError> {
        let path = self
            .cgroup_root
            .join("cpuset")
            .join(group)
            .join("cpuset.cpus");
        Self::write_value(&path, utils::cores::format_core_list(cores))
    }
}
