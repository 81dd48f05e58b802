//! Isolation decision machinery: the isolator strategy family and the
//! per-group policy driving it.

use thiserror::Error;

use crate::enforcement::EnforceError;

pub(crate) mod isolators;
pub(crate) mod policy;

/// What the active isolator should do next with its enforcement knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub(crate) enum NextStep {
    Strengthen,
    Weaken,
    Stop,
    Idle,
}

/// Shared hardware resource a foreground can be degraded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub(crate) enum ResourceKind {
    Cache,
    Memory,
}

/// Programming-contract violations in the policy lifecycle. Never retried,
/// never swallowed.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum PolicyError {
    #[error("solorun profiling is already in progress")]
    AlreadyProfiling,
    #[error("solorun profiling has not been started")]
    NotProfiling,
    #[error("no stored isolator configuration to restore")]
    NoStoredConfig,
}

#[derive(Debug, Error)]
pub(crate) enum IsolationError {
    #[error(transparent)]
    Enforce(#[from] EnforceError),
    #[error(transparent)]
    InvalidState(#[from] PolicyError),
}

impl IsolationError {
    /// Transient errors skip the group for one tick; anything else is a
    /// contract violation and aborts the loop.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, IsolationError::Enforce(_))
    }
}
