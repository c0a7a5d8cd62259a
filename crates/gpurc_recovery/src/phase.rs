//! Recovery protocol phases.
//!
//! A recovery sequence moves strictly forward through the phases below. The
//! sequence ends in `Done` on success; a sequence that quiesces the device
//! stops in whatever phase it reached.

use gpurc_core::RecoveryId;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Phase of one recovery sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    /// Nothing held yet
    Start,
    /// Engines-reset mutex and runlist locks held
    LocksAcquired,
    /// Affected runlists no longer schedule
    SchedulingDisabled,
    /// Preempt issued on affected runlists
    Preempted,
    /// Faulting TSG left its PBDMAs (or no poll was needed)
    PolledOff,
    /// Engines to reset are known
    EnginesResolved,
    /// Engines reset or deferred, contexts cleaned up
    Cleaned,
    /// Affected runlists schedule again
    SchedulingReenabled,
    /// Locks released
    Done,
}

impl RecoveryPhase {
    /// The only phase that may follow this one
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::LocksAcquired),
            Self::LocksAcquired => Some(Self::SchedulingDisabled),
            Self::SchedulingDisabled => Some(Self::Preempted),
            Self::Preempted => Some(Self::PolledOff),
            Self::PolledOff => Some(Self::EnginesResolved),
            Self::EnginesResolved => Some(Self::Cleaned),
            Self::Cleaned => Some(Self::SchedulingReenabled),
            Self::SchedulingReenabled => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Check whether affected runlists are disabled in this phase
    #[must_use]
    pub fn schedulers_disabled(self) -> bool {
        self >= Self::SchedulingDisabled && self < Self::SchedulingReenabled
    }
}

impl std::fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::LocksAcquired => "locks_acquired",
            Self::SchedulingDisabled => "scheduling_disabled",
            Self::Preempted => "preempted",
            Self::PolledOff => "polled_off",
            Self::EnginesResolved => "engines_resolved",
            Self::Cleaned => "cleaned",
            Self::SchedulingReenabled => "scheduling_reenabled",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Tracks the phase of one recovery sequence
#[derive(Debug)]
pub struct PhaseTracker {
    recovery_id: RecoveryId,
    current: RecoveryPhase,
}

impl PhaseTracker {
    /// Start tracking a sequence
    #[must_use]
    pub const fn new(recovery_id: RecoveryId) -> Self {
        Self {
            recovery_id,
            current: RecoveryPhase::Start,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn current(&self) -> RecoveryPhase {
        self.current
    }

    /// Move to `to`, which must be the successor of the current phase
    pub fn advance(&mut self, to: RecoveryPhase) {
        if self.current.next() != Some(to) {
            error!(
                recovery_id = %self.recovery_id,
                from = %self.current,
                to = %to,
                "out-of-order recovery phase"
            );
            debug_assert!(false, "recovery phase {} cannot follow {}", to, self.current);
        }
        debug!(recovery_id = %self.recovery_id, phase = %to, "recovery phase");
        self.current = to;
    }
}
