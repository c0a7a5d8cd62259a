//! Classified recovery requests and the reports recovery produces.

use crate::phase::RecoveryPhase;
use gpurc_core::{
    EngineMask, ErrorNotifier, FaultKind, Gfid, RecoveryId, RunlistId, RunlistMask, TsgId,
};
use serde::{Deserialize, Serialize};

/// A validated fault, ready to be handed to a recovery policy
///
/// Channel contexts are resolved to their TSG during classification, so the
/// target is always a TSG. `runlists` holds every runlist the fault is
/// charged to: the runlists of the faulting units plus the TSG's own
/// runlist. `runlist` is the one whose PBDMAs are polled, which is the TSG's
/// runlist when the TSG is known. An empty `runlists` with `runlist: None`
/// asks for recovery of every active runlist; `tsg: None` asks for broadcast
/// cleanup of every abortable TSG on the affected runlists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Owning function of the faulting context
    pub gfid: Gfid,
    /// Runlist polled for the faulting TSG
    pub runlist: Option<RunlistId>,
    /// Every runlist charged with the fault
    #[serde(default)]
    pub runlists: RunlistMask,
    /// Faulting TSG
    pub tsg: Option<TsgId>,
    /// Engines named by the fault
    pub engines: EngineMask,
    /// Fault class
    pub fault_kind: FaultKind,
    /// Code to post to the faulting context
    pub notifier: Option<ErrorNotifier>,
    /// Dump debug state when aborting
    pub debug_dump: bool,
    /// Leave faulting engines halted for a debugger instead of resetting them
    pub should_defer: bool,
}

impl RecoveryRequest {
    /// Create a broadcast request for `fault_kind`
    #[must_use]
    pub fn new(fault_kind: FaultKind) -> Self {
        Self {
            gfid: Gfid::PF,
            runlist: None,
            runlists: RunlistMask::empty(),
            tsg: None,
            engines: EngineMask::empty(),
            fault_kind,
            notifier: None,
            debug_dump: false,
            should_defer: false,
        }
    }

    /// Charge the fault to a runlist and poll it for the faulting TSG
    #[must_use]
    pub fn with_runlist(mut self, runlist: RunlistId) -> Self {
        self.runlist = Some(runlist);
        self.runlists.insert(runlist);
        self
    }

    /// Charge the fault to additional runlists
    #[must_use]
    pub fn with_runlists(mut self, runlists: RunlistMask) -> Self {
        self.runlists = self.runlists.union(runlists);
        self
    }

    /// Name the faulting TSG
    #[must_use]
    pub fn with_tsg(mut self, tsg: TsgId) -> Self {
        self.tsg = Some(tsg);
        self
    }

    /// Set the engines named by the fault
    #[must_use]
    pub fn with_engines(mut self, engines: EngineMask) -> Self {
        self.engines = engines;
        self
    }

    /// Set the notifier code
    #[must_use]
    pub fn with_notifier(mut self, notifier: ErrorNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the owning function
    #[must_use]
    pub fn with_gfid(mut self, gfid: Gfid) -> Self {
        self.gfid = gfid;
        self
    }

    /// Set the debug dump flag
    #[must_use]
    pub fn with_debug_dump(mut self, debug_dump: bool) -> Self {
        self.debug_dump = debug_dump;
        self
    }

    /// Set the defer flag
    #[must_use]
    pub fn with_defer(mut self, should_defer: bool) -> Self {
        self.should_defer = should_defer;
        self
    }

    /// Check whether engine resets are deferred for this request
    ///
    /// Only MMU faults with a known TSG can be deferred.
    #[must_use]
    pub fn defers_reset(&self) -> bool {
        self.fault_kind == FaultKind::MmuFault && self.should_defer && self.tsg.is_some()
    }
}

/// Outcome of one completed recovery sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Invocation id, shared with every log line of the sequence
    pub recovery_id: RecoveryId,
    /// Fault class
    pub fault_kind: FaultKind,
    /// Phase the sequence ended in
    pub phase: RecoveryPhase,
    /// Runlists that were disabled and re-enabled
    pub runlists: RunlistMask,
    /// Engines reset
    pub engines_reset: EngineMask,
    /// Engines left halted for a debugger
    pub engines_deferred: EngineMask,
    /// TSGs aborted
    pub aborted: Vec<TsgId>,
    /// Non-abortable TSGs left untouched by broadcast cleanup
    pub skipped: Vec<TsgId>,
}

impl RecoveryReport {
    pub(crate) fn new(recovery_id: RecoveryId, fault_kind: FaultKind) -> Self {
        Self {
            recovery_id,
            fault_kind,
            phase: RecoveryPhase::Start,
            runlists: RunlistMask::empty(),
            engines_reset: EngineMask::empty(),
            engines_deferred: EngineMask::empty(),
            aborted: Vec::new(),
            skipped: Vec::new(),
        }
    }
}
