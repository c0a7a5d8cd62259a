//! Simulated TSGs.

use gpurc_core::{EngineMask, ErrorNotifier, PbdmaMask, RunlistId, TsgId};
use serde::{Deserialize, Serialize};

/// A simulated TSG: how it behaves and what recovery did to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimTsg {
    /// TSG id
    pub id: TsgId,
    /// Runlist the TSG is scheduled on
    pub runlist: RunlistId,
    /// May be aborted by broadcast cleanup
    pub abortable: bool,
    /// Engines the TSG is loaded on
    pub engines: EngineMask,
    /// PBDMAs the TSG is resident on
    pub pbdmas: PbdmaMask,
    /// Stays on its PBDMAs through preempt
    pub stuck: bool,
    /// Progress latch read by ctxsw timeout handling
    pub progress: bool,
    /// Last notifier posted
    pub notifier: Option<ErrorNotifier>,
    /// Marked unserviceable
    pub unserviceable: bool,
    /// Disabled
    pub disabled: bool,
    /// Times aborted
    pub aborts: u32,
    /// Times waiters were woken
    pub wakeups: u32,
}

impl SimTsg {
    /// An abortable TSG on `runlist`, loaded nowhere
    #[must_use]
    pub fn new(id: u32, runlist: u32) -> Self {
        Self {
            id: TsgId::new(id),
            runlist: RunlistId::new(runlist),
            abortable: true,
            engines: EngineMask::empty(),
            pbdmas: PbdmaMask::empty(),
            stuck: false,
            progress: false,
            notifier: None,
            unserviceable: false,
            disabled: false,
            aborts: 0,
            wakeups: 0,
        }
    }

    /// Set whether broadcast cleanup may abort the TSG
    #[must_use]
    pub fn with_abortable(mut self, abortable: bool) -> Self {
        self.abortable = abortable;
        self
    }

    /// Load the TSG on engines
    #[must_use]
    pub fn loaded_on(mut self, engines: EngineMask) -> Self {
        self.engines = engines;
        self
    }

    /// Make the TSG resident on PBDMAs
    #[must_use]
    pub fn resident_on(mut self, pbdmas: PbdmaMask) -> Self {
        self.pbdmas = pbdmas;
        self
    }

    /// Keep the TSG on its PBDMAs through preempt
    #[must_use]
    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Set the progress latch
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}
