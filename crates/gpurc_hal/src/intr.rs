//! Interrupt units and the raw signals they deliver.

use gpurc_core::{
    EngineId, EngineMask, ErrorNotifier, Gfid, MmuFaultInfo, PbdmaId, PbdmaStatus, RawContext,
    RunlistId, TsgId,
};
use serde::{Deserialize, Serialize};

/// A logical interrupt unit that can be masked and paused on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptUnit {
    /// Interrupt tree of one runlist (ctxsw, preempt and update timeouts, sched errors)
    RunlistTree(RunlistId),
    /// Engine-local interrupt (copy-engine launch errors)
    Engine(EngineId),
    /// PBDMA interrupt
    Pbdma(PbdmaId),
    /// MMU fault buffer
    Mmu,
}

impl std::fmt::Display for InterruptUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunlistTree(id) => write!(f, "runlist_tree({})", id),
            Self::Engine(id) => write!(f, "engine({})", id),
            Self::Pbdma(id) => write!(f, "pbdma({})", id),
            Self::Mmu => write!(f, "mmu"),
        }
    }
}

/// Decoded fault payload of a pending interrupt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultPayload {
    /// MMU fault
    MmuFault {
        /// Engines reported by the fault
        engines: EngineMask,
        /// Faulting context as reported by hardware
        context: Option<RawContext>,
        /// Decoded fault information
        info: MmuFaultInfo,
    },
    /// Context switch timeout
    CtxswTimeout {
        /// Engines that timed out
        engines: EngineMask,
        /// Owning function
        gfid: Gfid,
        /// TSG loaded on the engines
        tsg: TsgId,
        /// Dump debug state on abort
        debug_dump: bool,
    },
    /// PBDMA error
    PbdmaFault {
        /// Faulting PBDMA
        pbdma: PbdmaId,
        /// Notifier code derived from the PBDMA error bits
        notifier: ErrorNotifier,
        /// PBDMA status snapshot
        status: PbdmaStatus,
    },
    /// Scheduler error with no identifiable context
    SchedError,
    /// TSG preemption timed out
    PreemptTimeout {
        /// Runlist of the TSG
        runlist: RunlistId,
        /// TSG that failed to preempt
        tsg: TsgId,
    },
    /// Copy-engine launch error
    CeFault {
        /// Logical copy-engine instance
        instance: u32,
    },
    /// Runlist update timed out
    RunlistUpdateTimeout {
        /// Runlist that did not acknowledge
        runlist: RunlistId,
    },
}

/// A pending interrupt: the unit that raised it and what it reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignal {
    /// Raising unit
    pub unit: InterruptUnit,
    /// Fault payload
    pub payload: FaultPayload,
}

impl RawSignal {
    /// Create a signal
    #[must_use]
    pub fn new(unit: InterruptUnit, payload: FaultPayload) -> Self {
        Self { unit, payload }
    }
}

/// Interrupt-unit register primitives
pub trait InterruptOps: Send + Sync {
    /// Stop the unit from raising interrupts until unmasked
    fn mask(&self, unit: InterruptUnit);

    /// Allow the unit to raise interrupts again
    fn unmask(&self, unit: InterruptUnit);

    /// Hold delivery from the unit while its fault is serviced
    fn pause(&self, unit: InterruptUnit);

    /// Release a held unit
    fn resume(&self, unit: InterruptUnit);

    /// Take the next pending signal, if any
    fn pending(&self) -> Option<RawSignal>;
}
