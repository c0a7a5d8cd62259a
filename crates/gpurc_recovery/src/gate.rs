//! Interrupt gate and fault dispatch.
//!
//! The top half reads the pending signal and pauses the unit that raised it,
//! so the unit cannot re-raise while recovery runs. The dispatcher then runs
//! the matching front-end handler in the bottom half. A unit whose signal
//! needed no recovery, or whose recovery completed, is resumed. A unit whose
//! recovery quiesced the device stays paused and is masked.

use crate::error::RecoveryError;
use crate::manager::RecoveryManager;
use crate::request::RecoveryReport;
use gpurc_hal::{FaultPayload, InterruptOps, InterruptUnit, RawSignal};
use indexmap::IndexSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Tracks which interrupt units are paused
pub struct InterruptGate {
    intr: Arc<dyn InterruptOps>,
    paused: Mutex<IndexSet<InterruptUnit>>,
}

impl InterruptGate {
    /// Create a gate over the interrupt controller
    #[must_use]
    pub fn new(intr: Arc<dyn InterruptOps>) -> Self {
        Self {
            intr,
            paused: Mutex::new(IndexSet::new()),
        }
    }

    /// Top half: take the pending signal and pause its unit
    pub fn isr(&self) -> Option<RawSignal> {
        let signal = self.intr.pending()?;
        self.pause(signal.unit);
        Some(signal)
    }

    /// Pause a unit
    pub fn pause(&self, unit: InterruptUnit) {
        if self.lock_paused().insert(unit) {
            self.intr.pause(unit);
        }
    }

    /// Resume a paused unit
    pub fn resume(&self, unit: InterruptUnit) {
        if self.lock_paused().shift_remove(&unit) {
            self.intr.resume(unit);
        }
    }

    /// Mask a unit for good; it stays paused
    pub fn mask(&self, unit: InterruptUnit) {
        self.intr.mask(unit);
    }

    /// Check whether a unit is paused
    #[must_use]
    pub fn is_paused(&self, unit: InterruptUnit) -> bool {
        self.lock_paused().contains(&unit)
    }

    /// Paused units, in pause order
    #[must_use]
    pub fn paused_units(&self) -> Vec<InterruptUnit> {
        self.lock_paused().iter().copied().collect()
    }

    fn lock_paused(&self) -> MutexGuard<'_, IndexSet<InterruptUnit>> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InterruptGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptGate")
            .field("paused", &self.paused_units())
            .finish_non_exhaustive()
    }
}

/// Result of servicing one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Signal needed no recovery
    Benign,
    /// Recovery completed
    Recovered(Box<RecoveryReport>),
    /// Recovery failed; the unit stays paused
    Failed(RecoveryError),
}

/// Routes paused signals to the recovery front end
#[derive(Debug)]
pub struct FaultDispatcher {
    gate: InterruptGate,
    manager: Arc<RecoveryManager>,
}

impl FaultDispatcher {
    /// Create a dispatcher
    #[must_use]
    pub const fn new(gate: InterruptGate, manager: Arc<RecoveryManager>) -> Self {
        Self { gate, manager }
    }

    /// Interrupt gate
    #[must_use]
    pub const fn gate(&self) -> &InterruptGate {
        &self.gate
    }

    /// Recovery front end
    #[must_use]
    pub fn manager(&self) -> &Arc<RecoveryManager> {
        &self.manager
    }

    /// Top half: take the pending signal and pause its unit
    pub fn isr(&self) -> Option<RawSignal> {
        self.gate.isr()
    }

    /// Bottom half: run recovery for a paused signal
    pub fn service(&self, signal: RawSignal) -> DispatchOutcome {
        let unit = signal.unit;
        debug!(%unit, "servicing signal");
        let manager = &self.manager;
        let result = match signal.payload {
            FaultPayload::MmuFault {
                engines,
                context,
                info,
            } => manager.handle_mmu_fault(engines, context, &info),
            FaultPayload::CtxswTimeout {
                engines,
                gfid,
                tsg,
                debug_dump,
            } => manager.handle_ctxsw_timeout(engines, gfid, tsg, debug_dump),
            FaultPayload::PbdmaFault {
                pbdma,
                notifier,
                status,
            } => manager.handle_pbdma_fault(pbdma, notifier, &status),
            FaultPayload::SchedError => manager.handle_sched_error_unknown_context(),
            FaultPayload::PreemptTimeout { runlist, tsg } => {
                manager.handle_preempt_timeout(runlist, tsg)
            }
            FaultPayload::CeFault { instance } => manager.handle_ce_fault(instance),
            FaultPayload::RunlistUpdateTimeout { runlist } => {
                manager.handle_runlist_update_timeout(runlist)
            }
        };

        match result {
            Ok(None) => {
                self.gate.resume(unit);
                DispatchOutcome::Benign
            }
            Ok(Some(report)) => {
                self.gate.resume(unit);
                DispatchOutcome::Recovered(Box::new(report))
            }
            Err(e) => {
                error!(%unit, error = %e, "leaving unit paused");
                self.gate.mask(unit);
                DispatchOutcome::Failed(e)
            }
        }
    }

    /// Service every pending signal inline, returning the outcomes
    pub fn drain(&self) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        while let Some(signal) = self.isr() {
            outcomes.push(self.service(signal));
        }
        outcomes
    }
}
