//! The simulated GPU.

use crate::failure::{FailurePoint, HalFailures};
use crate::record::{CallLog, HalOp};
use crate::tsg::SimTsg;
use gpurc_core::{
    ChannelId, EngineId, EngineMask, ErrorNotifier, Gfid, PbdmaId, RunlistId, Topology, TsgId,
};
use gpurc_hal::{
    ContextOps, DeviceOps, EngineOps, HalError, HalResult, InterruptOps, InterruptUnit, PbdmaOps,
    Platform, RawSignal, RunlistOps,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default)]
struct SimState {
    tsgs: IndexMap<TsgId, SimTsg>,
    channels: IndexMap<ChannelId, TsgId>,
    engine_bindings: IndexMap<EngineId, TsgId>,
    latched_reset: IndexMap<RunlistId, EngineMask>,
    pending: VecDeque<RawSignal>,
    paused: IndexSet<InterruptUnit>,
    masked: IndexSet<InterruptUnit>,
    failures: HalFailures,
    debugger_attached: bool,
    mmu_debug_mode: bool,
    quiesced: bool,
}

/// In-memory GPU implementing every hardware seam
#[derive(Debug)]
pub struct SimGpu {
    topology: Topology,
    state: Mutex<SimState>,
    log: CallLog,
    reset_delay: Option<Duration>,
}

/// Builder for [`SimGpu`]
#[derive(Debug)]
pub struct SimGpuBuilder {
    topology: Topology,
    state: SimState,
    reset_delay: Option<Duration>,
}

impl SimGpuBuilder {
    /// Add a TSG
    #[must_use]
    pub fn tsg(mut self, tsg: SimTsg) -> Self {
        self.state.tsgs.insert(tsg.id, tsg);
        self
    }

    /// Bind a channel to a TSG
    #[must_use]
    pub fn channel(mut self, channel: u32, tsg: u32) -> Self {
        self.state
            .channels
            .insert(ChannelId::new(channel), TsgId::new(tsg));
        self
    }

    /// Bind a TSG to an engine for engine-local fault lookup
    #[must_use]
    pub fn bind_engine(mut self, engine: u32, tsg: u32) -> Self {
        self.state
            .engine_bindings
            .insert(EngineId::new(engine), TsgId::new(tsg));
        self
    }

    /// Attach a debugger, optionally with MMU debug mode on
    #[must_use]
    pub fn debugger(mut self, mmu_debug_mode: bool) -> Self {
        self.state.debugger_attached = true;
        self.state.mmu_debug_mode = mmu_debug_mode;
        self
    }

    /// Inject hardware failures
    #[must_use]
    pub fn failures(mut self, failures: HalFailures) -> Self {
        self.state.failures = failures;
        self
    }

    /// Queue a pending interrupt
    #[must_use]
    pub fn signal(mut self, signal: RawSignal) -> Self {
        self.state.pending.push_back(signal);
        self
    }

    /// Make every engine reset take `delay`
    #[must_use]
    pub fn reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = Some(delay);
        self
    }

    /// Build the GPU
    #[must_use]
    pub fn build(self) -> Arc<SimGpu> {
        Arc::new(SimGpu {
            topology: self.topology,
            state: Mutex::new(self.state),
            log: CallLog::new(),
            reset_delay: self.reset_delay,
        })
    }
}

impl SimGpu {
    /// Start building a GPU with `topology`
    #[must_use]
    pub fn builder(topology: Topology) -> SimGpuBuilder {
        SimGpuBuilder {
            topology,
            state: SimState::default(),
            reset_delay: None,
        }
    }

    /// Platform backed by this GPU
    #[must_use]
    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform::from_shared(self.clone())
    }

    /// Topology the GPU was built with
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Recorded calls
    #[must_use]
    pub const fn log(&self) -> &CallLog {
        &self.log
    }

    /// Snapshot of a TSG
    #[must_use]
    pub fn tsg(&self, id: u32) -> Option<SimTsg> {
        self.lock().tsgs.get(&TsgId::new(id)).cloned()
    }

    /// Snapshot of every TSG, in insertion order
    #[must_use]
    pub fn tsgs(&self) -> Vec<SimTsg> {
        self.lock().tsgs.values().cloned().collect()
    }

    /// Set a TSG's progress latch
    pub fn set_progress(&self, id: u32, progress: bool) {
        if let Some(tsg) = self.lock().tsgs.get_mut(&TsgId::new(id)) {
            tsg.progress = progress;
        }
    }

    /// Queue a pending interrupt
    pub fn raise(&self, signal: RawSignal) {
        self.lock().pending.push_back(signal);
    }

    /// Make a step fail
    pub fn inject(&self, point: FailurePoint) {
        self.lock().failures.inject(point);
    }

    /// Check whether the device was quiesced
    #[must_use]
    pub fn is_quiesced(&self) -> bool {
        self.lock().quiesced
    }

    /// Check whether an interrupt unit is paused
    #[must_use]
    pub fn is_paused(&self, unit: InterruptUnit) -> bool {
        self.lock().paused.contains(&unit)
    }

    /// Check whether an interrupt unit is masked
    #[must_use]
    pub fn is_masked(&self, unit: InterruptUnit) -> bool {
        self.lock().masked.contains(&unit)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step(&self, op: HalOp, point: FailurePoint) -> bool {
        self.log.record(op);
        let fails = self.lock().failures.fails(point);
        if fails {
            trace!(?op, "injected failure");
        }
        fails
    }

    fn with_tsg<T>(&self, tsg: TsgId, f: impl FnOnce(&mut SimTsg) -> T) -> HalResult<T> {
        self.lock()
            .tsgs
            .get_mut(&tsg)
            .map(f)
            .ok_or(HalError::UnknownTsg(tsg))
    }
}

impl RunlistOps for SimGpu {
    fn disable(&self, runlist: RunlistId) -> HalResult<()> {
        if self.step(HalOp::RunlistDisable { runlist }, FailurePoint::RunlistDisable) {
            return Err(HalError::RunlistUpdate { runlist });
        }
        Ok(())
    }

    fn enable(&self, runlist: RunlistId) -> HalResult<()> {
        if self.step(HalOp::RunlistEnable { runlist }, FailurePoint::RunlistEnable) {
            return Err(HalError::RunlistUpdate { runlist });
        }
        Ok(())
    }

    fn preempt(&self, runlist: RunlistId) -> HalResult<()> {
        if self.step(HalOp::Preempt { runlist }, FailurePoint::Preempt) {
            return Err(HalError::Preempt { runlist });
        }
        let owned = self
            .topology
            .runlist(runlist)
            .map(|r| r.engine_mask())
            .unwrap_or_default();
        let mut state = self.lock();
        let mut latched = EngineMask::empty();
        for tsg in state.tsgs.values_mut().filter(|t| t.runlist == runlist) {
            latched = latched.union(tsg.engines.intersection(owned));
            if !tsg.stuck {
                tsg.pbdmas = Default::default();
            }
        }
        let entry = state.latched_reset.entry(runlist).or_default();
        *entry = entry.union(latched);
        Ok(())
    }

    fn reset_engine_mask(&self, runlist: RunlistId) -> EngineMask {
        self.lock()
            .latched_reset
            .get(&runlist)
            .copied()
            .unwrap_or_default()
    }

    fn remove_tsg(&self, runlist: RunlistId, tsg: TsgId) -> HalResult<()> {
        if self.step(HalOp::RemoveTsg { runlist, tsg }, FailurePoint::RemoveTsg) {
            return Err(HalError::RunlistUpdate { runlist });
        }
        self.with_tsg(tsg, |_| ())
    }
}

impl EngineOps for SimGpu {
    fn reset(&self, engine: EngineId) {
        self.log.record(HalOp::EngineReset { engine });
        if let Some(delay) = self.reset_delay {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        for latched in state.latched_reset.values_mut() {
            latched.remove(engine);
        }
        for tsg in state.tsgs.values_mut() {
            tsg.engines.remove(engine);
        }
    }
}

impl ContextOps for SimGpu {
    fn disable(&self, tsg: TsgId) -> HalResult<()> {
        if self.step(HalOp::TsgDisable { tsg }, FailurePoint::TsgDisable) {
            return Err(HalError::RegisterWrite(format!("disable {}", tsg)));
        }
        self.with_tsg(tsg, |t| t.disabled = true)
    }

    fn clear_fault_latches(&self, tsg: TsgId) -> HalResult<()> {
        if self.step(HalOp::ClearFaultLatches { tsg }, FailurePoint::ClearFaultLatches) {
            return Err(HalError::RegisterWrite(format!("clear latches {}", tsg)));
        }
        self.with_tsg(tsg, |_| ())
    }

    fn abort(&self, tsg: TsgId, debug_dump: bool) {
        self.log.record(HalOp::Abort { tsg, debug_dump });
        let _ = self.with_tsg(tsg, |t| {
            t.aborts += 1;
            t.engines = EngineMask::empty();
            t.pbdmas = Default::default();
        });
    }

    fn mark_unserviceable(&self, gfid: Gfid, tsg: TsgId) {
        self.log.record(HalOp::MarkUnserviceable { gfid, tsg });
        let _ = self.with_tsg(tsg, |t| t.unserviceable = true);
    }

    fn set_error_notifier(&self, gfid: Gfid, tsg: TsgId, notifier: ErrorNotifier) {
        self.log.record(HalOp::SetErrorNotifier {
            gfid,
            tsg,
            notifier,
        });
        let _ = self.with_tsg(tsg, |t| t.notifier = Some(notifier));
    }

    fn wake_waiters(&self, tsg: TsgId) {
        self.log.record(HalOp::WakeWaiters { tsg });
        let _ = self.with_tsg(tsg, |t| t.wakeups += 1);
    }

    fn is_abortable(&self, tsg: TsgId) -> bool {
        self.lock().tsgs.get(&tsg).is_some_and(|t| t.abortable)
    }

    fn tsg_of_channel(&self, channel: ChannelId) -> Option<TsgId> {
        self.lock().channels.get(&channel).copied()
    }

    fn tsg_on_engine(&self, engine: EngineId) -> Option<TsgId> {
        let state = self.lock();
        state.engine_bindings.get(&engine).copied().or_else(|| {
            state
                .tsgs
                .values()
                .find(|t| t.engines.contains(engine))
                .map(|t| t.id)
        })
    }

    fn runlist_of_tsg(&self, tsg: TsgId) -> Option<RunlistId> {
        self.lock().tsgs.get(&tsg).map(|t| t.runlist)
    }

    fn take_progress(&self, tsg: TsgId) -> bool {
        self.lock()
            .tsgs
            .get_mut(&tsg)
            .is_some_and(|t| std::mem::take(&mut t.progress))
    }
}

impl PbdmaOps for SimGpu {
    fn is_tsg_resident(&self, pbdma: PbdmaId, tsg: TsgId) -> bool {
        self.lock()
            .tsgs
            .get(&tsg)
            .is_some_and(|t| t.pbdmas.contains(pbdma))
    }
}

impl DeviceOps for SimGpu {
    fn quiesce(&self) {
        self.log.record(HalOp::Quiesce);
        self.lock().quiesced = true;
    }

    fn debugger_attached(&self) -> bool {
        self.lock().debugger_attached
    }

    fn mmu_debug_mode_enabled(&self) -> bool {
        self.lock().mmu_debug_mode
    }
}

impl InterruptOps for SimGpu {
    fn mask(&self, unit: InterruptUnit) {
        self.log.record(HalOp::IntrMask { unit });
        self.lock().masked.insert(unit);
    }

    fn unmask(&self, unit: InterruptUnit) {
        self.log.record(HalOp::IntrUnmask { unit });
        self.lock().masked.shift_remove(&unit);
    }

    fn pause(&self, unit: InterruptUnit) {
        self.log.record(HalOp::IntrPause { unit });
        self.lock().paused.insert(unit);
    }

    fn resume(&self, unit: InterruptUnit) {
        self.log.record(HalOp::IntrResume { unit });
        self.lock().paused.shift_remove(&unit);
    }

    fn pending(&self) -> Option<RawSignal> {
        let mut state = self.lock();
        let index = state
            .pending
            .iter()
            .position(|s| !state.masked.contains(&s.unit) && !state.paused.contains(&s.unit))?;
        state.pending.remove(index)
    }
}
