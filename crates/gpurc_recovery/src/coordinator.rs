//! The recovery protocol.
//!
//! One sequence runs at a time: the engines-reset mutex is taken first and
//! held until the end, then every runlist lock in ascending id order. Locks of
//! runlists the fault does not touch are released as soon as the affected set
//! is known. Inside the locks the sequence disables scheduling, preempts,
//! waits for the faulting TSG to leave its PBDMAs, resets or defers the
//! engines, cleans up contexts and re-enables scheduling.
//!
//! Failures of individual hardware steps are logged and the sequence carries
//! on. The only failure that stops it is a TSG that never leaves its PBDMAs:
//! the device is quiesced and the runlists are left disabled.

use crate::deferred::DeferredResets;
use crate::error::{RecoveryError, RecoveryResult};
use crate::phase::{PhaseTracker, RecoveryPhase};
use crate::poll::PollBackoff;
use crate::quiesce::QuiesceLatch;
use crate::request::{RecoveryReport, RecoveryRequest};
use crate::runlist::{LockSet, RunlistTable, SchedState};
use gpurc_core::{
    EngineMask, RecoveryConfig, RecoveryId, RunlistId, RunlistMask, TsgId,
};
use gpurc_hal::Platform;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

/// State guarded by the engines-reset mutex
#[derive(Debug, Default)]
struct ResetDomain {
    deferred: DeferredResets,
}

/// Runs recovery sequences against the platform
pub struct Coordinator {
    platform: Platform,
    runlists: Arc<RunlistTable>,
    backoff: PollBackoff,
    reset_domain: Mutex<ResetDomain>,
    quiesce: Arc<QuiesceLatch>,
}

impl Coordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        platform: Platform,
        runlists: Arc<RunlistTable>,
        config: &RecoveryConfig,
        quiesce: Arc<QuiesceLatch>,
    ) -> Self {
        let backoff = PollBackoff::new(
            config.poll_timeout(),
            Duration::from_micros(config.poll_delay_min_us),
            Duration::from_micros(config.poll_delay_max_us),
        );
        Self {
            platform,
            runlists,
            backoff,
            reset_domain: Mutex::new(ResetDomain::default()),
            quiesce,
        }
    }

    /// Run one recovery sequence
    ///
    /// Blocks while another sequence holds the engines-reset mutex.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Quiesced`] if the device is already quiesced,
    /// or [`RecoveryError::PbdmaVacateTimeout`] if the faulting TSG stayed on
    /// a PBDMA past the poll bound (the device is quiesced in that case)
    pub fn recover(&self, request: &RecoveryRequest) -> RecoveryResult<RecoveryReport> {
        let recovery_id = RecoveryId::new();
        let span = info_span!(
            "recovery",
            %recovery_id,
            kind = %request.fault_kind,
        );
        let _enter = span.enter();

        if self.quiesce.is_quiesced() {
            return Err(RecoveryError::Quiesced);
        }

        let mut phase = PhaseTracker::new(recovery_id);
        let mut report = RecoveryReport::new(recovery_id, request.fault_kind);
        let deferring = request.defers_reset();
        let runlist_ops = &self.platform.runlist;
        let context_ops = &self.platform.context;

        let mut domain = self.lock_reset_domain();
        let mut locks = self.runlists.lock_all();
        phase.advance(RecoveryPhase::LocksAcquired);

        let mask = self.affected_runlists(request, &locks);
        locks.retain(mask);
        report.runlists = mask;
        info!(
            runlists = %mask,
            tsg = ?request.tsg,
            engines = %request.engines,
            deferring,
            "recovery started"
        );

        if let Some(tsg) = request.tsg {
            if let Some(code) = request.notifier.filter(|_| !deferring) {
                context_ops.set_error_notifier(request.gfid, tsg, code);
            }
            context_ops.mark_unserviceable(request.gfid, tsg);
        }

        for (runlist, state) in locks.iter_mut() {
            if let Err(e) = runlist_ops.disable(runlist.id()) {
                warn!(runlist = %runlist.id(), error = %e, "failed to disable runlist");
            }
            state.set_sched(SchedState::Disabled);
        }
        phase.advance(RecoveryPhase::SchedulingDisabled);

        for runlist in mask {
            if let Err(e) = runlist_ops.preempt(runlist) {
                warn!(%runlist, error = %e, "preempt failed");
            }
        }
        phase.advance(RecoveryPhase::Preempted);

        if let (Some(tsg), Some(runlist)) = (request.tsg, request.runlist) {
            if let Err(waited) = self.wait_off_pbdmas(runlist, tsg) {
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                self.quiesce
                    .trigger(self.platform.device.as_ref(), "tsg did not leave its pbdmas");
                drop(locks);
                drop(domain);
                return Err(RecoveryError::PbdmaVacateTimeout {
                    runlist,
                    tsg,
                    waited_ms,
                });
            }
        }
        phase.advance(RecoveryPhase::PolledOff);

        let mut targets = EngineMask::empty();
        for (runlist, state) in locks.iter_mut() {
            let latched = runlist_ops.reset_engine_mask(runlist.id());
            let engines = latched
                .union(request.engines)
                .intersection(runlist.engines());
            state.set_reset_engine_mask(engines);
            targets = targets.union(engines);
        }
        phase.advance(RecoveryPhase::EnginesResolved);

        for engine in targets {
            match request.tsg.filter(|_| deferring) {
                Some(tsg) => {
                    info!(%engine, %tsg, "engine reset deferred for debugger");
                    domain.deferred.record(tsg, engine);
                    report.engines_deferred.insert(engine);
                }
                None => {
                    debug!(%engine, "resetting engine");
                    self.platform.engine.reset(engine);
                    report.engines_reset.insert(engine);
                }
            }
        }

        match request.tsg {
            Some(tsg) => {
                if let Err(e) = context_ops.disable(tsg) {
                    warn!(%tsg, error = %e, "failed to disable tsg");
                }
                if let Err(e) = context_ops.clear_fault_latches(tsg) {
                    warn!(%tsg, error = %e, "failed to clear fault latches");
                }
                context_ops.wake_waiters(tsg);
                if !deferring {
                    for (runlist, state) in locks.iter_mut().filter(|(_, s)| s.contains(tsg)) {
                        if let Err(e) = runlist_ops.remove_tsg(runlist.id(), tsg) {
                            warn!(%tsg, runlist = %runlist.id(), error = %e, "failed to remove tsg");
                        }
                        state.unbind(tsg);
                    }
                    context_ops.abort(tsg, request.debug_dump);
                    report.aborted.push(tsg);
                }
            }
            None => self.abort_active(&mut locks, request.debug_dump, &mut report),
        }
        phase.advance(RecoveryPhase::Cleaned);

        for (runlist, state) in locks.iter_mut() {
            if let Err(e) = runlist_ops.enable(runlist.id()) {
                warn!(runlist = %runlist.id(), error = %e, "failed to enable runlist");
            }
            state.set_reset_engine_mask(EngineMask::empty());
            state.set_sched(SchedState::Enabled);
        }
        phase.advance(RecoveryPhase::SchedulingReenabled);

        drop(locks);
        drop(domain);
        phase.advance(RecoveryPhase::Done);
        report.phase = phase.current();

        info!(
            reset = %report.engines_reset,
            deferred = %report.engines_deferred,
            aborted = report.aborted.len(),
            skipped = report.skipped.len(),
            "recovery complete"
        );
        Ok(report)
    }

    /// Reset the engines left halted for `tsg`
    ///
    /// Called when the debugger releases or the context is freed. The owning
    /// runlists are disabled around the resets.
    pub fn drain_deferred_resets(&self, tsg: TsgId) -> EngineMask {
        let mut domain = self.lock_reset_domain();
        let engines = domain.deferred.take(tsg);
        if engines.is_empty() {
            return engines;
        }

        let mut locks = self.runlists.lock_all();
        let owners: RunlistMask = locks
            .iter_mut()
            .filter(|(runlist, _)| runlist.engines().intersects(&engines))
            .map(|(runlist, _)| runlist.id())
            .collect();
        locks.retain(owners);

        for (runlist, _) in locks.iter_mut() {
            if let Err(e) = self.platform.runlist.disable(runlist.id()) {
                warn!(runlist = %runlist.id(), error = %e, "failed to disable runlist");
            }
        }
        for engine in engines {
            info!(%engine, %tsg, "performing deferred engine reset");
            self.platform.engine.reset(engine);
        }
        for (runlist, _) in locks.iter_mut() {
            if let Err(e) = self.platform.runlist.enable(runlist.id()) {
                warn!(runlist = %runlist.id(), error = %e, "failed to enable runlist");
            }
        }
        engines
    }

    /// Engines currently deferred for `tsg`
    #[must_use]
    pub fn deferred_engines(&self, tsg: TsgId) -> EngineMask {
        self.lock_reset_domain().deferred.engines_for(tsg)
    }

    fn lock_reset_domain(&self) -> MutexGuard<'_, ResetDomain> {
        self.reset_domain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runlists charged with the fault plus any runlist the TSG is bound to
    fn affected_runlists(&self, request: &RecoveryRequest, locks: &LockSet<'_>) -> RunlistMask {
        let mut mask = request.runlists;
        mask.extend(request.runlist);
        if let Some(tsg) = request.tsg {
            mask = mask.union(locks.runlists_holding(tsg));
        }
        if mask.is_empty() {
            return locks.mask();
        }
        let held = locks.mask();
        let inactive = mask.difference(held);
        if !inactive.is_empty() {
            warn!(runlists = %inactive, "fault charged to inactive runlist, recovering all");
            return held;
        }
        mask
    }

    fn wait_off_pbdmas(&self, runlist: RunlistId, tsg: TsgId) -> Result<(), Duration> {
        let Some(pbdmas) = self.runlists.get(runlist).map(|r| r.pbdmas()) else {
            return Ok(());
        };
        let pbdma_ops = &self.platform.pbdma;
        match self
            .backoff
            .poll(|| pbdmas.iter().all(|p| !pbdma_ops.is_tsg_resident(p, tsg)))
        {
            Ok(elapsed) => {
                debug!(%tsg, ?elapsed, "tsg left its pbdmas");
                Ok(())
            }
            Err(waited) => Err(waited),
        }
    }

    fn abort_active(&self, locks: &mut LockSet<'_>, debug_dump: bool, report: &mut RecoveryReport) {
        let runlist_ops = &self.platform.runlist;
        let context_ops = &self.platform.context;
        for (runlist, state) in locks.iter_mut() {
            let tsgs: Vec<TsgId> = state.active_tsgs().collect();
            for tsg in tsgs {
                if !context_ops.is_abortable(tsg) {
                    debug!(%tsg, runlist = %runlist.id(), "skipping non-abortable tsg");
                    report.skipped.push(tsg);
                    continue;
                }
                if let Err(e) = context_ops.disable(tsg) {
                    warn!(%tsg, error = %e, "failed to disable tsg");
                }
                if let Err(e) = context_ops.clear_fault_latches(tsg) {
                    warn!(%tsg, error = %e, "failed to clear fault latches");
                }
                if let Err(e) = runlist_ops.remove_tsg(runlist.id(), tsg) {
                    warn!(%tsg, runlist = %runlist.id(), error = %e, "failed to remove tsg");
                }
                state.unbind(tsg);
                context_ops.abort(tsg, debug_dump);
                report.aborted.push(tsg);
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
