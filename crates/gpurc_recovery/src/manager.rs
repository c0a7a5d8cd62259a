//! Recovery front end.
//!
//! One entry point per fault source. Each handler validates the fault through
//! the classifier, hands the resulting request to the recovery policy and
//! returns the report. `Ok(None)` means the signal needed no recovery. A
//! classification error quiesces the device before it is returned; once the
//! device is quiesced every handler returns [`RecoveryError::Quiesced`]
//! without touching hardware.

use crate::classifier::FaultClassifier;
use crate::coordinator::Coordinator;
use crate::ctxsw::{CtxswTimeoutTracker, CtxswVerdict};
use crate::error::{RecoveryError, RecoveryResult};
use crate::monitor::RecoveryMetrics;
use crate::policy::{FullRecovery, QuiesceOnly, RecoveryPolicy};
use crate::quiesce::QuiesceLatch;
use crate::request::{RecoveryReport, RecoveryRequest};
use crate::runlist::RunlistTable;
use gpurc_core::{
    CoreResult, EngineMask, ErrorNotifier, FaultKind, Gfid, MmuFaultInfo, PbdmaId, PbdmaStatus,
    RawContext, RecoveryConfig, RunlistId, Topology, TsgId,
};
use gpurc_hal::Platform;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Entry point for every fault source
pub struct RecoveryManager {
    topology: Arc<Topology>,
    config: RecoveryConfig,
    platform: Platform,
    runlists: Arc<RunlistTable>,
    classifier: FaultClassifier,
    policy: Box<dyn RecoveryPolicy>,
    quiesce: Arc<QuiesceLatch>,
    ctxsw: Mutex<CtxswTimeoutTracker>,
    metrics: Mutex<RecoveryMetrics>,
}

impl RecoveryManager {
    /// Create a manager for `topology`
    ///
    /// The recovery policy follows `config.recovery_enabled`.
    ///
    /// # Errors
    ///
    /// Returns error if the topology or config is invalid
    pub fn new(topology: Topology, config: RecoveryConfig, platform: Platform) -> CoreResult<Self> {
        topology.validate()?;
        config.validate()?;

        let topology = Arc::new(topology);
        let runlists = Arc::new(RunlistTable::new(&topology));
        let quiesce = Arc::new(QuiesceLatch::new());
        let policy: Box<dyn RecoveryPolicy> = if config.recovery_enabled {
            Box::new(FullRecovery::new(Coordinator::new(
                platform.clone(),
                runlists.clone(),
                &config,
                quiesce.clone(),
            )))
        } else {
            Box::new(QuiesceOnly::new(platform.device.clone(), quiesce.clone()))
        };
        let classifier = FaultClassifier::new(
            topology.clone(),
            platform.context.clone(),
            platform.device.clone(),
            &config,
        );
        info!(
            runlists = %runlists.ids(),
            policy = policy.name(),
            "recovery manager ready"
        );

        Ok(Self {
            ctxsw: Mutex::new(CtxswTimeoutTracker::new(&config)),
            metrics: Mutex::new(RecoveryMetrics::new()),
            topology,
            config,
            platform,
            runlists,
            classifier,
            policy,
            quiesce,
        })
    }

    /// Handle an MMU fault
    ///
    /// # Errors
    ///
    /// Returns error if the fault data is invalid, recovery failed, or the
    /// device is quiesced
    pub fn handle_mmu_fault(
        &self,
        engines: EngineMask,
        context: Option<RawContext>,
        info: &MmuFaultInfo,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self.classifier.classify_mmu_fault(engines, context, info);
        self.dispatch(FaultKind::MmuFault, classified)
    }

    /// Handle a context-switch timeout on `tsg`
    ///
    /// This is the interrupt-path handler and it is budget-gated: a TSG that
    /// made progress since the last timeout, or whose accumulated stall is
    /// still below `ctxsw_timeout_limit_ms`, is left running and `Ok(None)` is
    /// returned. With the default config a stalled TSG therefore gets
    /// `Ok(None)` until the budget runs out. Use
    /// [`recover_ctxsw_timeout`](Self::recover_ctxsw_timeout) to recover
    /// regardless of the budget.
    ///
    /// # Errors
    ///
    /// Returns error if the fault data is invalid, recovery failed, or the
    /// device is quiesced
    pub fn handle_ctxsw_timeout(
        &self,
        engines: EngineMask,
        gfid: Gfid,
        tsg: TsgId,
        debug_dump: bool,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self
            .classifier
            .classify_ctxsw_timeout(engines, gfid, tsg, debug_dump);
        if classified.is_ok() {
            let made_progress = self.platform.context.take_progress(tsg);
            let verdict = self.lock_ctxsw().check(tsg, made_progress);
            match verdict {
                CtxswVerdict::Progressing => {
                    debug!(%tsg, "ctxsw timeout on tsg making progress");
                    self.lock_metrics().record_benign(FaultKind::CtxswTimeout);
                    return Ok(None);
                }
                CtxswVerdict::Accumulating { accumulated_ms } => {
                    debug!(%tsg, accumulated_ms, "ctxsw timeout within budget");
                    self.lock_metrics().record_tolerated_ctxsw();
                    return Ok(None);
                }
                CtxswVerdict::Expired { accumulated_ms } => {
                    warn!(%tsg, accumulated_ms, "ctxsw timeout budget exhausted");
                }
            }
        }
        self.dispatch(FaultKind::CtxswTimeout, classified)
    }

    /// Recover from a context-switch timeout on `tsg` without consulting the
    /// timeout budget
    ///
    /// # Errors
    ///
    /// Returns error if the fault data is invalid, recovery failed, or the
    /// device is quiesced
    pub fn recover_ctxsw_timeout(
        &self,
        engines: EngineMask,
        gfid: Gfid,
        tsg: TsgId,
        debug_dump: bool,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self
            .classifier
            .classify_ctxsw_timeout(engines, gfid, tsg, debug_dump);
        self.dispatch(FaultKind::CtxswTimeout, classified)
    }

    /// Handle a PBDMA fault
    ///
    /// # Errors
    ///
    /// Returns error if the fault data is invalid, recovery failed, or the
    /// device is quiesced
    pub fn handle_pbdma_fault(
        &self,
        pbdma: PbdmaId,
        notifier: ErrorNotifier,
        status: &PbdmaStatus,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self.classifier.classify_pbdma_fault(pbdma, notifier, status);
        self.dispatch(FaultKind::PbdmaFault, classified)
    }

    /// Handle a scheduler error that names no context
    ///
    /// Every active runlist is recovered and every abortable TSG on them is
    /// aborted.
    ///
    /// # Errors
    ///
    /// Returns error if recovery failed or the device is quiesced
    pub fn handle_sched_error_unknown_context(&self) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let request = self.classifier.classify_sched_error();
        self.dispatch(FaultKind::SchedError, Ok(Some(request)))
    }

    /// Handle a preempt timeout of `tsg` on `runlist`
    ///
    /// # Errors
    ///
    /// Returns error if the fault data is invalid, recovery failed, or the
    /// device is quiesced
    pub fn handle_preempt_timeout(
        &self,
        runlist: RunlistId,
        tsg: TsgId,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self.classifier.classify_preempt_timeout(runlist, tsg);
        self.dispatch(FaultKind::PreemptTimeout, classified)
    }

    /// Handle a copy-engine fault
    ///
    /// # Errors
    ///
    /// Returns error if the instance is unknown, recovery failed, or the
    /// device is quiesced
    pub fn handle_ce_fault(&self, instance: u32) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self.classifier.classify_ce_fault(instance);
        self.dispatch(FaultKind::CeFault, classified)
    }

    /// Handle a runlist update that was never acknowledged
    ///
    /// Every abortable TSG on the runlist is aborted.
    ///
    /// # Errors
    ///
    /// Returns error if the runlist is unknown, recovery failed, or the
    /// device is quiesced
    pub fn handle_runlist_update_timeout(
        &self,
        runlist: RunlistId,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        self.check_live()?;
        let classified = self.classifier.classify_runlist_update_timeout(runlist);
        self.dispatch(FaultKind::RunlistUpdateTimeout, classified)
    }

    /// Perform the engine resets deferred for `tsg`
    ///
    /// Call when the debugger releases the context or the TSG is freed.
    pub fn drain_deferred_resets(&self, tsg: TsgId) -> EngineMask {
        let engines = self.policy.drain_deferred_resets(tsg);
        if !engines.is_empty() {
            self.lock_metrics().record_drained(engines.len() as u64);
        }
        engines
    }

    /// Engines currently deferred for `tsg`
    #[must_use]
    pub fn deferred_engines(&self, tsg: TsgId) -> EngineMask {
        self.policy.deferred_engines(tsg)
    }

    /// Runlist table, shared with the submission path
    #[must_use]
    pub fn runlists(&self) -> &Arc<RunlistTable> {
        &self.runlists
    }

    /// Device topology
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Name of the active policy
    #[must_use]
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Check whether the device has been quiesced
    #[must_use]
    pub fn is_quiesced(&self) -> bool {
        self.quiesce.is_quiesced()
    }

    /// Snapshot of the recovery counters
    #[must_use]
    pub fn metrics(&self) -> RecoveryMetrics {
        let mut metrics = self.lock_metrics().clone();
        metrics.quiesced = self.quiesce.is_quiesced();
        metrics
    }

    fn check_live(&self) -> RecoveryResult<()> {
        if self.quiesce.is_quiesced() {
            Err(RecoveryError::Quiesced)
        } else {
            Ok(())
        }
    }

    fn dispatch(
        &self,
        kind: FaultKind,
        classified: RecoveryResult<Option<RecoveryRequest>>,
    ) -> RecoveryResult<Option<RecoveryReport>> {
        let request = match classified {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.lock_metrics().record_benign(kind);
                return Ok(None);
            }
            Err(e) => {
                error!(%kind, error = %e, "invalid fault data");
                self.escalate(&e);
                return Err(e);
            }
        };

        match self.policy.recover(&request) {
            Ok(report) => {
                if let Some(tsg) = request.tsg {
                    self.lock_ctxsw().forget(tsg);
                }
                self.lock_metrics().record_report(&report);
                Ok(Some(report))
            }
            Err(e) => {
                error!(%kind, error = %e, "recovery failed");
                self.escalate(&e);
                Err(e)
            }
        }
    }

    fn escalate(&self, err: &RecoveryError) {
        // No-op when the coordinator or policy already quiesced
        self.quiesce
            .trigger(self.platform.device.as_ref(), &err.to_string());
    }

    fn lock_ctxsw(&self) -> MutexGuard<'_, CtxswTimeoutTracker> {
        self.ctxsw.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_metrics(&self) -> MutexGuard<'_, RecoveryMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("policy", &self.policy.name())
            .field("runlists", &self.runlists.ids())
            .field("quiesced", &self.quiesce.is_quiesced())
            .finish_non_exhaustive()
    }
}
