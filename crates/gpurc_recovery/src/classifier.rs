//! Fault classification.
//!
//! Turns the raw data of each fault source into a [`RecoveryRequest`]. Every
//! hardware-supplied id is validated here, before any lock is taken: an id
//! outside the tables, an unknown id type or a unit no runlist owns is an
//! invariant violation and comes back as an error. `Ok(None)` means the
//! signal is benign and needs no recovery.
//!
//! A fault that names a TSG is charged to the TSG's own runlist as well as
//! to the runlists of the faulting units, since the two differ when a PBDMA
//! or engine is shared. The TSG's runlist is the one polled.

use crate::error::{RecoveryError, RecoveryResult};
use crate::request::RecoveryRequest;
use gpurc_core::{
    ChannelId, ContextKind, EngineMask, ErrorNotifier, FaultKind, Gfid, MmuClient, MmuFaultInfo,
    PbdmaId, PbdmaStatus, RawContext, RecoveryConfig, RunlistId, RunlistMask, Topology, TsgId,
};
use gpurc_hal::{ContextOps, DeviceOps};
use std::sync::Arc;
use tracing::debug;

/// Validates fault data and builds recovery requests
pub struct FaultClassifier {
    topology: Arc<Topology>,
    context: Arc<dyn ContextOps>,
    device: Arc<dyn DeviceOps>,
    default_debug_dump: bool,
}

impl FaultClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new(
        topology: Arc<Topology>,
        context: Arc<dyn ContextOps>,
        device: Arc<dyn DeviceOps>,
        config: &RecoveryConfig,
    ) -> Self {
        Self {
            topology,
            context,
            device,
            default_debug_dump: config.default_debug_dump,
        }
    }

    /// Classify an MMU fault
    ///
    /// The fault is charged to every runlist owning a faulting engine and to
    /// the faulting TSG's runlist. Without a TSG the lowest engine runlist is
    /// polled. Engine resets are deferred when a debugger is attached with MMU debug
    /// mode on, the fault is a real GPC fault on the graphics engine and the
    /// faulting TSG is known.
    ///
    /// # Errors
    ///
    /// Returns error if an engine has no runlist, the context id is invalid
    /// or the TSG sits on an unknown runlist
    pub fn classify_mmu_fault(
        &self,
        engines: EngineMask,
        context: Option<RawContext>,
        info: &MmuFaultInfo,
    ) -> RecoveryResult<Option<RecoveryRequest>> {
        let runlists = self
            .topology
            .runlists_for_engines(engines)
            .ok_or(RecoveryError::UnresolvedEngines(engines))?;
        let tsg = context.map(|raw| self.resolve_raw(raw)).transpose()?;

        let should_defer = tsg.is_some()
            && !info.fake
            && info.client == MmuClient::Gpc
            && engines.iter().any(|e| self.topology.is_graphics(e))
            && self.device.debugger_attached()
            && self.device.mmu_debug_mode_enabled();

        let mut request = RecoveryRequest::new(FaultKind::MmuFault)
            .with_engines(engines)
            .with_notifier(ErrorNotifier::MmuFault)
            .with_debug_dump(self.default_debug_dump)
            .with_defer(should_defer);
        if let Some(tsg) = tsg {
            request = request.with_tsg(tsg);
        }
        let request = self.charge(request, runlists)?;
        debug!(
            engines = %engines,
            runlists = %request.runlists,
            address = info.address,
            should_defer,
            "classified mmu fault"
        );
        Ok(Some(request))
    }

    /// Classify a context-switch timeout on `tsg`
    ///
    /// # Errors
    ///
    /// Returns error if the TSG id is out of range, an engine has no runlist
    /// or the TSG sits on an unknown runlist
    pub fn classify_ctxsw_timeout(
        &self,
        engines: EngineMask,
        gfid: Gfid,
        tsg: TsgId,
        debug_dump: bool,
    ) -> RecoveryResult<Option<RecoveryRequest>> {
        self.check_tsg(tsg)?;
        let runlists = self
            .topology
            .runlists_for_engines(engines)
            .ok_or(RecoveryError::UnresolvedEngines(engines))?;

        let request = RecoveryRequest::new(FaultKind::CtxswTimeout)
            .with_gfid(gfid)
            .with_tsg(tsg)
            .with_engines(engines)
            .with_notifier(ErrorNotifier::IdleTimeout)
            .with_debug_dump(debug_dump);
        self.charge(request, runlists).map(Some)
    }

    /// Classify a PBDMA fault
    ///
    /// The fault is charged to the context the status register shows as
    /// loaded (or loading), on its own runlist and on the lowest runlist the
    /// PBDMA serves. An idle PBDMA yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns error if no runlist is served by the PBDMA or the context id
    /// is invalid
    pub fn classify_pbdma_fault(
        &self,
        pbdma: PbdmaId,
        notifier: ErrorNotifier,
        status: &PbdmaStatus,
    ) -> RecoveryResult<Option<RecoveryRequest>> {
        let runlist = self
            .topology
            .runlist_of_pbdma(pbdma)
            .ok_or(RecoveryError::UnresolvedPbdma(pbdma))?;
        let Some((kind, id)) = status.loaded_context() else {
            debug!(%pbdma, "pbdma fault with nothing loaded");
            return Ok(None);
        };
        let tsg = self.resolve(kind, id)?;

        let request = RecoveryRequest::new(FaultKind::PbdmaFault)
            .with_tsg(tsg)
            .with_notifier(notifier)
            .with_debug_dump(self.default_debug_dump);
        self.charge(request, RunlistMask::single(runlist)).map(Some)
    }

    /// Classify a scheduler error that names no context
    #[must_use]
    pub fn classify_sched_error(&self) -> RecoveryRequest {
        RecoveryRequest::new(FaultKind::SchedError).with_debug_dump(self.default_debug_dump)
    }

    /// Classify a preempt timeout of `tsg` on `runlist`
    ///
    /// # Errors
    ///
    /// Returns error if the runlist is unknown or the TSG id is out of range
    pub fn classify_preempt_timeout(
        &self,
        runlist: RunlistId,
        tsg: TsgId,
    ) -> RecoveryResult<Option<RecoveryRequest>> {
        let info = self
            .topology
            .runlist(runlist)
            .ok_or(RecoveryError::UnknownRunlist(runlist))?;
        self.check_tsg(tsg)?;

        let request = RecoveryRequest::new(FaultKind::PreemptTimeout)
            .with_tsg(tsg)
            .with_engines(info.engine_mask())
            .with_notifier(ErrorNotifier::IdleTimeout)
            .with_debug_dump(self.default_debug_dump);
        self.charge(request, RunlistMask::single(runlist)).map(Some)
    }

    /// Classify a copy-engine fault
    ///
    /// The instance is mapped to its engine and then to the TSG bound there.
    /// A fault on an idle copy engine yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns error if the instance has no engine or the bound TSG is invalid
    pub fn classify_ce_fault(&self, instance: u32) -> RecoveryResult<Option<RecoveryRequest>> {
        let engine = self
            .topology
            .engine_of_ce_instance(instance)
            .ok_or(RecoveryError::InvalidEngineInstance(instance))?;
        let engines = EngineMask::single(engine);
        let runlist = self
            .topology
            .runlist_of_engine(engine)
            .ok_or(RecoveryError::UnresolvedEngines(engines))?;
        let Some(tsg) = self.context.tsg_on_engine(engine) else {
            debug!(instance, %engine, "ce fault with no bound tsg");
            return Ok(None);
        };
        self.check_tsg(tsg)?;

        let request = RecoveryRequest::new(FaultKind::CeFault)
            .with_tsg(tsg)
            .with_engines(engines)
            .with_notifier(ErrorNotifier::CeError)
            .with_debug_dump(self.default_debug_dump);
        self.charge(request, RunlistMask::single(runlist)).map(Some)
    }

    /// Classify a runlist update timeout
    ///
    /// # Errors
    ///
    /// Returns error if the runlist is unknown
    pub fn classify_runlist_update_timeout(
        &self,
        runlist: RunlistId,
    ) -> RecoveryResult<Option<RecoveryRequest>> {
        let info = self
            .topology
            .runlist(runlist)
            .ok_or(RecoveryError::UnknownRunlist(runlist))?;
        Ok(Some(
            RecoveryRequest::new(FaultKind::RunlistUpdateTimeout)
                .with_runlist(runlist)
                .with_engines(info.engine_mask())
                .with_debug_dump(self.default_debug_dump),
        ))
    }

    /// Charge `request` to the faulting units' runlists and its TSG's runlist
    fn charge(
        &self,
        request: RecoveryRequest,
        units: RunlistMask,
    ) -> RecoveryResult<RecoveryRequest> {
        let own = match request.tsg {
            Some(tsg) => self.runlist_of_tsg(tsg)?,
            None => None,
        };
        let request = request.with_runlists(units);
        Ok(match own.or_else(|| units.first()) {
            Some(runlist) => request.with_runlist(runlist),
            None => request,
        })
    }

    fn runlist_of_tsg(&self, tsg: TsgId) -> RecoveryResult<Option<RunlistId>> {
        match self.context.runlist_of_tsg(tsg) {
            Some(runlist) if self.topology.runlist(runlist).is_none() => {
                Err(RecoveryError::UnknownRunlist(runlist))
            }
            own => Ok(own),
        }
    }

    fn resolve_raw(&self, raw: RawContext) -> RecoveryResult<TsgId> {
        let kind = raw
            .decode_kind()
            .ok_or(RecoveryError::InvalidContextKind(raw.kind))?;
        self.resolve(kind, raw.id)
    }

    fn resolve(&self, kind: ContextKind, id: u32) -> RecoveryResult<TsgId> {
        match kind {
            ContextKind::Tsg => {
                let tsg = TsgId::new(id);
                self.check_tsg(tsg)?;
                Ok(tsg)
            }
            ContextKind::Channel => {
                let channel = ChannelId::new(id);
                if !self.topology.channel_in_range(channel) {
                    return Err(RecoveryError::InvalidContextId { kind, id });
                }
                let tsg = self
                    .context
                    .tsg_of_channel(channel)
                    .ok_or(RecoveryError::UnboundChannel(channel))?;
                self.check_tsg(tsg)?;
                Ok(tsg)
            }
        }
    }

    fn check_tsg(&self, tsg: TsgId) -> RecoveryResult<()> {
        if self.topology.tsg_in_range(tsg) {
            Ok(())
        } else {
            Err(RecoveryError::InvalidContextId {
                kind: ContextKind::Tsg,
                id: tsg.as_u32(),
            })
        }
    }
}

impl std::fmt::Debug for FaultClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultClassifier")
            .field("default_debug_dump", &self.default_debug_dump)
            .finish_non_exhaustive()
    }
}
