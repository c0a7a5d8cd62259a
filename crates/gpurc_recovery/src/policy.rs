//! Recovery policies.
//!
//! The policy is chosen once at init from `recovery_enabled`. A build that
//! runs the full protocol uses [`FullRecovery`]; one that cannot recover in
//! place uses [`QuiesceOnly`], which stops the device on the first fault.

use crate::coordinator::Coordinator;
use crate::error::{RecoveryError, RecoveryResult};
use crate::quiesce::QuiesceLatch;
use crate::request::{RecoveryReport, RecoveryRequest};
use gpurc_core::{EngineMask, TsgId};
use gpurc_hal::DeviceOps;
use std::sync::Arc;

/// How classified faults are handled
pub trait RecoveryPolicy: Send + Sync {
    /// Policy name for logs
    fn name(&self) -> &'static str;

    /// Handle a classified fault
    ///
    /// # Errors
    ///
    /// Returns error if recovery could not complete
    fn recover(&self, request: &RecoveryRequest) -> RecoveryResult<RecoveryReport>;

    /// Perform the engine resets deferred for `tsg`
    fn drain_deferred_resets(&self, _tsg: TsgId) -> EngineMask {
        EngineMask::empty()
    }

    /// Engines currently deferred for `tsg`
    fn deferred_engines(&self, _tsg: TsgId) -> EngineMask {
        EngineMask::empty()
    }
}

/// Runs the full recovery protocol
#[derive(Debug)]
pub struct FullRecovery {
    coordinator: Coordinator,
}

impl FullRecovery {
    /// Wrap a coordinator
    #[must_use]
    pub const fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

impl RecoveryPolicy for FullRecovery {
    fn name(&self) -> &'static str {
        "full"
    }

    fn recover(&self, request: &RecoveryRequest) -> RecoveryResult<RecoveryReport> {
        self.coordinator.recover(request)
    }

    fn drain_deferred_resets(&self, tsg: TsgId) -> EngineMask {
        self.coordinator.drain_deferred_resets(tsg)
    }

    fn deferred_engines(&self, tsg: TsgId) -> EngineMask {
        self.coordinator.deferred_engines(tsg)
    }
}

/// Quiesces the device on any fault
pub struct QuiesceOnly {
    device: Arc<dyn DeviceOps>,
    latch: Arc<QuiesceLatch>,
}

impl QuiesceOnly {
    /// Create the policy
    #[must_use]
    pub fn new(device: Arc<dyn DeviceOps>, latch: Arc<QuiesceLatch>) -> Self {
        Self { device, latch }
    }
}

impl RecoveryPolicy for QuiesceOnly {
    fn name(&self) -> &'static str {
        "quiesce_only"
    }

    fn recover(&self, request: &RecoveryRequest) -> RecoveryResult<RecoveryReport> {
        let reason = format!("{} with recovery disabled", request.fault_kind);
        self.latch.trigger(self.device.as_ref(), &reason);
        Err(RecoveryError::Quiesced)
    }
}

impl std::fmt::Debug for QuiesceOnly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiesceOnly")
            .field("latch", &self.latch)
            .finish_non_exhaustive()
    }
}
