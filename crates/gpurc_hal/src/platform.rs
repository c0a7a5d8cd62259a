//! Bundle of collaborator trait objects injected into the recovery core.

use crate::intr::InterruptOps;
use crate::ops::{ContextOps, DeviceOps, EngineOps, PbdmaOps, RunlistOps};
use std::sync::Arc;

/// Chip implementation of every collaborator seam
#[derive(Clone)]
pub struct Platform {
    /// Runlist scheduling control
    pub runlist: Arc<dyn RunlistOps>,
    /// Engine reset
    pub engine: Arc<dyn EngineOps>,
    /// TSG bookkeeping
    pub context: Arc<dyn ContextOps>,
    /// PBDMA residency
    pub pbdma: Arc<dyn PbdmaOps>,
    /// Device-wide state
    pub device: Arc<dyn DeviceOps>,
    /// Interrupt units
    pub intr: Arc<dyn InterruptOps>,
}

impl Platform {
    /// Build a platform from one object implementing every seam
    #[must_use]
    pub fn from_shared<T>(hal: Arc<T>) -> Self
    where
        T: RunlistOps + EngineOps + ContextOps + PbdmaOps + DeviceOps + InterruptOps + 'static,
    {
        Self {
            runlist: hal.clone(),
            engine: hal.clone(),
            context: hal.clone(),
            pbdma: hal.clone(),
            device: hal.clone(),
            intr: hal,
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
