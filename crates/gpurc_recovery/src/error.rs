//! Recovery errors.
//!
//! Every variant except [`RecoveryError::Quiesced`] and
//! [`RecoveryError::WorkerStopped`] reports a broken protocol invariant. By the
//! time the caller sees one of those, the device has already been quiesced.

use gpurc_core::{ChannelId, ContextKind, EngineMask, PbdmaId, RunlistId, TsgId};

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Recovery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// Hardware named a context id outside the context tables
    #[error("Invalid {kind:?} id {id}")]
    InvalidContextId {
        /// How the id was tagged
        kind: ContextKind,
        /// Raw id
        id: u32,
    },

    /// Hardware tagged a context id with an unknown id type
    #[error("Invalid context id type {0}")]
    InvalidContextKind(u32),

    /// Channel is not bound to any TSG
    #[error("Channel {0} is not bound to a TSG")]
    UnboundChannel(ChannelId),

    /// Fault named engines no runlist owns
    #[error("No runlist owns engines {0}")]
    UnresolvedEngines(EngineMask),

    /// Fault named a PBDMA no runlist is served by
    #[error("No runlist is served by {0}")]
    UnresolvedPbdma(PbdmaId),

    /// Fault named a runlist that is not active
    #[error("Unknown runlist {0}")]
    UnknownRunlist(RunlistId),

    /// Copy-engine fault named an instance with no engine
    #[error("Unknown copy-engine instance {0}")]
    InvalidEngineInstance(u32),

    /// Faulting TSG stayed loaded on a PBDMA past the poll bound
    #[error("{tsg} still resident on a PBDMA of {runlist} after {waited_ms}ms")]
    PbdmaVacateTimeout {
        /// Runlist whose PBDMAs were polled
        runlist: RunlistId,
        /// TSG that did not leave
        tsg: TsgId,
        /// Time spent polling
        waited_ms: u64,
    },

    /// Device is quiesced and refuses further recovery
    #[error("Device is quiesced")]
    Quiesced,

    /// Deferred interrupt worker is gone
    #[error("Interrupt worker stopped")]
    WorkerStopped,
}

impl RecoveryError {
    /// Check whether this error reports a broken invariant (and so quiesced the device)
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Quiesced | Self::WorkerStopped)
    }
}
