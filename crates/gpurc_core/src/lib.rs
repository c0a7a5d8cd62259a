//! GPURC Core Types
//!
//! Pure types shared by the recovery subsystem and its hardware seams.
//! Nothing in this crate touches hardware or takes locks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fault;
pub mod id;
pub mod mask;
pub mod topology;

// Re-exports
pub use config::RecoveryConfig;
pub use error::{CoreError, CoreResult};
pub use fault::{
    ChanStatus, ContextKind, ErrorNotifier, FaultKind, MmuClient, MmuFaultInfo, PbdmaStatus,
    RawContext,
};
pub use id::{ChannelId, EngineId, Gfid, MaskIndex, PbdmaId, RecoveryId, RunlistId, TsgId};
pub use mask::{EngineMask, IdSet, PbdmaMask, RunlistMask};
pub use topology::{EngineInfo, EngineKind, RunlistInfo, Topology};
