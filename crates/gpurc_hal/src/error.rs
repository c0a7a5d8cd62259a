//! Errors reported by hardware collaborators.

use gpurc_core::{EngineId, RunlistId, TsgId};

/// HAL result type
pub type HalResult<T> = Result<T, HalError>;

/// Failure of a best-effort hardware step
///
/// The recovery core logs these and keeps going; none of them stops a
/// recovery sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    /// Register write was not accepted
    #[error("Register write rejected: {0}")]
    RegisterWrite(String),

    /// Runlist did not acknowledge an update
    #[error("Runlist {runlist} did not acknowledge update")]
    RunlistUpdate {
        /// Runlist id
        runlist: RunlistId,
    },

    /// Preempt request could not be issued
    #[error("Preempt of runlist {runlist} not issued")]
    Preempt {
        /// Runlist id
        runlist: RunlistId,
    },

    /// TSG is not known to the context allocator
    #[error("Unknown TSG {0}")]
    UnknownTsg(TsgId),

    /// Engine is not known to the HAL
    #[error("Unknown engine {0}")]
    UnknownEngine(EngineId),
}
