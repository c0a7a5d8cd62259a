//! GPURC Recovery
//!
//! Fault isolation and recovery for the GPU host scheduler. Hardware fault
//! signals are paused at the interrupt gate, classified into a
//! [`RecoveryRequest`], and driven through the recovery protocol: take the
//! engines-reset mutex and runlist locks, disable scheduling, preempt, wait
//! for the faulting TSG to leave its PBDMAs, reset (or defer) engines, clean
//! up contexts, then re-enable scheduling. Protocol invariant violations
//! quiesce the device instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod coordinator;
pub mod ctxsw;
pub mod deferred;
pub mod error;
pub mod gate;
pub mod manager;
pub mod monitor;
pub mod phase;
pub mod policy;
pub mod poll;
pub mod quiesce;
pub mod request;
pub mod runlist;
pub mod worker;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use classifier::FaultClassifier;
pub use coordinator::Coordinator;
pub use ctxsw::{CtxswTimeoutTracker, CtxswVerdict};
pub use deferred::DeferredResets;
pub use error::{RecoveryError, RecoveryResult};
pub use gate::{DispatchOutcome, FaultDispatcher, InterruptGate};
pub use manager::RecoveryManager;
pub use monitor::RecoveryMetrics;
pub use phase::{PhaseTracker, RecoveryPhase};
pub use policy::{FullRecovery, QuiesceOnly, RecoveryPolicy};
pub use quiesce::QuiesceLatch;
pub use request::{RecoveryReport, RecoveryRequest};
pub use runlist::{LockSet, Runlist, RunlistState, RunlistTable, SchedState, SubmitError};
pub use worker::{IrqWorker, WorkerSummary};
