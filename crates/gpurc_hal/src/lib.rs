//! GPURC Hardware Seams
//!
//! Traits for every collaborator the recovery core drives: runlist
//! scheduling, engine reset, context bookkeeping, PBDMA residency, device
//! state and interrupt units. Chip-specific implementations are injected as
//! trait objects through [`Platform`]; the core never reaches for global
//! register tables.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod intr;
pub mod ops;
pub mod platform;

pub use error::{HalError, HalResult};
pub use intr::{FaultPayload, InterruptOps, InterruptUnit, RawSignal};
pub use ops::{ContextOps, DeviceOps, EngineOps, PbdmaOps, RunlistOps};
pub use platform::Platform;
