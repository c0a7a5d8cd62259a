//! GPURC Simulated GPU
//!
//! An in-memory GPU implementing every hardware seam of the recovery core.
//! Every call is recorded with a sequence number and the calling thread, so
//! tests can assert on ordering. Hardware steps can be made to fail, TSGs can
//! be made to stick on their PBDMAs, and fault streams can be generated from
//! a seed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod failure;
pub mod gpu;
pub mod record;
pub mod script;
pub mod topology;
pub mod trace;
pub mod tsg;

pub use failure::{FailurePoint, HalFailures};
pub use gpu::{SimGpu, SimGpuBuilder};
pub use record::{CallLog, HalCall, HalOp};
pub use script::FaultScript;
pub use topology::reference_topology;
pub use trace::init_tracing;
pub use tsg::SimTsg;
