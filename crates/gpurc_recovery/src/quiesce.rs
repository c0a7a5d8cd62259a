//! One-shot device quiesce.

use gpurc_hal::DeviceOps;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Latch that quiesces the device at most once
#[derive(Debug, Default)]
pub struct QuiesceLatch {
    quiesced: AtomicBool,
}

impl QuiesceLatch {
    /// Create an open latch
    #[must_use]
    pub const fn new() -> Self {
        Self {
            quiesced: AtomicBool::new(false),
        }
    }

    /// Quiesce the device unless it already is
    ///
    /// Returns true if this call performed the quiesce.
    pub fn trigger(&self, device: &dyn DeviceOps, reason: &str) -> bool {
        if self.quiesced.swap(true, Ordering::AcqRel) {
            return false;
        }
        error!(reason, "quiescing device");
        device.quiesce();
        true
    }

    /// Check whether the device has been quiesced
    #[must_use]
    pub fn is_quiesced(&self) -> bool {
        self.quiesced.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpurc_sim::{reference_topology, HalOp, SimGpu};

    #[test]
    fn test_quiesce_once() {
        let gpu = SimGpu::builder(reference_topology()).build();
        let latch = QuiesceLatch::new();
        assert!(!latch.is_quiesced());
        assert!(latch.trigger(gpu.as_ref(), "first"));
        assert!(!latch.trigger(gpu.as_ref(), "second"));
        assert!(latch.is_quiesced());
        assert_eq!(gpu.log().count(|op| *op == HalOp::Quiesce), 1);
    }
}
