//! Recording of hardware calls.

use gpurc_core::{EngineId, ErrorNotifier, Gfid, RunlistId, TsgId};
use gpurc_hal::InterruptUnit;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

/// A state-changing hardware call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HalOp {
    /// Runlist scheduling stopped
    RunlistDisable {
        /// Runlist id
        runlist: RunlistId,
    },
    /// Runlist scheduling restarted
    RunlistEnable {
        /// Runlist id
        runlist: RunlistId,
    },
    /// Runlist preempted
    Preempt {
        /// Runlist id
        runlist: RunlistId,
    },
    /// TSG removed from a runlist
    RemoveTsg {
        /// Runlist id
        runlist: RunlistId,
        /// TSG id
        tsg: TsgId,
    },
    /// Engine reset
    EngineReset {
        /// Engine id
        engine: EngineId,
    },
    /// TSG disabled
    TsgDisable {
        /// TSG id
        tsg: TsgId,
    },
    /// Fault latches cleared
    ClearFaultLatches {
        /// TSG id
        tsg: TsgId,
    },
    /// TSG aborted
    Abort {
        /// TSG id
        tsg: TsgId,
        /// Debug dump requested
        debug_dump: bool,
    },
    /// TSG marked unserviceable
    MarkUnserviceable {
        /// Owning function
        gfid: Gfid,
        /// TSG id
        tsg: TsgId,
    },
    /// Error notifier posted
    SetErrorNotifier {
        /// Owning function
        gfid: Gfid,
        /// TSG id
        tsg: TsgId,
        /// Posted code
        notifier: ErrorNotifier,
    },
    /// Waiters woken
    WakeWaiters {
        /// TSG id
        tsg: TsgId,
    },
    /// Device quiesced
    Quiesce,
    /// Interrupt unit paused
    IntrPause {
        /// Unit
        unit: InterruptUnit,
    },
    /// Interrupt unit resumed
    IntrResume {
        /// Unit
        unit: InterruptUnit,
    },
    /// Interrupt unit masked
    IntrMask {
        /// Unit
        unit: InterruptUnit,
    },
    /// Interrupt unit unmasked
    IntrUnmask {
        /// Unit
        unit: InterruptUnit,
    },
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalCall {
    /// Global sequence number
    pub seq: u64,
    /// Calling thread
    pub thread: ThreadId,
    /// What was done
    pub op: HalOp,
}

/// Ordered record of hardware calls
#[derive(Debug, Default)]
pub struct CallLog {
    next_seq: AtomicU64,
    calls: Mutex<Vec<HalCall>>,
}

impl CallLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call made by the current thread
    pub fn record(&self, op: HalOp) {
        let mut calls = self.lock();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        calls.push(HalCall {
            seq,
            thread: std::thread::current().id(),
            op,
        });
    }

    /// All calls in order
    #[must_use]
    pub fn calls(&self) -> Vec<HalCall> {
        self.lock().clone()
    }

    /// All operations in order
    #[must_use]
    pub fn ops(&self) -> Vec<HalOp> {
        self.lock().iter().map(|c| c.op).collect()
    }

    /// Index of the first operation equal to `op`
    #[must_use]
    pub fn position(&self, op: HalOp) -> Option<usize> {
        self.lock().iter().position(|c| c.op == op)
    }

    /// Number of operations matching `pred`
    #[must_use]
    pub fn count<F: Fn(&HalOp) -> bool>(&self, pred: F) -> usize {
        self.lock().iter().filter(|c| pred(&c.op)).count()
    }

    /// Check whether `op` was recorded
    #[must_use]
    pub fn contains(&self, op: HalOp) -> bool {
        self.position(op).is_some()
    }

    /// Drop every recorded call
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Serialize the operations to JSON, one object per call
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.ops()).unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HalCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
