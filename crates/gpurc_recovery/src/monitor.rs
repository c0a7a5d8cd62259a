//! Recovery counters.

use crate::request::RecoveryReport;
use chrono::{DateTime, Utc};
use gpurc_core::{FaultKind, RecoveryId};
use indexmap::IndexMap;
use serde::Serialize;

/// Counters describing recovery activity since the manager was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryMetrics {
    /// Completed recoveries per fault kind
    pub recoveries: IndexMap<FaultKind, u64>,
    /// Signals that needed no recovery, per fault kind
    pub benign: IndexMap<FaultKind, u64>,
    /// Engines reset
    pub engines_reset: u64,
    /// Engine resets deferred for a debugger
    pub engines_deferred: u64,
    /// Deferred resets later performed
    pub deferred_resets_drained: u64,
    /// TSGs aborted
    pub contexts_aborted: u64,
    /// Non-abortable TSGs skipped by broadcast cleanup
    pub contexts_skipped: u64,
    /// Ctxsw timeouts tolerated because the TSG was still within budget
    pub ctxsw_timeouts_tolerated: u64,
    /// Device has been quiesced
    pub quiesced: bool,
    /// Last completed recovery
    pub last_recovery_id: Option<RecoveryId>,
    /// When the last recovery completed
    pub last_recovery_at: Option<DateTime<Utc>>,
}

impl RecoveryMetrics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account a completed recovery
    pub fn record_report(&mut self, report: &RecoveryReport) {
        *self.recoveries.entry(report.fault_kind).or_insert(0) += 1;
        self.engines_reset += report.engines_reset.len() as u64;
        self.engines_deferred += report.engines_deferred.len() as u64;
        self.contexts_aborted += report.aborted.len() as u64;
        self.contexts_skipped += report.skipped.len() as u64;
        self.last_recovery_id = Some(report.recovery_id);
        self.last_recovery_at = Some(Utc::now());
    }

    /// Account a signal that needed no recovery
    pub fn record_benign(&mut self, kind: FaultKind) {
        *self.benign.entry(kind).or_insert(0) += 1;
    }

    /// Account a tolerated ctxsw timeout
    pub fn record_tolerated_ctxsw(&mut self) {
        self.ctxsw_timeouts_tolerated += 1;
    }

    /// Account a drained deferred reset
    pub fn record_drained(&mut self, engines: u64) {
        self.deferred_resets_drained += engines;
    }

    /// Completed recoveries of `kind`
    #[must_use]
    pub fn recoveries_of(&self, kind: FaultKind) -> u64 {
        self.recoveries.get(&kind).copied().unwrap_or(0)
    }

    /// Completed recoveries of any kind
    #[must_use]
    pub fn total_recoveries(&self) -> u64 {
        self.recoveries.values().sum()
    }
}
