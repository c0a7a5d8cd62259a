//! Context-switch timeout accounting.
//!
//! A ctxsw timeout interrupt fires every period while an engine is stuck in a
//! context switch. A TSG that reports progress between interrupts has its
//! accumulated time cleared; one that does not is recovered once the
//! accumulated time reaches the limit.

use gpurc_core::{RecoveryConfig, TsgId};
use indexmap::IndexMap;

/// What to do about a ctxsw timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxswVerdict {
    /// TSG made progress since the last interrupt
    Progressing,
    /// TSG is stalled but still within budget
    Accumulating {
        /// Time charged so far
        accumulated_ms: u64,
    },
    /// Budget exhausted, recover the TSG
    Expired {
        /// Time charged so far
        accumulated_ms: u64,
    },
}

impl CtxswVerdict {
    /// Check whether the TSG should be recovered
    #[must_use]
    pub const fn should_recover(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Per-TSG ctxsw timeout accumulator
#[derive(Debug)]
pub struct CtxswTimeoutTracker {
    limit_ms: u64,
    period_ms: u64,
    accumulated: IndexMap<TsgId, u64>,
}

impl CtxswTimeoutTracker {
    /// Create a tracker with the configured budget
    #[must_use]
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            limit_ms: config.ctxsw_timeout_limit_ms,
            period_ms: config.ctxsw_timeout_period_ms,
            accumulated: IndexMap::new(),
        }
    }

    /// Charge one timeout interrupt to `tsg`
    pub fn check(&mut self, tsg: TsgId, made_progress: bool) -> CtxswVerdict {
        if made_progress {
            self.accumulated.shift_remove(&tsg);
            return CtxswVerdict::Progressing;
        }
        let accumulated_ms = self.accumulated.entry(tsg).or_insert(0);
        *accumulated_ms = accumulated_ms.saturating_add(self.period_ms);
        if *accumulated_ms >= self.limit_ms {
            CtxswVerdict::Expired {
                accumulated_ms: *accumulated_ms,
            }
        } else {
            CtxswVerdict::Accumulating {
                accumulated_ms: *accumulated_ms,
            }
        }
    }

    /// Drop the accumulator of a recovered TSG
    pub fn forget(&mut self, tsg: TsgId) {
        self.accumulated.shift_remove(&tsg);
    }

    /// Time charged to `tsg`
    #[must_use]
    pub fn accumulated_ms(&self, tsg: TsgId) -> u64 {
        self.accumulated.get(&tsg).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker() -> CtxswTimeoutTracker {
        CtxswTimeoutTracker::new(&RecoveryConfig::new().with_ctxsw_timeout(300, 100))
    }

    #[test]
    fn test_expires_after_limit() {
        let mut tracker = tracker();
        let tsg = TsgId::new(1);
        assert_eq!(
            tracker.check(tsg, false),
            CtxswVerdict::Accumulating { accumulated_ms: 100 }
        );
        assert!(!tracker.check(tsg, false).should_recover());
        assert_eq!(
            tracker.check(tsg, false),
            CtxswVerdict::Expired { accumulated_ms: 300 }
        );
    }

    #[test]
    fn test_progress_clears_accumulator() {
        let mut tracker = tracker();
        let tsg = TsgId::new(1);
        tracker.check(tsg, false);
        tracker.check(tsg, false);
        assert_eq!(tracker.check(tsg, true), CtxswVerdict::Progressing);
        assert_eq!(tracker.accumulated_ms(tsg), 0);
        assert!(!tracker.check(tsg, false).should_recover());
    }

    #[test]
    fn test_tsgs_accounted_separately() {
        let mut tracker = tracker();
        tracker.check(TsgId::new(1), false);
        tracker.check(TsgId::new(1), false);
        tracker.check(TsgId::new(2), false);
        assert_eq!(tracker.accumulated_ms(TsgId::new(1)), 200);
        assert_eq!(tracker.accumulated_ms(TsgId::new(2)), 100);
        tracker.forget(TsgId::new(1));
        assert_eq!(tracker.accumulated_ms(TsgId::new(1)), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_expires_after_stalled_streak(progress in proptest::collection::vec(any::<bool>(), 1..40)) {
            let mut tracker = tracker();
            let tsg = TsgId::new(0);
            let mut streak = 0u64;
            for made_progress in progress {
                let verdict = tracker.check(tsg, made_progress);
                streak = if made_progress { 0 } else { streak + 1 };
                prop_assert_eq!(verdict.should_recover(), streak * 100 >= 300);
                if verdict.should_recover() {
                    tracker.forget(tsg);
                    streak = 0;
                }
            }
        }
    }
}
