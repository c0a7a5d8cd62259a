//! Engine resets deferred while a debugger holds the faulting context.

use gpurc_core::{EngineId, EngineMask, TsgId};
use indexmap::IndexMap;

/// Engines left halted per TSG, guarded by the engines-reset mutex
#[derive(Debug, Default)]
pub struct DeferredResets {
    pending: IndexMap<TsgId, EngineMask>,
}

impl DeferredResets {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `engine` must be reset once `tsg` is torn down
    pub fn record(&mut self, tsg: TsgId, engine: EngineId) {
        self.pending.entry(tsg).or_default().insert(engine);
    }

    /// Remove and return the engines deferred for `tsg`
    pub fn take(&mut self, tsg: TsgId) -> EngineMask {
        self.pending.shift_remove(&tsg).unwrap_or_default()
    }

    /// Engines deferred for `tsg`
    #[must_use]
    pub fn engines_for(&self, tsg: TsgId) -> EngineMask {
        self.pending.get(&tsg).copied().unwrap_or_default()
    }

    /// Every deferred engine
    #[must_use]
    pub fn all_engines(&self) -> EngineMask {
        self.pending
            .values()
            .fold(EngineMask::empty(), |acc, engines| acc.union(*engines))
    }

    /// Check whether anything is deferred
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_take() {
        let mut deferred = DeferredResets::new();
        deferred.record(TsgId::new(3), EngineId::new(0));
        deferred.record(TsgId::new(3), EngineId::new(2));
        deferred.record(TsgId::new(5), EngineId::new(1));

        assert_eq!(deferred.engines_for(TsgId::new(3)).bits(), 0b101);
        assert_eq!(deferred.all_engines().bits(), 0b111);

        assert_eq!(deferred.take(TsgId::new(3)).bits(), 0b101);
        assert!(deferred.take(TsgId::new(3)).is_empty());
        assert!(!deferred.is_empty());
        deferred.take(TsgId::new(5));
        assert!(deferred.is_empty());
    }
}
