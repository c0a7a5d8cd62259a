//! Identifiers for GPURC entities.
//!
//! Hardware ids are small dense indices handed out by the chip or by the
//! context allocator. They are plain `u32` newtypes so that an engine id can
//! never be passed where a runlist id is expected. Recovery invocations get a
//! random UUID so that every log line of one sequence can be correlated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ids that can be members of an [`IdSet`](crate::mask::IdSet)
pub trait MaskIndex: Copy {
    /// Bit position of this id
    fn index(self) -> u32;

    /// Rebuild the id from a bit position
    fn from_index(index: u32) -> Self;
}

macro_rules! hw_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw hardware index
            #[must_use]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw hardware index
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

hw_id!(
    /// Engine identifier (graphics, copy engines, ...)
    EngineId,
    "eng"
);

hw_id!(
    /// Pushbuffer DMA unit identifier
    PbdmaId,
    "pbdma"
);

hw_id!(
    /// Hardware runlist (scheduler) identifier
    RunlistId,
    "rl"
);

hw_id!(
    /// Timeslice group identifier
    TsgId,
    "tsg"
);

hw_id!(
    /// Channel identifier
    ChannelId,
    "ch"
);

hw_id!(
    /// Guest/function identifier for virtualization partitions
    Gfid,
    "gfid"
);

impl Gfid {
    /// The physical function
    pub const PF: Self = Self(0);
}

impl MaskIndex for EngineId {
    fn index(self) -> u32 {
        self.0
    }

    fn from_index(index: u32) -> Self {
        Self(index)
    }
}

impl MaskIndex for PbdmaId {
    fn index(self) -> u32 {
        self.0
    }

    fn from_index(index: u32) -> Self {
        Self(index)
    }
}

impl MaskIndex for RunlistId {
    fn index(self) -> u32 {
        self.0
    }

    fn from_index(index: u32) -> Self {
        Self(index)
    }
}

/// Recovery identifier - identifies a single recovery invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecoveryId(Uuid);

impl RecoveryId {
    /// Create a new random RecoveryId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecoveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rc_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hw_id_display() {
        assert_eq!(EngineId::new(3).to_string(), "eng3");
        assert_eq!(RunlistId::new(0).to_string(), "rl0");
        assert_eq!(TsgId::new(7).to_string(), "tsg7");
        assert_eq!(PbdmaId::new(2).to_string(), "pbdma2");
    }

    #[test]
    fn test_hw_id_roundtrip() {
        let id = TsgId::from(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(EngineId::from_index(EngineId::new(5).index()), EngineId::new(5));
    }

    #[test]
    fn test_hw_id_serde_transparent() {
        let json = serde_json::to_string(&RunlistId::new(4)).unwrap();
        assert_eq!(json, "4");
        let back: RunlistId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunlistId::new(4));
    }

    #[test]
    fn test_recovery_id_unique() {
        let a = RecoveryId::new();
        let b = RecoveryId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("rc_"));
    }

    #[test]
    fn test_gfid_pf() {
        assert_eq!(Gfid::PF.as_u32(), 0);
    }
}
