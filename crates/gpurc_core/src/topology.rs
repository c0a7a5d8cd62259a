//! Static engine/PBDMA/runlist topology.
//!
//! The topology is read once at driver init and never changes while the
//! device is up. Every engine belongs to exactly one runlist; a PBDMA may
//! serve more than one runlist, in which case the lowest runlist wins when a
//! PBDMA fault is resolved.

use crate::error::{CoreError, CoreResult};
use crate::id::{EngineId, MaskIndex, PbdmaId, RunlistId, TsgId, ChannelId};
use crate::mask::{EngineMask, MASK_CAPACITY, PbdmaMask, RunlistMask};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Engine class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineKind {
    /// Graphics/compute engine
    Graphics,
    /// Copy engine with its logical instance number
    Copy {
        /// Logical copy-engine instance
        instance: u32,
    },
    /// Any other engine (video, ...)
    Other,
}

/// One engine of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Engine id
    pub id: EngineId,
    /// Engine class
    pub kind: EngineKind,
}

/// One hardware runlist and the units it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunlistInfo {
    /// Runlist id
    pub id: RunlistId,
    /// Engines scheduled by this runlist
    pub engines: Vec<EngineId>,
    /// PBDMAs fetching for this runlist
    pub pbdmas: Vec<PbdmaId>,
}

impl RunlistInfo {
    /// Engines as a typed set
    #[must_use]
    pub fn engine_mask(&self) -> EngineMask {
        self.engines.iter().copied().collect()
    }

    /// PBDMAs as a typed set
    #[must_use]
    pub fn pbdma_mask(&self) -> PbdmaMask {
        self.pbdmas.iter().copied().collect()
    }
}

/// Device topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Active runlists
    pub runlists: Vec<RunlistInfo>,
    /// Engines
    pub engines: Vec<EngineInfo>,
    /// Number of TSG slots
    pub num_tsgs: u32,
    /// Number of channel slots
    pub num_channels: u32,
}

impl Topology {
    /// Parse and validate a topology from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the topology is inconsistent
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let topology: Self = serde_json::from_str(json)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Serialize to JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the membership invariants
    ///
    /// # Errors
    ///
    /// Returns error if an id does not fit a mask, an engine is unknown or
    /// shared, a runlist id repeats, or a copy-engine instance repeats
    pub fn validate(&self) -> CoreResult<()> {
        let mut known = EngineMask::empty();
        let mut instances: IndexMap<u32, EngineId> = IndexMap::new();
        for engine in &self.engines {
            check_range("engine", engine.id.index())?;
            if !known.insert(engine.id) {
                return Err(CoreError::AlreadyExists {
                    kind: "engine".to_string(),
                    id: engine.id.to_string(),
                });
            }
            if let EngineKind::Copy { instance } = engine.kind {
                if instances.insert(instance, engine.id).is_some() {
                    return Err(CoreError::Validation {
                        field: "engines".to_string(),
                        reason: format!("copy-engine instance {} listed twice", instance),
                    });
                }
            }
        }

        let mut seen_runlists = RunlistMask::empty();
        let mut owner: IndexMap<EngineId, RunlistId> = IndexMap::new();
        for runlist in &self.runlists {
            check_range("runlist", runlist.id.index())?;
            if !seen_runlists.insert(runlist.id) {
                return Err(CoreError::AlreadyExists {
                    kind: "runlist".to_string(),
                    id: runlist.id.to_string(),
                });
            }
            for &pbdma in &runlist.pbdmas {
                check_range("pbdma", pbdma.index())?;
            }
            for &engine in &runlist.engines {
                if !known.contains(engine) {
                    return Err(CoreError::UnknownEngine {
                        engine: engine.as_u32(),
                    });
                }
                if let Some(first) = owner.insert(engine, runlist.id) {
                    return Err(CoreError::EngineShared {
                        engine: engine.as_u32(),
                        first: first.as_u32(),
                        second: runlist.id.as_u32(),
                    });
                }
            }
        }

        if owner.len() != self.engines.len() {
            let orphan = self
                .engines
                .iter()
                .find(|e| !owner.contains_key(&e.id))
                .map_or(0, |e| e.id.as_u32());
            return Err(CoreError::Validation {
                field: "engines".to_string(),
                reason: format!("engine {} is not served by any runlist", orphan),
            });
        }

        Ok(())
    }

    /// All active runlists
    #[must_use]
    pub fn runlist_mask(&self) -> RunlistMask {
        self.runlists.iter().map(|r| r.id).collect()
    }

    /// Look up a runlist
    #[must_use]
    pub fn runlist(&self, id: RunlistId) -> Option<&RunlistInfo> {
        self.runlists.iter().find(|r| r.id == id)
    }

    /// Look up an engine
    #[must_use]
    pub fn engine(&self, id: EngineId) -> Option<&EngineInfo> {
        self.engines.iter().find(|e| e.id == id)
    }

    /// Runlist owning `engine`
    #[must_use]
    pub fn runlist_of_engine(&self, engine: EngineId) -> Option<RunlistId> {
        self.runlists
            .iter()
            .find(|r| r.engines.contains(&engine))
            .map(|r| r.id)
    }

    /// Runlists owning the engines of `engines`
    ///
    /// Returns `None` if any engine in the set is not owned by a runlist.
    #[must_use]
    pub fn runlists_for_engines(&self, engines: EngineMask) -> Option<RunlistMask> {
        let mut runlists = RunlistMask::empty();
        for engine in engines {
            runlists.insert(self.runlist_of_engine(engine)?);
        }
        Some(runlists)
    }

    /// Lowest runlist served by `pbdma`
    #[must_use]
    pub fn runlist_of_pbdma(&self, pbdma: PbdmaId) -> Option<RunlistId> {
        self.runlists
            .iter()
            .filter(|r| r.pbdmas.contains(&pbdma))
            .map(|r| r.id)
            .min()
    }

    /// Engine id of a copy-engine instance
    #[must_use]
    pub fn engine_of_ce_instance(&self, instance: u32) -> Option<EngineId> {
        self.engines
            .iter()
            .find(|e| e.kind == EngineKind::Copy { instance })
            .map(|e| e.id)
    }

    /// Check whether `engine` is the graphics engine
    #[must_use]
    pub fn is_graphics(&self, engine: EngineId) -> bool {
        self.engine(engine)
            .is_some_and(|e| e.kind == EngineKind::Graphics)
    }

    /// Check a TSG id against the TSG table size
    #[must_use]
    pub const fn tsg_in_range(&self, tsg: TsgId) -> bool {
        tsg.as_u32() < self.num_tsgs
    }

    /// Check a channel id against the channel table size
    #[must_use]
    pub const fn channel_in_range(&self, channel: ChannelId) -> bool {
        channel.as_u32() < self.num_channels
    }
}

fn check_range(kind: &str, index: u32) -> CoreResult<()> {
    if index >= MASK_CAPACITY {
        return Err(CoreError::IdOutOfRange {
            kind: kind.to_string(),
            id: index,
        });
    }
    Ok(())
}
