//! Stock topology used by tests and demos.

use gpurc_core::{EngineId, EngineInfo, EngineKind, PbdmaId, RunlistId, RunlistInfo, Topology};

/// Four runlists: graphics on rl0, copy engines on rl1 and rl2, a video
/// engine on rl3. pbdma2 serves both rl2 and rl3.
#[must_use]
pub fn reference_topology() -> Topology {
    let runlist = |id: u32, engines: &[u32], pbdmas: &[u32]| RunlistInfo {
        id: RunlistId::new(id),
        engines: engines.iter().copied().map(EngineId::new).collect(),
        pbdmas: pbdmas.iter().copied().map(PbdmaId::new).collect(),
    };
    let engine = |id: u32, kind: EngineKind| EngineInfo {
        id: EngineId::new(id),
        kind,
    };
    Topology {
        runlists: vec![
            runlist(0, &[0], &[0]),
            runlist(1, &[1], &[1]),
            runlist(2, &[2], &[2]),
            runlist(3, &[3], &[2, 3]),
        ],
        engines: vec![
            engine(0, EngineKind::Graphics),
            engine(1, EngineKind::Copy { instance: 0 }),
            engine(2, EngineKind::Copy { instance: 1 }),
            engine(3, EngineKind::Other),
        ],
        num_tsgs: 64,
        num_channels: 512,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_topology_valid() {
        let topology = reference_topology();
        topology.validate().unwrap();
        assert_eq!(topology.runlist_of_pbdma(PbdmaId::new(2)), Some(RunlistId::new(2)));
        assert_eq!(topology.engine_of_ce_instance(1), Some(EngineId::new(2)));
    }
}
