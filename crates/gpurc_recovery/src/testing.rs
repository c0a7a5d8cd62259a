//! Fixtures shared by the unit and scenario tests.

use crate::manager::RecoveryManager;
use gpurc_core::{
    EngineId, EngineInfo, EngineKind, PbdmaId, RecoveryConfig, RunlistId, RunlistInfo, Topology,
};
use gpurc_sim::{SimGpu, SimGpuBuilder};
use std::sync::Arc;

/// Simulated GPU plus the manager driving it
pub(crate) struct Rig {
    pub gpu: Arc<SimGpu>,
    pub manager: Arc<RecoveryManager>,
}

/// Short poll bound so vacate timeouts fail fast
pub(crate) fn fast_config() -> RecoveryConfig {
    RecoveryConfig::new().with_poll_timeout(20)
}

/// Build the GPU and a manager over it, binding every simulated TSG to its runlist
pub(crate) fn rig(builder: SimGpuBuilder) -> Rig {
    rig_with_config(builder, fast_config())
}

pub(crate) fn rig_with_config(builder: SimGpuBuilder, config: RecoveryConfig) -> Rig {
    gpurc_sim::init_tracing();
    let gpu = builder.build();
    let manager = RecoveryManager::new(gpu.topology().clone(), config, gpu.platform())
        .expect("valid fixture");
    for tsg in gpu.tsgs() {
        manager
            .runlists()
            .bind_tsg(tsg.runlist, tsg.id)
            .expect("runlist enabled at init");
    }
    Rig {
        gpu,
        manager: Arc::new(manager),
    }
}

/// Two runlists: graphics on rl0, one copy engine on rl1
pub(crate) fn two_runlists() -> Topology {
    Topology {
        runlists: vec![
            RunlistInfo {
                id: RunlistId::new(0),
                engines: vec![EngineId::new(0)],
                pbdmas: vec![PbdmaId::new(0)],
            },
            RunlistInfo {
                id: RunlistId::new(1),
                engines: vec![EngineId::new(1)],
                pbdmas: vec![PbdmaId::new(1)],
            },
        ],
        engines: vec![
            EngineInfo {
                id: EngineId::new(0),
                kind: EngineKind::Graphics,
            },
            EngineInfo {
                id: EngineId::new(1),
                kind: EngineKind::Copy { instance: 0 },
            },
        ],
        num_tsgs: 16,
        num_channels: 64,
    }
}
