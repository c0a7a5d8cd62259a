//! End-to-end recovery scenarios against the simulated GPU.

use crate::coordinator::Coordinator;
use crate::error::RecoveryError;
use crate::gate::{FaultDispatcher, InterruptGate};
use crate::phase::RecoveryPhase;
use crate::quiesce::QuiesceLatch;
use crate::request::RecoveryRequest;
use crate::runlist::{RunlistTable, SchedState};
use crate::testing::{fast_config, rig, two_runlists};
use gpurc_core::{
    EngineId, EngineMask, ErrorNotifier, FaultKind, Gfid, MmuFaultInfo, PbdmaId, PbdmaMask,
    PbdmaStatus, RawContext, RunlistId, Topology, TsgId,
};
use gpurc_sim::{reference_topology, FailurePoint, FaultScript, HalCall, HalOp, SimGpu, SimTsg};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn rl(id: u32) -> RunlistId {
    RunlistId::new(id)
}

fn tsg(id: u32) -> TsgId {
    TsgId::new(id)
}

fn eng(id: u32) -> EngineMask {
    EngineMask::single(EngineId::new(id))
}

fn pbdma(id: u32) -> PbdmaMask {
    PbdmaMask::single(PbdmaId::new(id))
}

fn index_of(ops: &[HalOp], op: HalOp) -> usize {
    ops.iter()
        .position(|o| *o == op)
        .unwrap_or_else(|| panic!("{:?} not recorded in {:?}", op, ops))
}

/// Check the ordering rules of one recovery invocation's calls
fn assert_reset_ordering(topology: &Topology, ops: &[HalOp]) {
    for (i, op) in ops.iter().enumerate() {
        let HalOp::EngineReset { engine } = *op else {
            continue;
        };
        let owner = topology.runlist_of_engine(engine).expect("engine has a runlist");
        let disabled_at = ops[..i]
            .iter()
            .rposition(|o| *o == HalOp::RunlistDisable { runlist: owner })
            .unwrap_or_else(|| panic!("{} reset before {} was disabled", engine, owner));
        assert!(
            !ops[disabled_at..i].contains(&HalOp::RunlistEnable { runlist: owner }),
            "{} reset while {} was enabled",
            engine,
            owner
        );
    }
    let last_work = ops.iter().rposition(|o| {
        matches!(
            o,
            HalOp::EngineReset { .. } | HalOp::Abort { .. } | HalOp::TsgDisable { .. }
        )
    });
    let first_enable = ops
        .iter()
        .position(|o| matches!(o, HalOp::RunlistEnable { .. }));
    if let (Some(work), Some(enable)) = (last_work, first_enable) {
        assert!(enable > work, "runlist re-enabled before cleanup finished: {:?}", ops);
    }
}

/// Check that `tsg` was aborted while `runlist` was disabled
fn assert_aborted_under(ops: &[HalOp], runlist: RunlistId, tsg: TsgId) {
    let abort = ops
        .iter()
        .position(|o| matches!(o, HalOp::Abort { tsg: t, .. } if *t == tsg))
        .unwrap_or_else(|| panic!("{} not aborted in {:?}", tsg, ops));
    let disabled_at = ops[..abort]
        .iter()
        .rposition(|o| *o == HalOp::RunlistDisable { runlist })
        .unwrap_or_else(|| panic!("{} aborted before {} was disabled", tsg, runlist));
    assert!(
        !ops[disabled_at..abort].contains(&HalOp::RunlistEnable { runlist }),
        "{} aborted while {} was enabled",
        tsg,
        runlist
    );
    assert!(
        ops[abort..].contains(&HalOp::RunlistEnable { runlist }),
        "{} left disabled after aborting {}",
        runlist,
        tsg
    );
}

#[test]
fn test_mmu_fault_on_named_tsg_resets_and_aborts() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(7, 2).loaded_on(eng(2)).resident_on(pbdma(2)))
        .tsg(SimTsg::new(8, 1).loaded_on(eng(1)).resident_on(pbdma(1))));

    let report = rig
        .manager
        .handle_mmu_fault(eng(2), Some(RawContext::tsg(7)), &MmuFaultInfo::hub(0x1000))
        .unwrap()
        .expect("recovery ran");

    let ops = rig.gpu.log().ops();
    let disable = index_of(&ops, HalOp::RunlistDisable { runlist: rl(2) });
    let reset = index_of(&ops, HalOp::EngineReset { engine: EngineId::new(2) });
    let abort = index_of(&ops, HalOp::Abort { tsg: tsg(7), debug_dump: true });
    let enable = index_of(&ops, HalOp::RunlistEnable { runlist: rl(2) });
    assert!(disable < reset && reset < abort && abort < enable);
    assert!(ops.contains(&HalOp::TsgDisable { tsg: tsg(7) }));
    assert!(!ops.contains(&HalOp::RunlistDisable { runlist: rl(1) }));

    let faulted = rig.gpu.tsg(7).unwrap();
    assert!(faulted.unserviceable);
    assert!(faulted.disabled);
    assert_eq!(faulted.aborts, 1);
    assert_eq!(faulted.notifier, Some(ErrorNotifier::MmuFault));

    let bystander = rig.gpu.tsg(8).unwrap();
    assert_eq!(bystander.aborts, 0);
    assert!(!bystander.unserviceable);

    assert_eq!(report.phase, RecoveryPhase::Done);
    assert_eq!(report.runlists.iter().collect::<Vec<_>>(), vec![rl(2)]);
    assert_eq!(report.engines_reset, eng(2));
    assert_eq!(report.aborted, vec![tsg(7)]);
    let runlists = rig.manager.runlists();
    assert_eq!(runlists.sched_state(rl(2)), Some(SchedState::Enabled));
    assert!(runlists.active_tsgs(rl(2)).is_empty());
    assert_eq!(runlists.active_tsgs(rl(1)), vec![tsg(8)]);
}

#[test]
fn test_shared_pbdma_fault_recovers_tsg_runlist() {
    // pbdma2 serves rl2 and rl3; the faulting TSG lives on rl3
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(9, 3).resident_on(pbdma(2)))
        .tsg(SimTsg::new(7, 2).loaded_on(eng(2))));

    let report = rig
        .manager
        .handle_pbdma_fault(
            PbdmaId::new(2),
            ErrorNotifier::PbdmaError,
            &PbdmaStatus::running(tsg(9)),
        )
        .unwrap()
        .expect("recovery ran");

    assert!(!rig.manager.is_quiesced());
    assert_eq!(report.runlists.iter().collect::<Vec<_>>(), vec![rl(2), rl(3)]);
    assert_eq!(report.aborted, vec![tsg(9)]);
    let ops = rig.gpu.log().ops();
    assert!(ops.contains(&HalOp::Preempt { runlist: rl(3) }));
    assert_aborted_under(&ops, rl(3), tsg(9));
    assert!(!ops.contains(&HalOp::RunlistDisable { runlist: rl(0) }));

    let runlists = rig.manager.runlists();
    assert!(runlists.active_tsgs(rl(3)).is_empty());
    assert_eq!(runlists.active_tsgs(rl(2)), vec![tsg(7)]);
    assert_eq!(rig.gpu.tsg(7).unwrap().aborts, 0);
}

#[test]
fn test_engine_fault_naming_tsg_on_other_runlist() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(9, 3).loaded_on(eng(3)))
        .tsg(SimTsg::new(4, 3).loaded_on(eng(3))));

    let report = rig
        .manager
        .handle_mmu_fault(eng(1), Some(RawContext::tsg(9)), &MmuFaultInfo::hub(0))
        .unwrap()
        .expect("recovery ran");

    assert_eq!(report.runlists.iter().collect::<Vec<_>>(), vec![rl(1), rl(3)]);
    assert_eq!(report.aborted, vec![tsg(9)]);
    let ops = rig.gpu.log().ops();
    assert!(ops.contains(&HalOp::RunlistDisable { runlist: rl(1) }));
    assert!(ops.contains(&HalOp::EngineReset { engine: EngineId::new(1) }));
    assert_aborted_under(&ops, rl(3), tsg(9));
    assert_reset_ordering(rig.gpu.topology(), &ops);
    assert_eq!(rig.manager.runlists().active_tsgs(rl(3)), vec![tsg(4)]);

    // Same shape through the ctxsw path
    rig.gpu.log().clear();
    let report = rig
        .manager
        .recover_ctxsw_timeout(eng(0), Gfid::PF, tsg(4), false)
        .unwrap()
        .expect("recovery ran");
    assert_eq!(report.runlists.iter().collect::<Vec<_>>(), vec![rl(0), rl(3)]);
    let ops = rig.gpu.log().ops();
    assert_aborted_under(&ops, rl(3), tsg(4));
    assert_reset_ordering(rig.gpu.topology(), &ops);
    assert!(rig.manager.runlists().active_tsgs(rl(3)).is_empty());
    assert!(!rig.manager.is_quiesced());
}

#[test]
fn test_deferred_mmu_fault_leaves_engine_for_debugger() {
    let gpu = SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(7, 2).loaded_on(eng(2)).resident_on(pbdma(2)))
        .debugger(true)
        .build();
    let runlists = Arc::new(RunlistTable::new(gpu.topology()));
    runlists.bind_tsg(rl(2), tsg(7)).unwrap();
    let coordinator = Coordinator::new(
        gpu.platform(),
        runlists.clone(),
        &fast_config(),
        Arc::new(QuiesceLatch::new()),
    );
    let request = RecoveryRequest::new(FaultKind::MmuFault)
        .with_runlist(rl(2))
        .with_tsg(tsg(7))
        .with_engines(eng(2))
        .with_notifier(ErrorNotifier::MmuFault)
        .with_defer(true);

    let report = coordinator.recover(&request).unwrap();

    let ops = gpu.log().ops();
    assert!(ops.contains(&HalOp::Preempt { runlist: rl(2) }));
    assert!(!ops.iter().any(|o| matches!(o, HalOp::EngineReset { .. })));
    assert!(!ops.iter().any(|o| matches!(o, HalOp::Abort { .. })));
    assert!(!ops.iter().any(|o| matches!(o, HalOp::SetErrorNotifier { .. })));
    assert!(ops.contains(&HalOp::TsgDisable { tsg: tsg(7) }));
    assert!(ops.contains(&HalOp::WakeWaiters { tsg: tsg(7) }));
    assert!(
        index_of(&ops, HalOp::RunlistDisable { runlist: rl(2) })
            < index_of(&ops, HalOp::RunlistEnable { runlist: rl(2) })
    );
    assert_eq!(report.engines_deferred, eng(2));
    assert!(report.engines_reset.is_empty());
    assert_eq!(coordinator.deferred_engines(tsg(7)), eng(2));
    assert_eq!(runlists.active_tsgs(rl(2)), vec![tsg(7)]);
    assert_eq!(gpu.tsg(7).unwrap().aborts, 0);

    // Context teardown performs the reset under a disabled runlist
    gpu.log().clear();
    assert_eq!(coordinator.drain_deferred_resets(tsg(7)), eng(2));
    assert_eq!(
        gpu.log().ops(),
        vec![
            HalOp::RunlistDisable { runlist: rl(2) },
            HalOp::EngineReset { engine: EngineId::new(2) },
            HalOp::RunlistEnable { runlist: rl(2) },
        ]
    );
    assert!(coordinator.deferred_engines(tsg(7)).is_empty());
    assert!(coordinator.drain_deferred_resets(tsg(7)).is_empty());
}

#[test]
fn test_stuck_pbdma_quiesces_without_reset() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(7, 2).loaded_on(eng(2)).resident_on(pbdma(2)).stuck()));

    let err = rig
        .manager
        .handle_mmu_fault(eng(2), Some(RawContext::tsg(7)), &MmuFaultInfo::hub(0))
        .unwrap_err();

    assert!(matches!(
        err,
        RecoveryError::PbdmaVacateTimeout { runlist, tsg: t, .. } if runlist == rl(2) && t == tsg(7)
    ));
    let ops = rig.gpu.log().ops();
    assert!(rig.gpu.is_quiesced());
    assert!(!ops.iter().any(|o| matches!(o, HalOp::EngineReset { .. })));
    assert!(!ops.contains(&HalOp::RunlistEnable { runlist: rl(2) }));
    assert!(rig.manager.is_quiesced());

    // Locks were released, runlist stays disabled
    assert_eq!(rig.manager.runlists().sched_state(rl(2)), Some(SchedState::Disabled));

    // Nothing touches hardware after a quiesce
    let before = rig.gpu.log().ops().len();
    assert_eq!(
        rig.manager.handle_sched_error_unknown_context(),
        Err(RecoveryError::Quiesced)
    );
    assert_eq!(rig.gpu.log().ops().len(), before);
    assert_eq!(rig.gpu.log().count(|o| *o == HalOp::Quiesce), 1);
}

#[test]
fn test_sched_error_skips_non_abortable() {
    let rig = rig(SimGpu::builder(two_runlists())
        .tsg(SimTsg::new(1, 1))
        .tsg(SimTsg::new(2, 1).with_abortable(false)));

    let report = rig
        .manager
        .handle_sched_error_unknown_context()
        .unwrap()
        .expect("recovery ran");

    let ops = rig.gpu.log().ops();
    for runlist in [rl(0), rl(1)] {
        let disable = index_of(&ops, HalOp::RunlistDisable { runlist });
        let enable = index_of(&ops, HalOp::RunlistEnable { runlist });
        assert!(disable < enable);
    }
    assert!(ops.contains(&HalOp::TsgDisable { tsg: tsg(1) }));
    assert!(ops.contains(&HalOp::RemoveTsg { runlist: rl(1), tsg: tsg(1) }));
    assert!(ops.contains(&HalOp::Abort { tsg: tsg(1), debug_dump: true }));
    assert!(!ops.iter().any(|o| match o {
        HalOp::TsgDisable { tsg: t }
        | HalOp::Abort { tsg: t, .. }
        | HalOp::ClearFaultLatches { tsg: t } => *t == tsg(2),
        _ => false,
    }));
    assert_eq!(report.aborted, vec![tsg(1)]);
    assert_eq!(report.skipped, vec![tsg(2)]);
    assert_eq!(rig.manager.runlists().active_tsgs(rl(1)), vec![tsg(2)]);
}

#[test]
fn test_sched_error_twice_does_not_double_abort() {
    let rig = rig(SimGpu::builder(two_runlists())
        .tsg(SimTsg::new(1, 1))
        .tsg(SimTsg::new(2, 1).with_abortable(false))
        .tsg(SimTsg::new(3, 0)));

    rig.manager.handle_sched_error_unknown_context().unwrap();
    let after_first: Vec<_> = [rl(0), rl(1)]
        .iter()
        .map(|r| rig.manager.runlists().active_tsgs(*r))
        .collect();
    rig.gpu.log().clear();

    rig.manager.handle_sched_error_unknown_context().unwrap();
    let after_second: Vec<_> = [rl(0), rl(1)]
        .iter()
        .map(|r| rig.manager.runlists().active_tsgs(*r))
        .collect();

    assert_eq!(after_first, after_second);
    let ops = rig.gpu.log().ops();
    assert_eq!(ops.iter().filter(|o| matches!(o, HalOp::RunlistDisable { .. })).count(), 2);
    assert_eq!(ops.iter().filter(|o| matches!(o, HalOp::RunlistEnable { .. })).count(), 2);
    assert!(!ops.iter().any(|o| matches!(o, HalOp::Abort { .. })));
    assert_eq!(rig.gpu.tsg(1).unwrap().aborts, 1);
    assert_eq!(rig.gpu.tsg(3).unwrap().aborts, 1);
}

#[test]
fn test_notifier_precedes_unserviceable() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(4, 0).loaded_on(eng(0)).resident_on(pbdma(0)))
        .tsg(SimTsg::new(5, 1).loaded_on(eng(1)).resident_on(pbdma(1)))
        .tsg(SimTsg::new(6, 3).resident_on(pbdma(3))));
    let manager = &rig.manager;

    for id in [4u32, 5, 6] {
        rig.gpu.log().clear();
        let result = match id {
            4 => manager.handle_preempt_timeout(rl(0), tsg(4)),
            5 => manager.handle_ce_fault(0),
            _ => manager.handle_pbdma_fault(
                PbdmaId::new(3),
                ErrorNotifier::PbdmaError,
                &PbdmaStatus::running(tsg(6)),
            ),
        };
        result.unwrap().expect("recovery ran");
        let calls: Vec<HalCall> = rig.gpu.log().calls();
        let notifier = calls
            .iter()
            .find(|c| matches!(c.op, HalOp::SetErrorNotifier { tsg: t, .. } if t == tsg(id)))
            .expect("notifier posted");
        let unserviceable = calls
            .iter()
            .find(|c| matches!(c.op, HalOp::MarkUnserviceable { tsg: t, .. } if t == tsg(id)))
            .expect("marked unserviceable");
        assert!(notifier.seq < unserviceable.seq);
    }
}

#[test]
fn test_best_effort_step_failures_do_not_stop_recovery() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(7, 2).loaded_on(eng(2)))
        .failures(
            gpurc_sim::HalFailures::new()
                .with(FailurePoint::RunlistDisable)
                .with(FailurePoint::Preempt)
                .with(FailurePoint::TsgDisable),
        ));

    let report = rig
        .manager
        .handle_preempt_timeout(rl(2), tsg(7))
        .unwrap()
        .expect("recovery ran");

    assert_eq!(report.phase, RecoveryPhase::Done);
    assert_eq!(report.aborted, vec![tsg(7)]);
    assert!(rig.gpu.log().contains(HalOp::RunlistEnable { runlist: rl(2) }));
    assert!(!rig.manager.is_quiesced());
}

#[test]
fn test_concurrent_faults_recover_one_at_a_time() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(1, 0).loaded_on(eng(0)).resident_on(pbdma(0)))
        .tsg(SimTsg::new(2, 1).loaded_on(eng(1)).resident_on(pbdma(1)))
        .tsg(SimTsg::new(3, 2).loaded_on(eng(2)).resident_on(pbdma(2)))
        .tsg(SimTsg::new(4, 3).loaded_on(eng(3)).resident_on(pbdma(3)))
        .reset_delay(Duration::from_millis(2)));
    let manager = &rig.manager;

    std::thread::scope(|s| {
        s.spawn(|| manager.handle_preempt_timeout(rl(0), tsg(1)).unwrap());
        s.spawn(|| manager.handle_preempt_timeout(rl(1), tsg(2)).unwrap());
        s.spawn(|| manager.handle_sched_error_unknown_context().unwrap());
        s.spawn(|| manager.handle_runlist_update_timeout(rl(3)).unwrap());
    });

    let mut windows: HashMap<std::thread::ThreadId, (u64, u64)> = HashMap::new();
    for call in rig.gpu.log().calls() {
        if matches!(
            call.op,
            HalOp::RunlistDisable { .. } | HalOp::RunlistEnable { .. }
        ) {
            let window = windows.entry(call.thread).or_insert((call.seq, call.seq));
            window.0 = window.0.min(call.seq);
            window.1 = window.1.max(call.seq);
        }
    }
    assert_eq!(windows.len(), 4);
    let mut windows: Vec<_> = windows.into_values().collect();
    windows.sort_unstable();
    for pair in windows.windows(2) {
        assert!(pair[0].1 < pair[1].0, "overlapping recoveries: {:?}", windows);
    }
    assert_eq!(rig.manager.metrics().total_recoveries(), 4);
}

#[test]
fn test_runlist_update_timeout_stays_within_runlist() {
    let rig = rig(SimGpu::builder(reference_topology())
        .tsg(SimTsg::new(1, 3))
        .tsg(SimTsg::new(2, 3).with_abortable(false))
        .tsg(SimTsg::new(3, 0)));

    let report = rig
        .manager
        .handle_runlist_update_timeout(rl(3))
        .unwrap()
        .expect("recovery ran");

    assert_eq!(report.runlists.iter().collect::<Vec<_>>(), vec![rl(3)]);
    assert_eq!(report.aborted, vec![tsg(1)]);
    assert_eq!(report.skipped, vec![tsg(2)]);
    assert_eq!(rig.gpu.tsg(3).unwrap().aborts, 0);
    assert!(!rig.gpu.log().contains(HalOp::RunlistDisable { runlist: rl(0) }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_engine_resets_only_under_disabled_runlists(seed: u64) {
        let mut builder = SimGpu::builder(reference_topology());
        for id in 1..6u32 {
            let runlist = id % 4;
            builder = builder.tsg(SimTsg::new(id, runlist).loaded_on(eng(runlist)));
        }
        let rig = rig(builder);
        let topology = rig.gpu.topology().clone();
        let tsgs: Vec<TsgId> = (1..6).map(TsgId::new).collect();
        let script = FaultScript::generate(seed, &topology, &tsgs, 12);
        let dispatcher = FaultDispatcher::new(
            InterruptGate::new(rig.gpu.platform().intr),
            rig.manager.clone(),
        );

        for signal in script.signals {
            rig.gpu.log().clear();
            let unit = signal.unit;
            dispatcher.gate().pause(unit);
            let _ = dispatcher.service(signal);
            prop_assert!(!rig.manager.is_quiesced());
            prop_assert!(!dispatcher.gate().is_paused(unit));
            let ops = rig.gpu.log().ops();
            assert_reset_ordering(&topology, &ops);
            for op in &ops {
                if let HalOp::Abort { tsg: aborted, .. } = *op {
                    assert_aborted_under(&ops, rl(aborted.as_u32() % 4), aborted);
                }
            }
        }
    }

    #[test]
    fn prop_broadcast_never_touches_non_abortable(abortable in proptest::collection::vec(any::<bool>(), 1..10)) {
        let mut builder = SimGpu::builder(reference_topology());
        for (id, flag) in abortable.iter().enumerate() {
            let id = u32::try_from(id).unwrap();
            builder = builder.tsg(SimTsg::new(id, id % 4).with_abortable(*flag));
        }
        let rig = rig(builder);

        rig.manager.handle_sched_error_unknown_context().unwrap();

        let ops = rig.gpu.log().ops();
        for (id, flag) in abortable.iter().enumerate() {
            let id = u32::try_from(id).unwrap();
            let touched = ops.iter().any(|o| match o {
                HalOp::TsgDisable { tsg: t } | HalOp::Abort { tsg: t, .. } => *t == tsg(id),
                _ => false,
            });
            let bound = rig.manager.runlists().active_tsgs(rl(id % 4)).contains(&tsg(id));
            prop_assert_eq!(touched, *flag);
            prop_assert_eq!(bound, !*flag);
            prop_assert_eq!(rig.gpu.tsg(id).unwrap().aborts, u32::from(*flag));
        }
    }
}
