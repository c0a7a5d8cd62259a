//! Seeded fault streams.
//!
//! A script is a reproducible sequence of well-formed fault signals against a
//! topology and a set of live TSGs. The same seed always yields the same
//! script.

use gpurc_core::{
    EngineKind, EngineMask, ErrorNotifier, MmuFaultInfo, PbdmaStatus, RawContext, Topology,
    TsgId,
};
use gpurc_hal::{FaultPayload, InterruptUnit, RawSignal};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A reproducible sequence of fault signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultScript {
    /// Seed the script was generated from
    pub seed: u64,
    /// Signals in delivery order
    pub signals: Vec<RawSignal>,
}

impl FaultScript {
    /// Generate `count` signals naming only `tsgs`
    ///
    /// Returns an empty script if the topology has no runlists or `tsgs` is
    /// empty.
    #[must_use]
    pub fn generate(seed: u64, topology: &Topology, tsgs: &[TsgId], count: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut signals = Vec::with_capacity(count);
        if topology.runlists.is_empty() || tsgs.is_empty() {
            return Self { seed, signals };
        }
        for _ in 0..count {
            if let Some(signal) = random_signal(&mut rng, topology, tsgs) {
                signals.push(signal);
            }
        }
        Self { seed, signals }
    }

    /// Number of signals
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Check whether the script is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

fn random_signal(rng: &mut ChaCha8Rng, topology: &Topology, tsgs: &[TsgId]) -> Option<RawSignal> {
    let runlist = topology.runlists.choose(rng)?;
    let tsg = *tsgs.choose(rng)?;
    let signal = match rng.gen_range(0..6u32) {
        0 => RawSignal::new(
            InterruptUnit::RunlistTree(runlist.id),
            FaultPayload::SchedError,
        ),
        1 => RawSignal::new(
            InterruptUnit::RunlistTree(runlist.id),
            FaultPayload::PreemptTimeout {
                runlist: runlist.id,
                tsg,
            },
        ),
        2 => {
            let engine = *runlist.engines.choose(rng)?;
            RawSignal::new(
                InterruptUnit::Mmu,
                FaultPayload::MmuFault {
                    engines: EngineMask::single(engine),
                    context: Some(RawContext::tsg(tsg.as_u32())),
                    info: MmuFaultInfo::hub(rng.gen_range(0..1u64 << 40)),
                },
            )
        }
        3 => {
            let pbdma = *runlist.pbdmas.choose(rng)?;
            RawSignal::new(
                InterruptUnit::Pbdma(pbdma),
                FaultPayload::PbdmaFault {
                    pbdma,
                    notifier: ErrorNotifier::PbdmaError,
                    status: PbdmaStatus::running(tsg),
                },
            )
        }
        4 => {
            let instances: Vec<u32> = topology
                .engines
                .iter()
                .filter_map(|e| match e.kind {
                    EngineKind::Copy { instance } => Some(instance),
                    _ => None,
                })
                .collect();
            let instance = *instances.choose(rng)?;
            let engine = topology.engine_of_ce_instance(instance)?;
            RawSignal::new(InterruptUnit::Engine(engine), FaultPayload::CeFault { instance })
        }
        _ => RawSignal::new(
            InterruptUnit::RunlistTree(runlist.id),
            FaultPayload::RunlistUpdateTimeout {
                runlist: runlist.id,
            },
        ),
    };
    Some(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::reference_topology;
    use proptest::prelude::*;

    fn tsgs() -> Vec<TsgId> {
        (1..6).map(TsgId::new).collect()
    }

    #[test]
    fn test_same_seed_same_script() {
        let topology = reference_topology();
        let a = FaultScript::generate(42, &topology, &tsgs(), 32);
        let b = FaultScript::generate(42, &topology, &tsgs(), 32);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_empty_inputs_give_empty_script() {
        let topology = reference_topology();
        assert!(FaultScript::generate(1, &topology, &[], 10).is_empty());
    }

    #[test]
    fn test_script_names_known_units() {
        let topology = reference_topology();
        let script = FaultScript::generate(7, &topology, &tsgs(), 64);
        for signal in &script.signals {
            if let FaultPayload::PreemptTimeout { runlist, tsg } = signal.payload {
                assert!(topology.runlist(runlist).is_some());
                assert!(tsgs().contains(&tsg));
            }
        }
    }

    proptest! {
        #[test]
        fn prop_generate_is_deterministic(seed: u64, count in 0usize..48) {
            let topology = reference_topology();
            let a = FaultScript::generate(seed, &topology, &tsgs(), count);
            let b = FaultScript::generate(seed, &topology, &tsgs(), count);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), count);

            for signal in &a.signals {
                match signal.payload {
                    FaultPayload::PreemptTimeout { runlist, tsg } => {
                        prop_assert!(topology.runlist(runlist).is_some());
                        prop_assert!(tsgs().contains(&tsg));
                    }
                    FaultPayload::RunlistUpdateTimeout { runlist } => {
                        prop_assert!(topology.runlist(runlist).is_some());
                    }
                    FaultPayload::MmuFault { engines, context, .. } => {
                        prop_assert!(topology.runlists_for_engines(engines).is_some());
                        prop_assert!(context.is_some_and(|c| tsgs().contains(&TsgId::new(c.id))));
                    }
                    FaultPayload::PbdmaFault { pbdma, status, .. } => {
                        prop_assert!(topology.runlist_of_pbdma(pbdma).is_some());
                        let tsg = status.loaded_context().map(|(_, id)| TsgId::new(id));
                        prop_assert!(tsg.is_some_and(|t| tsgs().contains(&t)));
                    }
                    FaultPayload::CeFault { instance } => {
                        prop_assert!(topology.engine_of_ce_instance(instance).is_some());
                    }
                    _ => {}
                }
            }
        }
    }
}
