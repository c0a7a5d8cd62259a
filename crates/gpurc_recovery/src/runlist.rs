//! Runlist scheduling state and the runlist locks.
//!
//! Each active runlist carries a lock guarding its scheduling state, the TSGs
//! currently bound to it and the engines latched for reset. Submission takes
//! the same lock, so a runlist that recovery has disabled refuses new work
//! until recovery re-enables it. Recovery takes every runlist lock in
//! ascending id order through [`RunlistTable::lock_all`].

use gpurc_core::{EngineMask, PbdmaMask, RunlistId, RunlistMask, Topology, TsgId};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Scheduling state of a runlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedState {
    /// Hardware schedules the runlist
    Enabled,
    /// Scheduling is stopped, submission must back off
    Disabled,
}

/// Submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Runlist is disabled by recovery; retry later
    #[error("Runlist {0} is disabled")]
    Disabled(RunlistId),
    /// Runlist is not active
    #[error("Unknown runlist {0}")]
    UnknownRunlist(RunlistId),
    /// TSG is already bound to another runlist
    #[error("TSG {tsg} is already bound to runlist {runlist}")]
    AlreadyBound {
        /// TSG being bound
        tsg: TsgId,
        /// Runlist it is bound to
        runlist: RunlistId,
    },
}

/// State guarded by a runlist lock
#[derive(Debug)]
pub struct RunlistState {
    sched: SchedState,
    active: IndexSet<TsgId>,
    reset_engine_mask: EngineMask,
}

impl RunlistState {
    fn new() -> Self {
        Self {
            sched: SchedState::Enabled,
            active: IndexSet::new(),
            reset_engine_mask: EngineMask::empty(),
        }
    }

    /// Scheduling state
    #[must_use]
    pub const fn sched(&self) -> SchedState {
        self.sched
    }

    /// TSGs bound to the runlist, in bind order
    pub fn active_tsgs(&self) -> impl Iterator<Item = TsgId> + '_ {
        self.active.iter().copied()
    }

    /// Check whether `tsg` is bound
    #[must_use]
    pub fn contains(&self, tsg: TsgId) -> bool {
        self.active.contains(&tsg)
    }

    /// Engines latched for reset by the current recovery
    #[must_use]
    pub const fn reset_engine_mask(&self) -> EngineMask {
        self.reset_engine_mask
    }

    pub(crate) fn set_sched(&mut self, sched: SchedState) {
        self.sched = sched;
    }

    pub(crate) fn set_reset_engine_mask(&mut self, engines: EngineMask) {
        self.reset_engine_mask = engines;
    }

    pub(crate) fn unbind(&mut self, tsg: TsgId) -> bool {
        self.active.shift_remove(&tsg)
    }
}

/// One active runlist
#[derive(Debug)]
pub struct Runlist {
    id: RunlistId,
    engines: EngineMask,
    pbdmas: PbdmaMask,
    state: Mutex<RunlistState>,
}

impl Runlist {
    /// Runlist id
    #[must_use]
    pub const fn id(&self) -> RunlistId {
        self.id
    }

    /// Engines scheduled by this runlist
    #[must_use]
    pub const fn engines(&self) -> EngineMask {
        self.engines
    }

    /// PBDMAs fetching for this runlist
    #[must_use]
    pub const fn pbdmas(&self) -> PbdmaMask {
        self.pbdmas
    }

    /// Take the runlist lock
    ///
    /// A poisoned lock is taken anyway: the state it guards is plain
    /// bookkeeping and recovery must still be able to run.
    pub fn lock(&self) -> MutexGuard<'_, RunlistState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// All active runlists, ordered by id
#[derive(Debug)]
pub struct RunlistTable {
    runlists: Vec<Runlist>,
}

impl RunlistTable {
    /// Build the table from the device topology
    #[must_use]
    pub fn new(topology: &Topology) -> Self {
        let mut runlists: Vec<Runlist> = topology
            .runlists
            .iter()
            .map(|info| Runlist {
                id: info.id,
                engines: info.engine_mask(),
                pbdmas: info.pbdma_mask(),
                state: Mutex::new(RunlistState::new()),
            })
            .collect();
        runlists.sort_by_key(Runlist::id);
        Self { runlists }
    }

    /// Look up a runlist
    #[must_use]
    pub fn get(&self, id: RunlistId) -> Option<&Runlist> {
        self.runlists
            .binary_search_by_key(&id, Runlist::id)
            .ok()
            .map(|i| &self.runlists[i])
    }

    /// Ids of all active runlists
    #[must_use]
    pub fn ids(&self) -> RunlistMask {
        self.runlists.iter().map(Runlist::id).collect()
    }

    /// Iterate runlists in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Runlist> {
        self.runlists.iter()
    }

    /// Bind a TSG to a runlist for submission
    ///
    /// A TSG lives on one runlist. Binding it again to the same runlist is a
    /// no-op. Every runlist lock is taken, in the order recovery takes them,
    /// so the check and the insert are atomic against other binds.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Disabled`] while recovery has the runlist
    /// disabled, [`SubmitError::UnknownRunlist`] for an inactive runlist, or
    /// [`SubmitError::AlreadyBound`] if another runlist has the TSG
    pub fn bind_tsg(&self, runlist: RunlistId, tsg: TsgId) -> Result<(), SubmitError> {
        if self.get(runlist).is_none() {
            return Err(SubmitError::UnknownRunlist(runlist));
        }
        let mut locks = self.lock_all();
        if let Some(other) = locks.runlists_holding(tsg).iter().find(|id| *id != runlist) {
            return Err(SubmitError::AlreadyBound { tsg, runlist: other });
        }
        let state = locks
            .state_mut(runlist)
            .ok_or(SubmitError::UnknownRunlist(runlist))?;
        if state.sched == SchedState::Disabled {
            return Err(SubmitError::Disabled(runlist));
        }
        state.active.insert(tsg);
        Ok(())
    }

    /// Unbind a TSG, returning true if it was bound
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::UnknownRunlist`] for an inactive runlist
    pub fn unbind_tsg(&self, runlist: RunlistId, tsg: TsgId) -> Result<bool, SubmitError> {
        let runlist_ref = self.get(runlist).ok_or(SubmitError::UnknownRunlist(runlist))?;
        Ok(runlist_ref.lock().unbind(tsg))
    }

    /// Current scheduling state of a runlist
    #[must_use]
    pub fn sched_state(&self, runlist: RunlistId) -> Option<SchedState> {
        self.get(runlist).map(|r| r.lock().sched())
    }

    /// Snapshot of the TSGs bound to a runlist
    #[must_use]
    pub fn active_tsgs(&self, runlist: RunlistId) -> Vec<TsgId> {
        self.get(runlist)
            .map(|r| r.lock().active_tsgs().collect())
            .unwrap_or_default()
    }

    /// Take every runlist lock in ascending id order
    pub fn lock_all(&self) -> LockSet<'_> {
        let guards = self
            .runlists
            .iter()
            .map(|runlist| (runlist.id, (runlist, runlist.lock())))
            .collect();
        LockSet { guards }
    }
}

/// Held runlist locks, in ascending id order
pub struct LockSet<'a> {
    guards: IndexMap<RunlistId, (&'a Runlist, MutexGuard<'a, RunlistState>)>,
}

impl<'a> LockSet<'a> {
    /// Runlists whose locks are held
    #[must_use]
    pub fn mask(&self) -> RunlistMask {
        self.guards.keys().copied().collect()
    }

    /// Check whether a runlist's lock is held
    #[must_use]
    pub fn holds(&self, runlist: RunlistId) -> bool {
        self.guards.contains_key(&runlist)
    }

    /// Held runlists that have `tsg` bound
    #[must_use]
    pub fn runlists_holding(&self, tsg: TsgId) -> RunlistMask {
        self.guards
            .iter()
            .filter(|(_, (_, state))| state.contains(tsg))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Release every lock outside `keep`
    pub fn retain(&mut self, keep: RunlistMask) {
        self.guards.retain(|id, _| keep.contains(*id));
    }

    /// State of a held runlist
    pub fn state_mut(&mut self, runlist: RunlistId) -> Option<&mut RunlistState> {
        self.guards.get_mut(&runlist).map(|(_, guard)| &mut **guard)
    }

    /// Iterate held runlists and their state
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&'a Runlist, &mut RunlistState)> + '_ {
        self.guards
            .values_mut()
            .map(|(runlist, guard)| (*runlist, &mut **guard))
    }
}

impl std::fmt::Debug for LockSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSet").field("held", &self.mask()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpurc_core::{EngineId, EngineInfo, EngineKind, PbdmaId, RunlistInfo};

    fn table() -> RunlistTable {
        let topology = Topology {
            runlists: vec![
                RunlistInfo {
                    id: RunlistId::new(3),
                    engines: vec![EngineId::new(1)],
                    pbdmas: vec![PbdmaId::new(1)],
                },
                RunlistInfo {
                    id: RunlistId::new(0),
                    engines: vec![EngineId::new(0)],
                    pbdmas: vec![PbdmaId::new(0)],
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
        };
        RunlistTable::new(&topology)
    }

    #[test]
    fn test_table_sorted_by_id() {
        let table = table();
        let ids: Vec<u32> = table.iter().map(|r| r.id().as_u32()).collect();
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(table.ids().bits(), 0b1001);
        assert!(table.get(RunlistId::new(1)).is_none());
        assert_eq!(
            table.get(RunlistId::new(3)).map(Runlist::engines),
            Some(EngineMask::single(EngineId::new(1)))
        );
    }

    #[test]
    fn test_bind_refused_while_disabled() {
        let table = table();
        let rl = RunlistId::new(0);
        table.bind_tsg(rl, TsgId::new(2)).unwrap();

        table.get(rl).unwrap().lock().set_sched(SchedState::Disabled);
        assert_eq!(table.bind_tsg(rl, TsgId::new(5)), Err(SubmitError::Disabled(rl)));

        table.get(rl).unwrap().lock().set_sched(SchedState::Enabled);
        table.bind_tsg(rl, TsgId::new(5)).unwrap();
        assert_eq!(table.active_tsgs(rl), vec![TsgId::new(2), TsgId::new(5)]);
    }

    #[test]
    fn test_unbind() {
        let table = table();
        let rl = RunlistId::new(3);
        table.bind_tsg(rl, TsgId::new(1)).unwrap();
        assert_eq!(table.unbind_tsg(rl, TsgId::new(1)), Ok(true));
        assert_eq!(table.unbind_tsg(rl, TsgId::new(1)), Ok(false));
        assert_eq!(
            table.unbind_tsg(RunlistId::new(9), TsgId::new(1)),
            Err(SubmitError::UnknownRunlist(RunlistId::new(9)))
        );
    }

    #[test]
    fn test_lock_set_retain_releases_others() {
        let table = table();
        let mut locks = table.lock_all();
        assert_eq!(locks.mask().bits(), 0b1001);
        locks.retain(RunlistMask::single(RunlistId::new(3)));
        assert!(locks.holds(RunlistId::new(3)));
        assert!(!locks.holds(RunlistId::new(0)));

        // Released lock is free again
        assert_eq!(table.sched_state(RunlistId::new(0)), Some(SchedState::Enabled));
        drop(locks);
    }

    #[test]
    fn test_tsg_binds_to_one_runlist() {
        let table = table();
        let tsg = TsgId::new(5);
        table.bind_tsg(RunlistId::new(0), tsg).unwrap();
        assert_eq!(
            table.bind_tsg(RunlistId::new(3), tsg),
            Err(SubmitError::AlreadyBound {
                tsg,
                runlist: RunlistId::new(0)
            })
        );
        assert!(table.active_tsgs(RunlistId::new(3)).is_empty());

        // Rebinding to the owner is fine, and moving needs an unbind first
        table.bind_tsg(RunlistId::new(0), tsg).unwrap();
        assert_eq!(table.active_tsgs(RunlistId::new(0)), vec![tsg]);
        table.unbind_tsg(RunlistId::new(0), tsg).unwrap();
        table.bind_tsg(RunlistId::new(3), tsg).unwrap();
        assert_eq!(table.active_tsgs(RunlistId::new(3)), vec![tsg]);
    }
}
