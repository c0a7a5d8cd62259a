//! Collaborator traits driven by the recovery core.
//!
//! Steps that only poke registers return [`HalResult`] so failures can be
//! logged; physical engine reset and context abort have no software-visible
//! failure mode and return nothing.

use crate::error::HalResult;
use gpurc_core::{
    ChannelId, EngineId, EngineMask, ErrorNotifier, Gfid, PbdmaId, RunlistId, TsgId,
};

/// Per-runlist scheduling control
pub trait RunlistOps: Send + Sync {
    /// Stop the hardware scheduler from picking work off the runlist
    fn disable(&self, runlist: RunlistId) -> HalResult<()>;

    /// Let the hardware scheduler pick work off the runlist again
    fn enable(&self, runlist: RunlistId) -> HalResult<()>;

    /// Ask hardware to vacate in-flight work of the runlist
    fn preempt(&self, runlist: RunlistId) -> HalResult<()>;

    /// Engines hardware latched as needing reset after preemption
    fn reset_engine_mask(&self, runlist: RunlistId) -> EngineMask;

    /// Drop a TSG from the committed runlist without waiting for acknowledgement
    fn remove_tsg(&self, runlist: RunlistId, tsg: TsgId) -> HalResult<()>;
}

/// Engine reset sequencing
pub trait EngineOps: Send + Sync {
    /// Physically reset an engine
    fn reset(&self, engine: EngineId);
}

/// TSG bookkeeping and error delivery
pub trait ContextOps: Send + Sync {
    /// Stop the TSG's channels from being scheduled
    fn disable(&self, tsg: TsgId) -> HalResult<()>;

    /// Clear the TSG's faulted engine and PBDMA latch bits
    fn clear_fault_latches(&self, tsg: TsgId) -> HalResult<()>;

    /// Abort all work of the TSG
    fn abort(&self, tsg: TsgId, debug_dump: bool);

    /// Refuse further submissions to the TSG
    fn mark_unserviceable(&self, gfid: Gfid, tsg: TsgId);

    /// Post an error code to the TSG's error notifier
    fn set_error_notifier(&self, gfid: Gfid, tsg: TsgId, code: ErrorNotifier);

    /// Wake threads waiting on the TSG's work
    fn wake_waiters(&self, tsg: TsgId);

    /// Whether the TSG may be aborted by a broadcast recovery
    fn is_abortable(&self, tsg: TsgId) -> bool;

    /// TSG owning a channel, if the channel is bound
    fn tsg_of_channel(&self, channel: ChannelId) -> Option<TsgId>;

    /// TSG currently bound to an engine, if any
    fn tsg_on_engine(&self, engine: EngineId) -> Option<TsgId>;

    /// Runlist the TSG was created on, if the TSG exists
    fn runlist_of_tsg(&self, tsg: TsgId) -> Option<RunlistId>;

    /// Whether the TSG made forward progress since the last call
    ///
    /// Implementations clear their progress latch on every call.
    fn take_progress(&self, tsg: TsgId) -> bool;
}

/// PBDMA residency queries
pub trait PbdmaOps: Send + Sync {
    /// Whether `tsg` is still loaded on `pbdma`
    fn is_tsg_resident(&self, pbdma: PbdmaId, tsg: TsgId) -> bool;
}

/// Device-wide state
pub trait DeviceOps: Send + Sync {
    /// Irreversibly stop all further scheduling on the device
    fn quiesce(&self);

    /// Whether a debugger or profiler session is attached
    fn debugger_attached(&self) -> bool;

    /// Whether MMU debug mode is enabled
    fn mmu_debug_mode_enabled(&self) -> bool;
}
