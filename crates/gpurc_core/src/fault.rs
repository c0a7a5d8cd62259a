//! Fault kinds, fault payloads and error-notifier codes.

use crate::id::TsgId;
use serde::{Deserialize, Serialize};

/// Kind of hardware fault that started a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// MMU fault raised by an engine or PBDMA
    MmuFault,
    /// Context switch did not complete in time
    CtxswTimeout,
    /// Pushbuffer DMA unit raised an error
    PbdmaFault,
    /// Copy engine launch error
    CeFault,
    /// Scheduler error that names no context
    SchedError,
    /// TSG preemption did not complete in time
    PreemptTimeout,
    /// Runlist update was not acknowledged in time
    RunlistUpdateTimeout,
}

impl FaultKind {
    /// All fault kinds, in reporting order
    pub const ALL: [Self; 7] = [
        Self::MmuFault,
        Self::CtxswTimeout,
        Self::PbdmaFault,
        Self::CeFault,
        Self::SchedError,
        Self::PreemptTimeout,
        Self::RunlistUpdateTimeout,
    ];

    /// Short name used in logs and metrics
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MmuFault => "mmu_fault",
            Self::CtxswTimeout => "ctxsw_timeout",
            Self::PbdmaFault => "pbdma_fault",
            Self::CeFault => "ce_fault",
            Self::SchedError => "sched_error",
            Self::PreemptTimeout => "preempt_timeout",
            Self::RunlistUpdateTimeout => "runlist_update_timeout",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a faulting context was identified by hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// The id is a TSG id
    Tsg,
    /// The id is a channel id; its TSG must be looked up
    Channel,
}

impl ContextKind {
    /// Decode the hardware id-type field (0 = channel, 1 = TSG)
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Channel),
            1 => Some(Self::Tsg),
            _ => None,
        }
    }
}

/// Context id exactly as hardware reported it, before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawContext {
    /// Raw id-type field
    pub kind: u32,
    /// Raw id
    pub id: u32,
}

impl RawContext {
    /// A TSG context
    #[must_use]
    pub const fn tsg(id: u32) -> Self {
        Self { kind: 1, id }
    }

    /// A channel context
    #[must_use]
    pub const fn channel(id: u32) -> Self {
        Self { kind: 0, id }
    }

    /// Decode the id-type field
    #[must_use]
    pub const fn decode_kind(&self) -> Option<ContextKind> {
        ContextKind::from_raw(self.kind)
    }
}

/// Error code delivered to user space through a context's error notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorNotifier {
    /// Work stopped making progress (ctxsw or preempt timeout)
    IdleTimeout,
    /// MMU fault
    MmuFault,
    /// PBDMA error
    PbdmaError,
    /// Copy engine error
    CeError,
    /// Channel failed reset verification
    ResetChannelVerifError,
    /// Pushbuffer CRC mismatch
    PbdmaPushbufferCrcMismatch,
}

impl ErrorNotifier {
    /// Numeric code written to the notifier
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::IdleTimeout => 8,
            Self::MmuFault => 31,
            Self::PbdmaError => 32,
            Self::CeError => 34,
            Self::ResetChannelVerifError => 43,
            Self::PbdmaPushbufferCrcMismatch => 80,
        }
    }

    /// Decode a numeric notifier code
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            8 => Some(Self::IdleTimeout),
            31 => Some(Self::MmuFault),
            32 => Some(Self::PbdmaError),
            34 => Some(Self::CeError),
            43 => Some(Self::ResetChannelVerifError),
            80 => Some(Self::PbdmaPushbufferCrcMismatch),
            _ => None,
        }
    }
}

/// Which MMU client raised a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MmuClient {
    /// A GPC unit (shader/texture path)
    Gpc,
    /// A hub client (copy engines, host, ...)
    Hub,
}

/// Decoded MMU fault information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmuFaultInfo {
    /// Faulting virtual address
    pub address: u64,
    /// Client that raised the fault
    pub client: MmuClient,
    /// Fault raised by recovery itself while tearing work down
    pub fake: bool,
}

impl MmuFaultInfo {
    /// Create fault info for a GPC-client fault
    #[must_use]
    pub fn gpc(address: u64) -> Self {
        Self {
            address,
            client: MmuClient::Gpc,
            fake: false,
        }
    }

    /// Create fault info for a hub-client fault
    #[must_use]
    pub fn hub(address: u64) -> Self {
        Self {
            address,
            client: MmuClient::Hub,
            fake: false,
        }
    }

    /// Mark the fault as raised by recovery itself
    #[must_use]
    pub fn as_fake(mut self) -> Self {
        self.fake = true;
        self
    }
}

/// Channel status field of a PBDMA status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanStatus {
    /// Nothing loaded
    Invalid,
    /// A context is loaded and running
    Valid,
    /// Context switch in progress, saving the current context
    ChswSave,
    /// Context switch in progress, loading the next context
    ChswLoad,
    /// Context switch in progress, switching between two contexts
    ChswSwitch,
}

/// Snapshot of a PBDMA status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbdmaStatus {
    /// Channel status
    pub chan_status: ChanStatus,
    /// Current context id
    pub id: u32,
    /// Kind of the current context id
    pub id_kind: ContextKind,
    /// Next context id (during a context switch)
    pub next_id: u32,
    /// Kind of the next context id
    pub next_id_kind: ContextKind,
}

impl PbdmaStatus {
    /// Status of an idle PBDMA
    #[must_use]
    pub fn idle() -> Self {
        Self {
            chan_status: ChanStatus::Invalid,
            id: 0,
            id_kind: ContextKind::Tsg,
            next_id: 0,
            next_id_kind: ContextKind::Tsg,
        }
    }

    /// Status of a PBDMA running `tsg`
    #[must_use]
    pub fn running(tsg: TsgId) -> Self {
        Self {
            chan_status: ChanStatus::Valid,
            id: tsg.as_u32(),
            id_kind: ContextKind::Tsg,
            next_id: 0,
            next_id_kind: ContextKind::Tsg,
        }
    }

    /// The context the fault should be charged to
    ///
    /// Valid and save states charge the current context; load and switch
    /// states charge the incoming one. An invalid status means nothing is
    /// loaded and yields `None`.
    #[must_use]
    pub fn loaded_context(&self) -> Option<(ContextKind, u32)> {
        match self.chan_status {
            ChanStatus::Invalid => None,
            ChanStatus::Valid | ChanStatus::ChswSave => Some((self.id_kind, self.id)),
            ChanStatus::ChswLoad | ChanStatus::ChswSwitch => {
                Some((self.next_id_kind, self.next_id))
            }
        }
    }
}
