//! Core error types for GPURC.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Topology or config could not be decoded
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// An id does not fit in a 64-entry membership set
    IdOutOfRange {
        /// Kind of id (engine, pbdma, runlist)
        kind: String,
        /// Offending raw id
        id: u32,
    },

    /// An engine is claimed by more than one runlist
    EngineShared {
        /// Engine id
        engine: u32,
        /// First owning runlist
        first: u32,
        /// Second owning runlist
        second: u32,
    },

    /// A runlist names an engine the topology does not describe
    UnknownEngine {
        /// Engine id
        engine: u32,
    },

    /// Not found
    NotFound {
        /// Kind of entity
        kind: String,
        /// Entity id
        id: String,
    },

    /// Already exists
    AlreadyExists {
        /// Kind of entity
        kind: String,
        /// Entity id
        id: String,
    },

    /// Validation error
    Validation {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding { reason } => write!(f, "Invalid encoding: {}", reason),
            Self::IdOutOfRange { kind, id } => {
                write!(f, "{} id {} does not fit in a 64-entry mask", kind, id)
            }
            Self::EngineShared {
                engine,
                first,
                second,
            } => write!(
                f,
                "Engine {} belongs to runlists {} and {}",
                engine, first, second
            ),
            Self::UnknownEngine { engine } => write!(f, "Unknown engine: {}", engine),
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
