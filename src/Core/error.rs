//! Error taxonomy for the acquisition pipeline.
//!
//! Two families live here. Lifecycle and configuration failures
//! ([`PipelineError`]) propagate to the run-control caller and abort the
//! transition that raised them. Per-event conditions ([`TransferError`],
//! [`FaultKind`]) are plain values recorded on the assembled event; they never
//! unwind the trigger path.

use thiserror::Error;

use crate::Event::Buffer::EventBuffer;
use crate::Event::Structs::Owner;
use crate::Pipeline::RunState;

/// Convenience alias for results using the pipeline error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Unable to decode configuration: {0}")]
    ConfigDecode(#[from] toml::de::Error),

    #[error("Unable to encode configuration: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot {action} while the pipeline is {state}")]
    InvalidTransition { action: &'static str, state: RunState },

    #[error("Source '{name}' is configured but no device is attached")]
    SourceNotAttached { name: String },

    #[error("Source '{name}' failed its presence check: {reason}")]
    SourceAbsent { name: String, reason: String },

    #[error("Trigger mode is poll but no trigger source is attached")]
    MissingTriggerSource,

    #[error("Trigger source failed its presence check: {0}")]
    TriggerAbsent(String),

    #[error("Lost connection to the trigger source: {0}")]
    TriggerLost(String),

    #[error("Trigger polling thread panicked")]
    TriggerThreadPanicked,

    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Misuse of the buffer pool ownership protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Buffer belongs to pool {found:#018x}, not to this pool ({expected:#018x})")]
    ForeignBuffer { expected: u64, found: u64 },

    #[error("Buffer slot {slot} does not exist (pool has {total} buffers)")]
    UnknownSlot { slot: usize, total: usize },

    #[error("Buffer slot {slot} carries lease {lease}, the pool expects lease {expected}")]
    StaleLease { slot: usize, lease: u64, expected: u64 },

    #[error("Buffer slot {slot} is {owner}, which does not allow this operation")]
    NotHeld { slot: usize, owner: Owner },
}

/// A buffer the pool refused to take back, returned to the caller together
/// with the reason so that no buffer is ever lost on a rejected call.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Rejected {
    pub error: PoolError,
    pub buffer: EventBuffer,
}

/// Classification of a failed or short block transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("bus timeout")]
    BusTimeout,

    #[error("partial transfer")]
    PartialTransfer,

    #[error("block larger than the transfer limit")]
    Overflow,

    #[error("device error: {0}")]
    Device(String),
}

/// Failure reported by a trigger source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerLinkError {
    #[error("trigger interface not found: {0}")]
    NotFound(String),

    #[error("trigger link lost: {0}")]
    LinkLost(String),
}

/// Why a source's segment in an event is incomplete or missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    #[error("not ready after {attempts} poll attempts")]
    ReadinessTimeout { attempts: u32 },

    #[error("transfer failed after {words} words: {error}")]
    Transfer { error: TransferError, words: usize },

    #[error("event buffer full, {words} payload words kept")]
    BufferOverflow { words: usize },
}
