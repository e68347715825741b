//! Event acquisition core for a VME readout controller.
//!
//! A hardware trigger pulls one event's worth of data blocks from the
//! configured readout modules into a pre-allocated event buffer, the filled
//! buffer is queued for the downstream consumer, and the consumer hands the
//! buffer back once it has been forwarded. When every buffer is out, the
//! producer blocks (or drops and counts, depending on configuration) until
//! one comes back.
//!
//! Module naming follows project convention (capitalised module groups).
#[macro_use]
extern crate log;

#[allow(non_snake_case)]
pub mod Core {
    pub mod config;
    pub mod error;
    pub mod pool;
    pub use config::{PipelineConfig, SourceConfig, StarvationPolicy, TriggerMode};
    pub use error::{FaultKind, PipelineError, PipelineResult, PoolError, Rejected, TransferError,
        TriggerLinkError};
    pub use pool::{Acquire, BufferPool, PoolCounts};
}

#[allow(non_snake_case)]
pub mod Event {
    pub mod Buffer {
        pub mod Buffer;
        pub mod Buffer_impl;
        pub mod layout;
        pub use Buffer::EventBuffer; // re-export for stable path
        pub use Buffer_impl::SegmentWriter;
        pub use layout::{SegmentHeader, SegmentIter, SegmentView, SEGMENT_HEADER_WORDS};
    }
    pub mod Structs {
        pub mod Buffer_Structs;
        pub use Buffer_Structs::{BufferMeta, Owner, SourceFault}; // re-export for stable path
    }
    pub mod assembler;
    pub mod sim;
    pub mod source;
    pub use assembler::{AssemblyOutcome, EventAssembler};
    pub use source::{BlockRead, ReadinessMask, Source, SourceSet};
}

#[allow(non_snake_case)]
pub mod Pipeline;

#[allow(non_snake_case)]
mod Debug {
    pub mod StructDebug;
}
