// Per-buffer bookkeeping that travels with an event buffer between the pool,
// the producer and the consumer.

use std::fmt;

use crate::Core::error::FaultKind;

/// Who currently owns an event buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Owner {
    /// Parked in the free queue.
    #[default]
    Free,
    /// Taken by the trigger producer and being filled.
    Producer,
    /// Parked in the ready queue, waiting for the consumer.
    Ready,
    /// Taken by the consumer.
    Consumer,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Owner::Free => "free",
            Owner::Producer => "held by the producer",
            Owner::Ready => "queued for the consumer",
            Owner::Consumer => "held by the consumer",
        };
        write!(f, "{}", repr)
    }
}

/// Metadata of the event currently stored in a buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferMeta {
    /// Trigger sequence id of the event.
    pub event_id: u64,
    /// Words written, headers included.
    pub length: usize,
    pub owner: Owner,
    /// Set when a source's data did not fit into the buffer.
    pub overflow: bool,
    /// Lease number; bumped every time the buffer leaves the free queue.
    pub generation: u64,
    /// Number of segments written.
    pub segments: usize,
}

/// A fault recorded against one source while assembling an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFault {
    /// Position of the source in readout order.
    pub index: usize,
    /// Segment tag of the source.
    pub tag: u32,
    pub kind: FaultKind,
}

impl fmt::Display for SourceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source #{} (tag {}): {}", self.index, self.tag, self.kind)
    }
}
