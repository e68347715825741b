// This is the fixed-capacity event buffer handed around by the buffer pool

use crate::Event::Structs::Buffer_Structs::{BufferMeta, SourceFault};

/// One pre-allocated event buffer.
///
/// Buffers are created once by the pool and reused for the lifetime of the
/// pipeline. A buffer is moved, never copied, between the free queue, the
/// producer, the ready queue and the consumer, so at any time exactly one of
/// them owns it.
///
/// ### Content layout:
/// The words up to `meta.length` are an ordered sequence of segments, each a
/// two word header (tag, payload length) followed by the payload. See
/// [`super::layout`].
pub struct EventBuffer {
    /// Identity of the pool this buffer was allocated by.
    pub(crate) pool_id: u64,

    /// Index of the buffer within its pool.
    pub(crate) slot: usize,

    /// Event metadata (event id, length, owner, overflow, lease).
    pub(crate) meta: BufferMeta,

    /// Per-source faults of the current event.
    pub(crate) faults: Vec<SourceFault>,

    /// Backing storage; its length is the buffer capacity.
    pub(crate) words: Box<[u32]>,
}
