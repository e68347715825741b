use std::fmt;
use crate::Core::pool::BufferPool;
use crate::Event::Buffer::EventBuffer;
use crate::Pipeline::TriggerCoordinator;

/// Debug function for BufferPool
///
/// Shows the pool identity, geometry and a consistent snapshot of where the
/// buffers are. Buffer contents are never dumped.
pub fn debug_buffer_pool(pool: &BufferPool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BufferPool")
        .field("pool_id", &format_args!("{:#018x}", pool.pool_id()))
        .field("capacity_words", &pool.capacity())
        .field("counts", &pool.counts())
        .field("starvation_waits", &pool.starvation_waits())
        .field("released", &pool.released())
        .finish()
}

/// Debug function for EventBuffer
///
/// Metadata only; use `words()` or `segments()` for the content.
pub fn debug_event_buffer(buffer: &EventBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventBuffer")
        .field("slot", &buffer.slot())
        .field("event_id", &buffer.event_id())
        .field("owner", &buffer.owner())
        .field("lease", &buffer.generation())
        .field("length", &format_args!("{}/{}", buffer.len(), buffer.capacity()))
        .field("segments", &buffer.segment_count())
        .field("overflow", &buffer.overflow())
        .field("faults", &buffer.faults().len())
        .finish()
}

// The source set is locked by the trigger path while filling, so it is left out
pub fn debug_trigger_coordinator(coordinator: &TriggerCoordinator, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TriggerCoordinator")
        .field("phase", &coordinator.phase())
        .field("policy", &coordinator.policy())
        .field("free_wait_timeout", &coordinator.free_wait_timeout())
        .field("pool", coordinator.pool())
        .field("stats", &coordinator.stats())
        .field("fault", &coordinator.fault())
        .finish_non_exhaustive()
}
