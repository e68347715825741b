use super::*;
use std::sync::atomic::Ordering;

/// Snapshot of where the buffers of a pool are.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub free: usize,
    pub ready: usize,
    pub held_by_producer: usize,
    pub held_by_consumer: usize,
}

impl PoolCounts {
    pub fn held(&self) -> usize {
        self.held_by_producer + self.held_by_consumer
    }

    /// Every buffer is in exactly one place.
    pub fn is_consistent(&self) -> bool {
        self.free + self.ready + self.held() == self.total
    }
}

/// Read-only accessors for monitoring and tests.
impl BufferPool {
    /// Random identity stamped on every buffer of this pool.
    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Capacity of each buffer, in words.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counts taken under the pool lock, so they always add up.
    pub fn counts(&self) -> PoolCounts {
        let state = self.lock_state();
        PoolCounts {
            total: self.total,
            free: state.free.len(),
            ready: state.ready.len(),
            held_by_producer: state.held_by_producer,
            held_by_consumer: state.held_by_consumer,
        }
    }

    pub fn free_count(&self) -> usize {
        self.lock_state().free.len()
    }

    pub fn ready_count(&self) -> usize {
        self.lock_state().ready.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.lock_state().intake_open
    }

    pub fn waiting_producers(&self) -> usize {
        self.lock_state().waiting_producers
    }

    /// Number of `acquire_free` calls that found the free queue empty.
    pub fn starvation_waits(&self) -> u64 {
        self.starvation_waits.load(Ordering::Relaxed)
    }

    /// Number of buffers returned with `free`.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}
