use crate::Core::error::{PipelineError, PipelineResult, PoolError, Rejected};
use crate::Event::Buffer::{EventBuffer, SEGMENT_HEADER_WORDS};
use crate::Event::Structs::Owner;
use crossbeam_utils::CachePadded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
mod debug;
mod getters;

pub use getters::PoolCounts;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Result of waiting for a free buffer.
#[derive(Debug)]
pub enum Acquire {
    Acquired(EventBuffer),
    /// No buffer came back within the timeout.
    TimedOut,
    /// The wait was cancelled by [`BufferPool::interrupt_waiters`].
    Interrupted,
}

impl Acquire {
    pub fn into_buffer(self) -> Option<EventBuffer> {
        match self {
            Acquire::Acquired(buffer) => Some(buffer),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct SlotState {
    owner: Owner,
    lease: u64,
}

struct PoolState {
    free: VecDeque<EventBuffer>,
    ready: VecDeque<EventBuffer>,
    slots: Vec<SlotState>,
    held_by_producer: usize,
    held_by_consumer: usize,
    /// Producers currently inside a trigger.
    in_flight: usize,
    /// Producers blocked on an empty free queue.
    waiting_producers: usize,
    intake_open: bool,
    interrupted: bool,
}

impl PoolState {
    fn set_owner(&mut self, buffer: &mut EventBuffer, owner: Owner) {
        match self.slots[buffer.slot].owner {
            Owner::Producer => self.held_by_producer -= 1,
            Owner::Consumer => self.held_by_consumer -= 1,
            Owner::Free | Owner::Ready => {}
        }
        match owner {
            Owner::Producer => self.held_by_producer += 1,
            Owner::Consumer => self.held_by_consumer += 1,
            Owner::Free | Owner::Ready => {}
        }
        self.slots[buffer.slot].owner = owner;
        buffer.meta.owner = owner;
    }

    fn is_quiescent(&self) -> bool {
        self.in_flight == 0 && self.ready.is_empty() && self.held_by_consumer == 0
    }
}

/// Fixed set of pre-allocated event buffers split between a free queue and a
/// ready queue.
///
/// Buffers move by value: the producer takes one from the free queue, fills
/// it and publishes it to the ready queue; the consumer takes it from there
/// and frees it. One lock protects both queues together with the ownership
/// table, so `free + ready + held == total` holds in every snapshot.
///
/// Every blocking call waits on a condition variable with a bound.
pub struct BufferPool {
    pool_id: u64,
    total: usize,
    capacity: usize,
    state: Mutex<PoolState>,
    /// Signalled when a buffer is freed and a producer is waiting.
    free_signal: Condvar,
    /// Signalled when a buffer is published.
    ready_signal: Condvar,
    /// Signalled when the pipeline may have become quiescent.
    idle_signal: Condvar,
    starvation_waits: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

impl BufferPool {
    /// Allocate `total` buffers of `capacity` words each.
    pub fn new(total: usize, capacity: usize) -> PipelineResult<Self> {
        if total == 0 {
            return Err(PipelineError::Configuration(
                "a buffer pool needs at least one buffer".to_string(),
            ));
        }
        if capacity < SEGMENT_HEADER_WORDS {
            return Err(PipelineError::Configuration(format!(
                "buffer capacity {} is smaller than a segment header",
                capacity
            )));
        }

        let pool_id = fastrand::u64(..);
        let free = (0..total)
            .map(|slot| EventBuffer::new(pool_id, slot, capacity))
            .collect();
        let slots = vec![
            SlotState {
                owner: Owner::Free,
                lease: 0,
            };
            total
        ];
        debug!(
            "Allocated buffer pool {:#018x}: {} buffers of {} words",
            pool_id, total, capacity
        );

        Ok(Self {
            pool_id,
            total,
            capacity,
            state: Mutex::new(PoolState {
                free,
                ready: VecDeque::with_capacity(total),
                slots,
                held_by_producer: 0,
                held_by_consumer: 0,
                in_flight: 0,
                waiting_producers: 0,
                intake_open: false,
                interrupted: false,
            }),
            free_signal: Condvar::new(),
            ready_signal: Condvar::new(),
            idle_signal: Condvar::new(),
            starvation_waits: CachePadded::new(AtomicU64::new(0)),
            released: CachePadded::new(AtomicU64::new(0)),
        })
    }

    fn verify(&self, state: &PoolState, buffer: &EventBuffer, allowed: &[Owner]) -> Result<(), PoolError> {
        if buffer.pool_id != self.pool_id {
            return Err(PoolError::ForeignBuffer {
                expected: self.pool_id,
                found: buffer.pool_id,
            });
        }
        let Some(slot) = state.slots.get(buffer.slot) else {
            return Err(PoolError::UnknownSlot {
                slot: buffer.slot,
                total: self.total,
            });
        };
        if buffer.meta.generation != slot.lease {
            return Err(PoolError::StaleLease {
                slot: buffer.slot,
                lease: buffer.meta.generation,
                expected: slot.lease,
            });
        }
        if !allowed.contains(&slot.owner) || buffer.meta.owner != slot.owner {
            return Err(PoolError::NotHeld {
                slot: buffer.slot,
                owner: slot.owner,
            });
        }
        Ok(())
    }

    fn take_free(state: &mut PoolState) -> Option<EventBuffer> {
        let mut buffer = state.free.pop_front()?;
        let slot = &mut state.slots[buffer.slot];
        slot.lease += 1;
        buffer.meta.generation = slot.lease;
        state.set_owner(&mut buffer, Owner::Producer);
        Some(buffer)
    }

    fn take_ready(state: &mut PoolState) -> Option<EventBuffer> {
        let mut buffer = state.ready.pop_front()?;
        state.set_owner(&mut buffer, Owner::Consumer);
        Some(buffer)
    }

    /// Take a free buffer without waiting.
    pub fn try_acquire_free(&self) -> Option<EventBuffer> {
        Self::take_free(&mut self.state.lock())
    }

    /// Take a free buffer, waiting up to `timeout` for one to be released.
    ///
    /// Every call that has to wait is counted as a starvation wait.
    pub fn acquire_free(&self, timeout: Duration) -> Acquire {
        let mut state = self.state.lock();
        if let Some(buffer) = Self::take_free(&mut state) {
            return Acquire::Acquired(buffer);
        }
        if state.interrupted {
            return Acquire::Interrupted;
        }

        self.starvation_waits.fetch_add(1, Ordering::Relaxed);
        state.waiting_producers += 1;
        self.free_signal.wait_while_for(
            &mut state,
            |s| s.free.is_empty() && !s.interrupted,
            timeout,
        );
        state.waiting_producers -= 1;

        if state.interrupted {
            return Acquire::Interrupted;
        }
        match Self::take_free(&mut state) {
            Some(buffer) => Acquire::Acquired(buffer),
            None => Acquire::TimedOut,
        }
    }

    /// Queue a filled buffer for the consumer.
    ///
    /// The buffer must be held by the producer; otherwise it is handed back
    /// untouched together with the reason.
    pub fn publish_ready(&self, mut buffer: EventBuffer) -> Result<(), Rejected> {
        let mut state = self.state.lock();
        if let Err(error) = self.verify(&state, &buffer, &[Owner::Producer]) {
            return Err(Rejected { error, buffer });
        }
        state.set_owner(&mut buffer, Owner::Ready);
        state.ready.push_back(buffer);
        drop(state);
        self.ready_signal.notify_all();
        Ok(())
    }

    /// Oldest ready buffer, if any.
    pub fn try_drain_ready(&self) -> Option<EventBuffer> {
        Self::take_ready(&mut self.state.lock())
    }

    /// Oldest ready buffer, waiting up to `timeout` for one to be published.
    /// Returns `None` on timeout or when waiters are interrupted.
    pub fn drain_ready_timeout(&self, timeout: Duration) -> Option<EventBuffer> {
        let mut state = self.state.lock();
        self.ready_signal.wait_while_for(
            &mut state,
            |s| s.ready.is_empty() && !s.interrupted,
            timeout,
        );
        Self::take_ready(&mut state)
    }

    /// Clear a buffer and return it to the free queue.
    ///
    /// Only a buffer currently held by the producer or the consumer, under
    /// its current lease, is accepted. Anything else (a buffer of another
    /// pool, a stale duplicate, a buffer that is already free) is rejected
    /// without touching the pool.
    pub fn free(&self, mut buffer: EventBuffer) -> Result<(), Rejected> {
        let mut state = self.state.lock();
        if let Err(error) = self.verify(&state, &buffer, &[Owner::Producer, Owner::Consumer]) {
            warn!("Refusing to free buffer slot {}: {}", buffer.slot, error);
            return Err(Rejected { error, buffer });
        }
        buffer.clear();
        state.set_owner(&mut buffer, Owner::Free);
        state.free.push_back(buffer);
        let wake_producer = state.waiting_producers > 0;
        drop(state);

        self.released.fetch_add(1, Ordering::Relaxed);
        if wake_producer {
            self.free_signal.notify_one();
        }
        self.idle_signal.notify_all();
        Ok(())
    }

    /// Register a producer entering a trigger. Returns false when intake is
    /// closed; the caller must then not touch the pool.
    pub fn enter_producer(&self) -> bool {
        let mut state = self.state.lock();
        if !state.intake_open {
            return false;
        }
        state.in_flight += 1;
        true
    }

    pub fn exit_producer(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.idle_signal.notify_all();
    }

    /// Start accepting triggers. Clears a previous interrupt.
    pub fn open_intake(&self) {
        let mut state = self.state.lock();
        state.intake_open = true;
        state.interrupted = false;
    }

    /// Stop accepting new triggers. Producers already inside finish normally.
    pub fn close_intake(&self) {
        self.state.lock().intake_open = false;
    }

    /// Cancel every bounded wait currently in progress, and any started later
    /// until intake is opened again.
    pub fn interrupt_waiters(&self) {
        self.state.lock().interrupted = true;
        self.free_signal.notify_all();
        self.ready_signal.notify_all();
        self.idle_signal.notify_all();
    }

    /// Wait until no producer is inside a trigger and every published buffer
    /// has been freed by the consumer. Returns false on timeout.
    pub fn wait_quiescent(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.idle_signal
            .wait_while_for(&mut state, |s| !s.is_quiescent() && !s.interrupted, timeout);
        state.is_quiescent()
    }

    /// Wait until no producer is inside a trigger, regardless of interrupts.
    /// Returns false on timeout.
    pub fn wait_producers_idle(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.idle_signal
            .wait_while_for(&mut state, |s| s.in_flight > 0, timeout);
        state.in_flight == 0
    }

    /// Move every buffer left in the ready queue back to the free queue.
    /// Returns how many were moved.
    pub fn reclaim_ready(&self) -> usize {
        let mut state = self.state.lock();
        let mut reclaimed = 0;
        while let Some(mut buffer) = state.ready.pop_front() {
            buffer.clear();
            state.set_owner(&mut buffer, Owner::Free);
            state.free.push_back(buffer);
            reclaimed += 1;
        }
        drop(state);
        if reclaimed > 0 {
            self.free_signal.notify_all();
        }
        reclaimed
    }

    pub fn reset_counters(&self) {
        self.starvation_waits.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Relaxed);
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_and_duplicate_releases_are_rejected() {
        let pool = BufferPool::new(1, 8).unwrap();

        let first = pool.try_acquire_free().unwrap();
        assert_eq!(first.generation(), 1);
        // a duplicate claiming to be the buffer just handed out
        let mut forged = EventBuffer::new(pool.pool_id(), 0, 8);
        forged.meta.generation = 1;
        forged.meta.owner = Owner::Producer;

        pool.free(first).unwrap();
        let rejected = pool.free(forged).unwrap_err();
        assert_eq!(
            rejected.error,
            PoolError::NotHeld {
                slot: 0,
                owner: Owner::Free
            }
        );
        assert_eq!(pool.counts().free, 1);

        let second = pool.try_acquire_free().unwrap();
        assert_eq!(second.generation(), 2);
        let rejected = pool.free(rejected.buffer).unwrap_err();
        assert!(matches!(rejected.error, PoolError::StaleLease { lease: 1, expected: 2, .. }));
        assert!(pool.counts().is_consistent());
        assert_eq!(pool.counts().held_by_producer, 1);
        pool.free(second).unwrap();
        assert_eq!(pool.counts().free, 1);
    }

    #[test]
    fn reclaim_moves_ready_back_to_free() {
        let pool = BufferPool::new(3, 8).unwrap();
        pool.publish_ready(pool.try_acquire_free().unwrap()).unwrap();
        pool.publish_ready(pool.try_acquire_free().unwrap()).unwrap();
        assert_eq!(pool.counts().ready, 2);
        assert_eq!(pool.reclaim_ready(), 2);
        assert_eq!(pool.counts().free, 3);
    }
}
