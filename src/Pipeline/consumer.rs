// src/Pipeline/consumer.rs

use crate::Core::error::Rejected;
use crate::Core::pool::{BufferPool, PoolCounts};
use crate::Event::Buffer::EventBuffer;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Consumer side of the handshake.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConsumerPhase {
    /// Nothing taken, or waiting for a ready buffer.
    Waiting = 0,
    /// Holding a buffer.
    Draining = 1,
    /// Last buffer handed back.
    Released = 2,
}

/// Takes completed events from the ready queue and gives the buffers back.
///
/// Buffers come out in trigger order. Every buffer taken must be passed to
/// [`EventDrain::release`] once its content has been forwarded, otherwise
/// the producer eventually starves.
#[derive(Debug)]
pub struct EventDrain {
    pool: Arc<BufferPool>,
    phase: AtomicU8,
}

impl EventDrain {
    pub(crate) fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            phase: AtomicU8::new(ConsumerPhase::Waiting as u8),
        }
    }

    fn set_phase(&self, phase: ConsumerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> ConsumerPhase {
        match self.phase.load(Ordering::Acquire) {
            1 => ConsumerPhase::Draining,
            2 => ConsumerPhase::Released,
            _ => ConsumerPhase::Waiting,
        }
    }

    /// Oldest ready event, if there is one.
    pub fn try_take_ready(&self) -> Option<EventBuffer> {
        let buffer = self.pool.try_drain_ready();
        if buffer.is_some() {
            self.set_phase(ConsumerPhase::Draining);
        }
        buffer
    }

    /// Oldest ready event, waiting up to `timeout` for one.
    ///
    /// Returns `None` on timeout or when the pipeline is torn down.
    pub fn take_ready_timeout(&self, timeout: Duration) -> Option<EventBuffer> {
        self.set_phase(ConsumerPhase::Waiting);
        let buffer = self.pool.drain_ready_timeout(timeout);
        if buffer.is_some() {
            self.set_phase(ConsumerPhase::Draining);
        }
        buffer
    }

    /// Give a buffer back to the pool.
    ///
    /// A buffer the pool does not recognise as held is returned inside the
    /// error and the pool is left unchanged.
    pub fn release(&self, buffer: EventBuffer) -> Result<(), Rejected> {
        self.pool.free(buffer)?;
        self.set_phase(ConsumerPhase::Released);
        Ok(())
    }

    /// Hand every currently ready event to `forward`, releasing each one
    /// afterwards. Returns how many events were drained.
    pub fn drain_available<F>(&self, mut forward: F) -> Result<usize, Rejected>
    where
        F: FnMut(&EventBuffer),
    {
        let mut drained = 0;
        while let Some(buffer) = self.try_take_ready() {
            forward(&buffer);
            self.release(buffer)?;
            drained += 1;
        }
        Ok(drained)
    }

    pub fn counts(&self) -> PoolCounts {
        self.pool.counts()
    }
}
