// src/Pipeline/coordinator.rs

use crate::Core::config::StarvationPolicy;
use crate::Core::pool::{Acquire, BufferPool};
use crate::Event::assembler::{AssemblyOutcome, EventAssembler};
use crate::Event::source::SourceSet;
use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Producer side of the trigger state machine.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProducerPhase {
    /// Not armed; triggers are rejected.
    Idle = 0,
    /// Waiting for the next trigger.
    Armed = 1,
    /// Trigger received, blocked on an empty free queue.
    WaitingForBuffer = 2,
    /// Reading the sources into a buffer.
    Filling = 3,
}

impl ProducerPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProducerPhase::Armed,
            2 => ProducerPhase::WaitingForBuffer,
            3 => ProducerPhase::Filling,
            _ => ProducerPhase::Idle,
        }
    }
}

/// What became of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The event was assembled and queued for the consumer.
    Published(AssemblyOutcome),
    /// No free buffer under the drop policy; the event was counted as lost.
    Dropped,
    /// No buffer came back within the free-buffer wait timeout.
    StallTimeout,
    /// The free-buffer wait was cancelled at end of run.
    Interrupted,
    /// The pipeline was not running.
    Rejected,
}

impl TriggerOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, TriggerOutcome::Published(_))
    }
}

/// Snapshot of the run counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub triggers: u64,
    pub published: u64,
    /// Events lost to an empty free queue under the drop policy.
    pub dropped: u64,
    pub starvation_waits: u64,
    pub stall_timeouts: u64,
    pub interrupted: u64,
    /// Triggers received while the pipeline was not running.
    pub rejected: u64,
    pub overflows: u64,
    pub source_faults: u64,
    pub sequence_gaps: u64,
    pub released: u64,
    /// Buffers left over from the previous run and reclaimed at arm.
    pub discarded: u64,
    /// Buffers not returned when the end of run drain gave up.
    pub residual: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "triggers {} published {} released {} dropped {} starved {} stalled {} interrupted {} \
             rejected {} overflows {} source faults {} sequence gaps {} discarded {} residual {}",
            self.triggers,
            self.published,
            self.released,
            self.dropped,
            self.starvation_waits,
            self.stall_timeouts,
            self.interrupted,
            self.rejected,
            self.overflows,
            self.source_faults,
            self.sequence_gaps,
            self.discarded,
            self.residual
        )
    }
}

#[derive(Default)]
struct Counters {
    triggers: CachePadded<AtomicU64>,
    published: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    stall_timeouts: CachePadded<AtomicU64>,
    interrupted: CachePadded<AtomicU64>,
    rejected: CachePadded<AtomicU64>,
    overflows: CachePadded<AtomicU64>,
    source_faults: CachePadded<AtomicU64>,
    sequence_gaps: CachePadded<AtomicU64>,
    discarded: CachePadded<AtomicU64>,
    residual: CachePadded<AtomicU64>,
}

impl Counters {
    fn all(&self) -> [&AtomicU64; 11] {
        [
            &self.triggers,
            &self.published,
            &self.dropped,
            &self.stall_timeouts,
            &self.interrupted,
            &self.rejected,
            &self.overflows,
            &self.source_faults,
            &self.sequence_gaps,
            &self.discarded,
            &self.residual,
        ]
    }
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

#[inline]
fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

#[derive(Default)]
struct ProducerState {
    last_event_id: Option<u64>,
    starvation_logged: bool,
}

/// Per-run context shared by the trigger path, the consumer and run control.
///
/// Owns the source set while armed and all run counters; there is no
/// process-wide state.
pub struct TriggerCoordinator {
    pool: Arc<BufferPool>,
    sources: Mutex<SourceSet>,
    assembler: EventAssembler,
    policy: StarvationPolicy,
    free_wait_timeout: Duration,
    phase: AtomicU8,
    producer: Mutex<ProducerState>,
    counters: Counters,
    fault: Mutex<Option<String>>,
}

impl TriggerCoordinator {
    pub(crate) fn new(
        pool: Arc<BufferPool>,
        assembler: EventAssembler,
        policy: StarvationPolicy,
        free_wait_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            sources: Mutex::new(SourceSet::new()),
            assembler,
            policy,
            free_wait_timeout,
            phase: AtomicU8::new(ProducerPhase::Idle as u8),
            producer: Mutex::new(ProducerState::default()),
            counters: Counters::default(),
            fault: Mutex::new(None),
        }
    }

    fn set_phase(&self, phase: ProducerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> ProducerPhase {
        ProducerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn policy(&self) -> StarvationPolicy {
        self.policy
    }

    pub fn free_wait_timeout(&self) -> Duration {
        self.free_wait_timeout
    }

    pub(crate) fn sources(&self) -> MutexGuard<'_, SourceSet> {
        self.sources.lock()
    }

    pub(crate) fn install_sources(&self, sources: SourceSet) {
        *self.sources.lock() = sources;
    }

    pub(crate) fn take_sources(&self) -> SourceSet {
        std::mem::take(&mut *self.sources.lock())
    }

    /// Reset counters and sequence tracking and reclaim any buffer left in
    /// the ready queue. Returns the number of reclaimed buffers.
    pub(crate) fn arm(&self) -> usize {
        self.counters.all().iter().for_each(|c| c.store(0, Ordering::Relaxed));
        self.pool.reset_counters();
        *self.producer.lock() = ProducerState::default();
        *self.fault.lock() = None;

        let reclaimed = self.pool.reclaim_ready();
        if reclaimed > 0 {
            warn!(
                "Discarded {} events left in the ready queue by the previous run",
                reclaimed
            );
        }
        bump(&self.counters.discarded, reclaimed as u64);
        self.set_phase(ProducerPhase::Armed);
        reclaimed
    }

    pub(crate) fn open(&self) {
        self.pool.open_intake();
    }

    /// Handle one trigger.
    ///
    /// Bounded in time except for the wait on an empty free queue under the
    /// block policy, which is itself bounded by the free-buffer wait timeout
    /// and cancelled at end of run.
    pub fn on_trigger(&self, event_id: u64) -> TriggerOutcome {
        if !self.pool.enter_producer() {
            bump(&self.counters.rejected, 1);
            debug!("Trigger {} ignored, pipeline is not running", event_id);
            return TriggerOutcome::Rejected;
        }
        let outcome = self.handle_trigger(event_id);
        self.pool.exit_producer();
        outcome
    }

    fn handle_trigger(&self, event_id: u64) -> TriggerOutcome {
        bump(&self.counters.triggers, 1);
        self.check_sequence(event_id);

        let mut buffer = match self.pool.try_acquire_free() {
            Some(buffer) => buffer,
            None => {
                self.log_starvation(event_id);
                match self.policy {
                    StarvationPolicy::Drop => {
                        bump(&self.counters.dropped, 1);
                        self.set_phase(ProducerPhase::Armed);
                        return TriggerOutcome::Dropped;
                    }
                    StarvationPolicy::Block => {
                        self.set_phase(ProducerPhase::WaitingForBuffer);
                        match self.pool.acquire_free(self.free_wait_timeout) {
                            Acquire::Acquired(buffer) => buffer,
                            Acquire::TimedOut => {
                                bump(&self.counters.stall_timeouts, 1);
                                error!(
                                    "Event {}: no event buffer freed within {:?}, readout stalled",
                                    event_id, self.free_wait_timeout
                                );
                                self.set_phase(ProducerPhase::Armed);
                                return TriggerOutcome::StallTimeout;
                            }
                            Acquire::Interrupted => {
                                bump(&self.counters.interrupted, 1);
                                info!("Event {}: wait for a free buffer interrupted", event_id);
                                self.set_phase(ProducerPhase::Armed);
                                return TriggerOutcome::Interrupted;
                            }
                        }
                    }
                }
            }
        };

        self.set_phase(ProducerPhase::Filling);
        buffer.begin_event(event_id);
        let outcome = {
            let mut sources = self.sources.lock();
            self.assembler.assemble(&mut buffer, &mut sources)
        };
        if outcome.overflow {
            bump(&self.counters.overflows, 1);
        }
        bump(&self.counters.source_faults, outcome.errors.len() as u64);

        if let Err(rejected) = self.pool.publish_ready(buffer) {
            // only reachable if the buffer bookkeeping is broken
            error!("Event {}: could not publish buffer: {}", event_id, rejected.error);
            if let Err(again) = self.pool.free(rejected.buffer) {
                error!("Event {}: buffer slot {} lost: {}", event_id, again.buffer.slot(), again.error);
            }
            bump(&self.counters.dropped, 1);
            self.set_phase(ProducerPhase::Armed);
            return TriggerOutcome::Dropped;
        }
        bump(&self.counters.published, 1);
        self.set_phase(ProducerPhase::Armed);
        TriggerOutcome::Published(outcome)
    }

    fn check_sequence(&self, event_id: u64) {
        let mut producer = self.producer.lock();
        if let Some(last) = producer.last_event_id {
            if event_id != last.wrapping_add(1) {
                bump(&self.counters.sequence_gaps, 1);
                warn!(
                    "Trigger {} follows trigger {}, events could be out of sync",
                    event_id, last
                );
            }
        }
        producer.last_event_id = Some(event_id);
    }

    fn log_starvation(&self, event_id: u64) {
        let mut producer = self.producer.lock();
        if producer.starvation_logged {
            debug!("Event {}: no free event buffer", event_id);
        } else {
            producer.starvation_logged = true;
            error!(
                "Event {}: no event buffer available, events could be out of sync",
                event_id
            );
        }
    }

    /// Record a fatal fault of the trigger path. The first one wins.
    pub fn report_fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut fault = self.fault.lock();
        if fault.is_none() {
            error!("Fatal trigger fault: {}", reason);
            *fault = Some(reason);
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Close intake and wait for in-flight triggers and the consumer to
    /// finish. On timeout every bounded wait is cancelled and the buffers
    /// still out are logged. Returns the number of buffers still out.
    pub(crate) fn quiesce(&self, timeout: Duration) -> usize {
        self.pool.close_intake();
        let drained = self.pool.wait_quiescent(timeout);
        self.set_phase(ProducerPhase::Idle);
        if drained {
            return 0;
        }

        self.pool.interrupt_waiters();
        // a producer that got a buffer just before the interrupt still owns
        // the sources until its event is published
        if !self.pool.wait_producers_idle(self.free_wait_timeout) {
            error!(
                "End of run: a producer is still inside a trigger after {:?}",
                self.free_wait_timeout
            );
        }
        self.set_phase(ProducerPhase::Idle);
        let counts = self.pool.counts();
        let residual = counts.ready + counts.held();
        self.counters.residual.store(residual as u64, Ordering::Relaxed);
        warn!(
            "End of run drain timed out after {:?}: {} buffers not returned (ready {}, producer {}, consumer {})",
            timeout, residual, counts.ready, counts.held_by_producer, counts.held_by_consumer
        );
        residual
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            triggers: load(&c.triggers),
            published: load(&c.published),
            dropped: load(&c.dropped),
            starvation_waits: self.pool.starvation_waits(),
            stall_timeouts: load(&c.stall_timeouts),
            interrupted: load(&c.interrupted),
            rejected: load(&c.rejected),
            overflows: load(&c.overflows),
            source_faults: load(&c.source_faults),
            sequence_gaps: load(&c.sequence_gaps),
            released: self.pool.released(),
            discarded: load(&c.discarded),
            residual: load(&c.residual),
        }
    }
}

impl fmt::Debug for TriggerCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_trigger_coordinator(self, f)
    }
}
