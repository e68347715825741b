// src/Pipeline/producer.rs

use crate::Pipeline::coordinator::{ProducerPhase, TriggerCoordinator, TriggerOutcome};
use std::sync::Arc;

/// Entry point for the hardware signal collaborator.
///
/// Cheap to clone; every clone feeds the same coordinator. Call
/// [`TriggerHandle::on_trigger`] once per hardware trigger, from the interrupt
/// thread or a polling loop.
#[derive(Clone, Debug)]
pub struct TriggerHandle {
    coordinator: Arc<TriggerCoordinator>,
}

impl TriggerHandle {
    pub(crate) fn new(coordinator: Arc<TriggerCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Acquire a buffer, assemble the event and queue it for the consumer.
    ///
    /// Returns without side effects when the pipeline is not running.
    pub fn on_trigger(&self, event_sequence_id: u64) -> TriggerOutcome {
        self.coordinator.on_trigger(event_sequence_id)
    }

    /// Report that the trigger interface can no longer be reached.
    ///
    /// The fault is surfaced by `RunControl::health` and by `RunControl::stop`.
    pub fn report_link_lost(&self, reason: impl Into<String>) {
        self.coordinator.report_fault(reason);
    }

    pub fn is_accepting(&self) -> bool {
        self.coordinator.pool().is_accepting()
    }

    pub fn phase(&self) -> ProducerPhase {
        self.coordinator.phase()
    }
}
