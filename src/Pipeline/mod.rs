mod builder;
mod consumer;
mod coordinator;
mod lifecycle;
mod producer;
pub mod trigger;

pub use builder::PipelineBuilder;
pub use consumer::{ConsumerPhase, EventDrain};
pub use coordinator::{PipelineStats, ProducerPhase, TriggerCoordinator, TriggerOutcome};
pub use lifecycle::{RunControl, RunState, RunSummary};
pub use producer::TriggerHandle;
pub use trigger::TriggerSource;
