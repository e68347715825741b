//! Run control: download, prestart, go, end.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --arm--> Armed --start--> Running
//! Running --stop--> Stopped --arm--> Armed
//! Stopped --initialize--> Initialized
//! ```
//! `teardown` is accepted from every state and stops a running pipeline
//! first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Core::config::{PipelineConfig, TriggerMode};
use crate::Core::error::{PipelineError, PipelineResult};
use crate::Core::pool::{BufferPool, PoolCounts};
use crate::Event::assembler::EventAssembler;
use crate::Event::source::{Source, SourceSet};
use crate::Pipeline::consumer::EventDrain;
use crate::Pipeline::coordinator::{PipelineStats, TriggerCoordinator};
use crate::Pipeline::producer::TriggerHandle;
use crate::Pipeline::trigger::{TriggerPoller, TriggerSource};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    /// Buffer pool allocated.
    Initialized,
    /// Sources bound and checked; triggers are still refused.
    Armed,
    Running,
    Stopped,
    TornDown,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            RunState::Uninitialized => "uninitialized",
            RunState::Initialized => "initialized",
            RunState::Armed => "armed",
            RunState::Running => "running",
            RunState::Stopped => "stopped",
            RunState::TornDown => "torn down",
        };
        write!(f, "{}", repr)
    }
}

/// Returned by a successful [`RunControl::stop`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: PipelineStats,
    /// Buffers not returned before the drain timeout.
    pub residual: usize,
}

impl RunSummary {
    /// Every published event was released before the drain timeout.
    pub fn drained(&self) -> bool {
        self.residual == 0
    }
}

/// Drives the pipeline through the run-control transitions.
///
/// Devices are attached by name and bound to the configured sources at every
/// arm, so a source can be swapped between runs.
pub struct RunControl {
    config: PipelineConfig,
    state: RunState,
    coordinator: Option<Arc<TriggerCoordinator>>,
    devices: HashMap<String, Box<dyn Source>>,
    trigger_source: Option<Box<dyn TriggerSource>>,
    poller: Option<TriggerPoller>,
}

impl RunControl {
    pub(crate) fn new(
        config: PipelineConfig,
        devices: HashMap<String, Box<dyn Source>>,
        trigger_source: Option<Box<dyn TriggerSource>>,
    ) -> Self {
        Self {
            config,
            state: RunState::Uninitialized,
            coordinator: None,
            devices,
            trigger_source,
            poller: None,
        }
    }

    fn invalid(&self, action: &'static str) -> PipelineError {
        PipelineError::InvalidTransition {
            action,
            state: self.state,
        }
    }

    fn coordinator(&self, action: &'static str) -> PipelineResult<&Arc<TriggerCoordinator>> {
        self.coordinator.as_ref().ok_or_else(|| self.invalid(action))
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Allocate the buffer pool. Also accepted between runs to start over
    /// with fresh buffers.
    pub fn initialize(&mut self) -> PipelineResult<()> {
        match self.state {
            RunState::Uninitialized | RunState::Initialized | RunState::Stopped => {}
            _ => return Err(self.invalid("initialize")),
        }
        self.config.validate()?;

        if let Some(previous) = &self.coordinator {
            let counts = previous.pool().counts();
            if counts.held() + counts.ready > 0 {
                warn!(
                    "Re-initializing with {} buffers still out of the previous pool",
                    counts.held() + counts.ready
                );
            }
        }

        let pool = Arc::new(BufferPool::new(
            self.config.pool_buffers,
            self.config.buffer_capacity_words,
        )?);
        let coordinator = TriggerCoordinator::new(
            pool,
            EventAssembler::new(self.config.ready_poll_attempts),
            self.config.starvation_policy,
            self.config.free_wait_timeout(),
        );
        self.coordinator = Some(Arc::new(coordinator));
        self.state = RunState::Initialized;
        info!(
            "Download executed: {} buffers of {} words, {:?} on starvation",
            self.config.pool_buffers, self.config.buffer_capacity_words, self.config.starvation_policy
        );
        Ok(())
    }

    /// Bind and check the sources and the trigger interface, then reset the
    /// run counters. Nothing is left half-armed on failure.
    pub fn arm(&mut self) -> PipelineResult<()> {
        match self.state {
            RunState::Initialized | RunState::Stopped => {}
            _ => return Err(self.invalid("arm")),
        }
        let coordinator = Arc::clone(self.coordinator("arm")?);

        if self.config.trigger_mode == TriggerMode::Poll {
            let trigger = self
                .trigger_source
                .as_mut()
                .ok_or(PipelineError::MissingTriggerSource)?;
            trigger
                .probe()
                .map_err(|e| PipelineError::TriggerAbsent(e.to_string()))?;
        }

        let mut sources = SourceSet::build(&self.config, &mut self.devices)?;
        if let Err(e) = sources.probe_all() {
            self.return_devices(sources);
            return Err(e);
        }
        if sources.is_empty() {
            warn!("Arming with no enabled sources, events will be empty");
        }

        coordinator.arm();
        sources.prestart_all();
        let names: Vec<&str> = sources.configs().map(|s| s.name.as_str()).collect();
        info!("Prestart executed: sources {:?}", names);
        coordinator.install_sources(sources);
        self.state = RunState::Armed;
        Ok(())
    }

    /// Start accepting triggers.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.state != RunState::Armed {
            return Err(self.invalid("start"));
        }
        let coordinator = Arc::clone(self.coordinator("start")?);

        coordinator.sources().go_all();
        coordinator.open();
        if self.config.trigger_mode == TriggerMode::Poll {
            let Some(trigger) = self.trigger_source.take() else {
                coordinator.pool().close_intake();
                return Err(PipelineError::MissingTriggerSource);
            };
            let handle = TriggerHandle::new(Arc::clone(&coordinator));
            match TriggerPoller::spawn(trigger, handle, self.config.trigger_poll_interval()) {
                Ok(poller) => self.poller = Some(poller),
                Err(e) => {
                    coordinator.pool().close_intake();
                    return Err(e);
                }
            }
        }
        self.state = RunState::Running;
        info!("Go executed ({:?} triggers)", self.config.trigger_mode);
        Ok(())
    }

    /// Stop accepting triggers and drain.
    ///
    /// Waits up to the drain timeout for in-flight events and for the
    /// consumer to release everything, then gives up and logs what is left.
    /// The pipeline is stopped even when an error is returned; the error
    /// reports a fatal fault recorded during the run.
    pub fn stop(&mut self) -> PipelineResult<RunSummary> {
        match self.state {
            RunState::Armed | RunState::Running => {}
            _ => return Err(self.invalid("stop")),
        }
        let coordinator = Arc::clone(self.coordinator("stop")?);

        if let Some(poller) = &self.poller {
            poller.request_stop();
        }
        let residual = coordinator.quiesce(self.config.drain_timeout());

        let mut thread_error = None;
        if let Some(poller) = self.poller.take() {
            match poller.join() {
                Ok(trigger) => self.trigger_source = Some(trigger),
                Err(e) => {
                    error!("{}", e);
                    thread_error = Some(e);
                }
            }
        }

        let mut sources = coordinator.take_sources();
        sources.end_all();
        self.return_devices(sources);
        self.state = RunState::Stopped;

        let stats = coordinator.stats();
        info!("End executed: {}", stats);
        let counts = coordinator.pool().counts();
        info!(
            "Buffer pool: {} free, {} ready, {} held of {}",
            counts.free,
            counts.ready,
            counts.held(),
            counts.total
        );

        if let Some(e) = thread_error {
            return Err(e);
        }
        if let Some(reason) = coordinator.fault() {
            return Err(PipelineError::TriggerLost(reason));
        }
        Ok(RunSummary { stats, residual })
    }

    /// Release everything. Stops a running pipeline first.
    pub fn teardown(&mut self) -> PipelineResult<()> {
        if self.state == RunState::TornDown {
            return Err(self.invalid("tear down"));
        }
        if matches!(self.state, RunState::Armed | RunState::Running) {
            if let Err(e) = self.stop() {
                warn!("Run ended with an error during teardown: {}", e);
            }
        }
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.pool().interrupt_waiters();
        }
        self.trigger_source = None;
        self.state = RunState::TornDown;
        info!("Pipeline torn down");
        Ok(())
    }

    fn return_devices(&mut self, sources: SourceSet) {
        self.devices.extend(sources.into_devices());
    }

    /// Attach or replace the device behind a configured source name.
    pub fn attach_source(&mut self, name: impl Into<String>, device: impl Source + 'static) -> PipelineResult<()> {
        if matches!(self.state, RunState::Armed | RunState::Running) {
            return Err(self.invalid("attach a source"));
        }
        self.devices.insert(name.into(), Box::new(device));
        Ok(())
    }

    pub fn attach_trigger_source(&mut self, trigger: impl TriggerSource + 'static) -> PipelineResult<()> {
        if matches!(self.state, RunState::Armed | RunState::Running) {
            return Err(self.invalid("attach a trigger source"));
        }
        self.trigger_source = Some(Box::new(trigger));
        Ok(())
    }

    /// Handle for the hardware signal collaborator. Valid until the next
    /// `initialize`.
    pub fn trigger_handle(&self) -> PipelineResult<TriggerHandle> {
        let coordinator = self.coordinator("hand out a trigger handle")?;
        Ok(TriggerHandle::new(Arc::clone(coordinator)))
    }

    /// Handle for the downstream consumer. Valid until the next `initialize`.
    pub fn drain(&self) -> PipelineResult<EventDrain> {
        let coordinator = self.coordinator("hand out an event drain")?;
        Ok(EventDrain::new(Arc::clone(coordinator.pool())))
    }

    /// Fails once a fatal fault (trigger link loss) has been recorded.
    pub fn health(&self) -> PipelineResult<()> {
        match self.coordinator.as_ref().and_then(|c| c.fault()) {
            Some(reason) => Err(PipelineError::TriggerLost(reason)),
            None => Ok(()),
        }
    }

    pub fn counts(&self) -> Option<PoolCounts> {
        self.coordinator.as_ref().map(|c| c.pool().counts())
    }

    pub fn stats(&self) -> Option<PipelineStats> {
        self.coordinator.as_ref().map(|c| c.stats())
    }
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut devices: Vec<&String> = self.devices.keys().collect();
        devices.sort();
        f.debug_struct("RunControl")
            .field("state", &self.state)
            .field("coordinator", &self.coordinator)
            .field("idle_devices", &devices)
            .field("trigger_source", &self.trigger_source.is_some())
            .field("polling", &self.poller.is_some())
            .finish()
    }
}
