use super::lifecycle::RunControl;
use super::trigger::TriggerSource;
use crate::Core::config::{PipelineConfig, SourceConfig, StarvationPolicy, TriggerMode};
use crate::Core::error::PipelineResult;
use crate::Event::source::Source;
use std::collections::HashMap;
use std::time::Duration;

/// Assembles a [`RunControl`] from a configuration and the attached devices.
pub struct PipelineBuilder {
    config: PipelineConfig,
    devices: HashMap<String, Box<dyn Source>>,
    trigger_source: Option<Box<dyn TriggerSource>>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::from_config(PipelineConfig::default())
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration; devices still need to be attached.
    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            config,
            devices: HashMap::new(),
            trigger_source: None,
        }
    }

    pub fn with_pool_buffers(mut self, buffers: usize) -> Self {
        self.config.pool_buffers = buffers;
        self
    }

    /// Capacity of each event buffer, in words.
    pub fn with_buffer_capacity(mut self, words: usize) -> Self {
        self.config.buffer_capacity_words = words;
        self
    }

    pub fn with_ready_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.ready_poll_attempts = attempts;
        self
    }

    pub fn with_free_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.free_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_starvation_policy(mut self, policy: StarvationPolicy) -> Self {
        self.config.starvation_policy = policy;
        self
    }

    pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.config.trigger_mode = mode;
        self
    }

    /// Append a source to the readout order and attach its device.
    pub fn with_source(mut self, source: SourceConfig, device: impl Source + 'static) -> Self {
        self.devices.insert(source.name.clone(), Box::new(device));
        self.config.sources.push(source);
        self
    }

    /// Attach the device for a source already present in the configuration.
    pub fn attach(mut self, name: impl Into<String>, device: impl Source + 'static) -> Self {
        let name = name.into();
        if self.devices.insert(name.clone(), Box::new(device)).is_some() {
            warn!("Device for source '{}' attached twice, keeping the last one", name);
        }
        self
    }

    /// Attach a trigger interface; required when the trigger mode is poll
    /// and switches the mode to poll.
    pub fn with_trigger_source(mut self, trigger: impl TriggerSource + 'static) -> Self {
        self.trigger_source = Some(Box::new(trigger));
        self.config.trigger_mode = TriggerMode::Poll;
        self
    }

    /// Validate the configuration. The pipeline is returned uninitialized.
    pub fn build(self) -> PipelineResult<RunControl> {
        self.config.validate()?;
        for name in self.devices.keys() {
            if !self.config.sources.iter().any(|s| &s.name == name) {
                warn!("Device '{}' does not match any configured source", name);
            }
        }
        Ok(RunControl::new(self.config, self.devices, self.trigger_source))
    }
}
