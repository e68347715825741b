//! Pipeline configuration.
//!
//! Defaults mirror the readout lists this pipeline replaces: ten event
//! buffers of 64 KiB, 100 readiness polls per module and a 30 second end of
//! run drain. A configuration can be read from and written to TOML.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Core::error::{PipelineError, PipelineResult};
use crate::Event::Buffer::SEGMENT_HEADER_WORDS;

/// The readiness mask is a `u64`, one bit per enabled source.
pub const MAX_SOURCES: usize = 64;

/// What the producer does when a trigger arrives and no free buffer is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StarvationPolicy {
    /// Wait for the consumer to release a buffer, up to `free_wait_timeout_ms`.
    #[default]
    Block,
    /// Count the event as lost and return immediately.
    Drop,
}

/// How triggers reach the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// The signal collaborator calls `TriggerHandle::on_trigger` itself.
    #[default]
    Interrupt,
    /// A polling thread watches the attached `TriggerSource`.
    Poll,
}

/// One readout module contributing a segment to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name, used to bind the attached device.
    pub name: String,
    /// VME slot (informational).
    #[serde(default)]
    pub slot: u32,
    /// Segment tag written in front of this source's data.
    pub tag: u32,
    /// Largest block the module may deliver per event, in words.
    pub max_words: usize,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Byte-swap payload words at the segment boundary.
    #[serde(default)]
    pub swap_words: bool,
    /// Word written as the first payload word of the segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<u32>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, tag: u32, max_words: usize) -> Self {
        Self {
            name: name.into(),
            slot: 0,
            tag,
            max_words,
            enabled: true,
            swap_words: false,
            marker: None,
        }
    }

    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_marker(mut self, marker: u32) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_swapped_words(mut self) -> Self {
        self.swap_words = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of event buffers in the pool.
    pub pool_buffers: usize,
    /// Capacity of each event buffer, in 32 bit words.
    pub buffer_capacity_words: usize,
    /// How many times the readiness of the sources is polled per event.
    pub ready_poll_attempts: u32,
    /// How long a starved producer waits for a free buffer.
    pub free_wait_timeout_ms: u64,
    /// How long stop waits for in-flight and queued buffers to drain.
    pub drain_timeout_ms: u64,
    pub starvation_policy: StarvationPolicy,
    pub trigger_mode: TriggerMode,
    /// Idle sleep of the trigger polling thread.
    pub trigger_poll_interval_us: u64,
    /// Sources in readout order.
    pub sources: Vec<SourceConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            pool_buffers: 10,
            buffer_capacity_words: 64 * 1024 / 4,
            ready_poll_attempts: 100,
            free_wait_timeout_ms: 10_000,
            drain_timeout_ms: 30_000,
            starvation_policy: StarvationPolicy::Block,
            trigger_mode: TriggerMode::Interrupt,
            trigger_poll_interval_us: 50,
            sources: Vec::new(),
        }
    }

    pub fn free_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.free_wait_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn trigger_poll_interval(&self) -> Duration {
        Duration::from_micros(self.trigger_poll_interval_us)
    }

    /// Enabled sources in readout order.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.pool_buffers == 0 {
            return Err(PipelineError::Configuration(
                "pool_buffers must be at least 1".to_string(),
            ));
        }
        if self.buffer_capacity_words < SEGMENT_HEADER_WORDS {
            return Err(PipelineError::Configuration(format!(
                "buffer_capacity_words ({}) cannot hold a single segment header ({} words)",
                self.buffer_capacity_words, SEGMENT_HEADER_WORDS
            )));
        }
        if self.ready_poll_attempts == 0 {
            return Err(PipelineError::Configuration(
                "ready_poll_attempts must be at least 1".to_string(),
            ));
        }
        let n_enabled = self.enabled_sources().count();
        if n_enabled > MAX_SOURCES {
            return Err(PipelineError::Configuration(format!(
                "{} enabled sources configured, at most {} are supported",
                n_enabled, MAX_SOURCES
            )));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if source.name.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "source #{} has an empty name",
                    i
                )));
            }
            if source.max_words == 0 {
                return Err(PipelineError::Configuration(format!(
                    "source '{}' has max_words = 0",
                    source.name
                )));
            }
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(PipelineError::Configuration(format!(
                    "source name '{}' is used more than once",
                    source.name
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let mut text = String::new();
        File::open(path)?.read_to_string(&mut text)?;
        debug!("Read pipeline configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> PipelineResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_toml(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        File::create(path)?.write_all(text.as_bytes())?;
        info!("Wrote pipeline configuration to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_capacity_words, 16384);
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_duplicate_names_and_empty_pool() {
        let mut config = PipelineConfig::new();
        config.sources.push(SourceConfig::new("fadc", 3, 100));
        config.sources.push(SourceConfig::new("fadc", 4, 100));
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));

        let mut config = PipelineConfig::new();
        config.pool_buffers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_readout_list_toml() {
        let text = r#"
            pool_buffers = 4
            buffer_capacity_words = 256
            starvation_policy = "drop"
            trigger_mode = "poll"

            [[sources]]
            name = "ti"
            tag = 1
            max_words = 16

            [[sources]]
            name = "vetroc"
            slot = 13
            tag = 4
            max_words = 1200
            swap_words = true
            marker = 0xb0b0b0b4
        "#;
        let config = PipelineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.pool_buffers, 4);
        assert_eq!(config.starvation_policy, StarvationPolicy::Drop);
        assert_eq!(config.trigger_mode, TriggerMode::Poll);
        // unspecified keys keep their defaults
        assert_eq!(config.ready_poll_attempts, 100);
        assert_eq!(config.sources.len(), 2);
        assert!(config.sources[0].enabled);
        assert_eq!(config.sources[1].marker, Some(0xb0b0_b0b4));
        assert!(config.sources[1].swap_words);

        let again = PipelineConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(again, config);
    }
}
