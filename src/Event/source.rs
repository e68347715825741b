//! Device readiness and block transfer surface.
//!
//! Every readout module (trigger interface, digitizer, TDC, scaler, ...) is
//! wrapped in a [`Source`]. The pipeline never touches hardware directly; it
//! only asks a source whether a block is ready and to copy at most a bounded
//! number of words into a destination slice.

use std::collections::HashMap;
use std::fmt;

use crate::Core::config::{PipelineConfig, SourceConfig, MAX_SOURCES};
use crate::Core::error::{PipelineError, PipelineResult, TransferError};

/// Result of one block transfer.
///
/// `words` is always the number of words actually placed into the
/// destination, even when `error` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRead {
    pub words: usize,
    pub error: Option<TransferError>,
}

impl BlockRead {
    pub fn complete(words: usize) -> Self {
        Self { words, error: None }
    }

    pub fn failed(words: usize, error: TransferError) -> Self {
        Self {
            words,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A hardware endpoint contributing one segment per event.
///
/// Implementations must not block inside `is_ready` or `read_block`; the only
/// waiting the pipeline allows is the bounded number of readiness polls.
pub trait Source: Send {
    /// Presence check, run when the pipeline is armed. An error aborts arm.
    fn probe(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Called once per arm, after `probe`.
    fn on_prestart(&mut self) {}

    /// Called when the run starts.
    fn on_go(&mut self) {}

    /// Called after the run has been drained.
    fn on_end(&mut self) {}

    /// Single, non-blocking readiness query.
    fn is_ready(&mut self) -> bool;

    /// Poll up to `attempts` times. Returns false on exhaustion.
    fn poll_ready(&mut self, attempts: u32) -> bool {
        (0..attempts).any(|_| self.is_ready())
    }

    /// Transfer at most `max_words` words into `dest`.
    ///
    /// `dest` may be shorter than `max_words` when the event buffer is nearly
    /// full; a source with more data than fits reports
    /// [`TransferError::Overflow`] together with the words it did copy.
    fn read_block(&mut self, dest: &mut [u32], max_words: usize) -> BlockRead;
}

/// Snapshot of which sources have data ready, one bit per source in readout
/// order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReadinessMask(u64);

impl ReadinessMask {
    pub fn empty() -> Self {
        Self(0)
    }

    /// Mask with the lowest `n` bits set.
    pub fn full(n: usize) -> Self {
        if n >= MAX_SOURCES {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < MAX_SOURCES);
        self.0 |= 1u64 << index;
    }

    pub fn contains(&self, index: usize) -> bool {
        index < MAX_SOURCES && self.0 & (1u64 << index) != 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Bits set in `expected` but not here.
    pub fn missing(&self, expected: ReadinessMask) -> ReadinessMask {
        Self(expected.0 & !self.0)
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for ReadinessMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct SourceEntry {
    config: SourceConfig,
    device: Box<dyn Source>,
}

/// The enabled sources of a run, in readout order.
///
/// Built at arm time and not modified while the run is going.
#[derive(Default)]
pub struct SourceSet {
    entries: Vec<SourceEntry>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source at the end of the readout order.
    pub fn push(&mut self, config: SourceConfig, device: impl Source + 'static) -> PipelineResult<()> {
        self.push_boxed(config, Box::new(device))
    }

    fn push_boxed(&mut self, config: SourceConfig, device: Box<dyn Source>) -> PipelineResult<()> {
        if self.entries.len() >= MAX_SOURCES {
            return Err(PipelineError::Configuration(format!(
                "cannot add source '{}': at most {} sources are supported",
                config.name, MAX_SOURCES
            )));
        }
        self.entries.push(SourceEntry { config, device });
        Ok(())
    }

    /// Bind every enabled source of `config` to its device in `devices`.
    ///
    /// Nothing is taken out of `devices` unless all enabled sources are
    /// present.
    pub fn build(
        config: &PipelineConfig,
        devices: &mut HashMap<String, Box<dyn Source>>,
    ) -> PipelineResult<Self> {
        if let Some(missing) = config
            .enabled_sources()
            .find(|s| !devices.contains_key(&s.name))
        {
            return Err(PipelineError::SourceNotAttached {
                name: missing.name.clone(),
            });
        }
        let mut set = Self::new();
        for source in config.enabled_sources() {
            if let Some(device) = devices.remove(&source.name) {
                set.push_boxed(source.clone(), device)?;
            }
        }
        Ok(set)
    }

    /// Give the devices back, keyed by source name.
    pub fn into_devices(self) -> Vec<(String, Box<dyn Source>)> {
        self.entries
            .into_iter()
            .map(|e| (e.config.name, e.device))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn configs(&self) -> impl Iterator<Item = &SourceConfig> {
        self.entries.iter().map(|e| &e.config)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&SourceConfig, &mut (dyn Source + 'static))> {
        self.entries
            .iter_mut()
            .map(|e| (&e.config, e.device.as_mut()))
    }

    /// All configured sources.
    pub fn expected_mask(&self) -> ReadinessMask {
        ReadinessMask::full(self.entries.len())
    }

    /// Poll the sources in `mask` round-robin until all of them are ready or
    /// each has been asked `attempts` times.
    pub fn poll_all_ready(&mut self, mask: ReadinessMask, attempts: u32) -> ReadinessMask {
        let mut ready = ReadinessMask::empty();
        for _ in 0..attempts {
            for (index, entry) in self.entries.iter_mut().enumerate() {
                if mask.contains(index) && !ready.contains(index) && entry.device.is_ready() {
                    ready.set(index);
                }
            }
            if ready.missing(mask).bits() == 0 {
                break;
            }
        }
        ready
    }

    pub fn probe_all(&mut self) -> PipelineResult<()> {
        for entry in self.entries.iter_mut() {
            entry
                .device
                .probe()
                .map_err(|e| PipelineError::SourceAbsent {
                    name: entry.config.name.clone(),
                    reason: e.to_string(),
                })?;
            debug!("Source '{}' (slot {}) present", entry.config.name, entry.config.slot);
        }
        Ok(())
    }

    pub fn prestart_all(&mut self) {
        self.entries.iter_mut().for_each(|e| e.device.on_prestart());
    }

    pub fn go_all(&mut self) {
        self.entries.iter_mut().for_each(|e| e.device.on_go());
    }

    pub fn end_all(&mut self) {
        self.entries.iter_mut().for_each(|e| e.device.on_end());
    }
}

impl fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.config.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_arithmetic() {
        let expected = ReadinessMask::full(3);
        assert_eq!(expected.bits(), 0b111);
        let mut ready = ReadinessMask::empty();
        ready.set(0);
        ready.set(2);
        assert_eq!(ready.missing(expected).bits(), 0b010);
        assert!(!ready.contains(1));
        assert_eq!(ReadinessMask::full(64).bits(), u64::MAX);
        assert_eq!(format!("{}", expected), "0x7");
    }
}
