//! Simulated readout modules and trigger interface.
//!
//! Used by the demos and the tests in place of real VME libraries. Each
//! simulated source produces one block per read and can be told to be slow,
//! absent, or to fail its transfers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::Core::error::{TransferError, TriggerLinkError};
use crate::Event::source::{BlockRead, Source};
use crate::Pipeline::trigger::TriggerSource;

enum Blocks {
    /// `n` words; word `i` of the `k`-th read is `(k << 16) | i`.
    Counting(usize),
    /// `n` random words per read.
    Random(usize),
    /// One block per read, then empty blocks.
    Scripted(VecDeque<Vec<u32>>),
}

pub struct SimSource {
    blocks: Blocks,
    ready_after: u32,
    pending_polls: u32,
    never_ready: bool,
    failure: Option<TransferError>,
    present: bool,
    reads: Arc<AtomicU64>,
}

impl SimSource {
    fn with_blocks(blocks: Blocks) -> Self {
        Self {
            blocks,
            ready_after: 0,
            pending_polls: 0,
            never_ready: false,
            failure: None,
            present: true,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn counting(words: usize) -> Self {
        Self::with_blocks(Blocks::Counting(words))
    }

    pub fn random(words: usize) -> Self {
        Self::with_blocks(Blocks::Random(words))
    }

    pub fn scripted(blocks: impl IntoIterator<Item = Vec<u32>>) -> Self {
        Self::with_blocks(Blocks::Scripted(blocks.into_iter().collect()))
    }

    /// Word `index` of the `read`-th block of a counting source (reads start at 1).
    pub fn counting_word(read: u64, index: usize) -> u32 {
        ((read as u32) << 16) | (index as u32 & 0xffff)
    }

    /// Never report ready.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Report not ready for the first `polls` polls of every event.
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self.pending_polls = polls;
        self
    }

    /// Every transfer stops half way with `error`.
    pub fn failing_with(mut self, error: TransferError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fail the presence check at arm.
    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    /// Shared count of `read_block` calls.
    pub fn read_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.reads)
    }

    fn next_block(&mut self, read: u64) -> Vec<u32> {
        match &mut self.blocks {
            Blocks::Counting(n) => (0..*n).map(|i| Self::counting_word(read, i)).collect(),
            Blocks::Random(n) => (0..*n).map(|_| fastrand::u32(..)).collect(),
            Blocks::Scripted(queue) => queue.pop_front().unwrap_or_default(),
        }
    }
}

impl Source for SimSource {
    fn probe(&mut self) -> Result<(), TransferError> {
        if self.present {
            Ok(())
        } else {
            Err(TransferError::Device("no module responding".to_string()))
        }
    }

    fn is_ready(&mut self) -> bool {
        if self.never_ready {
            return false;
        }
        if self.pending_polls > 0 {
            self.pending_polls -= 1;
            return false;
        }
        true
    }

    fn read_block(&mut self, dest: &mut [u32], max_words: usize) -> BlockRead {
        let read = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending_polls = self.ready_after;
        let block = self.next_block(read);

        let fits = block.len().min(max_words).min(dest.len());
        if let Some(error) = &self.failure {
            let partial = fits / 2;
            dest[..partial].copy_from_slice(&block[..partial]);
            return BlockRead::failed(partial, error.clone());
        }
        dest[..fits].copy_from_slice(&block[..fits]);
        if block.len() > fits {
            BlockRead::failed(fits, TransferError::Overflow)
        } else {
            BlockRead::complete(fits)
        }
    }
}

/// Trigger interface that fires a fixed number of sequential triggers.
pub struct SimTrigger {
    count: u64,
    next_id: u64,
    enabled: bool,
    present: bool,
    lose_link_after: Option<u64>,
    fired: Arc<AtomicU64>,
}

impl SimTrigger {
    /// Fire triggers with ids `1..=count` once enabled.
    pub fn new(count: u64) -> Self {
        Self {
            count,
            next_id: 1,
            enabled: false,
            present: true,
            lose_link_after: None,
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Report a lost link after `fired` triggers.
    pub fn losing_link_after(mut self, fired: u64) -> Self {
        self.lose_link_after = Some(fired);
        self
    }

    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    /// Shared count of triggers delivered so far.
    pub fn fired(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.fired)
    }
}

impl TriggerSource for SimTrigger {
    fn probe(&mut self) -> Result<(), TriggerLinkError> {
        if self.present {
            Ok(())
        } else {
            Err(TriggerLinkError::NotFound("simulated trigger interface".to_string()))
        }
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn poll(&mut self) -> Result<Option<u64>, TriggerLinkError> {
        if !self.enabled {
            return Ok(None);
        }
        let fired = self.next_id - 1;
        if self.lose_link_after.is_some_and(|limit| fired >= limit) {
            return Err(TriggerLinkError::LinkLost(format!(
                "no response after trigger {}",
                fired
            )));
        }
        if self.next_id > self.count {
            return Ok(None);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.fired.fetch_add(1, Ordering::Relaxed);
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_source_reports_overflow_when_clamped() {
        let mut source = SimSource::counting(8);
        let mut dest = [0u32; 5];
        let read = source.read_block(&mut dest, 8);
        assert_eq!(read, BlockRead::failed(5, TransferError::Overflow));
        assert_eq!(dest[4], SimSource::counting_word(1, 4));
    }

    #[test]
    fn ready_after_resets_every_event() {
        let mut source = SimSource::counting(1).ready_after(2);
        assert!(!source.poll_ready(2));
        assert!(source.poll_ready(1));
        let mut dest = [0u32; 1];
        source.read_block(&mut dest, 1);
        assert!(!source.is_ready());
    }

    #[test]
    fn trigger_loses_link() {
        let mut trigger = SimTrigger::new(5).losing_link_after(2);
        assert_eq!(trigger.poll(), Ok(None));
        trigger.enable();
        assert_eq!(trigger.poll(), Ok(Some(1)));
        assert_eq!(trigger.poll(), Ok(Some(2)));
        assert!(matches!(trigger.poll(), Err(TriggerLinkError::LinkLost(_))));
    }
}
