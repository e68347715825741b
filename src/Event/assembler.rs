//! Fills one event buffer from the configured sources.

use crate::Core::error::{FaultKind, TransferError};
use crate::Event::Buffer::{EventBuffer, SEGMENT_HEADER_WORDS};
use crate::Event::Structs::SourceFault;
use crate::Event::source::{ReadinessMask, SourceSet};

/// What happened while assembling one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyOutcome {
    pub segments_written: usize,
    /// Words added to the buffer, headers included.
    pub words_written: usize,
    pub overflow: bool,
    pub ready_mask: ReadinessMask,
    pub expected_mask: ReadinessMask,
    /// Per-source faults, in readout order.
    pub errors: Vec<SourceFault>,
}

impl AssemblyOutcome {
    pub fn is_clean(&self) -> bool {
        !self.overflow && self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EventAssembler {
    ready_poll_attempts: u32,
}

impl EventAssembler {
    pub fn new(ready_poll_attempts: u32) -> Self {
        Self {
            ready_poll_attempts: ready_poll_attempts.max(1),
        }
    }

    pub fn ready_poll_attempts(&self) -> u32 {
        self.ready_poll_attempts
    }

    /// Read every source once, in readout order, into `buffer`.
    ///
    /// Only sources that reported ready are read. A source that did not
    /// still gets a header-only segment so that tags and order are the same
    /// in every event. Faults are recorded and the remaining sources are
    /// still read; nothing here aborts the event.
    pub fn assemble(&self, buffer: &mut EventBuffer, sources: &mut SourceSet) -> AssemblyOutcome {
        let event_id = buffer.event_id();
        let start_len = buffer.len();
        let expected = sources.expected_mask();
        let ready = sources.poll_all_ready(expected, self.ready_poll_attempts);
        if ready != expected {
            error!(
                "Event {}: ready mask {} != expected {} (missing {})",
                event_id,
                ready,
                expected,
                ready.missing(expected)
            );
        }

        let mut outcome = AssemblyOutcome {
            ready_mask: ready,
            expected_mask: expected,
            ..Default::default()
        };

        for (index, (config, device)) in sources.iter_mut().enumerate() {
            let fault = |kind| SourceFault {
                index,
                tag: config.tag,
                kind,
            };

            let Some(mut segment) = buffer.open_segment(config.tag, config.swap_words) else {
                outcome.overflow = true;
                outcome.errors.push(fault(FaultKind::BufferOverflow { words: 0 }));
                continue;
            };

            if !ready.contains(index) {
                segment.close();
                outcome.segments_written += 1;
                outcome.errors.push(fault(FaultKind::ReadinessTimeout {
                    attempts: self.ready_poll_attempts,
                }));
                continue;
            }

            if let Some(marker) = config.marker {
                if !segment.push(marker) {
                    segment.close();
                    outcome.segments_written += 1;
                    outcome.overflow = true;
                    outcome.errors.push(fault(FaultKind::BufferOverflow { words: 0 }));
                    continue;
                }
            }

            let limit = config.max_words;
            let capped = segment.room() < limit;
            let dest = segment.reserve(limit);
            let available = dest.len();
            let read = device.read_block(dest, limit);
            let kept = read.words.min(available);
            segment.commit(kept);

            // a clamped region that ended up full may have cut the block short,
            // whatever the device says about it
            let truncated =
                capped && (kept == available || read.error == Some(TransferError::Overflow));
            if truncated {
                outcome.overflow = true;
                outcome.errors.push(fault(FaultKind::BufferOverflow {
                    words: segment.written(),
                }));
            }

            match read.error {
                Some(TransferError::Overflow) if truncated => {}
                Some(error) => {
                    warn!(
                        "Event {}: source '{}' transfer failed after {} words: {}",
                        event_id, config.name, kept, error
                    );
                    outcome.errors.push(fault(FaultKind::Transfer { error, words: kept }));
                }
                None => {}
            }

            segment.close();
            outcome.segments_written += 1;
        }

        if outcome.overflow {
            warn!(
                "Event {}: event buffer overflow ({} of {} words used)",
                event_id,
                buffer.len(),
                buffer.capacity()
            );
            buffer.mark_overflow();
        }
        buffer.record_faults(&outcome.errors);
        outcome.words_written = buffer.len() - start_len;
        trace!(
            "Event {}: {} segments, {} words ({} header words each)",
            event_id,
            outcome.segments_written,
            outcome.words_written,
            SEGMENT_HEADER_WORDS
        );
        outcome
    }
}
