use super::layout::{SegmentHeader, SegmentIter, SEGMENT_HEADER_WORDS};
use super::Buffer::EventBuffer;
use crate::Event::Structs::Buffer_Structs::{BufferMeta, Owner, SourceFault};

impl EventBuffer {
    /// Allocate a zeroed buffer of `capacity` words.
    pub(crate) fn new(pool_id: u64, slot: usize, capacity: usize) -> Self {
        Self {
            pool_id,
            slot,
            meta: BufferMeta::default(),
            faults: Vec::new(),
            words: vec![0u32; capacity].into_boxed_slice(),
        }
    }

    /// Index of this buffer within its pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn event_id(&self) -> u64 {
        self.meta.event_id
    }

    /// Words written so far, headers included.
    pub fn len(&self) -> usize {
        self.meta.length
    }

    pub fn is_empty(&self) -> bool {
        self.meta.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.meta.length
    }

    /// True if some source's data was cut short because the buffer was full.
    pub fn overflow(&self) -> bool {
        self.meta.overflow
    }

    pub fn owner(&self) -> Owner {
        self.meta.owner
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn meta(&self) -> &BufferMeta {
        &self.meta
    }

    /// Faults recorded while the current event was assembled.
    pub fn faults(&self) -> &[SourceFault] {
        &self.faults
    }

    /// The written part of the buffer.
    pub fn words(&self) -> &[u32] {
        &self.words[..self.meta.length]
    }

    pub fn segments(&self) -> SegmentIter<'_> {
        SegmentIter::new(self.words())
    }

    pub fn segment_count(&self) -> usize {
        self.meta.segments
    }

    /// Forget the current event. The lease number and slot are kept.
    pub(crate) fn clear(&mut self) {
        self.meta.event_id = 0;
        self.meta.length = 0;
        self.meta.overflow = false;
        self.meta.segments = 0;
        self.faults.clear();
    }

    pub(crate) fn begin_event(&mut self, event_id: u64) {
        if self.meta.length != 0 {
            warn!(
                "Buffer {} still holds {} words when starting event {}, discarding them",
                self.slot, self.meta.length, event_id
            );
            self.clear();
        }
        self.meta.event_id = event_id;
    }

    pub(crate) fn mark_overflow(&mut self) {
        self.meta.overflow = true;
    }

    pub(crate) fn record_faults(&mut self, faults: &[SourceFault]) {
        self.faults.extend_from_slice(faults);
    }

    /// Start a segment at the write cursor.
    ///
    /// Returns `None` when not even the segment header fits.
    pub(crate) fn open_segment(&mut self, tag: u32, swap: bool) -> Option<SegmentWriter<'_>> {
        if self.remaining() < SEGMENT_HEADER_WORDS {
            return None;
        }
        let start = self.meta.length;
        Some(SegmentWriter {
            buffer: self,
            start,
            tag,
            written: 0,
            swap,
        })
    }
}

/// Writes one segment into an [`EventBuffer`].
///
/// The header is written and the buffer cursor moved only by
/// [`SegmentWriter::close`]; a writer dropped without closing leaves the
/// buffer as it was. Every write is bounded by the buffer capacity.
pub struct SegmentWriter<'a> {
    buffer: &'a mut EventBuffer,
    start: usize,
    tag: u32,
    written: usize,
    swap: bool,
}

impl SegmentWriter<'_> {
    #[inline]
    fn payload_start(&self) -> usize {
        self.start + SEGMENT_HEADER_WORDS
    }

    #[inline]
    fn cursor(&self) -> usize {
        self.payload_start() + self.written
    }

    /// Payload words that still fit into the buffer.
    pub fn room(&self) -> usize {
        self.buffer.words.len() - self.cursor()
    }

    /// Payload words written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append a single word. Returns false if the buffer is full.
    pub fn push(&mut self, word: u32) -> bool {
        if self.room() == 0 {
            return false;
        }
        let at = self.cursor();
        self.buffer.words[at] = word;
        self.written += 1;
        true
    }

    /// Destination region for a block transfer of at most `max_words`,
    /// clamped to the remaining room. Call [`SegmentWriter::commit`] with the
    /// number of words actually transferred.
    pub fn reserve(&mut self, max_words: usize) -> &mut [u32] {
        let at = self.cursor();
        let n = max_words.min(self.room());
        &mut self.buffer.words[at..at + n]
    }

    /// Accept `words` words placed into the region returned by `reserve`.
    pub fn commit(&mut self, words: usize) {
        self.written += words.min(self.room());
    }

    /// Write the header, apply word swapping and advance the buffer cursor.
    /// Returns the payload length.
    pub fn close(self) -> usize {
        let payload_start = self.payload_start();
        let end = payload_start + self.written;
        if self.swap {
            for word in self.buffer.words[payload_start..end].iter_mut() {
                *word = word.swap_bytes();
            }
        }
        let header = SegmentHeader {
            tag: self.tag,
            length: self.written as u32,
        };
        self.buffer.words[self.start..payload_start].copy_from_slice(&header.encode());
        self.buffer.meta.length = end;
        self.buffer.meta.segments += 1;
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_writer_respects_capacity() {
        let mut buffer = EventBuffer::new(0, 0, 8);

        let mut seg = buffer.open_segment(7, false).unwrap();
        assert_eq!(seg.room(), 6);
        assert!(seg.push(0x11));
        let dest = seg.reserve(100);
        assert_eq!(dest.len(), 5);
        dest[0] = 0x22;
        dest[1] = 0x33;
        seg.commit(2);
        assert_eq!(seg.close(), 3);
        assert_eq!(buffer.words(), &[7, 3, 0x11, 0x22, 0x33]);

        let mut seg = buffer.open_segment(8, false).unwrap();
        assert_eq!(seg.room(), 1);
        assert!(seg.push(0x44));
        assert!(!seg.push(0x55));
        seg.close();
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.segment_count(), 2);
        assert!(buffer.open_segment(9, false).is_none());
    }

    #[test]
    fn swapping_leaves_header_native() {
        let mut buffer = EventBuffer::new(0, 0, 4);
        let mut seg = buffer.open_segment(5, true).unwrap();
        seg.push(0x1122_3344);
        seg.close();
        assert_eq!(buffer.words(), &[5, 1, 0x4433_2211]);
    }

    #[test]
    fn dropped_writer_leaves_buffer_untouched() {
        let mut buffer = EventBuffer::new(0, 0, 4);
        {
            let mut seg = buffer.open_segment(5, false).unwrap();
            seg.push(1);
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.segment_count(), 0);
    }
}
