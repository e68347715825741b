//! Wire layout of a completed event buffer.
//!
//! ```text
//! +--------+--------+------------------+--------+--------+-----
//! | tag    | length | payload[length]  | tag    | length | ...
//! +--------+--------+------------------+--------+--------+-----
//! ```
//!
//! Both header words are native-order `u32`s. Segments appear in source
//! readout order; the total never exceeds the buffer capacity.

use thiserror::Error;

/// Number of words in front of every segment payload.
pub const SEGMENT_HEADER_WORDS: usize = 2;

/// Offset of the tag word within a segment header.
pub const TAG_OFFSET: usize = 0;

/// Offset of the payload length word within a segment header.
pub const LENGTH_OFFSET: usize = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub tag: u32,
    /// Payload length in words, header excluded.
    pub length: u32,
}

impl SegmentHeader {
    pub fn encode(&self) -> [u32; SEGMENT_HEADER_WORDS] {
        let mut header = [0u32; SEGMENT_HEADER_WORDS];
        header[TAG_OFFSET] = self.tag;
        header[LENGTH_OFFSET] = self.length;
        header
    }

    /// Read a header from the front of `words`.
    pub fn decode(words: &[u32]) -> Option<Self> {
        if words.len() < SEGMENT_HEADER_WORDS {
            return None;
        }
        Some(Self {
            tag: words[TAG_OFFSET],
            length: words[LENGTH_OFFSET],
        })
    }
}

/// Borrowed view of one segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SegmentView<'a> {
    pub tag: u32,
    pub payload: &'a [u32],
}

impl SegmentView<'_> {
    /// Words occupied in the buffer, header included.
    pub fn footprint(&self) -> usize {
        SEGMENT_HEADER_WORDS + self.payload.len()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("truncated segment header at word {offset}")]
    TruncatedHeader { offset: usize },

    #[error("segment at word {offset} claims {length} payload words, only {available} remain")]
    TruncatedPayload {
        offset: usize,
        length: usize,
        available: usize,
    },
}

/// Walks the segments of an event in write order.
///
/// After the first malformed segment the iterator yields the error once and
/// then stops.
pub struct SegmentIter<'a> {
    words: &'a [u32],
    offset: usize,
    failed: bool,
}

impl<'a> SegmentIter<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for SegmentIter<'a> {
    type Item = Result<SegmentView<'a>, LayoutError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.words.len() {
            return None;
        }
        let rest = &self.words[self.offset..];
        let header = match SegmentHeader::decode(rest) {
            Some(header) => header,
            None => {
                self.failed = true;
                return Some(Err(LayoutError::TruncatedHeader {
                    offset: self.offset,
                }));
            }
        };
        let length = header.length as usize;
        let available = rest.len() - SEGMENT_HEADER_WORDS;
        if length > available {
            self.failed = true;
            return Some(Err(LayoutError::TruncatedPayload {
                offset: self.offset,
                length,
                available,
            }));
        }
        let payload = &rest[SEGMENT_HEADER_WORDS..SEGMENT_HEADER_WORDS + length];
        self.offset += SEGMENT_HEADER_WORDS + length;
        Some(Ok(SegmentView {
            tag: header.tag,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_segments_in_order() {
        let words = [3, 2, 0xaa, 0xbb, 4, 0, 6, 1, 0xcc];
        let segments: Vec<_> = SegmentIter::new(&words)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].tag, 3);
        assert_eq!(segments[0].payload, &[0xaa, 0xbb]);
        assert_eq!(segments[1].tag, 4);
        assert!(segments[1].payload.is_empty());
        assert_eq!(segments[2].payload, &[0xcc]);
        assert_eq!(
            segments.iter().map(|s| s.footprint()).sum::<usize>(),
            words.len()
        );
    }

    #[test]
    fn reports_truncation_once() {
        let words = [3, 5, 1, 2];
        let mut iter = SegmentIter::new(&words);
        assert_eq!(
            iter.next(),
            Some(Err(LayoutError::TruncatedPayload {
                offset: 0,
                length: 5,
                available: 2
            }))
        );
        assert_eq!(iter.next(), None);

        let words = [3, 0, 9];
        let mut iter = SegmentIter::new(&words);
        assert!(matches!(iter.next(), Some(Ok(_))));
        assert_eq!(
            iter.next(),
            Some(Err(LayoutError::TruncatedHeader { offset: 2 }))
        );
    }
}
