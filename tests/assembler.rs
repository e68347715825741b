use roc_eventpipe::Core::{BufferPool, FaultKind, SourceConfig, TransferError};
use roc_eventpipe::Event::sim::SimSource;
use roc_eventpipe::Event::{BlockRead, EventAssembler, Source, SourceSet};
use roc_eventpipe::Event::Buffer::{EventBuffer, SEGMENT_HEADER_WORDS};
use std::sync::atomic::Ordering;

const ATTEMPTS: u32 = 100;

fn create_buffer(capacity: usize) -> (BufferPool, EventBuffer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = BufferPool::new(1, capacity).expect("Failed to create pool");
    let buffer = pool.try_acquire_free().expect("fresh pool has a free buffer");
    (pool, buffer)
}

fn source(tag: u32, max_words: usize) -> SourceConfig {
    SourceConfig::new(format!("module{}", tag), tag, max_words)
}

fn tags_and_lengths(buffer: &EventBuffer) -> Vec<(u32, usize)> {
    buffer
        .segments()
        .map(|s| s.expect("well formed segment"))
        .map(|s| (s.tag, s.payload.len()))
        .collect()
}

#[test]
fn test_source_never_ready_is_flagged_and_skipped() {
    let (_pool, mut buffer) = create_buffer(256);
    let lazy = SimSource::counting(10).never_ready();
    let lazy_reads = lazy.read_counter();

    let mut sources = SourceSet::new();
    sources.push(source(1, 10), SimSource::counting(10)).unwrap();
    sources.push(source(2, 10), lazy).unwrap();
    sources.push(source(3, 10), SimSource::counting(10)).unwrap();

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    assert_eq!(outcome.expected_mask.bits(), 0b111);
    assert_eq!(outcome.ready_mask.bits(), 0b101);
    assert_eq!(lazy_reads.load(Ordering::Relaxed), 0, "a not ready source must not be read");
    assert!(!outcome.overflow);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].index, 1);
    assert_eq!(outcome.errors[0].tag, 2);
    assert_eq!(
        outcome.errors[0].kind,
        FaultKind::ReadinessTimeout { attempts: ATTEMPTS }
    );
    assert_eq!(buffer.faults(), &outcome.errors[..]);

    // sources 1 and 3 are complete, source 2 keeps its place with an empty segment
    assert_eq!(tags_and_lengths(&buffer), vec![(1, 10), (2, 0), (3, 10)]);
    assert_eq!(outcome.segments_written, 3);
    assert_eq!(outcome.words_written, buffer.len());
}

#[test]
fn test_overflow_stops_exactly_at_capacity() {
    let (_pool, mut buffer) = create_buffer(100);
    let mut sources = SourceSet::new();
    for tag in 1..=3 {
        sources.push(source(tag, 50), SimSource::counting(50)).unwrap();
    }

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    assert!(outcome.overflow);
    assert!(buffer.overflow());
    assert_eq!(buffer.len(), 100);
    assert_eq!(buffer.capacity(), 100);
    assert_eq!(tags_and_lengths(&buffer), vec![(1, 50), (2, 100 - 52 - SEGMENT_HEADER_WORDS)]);
    let kinds: Vec<_> = outcome.errors.iter().map(|e| (e.index, e.kind.clone())).collect();
    assert_eq!(
        kinds,
        vec![
            (1, FaultKind::BufferOverflow { words: 46 }),
            (2, FaultKind::BufferOverflow { words: 0 }),
        ]
    );

    // everything that was written is valid data in source order
    let segments: Vec<_> = buffer.segments().map(|s| s.unwrap()).collect();
    for (i, word) in segments[1].payload.iter().enumerate() {
        assert_eq!(*word, SimSource::counting_word(1, i));
    }
}

/// Copies whatever fits and never reports an overflow of its own.
struct QuietSource {
    words: usize,
    error: Option<TransferError>,
}

impl Source for QuietSource {
    fn is_ready(&mut self) -> bool {
        true
    }

    fn read_block(&mut self, dest: &mut [u32], max_words: usize) -> BlockRead {
        let n = self.words.min(max_words).min(dest.len());
        dest[..n].fill(0x5a5a);
        match &self.error {
            Some(error) => BlockRead::failed(n, error.clone()),
            None => BlockRead::complete(n),
        }
    }
}

#[test]
fn test_clamped_read_is_flagged_even_when_device_reports_complete() {
    let (_pool, mut buffer) = create_buffer(100);
    let mut sources = SourceSet::new();
    for tag in 1..=2 {
        sources
            .push(source(tag, 75), QuietSource { words: 75, error: None })
            .unwrap();
    }

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    assert!(outcome.overflow);
    assert!(buffer.overflow());
    assert_eq!(buffer.len(), 100);
    assert_eq!(tags_and_lengths(&buffer), vec![(1, 75), (2, 100 - 77 - SEGMENT_HEADER_WORDS)]);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].index, 1);
    assert_eq!(outcome.errors[0].kind, FaultKind::BufferOverflow { words: 21 });
}

#[test]
fn test_clamped_read_with_other_error_reports_both() {
    let (_pool, mut buffer) = create_buffer(20);
    let mut sources = SourceSet::new();
    sources
        .push(
            source(1, 40),
            QuietSource {
                words: 40,
                error: Some(TransferError::PartialTransfer),
            },
        )
        .unwrap();

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    assert!(outcome.overflow);
    let kinds: Vec<_> = outcome.errors.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            FaultKind::BufferOverflow { words: 18 },
            FaultKind::Transfer {
                error: TransferError::PartialTransfer,
                words: 18
            },
        ]
    );
}

#[test]
fn test_transfer_error_keeps_partial_data_and_continues() {
    let (_pool, mut buffer) = create_buffer(256);
    let mut sources = SourceSet::new();
    sources
        .push(source(1, 10), SimSource::counting(10).failing_with(TransferError::BusTimeout))
        .unwrap();
    sources.push(source(2, 8), SimSource::counting(8)).unwrap();

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    assert!(!outcome.overflow);
    assert_eq!(
        outcome.errors[0].kind,
        FaultKind::Transfer {
            error: TransferError::BusTimeout,
            words: 5
        }
    );
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(tags_and_lengths(&buffer), vec![(1, 5), (2, 8)]);
}

#[test]
fn test_device_block_larger_than_its_limit() {
    let (_pool, mut buffer) = create_buffer(256);
    let mut sources = SourceSet::new();
    sources.push(source(7, 4), SimSource::counting(6)).unwrap();

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    // the buffer had room, so this is the device's fault, not an overflow
    assert!(!outcome.overflow);
    assert_eq!(
        outcome.errors[0].kind,
        FaultKind::Transfer {
            error: TransferError::Overflow,
            words: 4
        }
    );
    assert_eq!(tags_and_lengths(&buffer), vec![(7, 4)]);
}

#[test]
fn test_marker_and_word_swap() {
    let (_pool, mut buffer) = create_buffer(64);
    let mut sources = SourceSet::new();
    sources
        .push(
            source(4, 4).with_marker(0xb0b0_b0b4).with_swapped_words(),
            SimSource::scripted(vec![vec![0x1122_3344, 0x0000_00ff]]),
        )
        .unwrap();
    sources
        .push(source(5, 4).with_marker(0xb0b0_b0b5), SimSource::scripted(vec![vec![0x1122_3344]]))
        .unwrap();

    let outcome = EventAssembler::new(ATTEMPTS).assemble(&mut buffer, &mut sources);

    assert!(outcome.is_clean());
    assert_eq!(
        buffer.words(),
        &[
            4, 3, 0xb4b0_b0b0, 0x4433_2211, 0xff00_0000, // swapped payload, native header
            5, 2, 0xb0b0_b0b5, 0x1122_3344,
        ]
    );
}

#[test]
fn test_slow_source_within_poll_bound() {
    let (_pool, mut buffer) = create_buffer(64);
    let mut sources = SourceSet::new();
    sources.push(source(1, 3), SimSource::counting(3).ready_after(5)).unwrap();

    let outcome = EventAssembler::new(10).assemble(&mut buffer, &mut sources);
    assert!(outcome.is_clean());
    assert_eq!(tags_and_lengths(&buffer), vec![(1, 3)]);
}

#[test]
fn test_payload_and_order_are_reproduced() {
    let pool = BufferPool::new(1, 1024).unwrap();
    let blocks: Vec<Vec<u32>> = (0..3)
        .map(|_| (0..fastrand::usize(1..40)).map(|_| fastrand::u32(..)).collect())
        .collect();

    let mut sources = SourceSet::new();
    for (i, block) in blocks.iter().enumerate() {
        sources
            .push(source(10 + i as u32, 40), SimSource::scripted(vec![block.clone(), block.clone()]))
            .unwrap();
    }
    let assembler = EventAssembler::new(ATTEMPTS);

    // same order and content in two consecutive events
    for _ in 0..2 {
        let mut buffer = pool.try_acquire_free().unwrap();
        let outcome = assembler.assemble(&mut buffer, &mut sources);
        assert!(outcome.is_clean());
        let segments: Vec<_> = buffer.segments().map(|s| s.unwrap()).collect();
        assert_eq!(segments.len(), 3);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.tag, 10 + i as u32);
            assert_eq!(segment.payload, &blocks[i][..]);
        }
        pool.free(buffer).unwrap();
    }
}
