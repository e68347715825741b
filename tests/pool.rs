use roc_eventpipe::Core::{Acquire, BufferPool, PoolError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn create_pool(buffers: usize) -> Arc<BufferPool> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(BufferPool::new(buffers, 64).expect("Failed to create pool"))
}

fn wait_for_waiting_producer(pool: &BufferPool) {
    let start = Instant::now();
    while pool.waiting_producers() == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "producer never started waiting");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_ready_queue_is_fifo() {
    let pool = create_pool(4);
    let mut published = Vec::new();

    for round in 0..5 {
        let mut held = Vec::new();
        while let Some(buffer) = pool.try_acquire_free() {
            held.push(buffer);
        }
        assert_eq!(held.len(), 4);
        // publish in a shuffled order, the drain must follow publish order
        fastrand::shuffle(&mut held);
        for buffer in held {
            published.push(buffer.slot());
            pool.publish_ready(buffer).unwrap();
            assert!(pool.counts().is_consistent());
        }

        let mut drained = Vec::new();
        while let Some(buffer) = pool.try_drain_ready() {
            drained.push(buffer.slot());
            pool.free(buffer).unwrap();
            assert!(pool.counts().is_consistent());
        }
        assert_eq!(drained, published[round * 4..(round + 1) * 4]);
    }

    let counts = pool.counts();
    assert_eq!(counts.free, 4);
    assert_eq!(counts.held(), 0);
    assert_eq!(pool.released(), 20);
}

#[test]
fn test_counts_add_up_while_moving() {
    let pool = create_pool(3);

    let a = pool.try_acquire_free().unwrap();
    let b = pool.try_acquire_free().unwrap();
    let counts = pool.counts();
    assert_eq!((counts.free, counts.held_by_producer), (1, 2));

    pool.publish_ready(a).unwrap();
    let counts = pool.counts();
    assert_eq!((counts.free, counts.ready, counts.held_by_producer), (1, 1, 1));

    let a = pool.try_drain_ready().unwrap();
    let counts = pool.counts();
    assert_eq!((counts.ready, counts.held_by_consumer), (0, 1));
    assert!(counts.is_consistent());

    pool.free(a).unwrap();
    pool.free(b).unwrap();
    assert_eq!(pool.counts().free, 3);
}

#[test]
fn test_single_buffer_blocks_producer_until_release() {
    let pool = create_pool(1);

    let first = pool.try_acquire_free().unwrap();
    let first_slot = first.slot();
    pool.publish_ready(first).unwrap();

    let producer_pool = Arc::clone(&pool);
    let producer = thread::spawn(move || producer_pool.acquire_free(Duration::from_secs(10)));

    wait_for_waiting_producer(&pool);
    // the first event is still queued and untouched
    let counts = pool.counts();
    assert_eq!((counts.free, counts.ready), (0, 1));

    let first = pool.try_drain_ready().unwrap();
    assert_eq!(first.slot(), first_slot);
    pool.free(first).unwrap();

    let second = producer
        .join()
        .unwrap()
        .into_buffer()
        .expect("producer should get the released buffer");
    assert_eq!(second.slot(), first_slot);
    assert_eq!(second.generation(), 2);
    assert_eq!(pool.starvation_waits(), 1);
    pool.free(second).unwrap();
    assert_eq!(pool.counts().free, 1);
}

#[test]
fn test_acquire_times_out() {
    let pool = create_pool(1);
    let held = pool.try_acquire_free().unwrap();

    let start = Instant::now();
    let result = pool.acquire_free(Duration::from_millis(30));
    assert!(matches!(result, Acquire::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(25));
    assert_eq!(pool.starvation_waits(), 1);

    pool.free(held).unwrap();
}

#[test]
fn test_interrupt_cancels_waiting_producer() {
    let pool = create_pool(1);
    let held = pool.try_acquire_free().unwrap();

    let producer_pool = Arc::clone(&pool);
    let producer = thread::spawn(move || producer_pool.acquire_free(Duration::from_secs(30)));
    wait_for_waiting_producer(&pool);

    let start = Instant::now();
    pool.interrupt_waiters();
    assert!(matches!(producer.join().unwrap(), Acquire::Interrupted));
    assert!(start.elapsed() < Duration::from_secs(5));

    // the held buffer is unaffected
    assert_eq!(pool.counts().held_by_producer, 1);
    pool.free(held).unwrap();
}

#[test]
fn test_producer_wait_outlasts_interrupt() {
    let pool = create_pool(1);
    pool.open_intake();
    assert!(pool.enter_producer());
    pool.close_intake();
    pool.interrupt_waiters();

    let producer_pool = Arc::clone(&pool);
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        producer_pool.exit_producer();
    });

    let start = Instant::now();
    assert!(pool.wait_producers_idle(Duration::from_secs(10)));
    assert!(start.elapsed() >= Duration::from_millis(25));
    producer.join().unwrap();

    // nothing left inside, returns at once
    assert!(pool.wait_producers_idle(Duration::from_millis(1)));
}

#[test]
fn test_release_into_wrong_pool_is_rejected() {
    let pool_a = create_pool(2);
    let pool_b = create_pool(2);

    let buffer = pool_a.try_acquire_free().unwrap();
    let before = pool_b.counts();
    let rejected = pool_b.free(buffer).unwrap_err();
    assert!(matches!(rejected.error, PoolError::ForeignBuffer { .. }));
    assert_eq!(pool_b.counts(), before);

    // the buffer came back and can still go home
    pool_a.free(rejected.buffer).unwrap();
    assert_eq!(pool_a.counts().free, 2);
}

#[test]
fn test_publish_requires_producer_ownership() {
    let pool = create_pool(2);
    let buffer = pool.try_acquire_free().unwrap();
    pool.publish_ready(buffer).unwrap();

    let taken = pool.try_drain_ready().unwrap();
    let rejected = pool.publish_ready(taken).unwrap_err();
    assert!(matches!(rejected.error, PoolError::NotHeld { .. }));
    assert_eq!(pool.counts().held_by_consumer, 1);
    pool.free(rejected.buffer).unwrap();
    assert_eq!(pool.counts().free, 2);
}

#[test]
fn test_drain_wait_wakes_on_publish() {
    let pool = create_pool(2);
    assert!(pool.drain_ready_timeout(Duration::from_millis(10)).is_none());

    let producer_pool = Arc::clone(&pool);
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let buffer = producer_pool.try_acquire_free().unwrap();
        producer_pool.publish_ready(buffer).unwrap();
    });

    let buffer = pool
        .drain_ready_timeout(Duration::from_secs(10))
        .expect("published buffer should wake the consumer");
    producer.join().unwrap();
    pool.free(buffer).unwrap();
}

#[test]
fn test_rejects_empty_pool() {
    assert!(BufferPool::new(0, 64).is_err());
    assert!(BufferPool::new(1, 1).is_err());
}
