// demos/drain_consumer.rs
//
// A slow consumer behind a two buffer pool: the trigger thread is held back
// every time both buffers are out, and no event is lost.
use roc_eventpipe::Core::SourceConfig;
use roc_eventpipe::Event::sim::SimSource;
use roc_eventpipe::Pipeline::PipelineBuilder;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let nevents: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(20);

    let mut run = match PipelineBuilder::new()
        .with_pool_buffers(2)
        .with_buffer_capacity(512)
        .with_free_wait_timeout(Duration::from_secs(5))
        .with_source(SourceConfig::new("tdc", 4, 32), SimSource::counting(32))
        .with_source(SourceConfig::new("scaler", 9, 16), SimSource::random(16))
        .build()
    {
        Ok(run) => run,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };
    if let Err(e) = run.initialize().and_then(|_| run.arm()).and_then(|_| run.start()) {
        eprintln!("{}", e);
        return;
    }

    let (handle, drain) = match (run.trigger_handle(), run.drain()) {
        (Ok(handle), Ok(drain)) => (handle, drain),
        _ => return,
    };

    let producer = thread::spawn(move || {
        let start = Instant::now();
        for id in 1..=nevents {
            let outcome = handle.on_trigger(id);
            println!("Trigger {:>3} {:?} after {:.2?}", id, outcome.is_published(), start.elapsed());
        }
    });

    println!("{:<8} {:<10} {}", "Event", "Segments", "Pool (free/ready/held)");
    println!("{}", "=".repeat(60));
    let mut received = 0;
    while received < nevents {
        let Some(event) = drain.take_ready_timeout(Duration::from_secs(1)) else {
            eprintln!("Timeout waiting for events");
            break;
        };
        let counts = drain.counts();
        println!(
            "{:<8} {:<10} {}/{}/{}",
            event.event_id(),
            event.segment_count(),
            counts.free,
            counts.ready,
            counts.held()
        );
        thread::sleep(Duration::from_millis(20));
        if let Err(e) = drain.release(event) {
            eprintln!("{}", e);
            break;
        }
        received += 1;
    }

    let _ = producer.join();
    match run.stop() {
        Ok(summary) => println!("\n{}", summary.stats),
        Err(e) => eprintln!("{}", e),
    }
    let _ = run.teardown();
}
