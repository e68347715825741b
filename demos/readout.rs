// demos/readout.rs
//
// Runs a full acquisition cycle against simulated modules:
// download, prestart, go, a number of triggers, end.
//
//   cargo run --example readout -- --nevents 5000 --sources 3 --words 120
use clap::Parser;
use roc_eventpipe::Core::{PipelineConfig, SourceConfig, StarvationPolicy, TriggerMode};
use roc_eventpipe::Event::sim::{SimSource, SimTrigger};
use roc_eventpipe::Pipeline::{PipelineBuilder, TriggerOutcome};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(version, about = "Simulated VME readout through the event pipeline", long_about = None)]
struct Args {
    /// Acquire this many events
    #[arg(short, long, default_value_t = 1000)]
    nevents: u64,
    /// Number of simulated readout modules
    #[arg(short, long, default_value_t = 2)]
    sources: usize,
    /// Words delivered by every module per event
    #[arg(short, long, default_value_t = 64)]
    words: usize,
    /// Event buffers in the pool
    #[arg(long, default_value_t = 10)]
    buffers: usize,
    /// Capacity of each event buffer, in words
    #[arg(long, default_value_t = 16384)]
    capacity: usize,
    /// Drop events instead of waiting when every buffer is in use
    #[arg(long, default_value_t = false)]
    drop_on_starvation: bool,
    /// Let a polling thread read triggers from a simulated trigger interface
    #[arg(long, default_value_t = false)]
    poll: bool,
    /// Per event delay of the consumer in microseconds
    #[arg(long, default_value_t = 0)]
    consumer_delay_us: u64,
    /// Read the pipeline configuration from this TOML file instead
    #[arg(long)]
    config: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
        eprintln!("Unable to install the Ctrl-C handler: {}", e);
    }

    let mut config = match &args.config {
        Some(path) => match PipelineConfig::from_toml(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Unable to read {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            let mut config = PipelineConfig::new();
            config.pool_buffers = args.buffers;
            config.buffer_capacity_words = args.capacity;
            config.sources = (0..args.sources)
                .map(|i| {
                    SourceConfig::new(format!("module{}", i), i as u32 + 1, args.words)
                        .with_slot(3 + i as u32)
                        .with_marker(0xb0b0_b0b4 + i as u32)
                })
                .collect();
            config
        }
    };
    if args.drop_on_starvation {
        config.starvation_policy = StarvationPolicy::Drop;
    }

    let mut builder = PipelineBuilder::from_config(config.clone());
    for source in config.sources.iter() {
        builder = builder.attach(source.name.clone(), SimSource::counting(source.max_words));
    }
    let trigger = SimTrigger::new(args.nevents);
    let fired = trigger.fired();
    if args.poll {
        builder = builder.with_trigger_source(trigger);
    } else {
        builder = builder.with_trigger_mode(TriggerMode::Interrupt);
    }

    let mut run = match builder.build() {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = run.initialize().and_then(|_| run.arm()) {
        eprintln!("Unable to prepare the run: {}", e);
        std::process::exit(1);
    }

    let drain = match run.drain() {
        Ok(drain) => drain,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let consumer_done = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&consumer_done);
    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let delay = Duration::from_micros(args.consumer_delay_us);
    let consumer = thread::spawn(move || {
        let mut last_id = 0u64;
        let mut words = 0usize;
        let mut out_of_order = 0u64;
        while !done.load(Ordering::Acquire) {
            let Some(event) = drain.take_ready_timeout(Duration::from_millis(100)) else {
                continue;
            };
            if event.event_id() <= last_id {
                out_of_order += 1;
            }
            last_id = event.event_id();
            words += event.len();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if let Err(e) = drain.release(event) {
                eprintln!("Release refused: {}", e);
            }
            counter.fetch_add(1, Ordering::Relaxed);
        }
        (words, out_of_order)
    });

    if let Err(e) = run.start() {
        eprintln!("Unable to start the run: {}", e);
        std::process::exit(1);
    }
    let start = Instant::now();

    if args.poll {
        while running.load(Ordering::SeqCst) && fired.load(Ordering::Relaxed) < args.nevents {
            if let Err(e) = run.health() {
                eprintln!("{}", e);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    } else {
        let handle = match run.trigger_handle() {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        };
        for id in 1..=args.nevents {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            if let TriggerOutcome::StallTimeout = handle.on_trigger(id) {
                eprintln!("Readout stalled at event {}", id);
                break;
            }
        }
    }

    let summary = run.stop();
    consumer_done.store(true, Ordering::Release);
    let (words, out_of_order) = consumer.join().unwrap_or_default();
    let elapsed = start.elapsed();

    println!("\n{}", "=".repeat(80));
    match summary {
        Ok(summary) => {
            println!("{}", summary.stats);
            if !summary.drained() {
                println!("{} buffers were not returned in time", summary.residual);
            }
        }
        Err(e) => println!("Run ended with an error: {}", e),
    }
    let events = received.load(Ordering::Relaxed);
    println!(
        "Consumer: {} events, {} words in {:.2?} ({:.0} events/s), {} out of order",
        events,
        words,
        elapsed,
        events as f64 / elapsed.as_secs_f64(),
        out_of_order
    );

    if let Err(e) = run.teardown() {
        eprintln!("{}", e);
    }
}
