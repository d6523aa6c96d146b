//! # depscope - Main Entry Point
//!
//! Supports two operational modes:
//! - **Live** (default): create (or `--attach` to) the shared-memory event ring
//!   and consume events from the instrumented program until FINISHED
//! - **Replay** (`--replay events.bin`): consume a recorded event stream
//!
//! Dispatch runs on a blocking thread; the async side only waits for it and
//! for Ctrl+C. On Ctrl+C the reader stops at the next idle point and the
//! partial report is written.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use depscope::cli::Args;
use depscope::domain::ProfilerError;
use depscope::export::{write_summary, ExitReason, RunSummary};
use depscope::preflight::{check_output_dir, check_replay_file, run_preflight_checks};
use depscope::profiling::{display_statistics, EventDispatcher, RunOutcome};
use depscope::transport::{region_len, ByteSource, EventReader, ReadSource, Ring, SharedRegion};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else if msg.contains("not a nonzero power of two") || msg.contains("invalid shared memory name")
    {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

type DispatchResult = (EventDispatcher, Result<RunOutcome, ProfilerError>);

/// Run the dispatcher on tokio's blocking pool
fn spawn_dispatch<S>(
    mut dispatcher: EventDispatcher,
    mut reader: EventReader<S>,
) -> tokio::task::JoinHandle<DispatchResult>
where
    S: ByteSource + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = dispatcher.run(&mut reader);
        (dispatcher, result)
    })
}

/// Open the live event ring selected by the arguments
fn open_ring(args: &Args) -> Result<Ring> {
    if args.attach {
        let region = SharedRegion::open(&args.shm)
            .with_context(|| format!("Failed to attach to {}", args.shm))?;
        return Ok(Ring::attach(region)?);
    }
    let region = SharedRegion::create(&args.shm, region_len(args.ring_size))
        .with_context(|| format!("Failed to create event ring {}", args.shm))?;
    Ok(Ring::create(region, args.ring_size)?)
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let config = args.profiler_config();

    check_output_dir(&config.output_dir)?;

    if !quiet {
        println!("depscope v{}", env!("CARGO_PKG_VERSION"));
        println!("output: {}", config.output_dir.display());
        println!("workers: {}", config.workers);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let dispatcher = EventDispatcher::new(config);

    let handle = if let Some(ref path) = args.replay {
        check_replay_file(path)?;
        let file = File::open(path)
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        if !quiet {
            println!("replay: {}", path.display());
        }
        let reader = EventReader::new(ReadSource::new(BufReader::new(file)))
            .with_stop_flag(Arc::clone(&stop));
        spawn_dispatch(dispatcher, reader)
    } else {
        run_preflight_checks()?;
        let ring = open_ring(&args)?;
        if !quiet {
            println!("ring: {} ({} bytes)", args.shm, ring.capacity());
        }
        info!("Waiting for producer events on {}", args.shm);
        let reader = EventReader::new(ring.into_consumer()).with_stop_flag(Arc::clone(&stop));
        spawn_dispatch(dispatcher, reader)
    };
    tokio::pin!(handle);

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut interrupted = false;
    let joined = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = &mut ctrl_c, if !interrupted => {
                warn!("Interrupted, stopping at the next idle point");
                interrupted = true;
                stop.store(true, Ordering::Relaxed);
            }
        }
    };
    let (dispatcher, result) = joined.context("Dispatcher thread panicked")?;

    match result {
        Ok(outcome) => {
            if !quiet {
                display_statistics(&outcome.stats, &outcome.result, outcome.elapsed);
            }
            if let Some(ref summary_path) = args.summary {
                write_summary(summary_path, &RunSummary::from_outcome(&outcome))
                    .context("Failed to write run summary")?;
            }
            if !quiet {
                println!("saved: {}", outcome.report_path.display());
            }
            Ok(())
        }
        Err(e) => {
            let reason = if interrupted { ExitReason::Interrupted } else { ExitReason::Error };
            if let Some(ref summary_path) = args.summary {
                let summary = RunSummary::failed(reason, &e, &dispatcher.stats);
                if let Err(write_err) = write_summary(summary_path, &summary) {
                    warn!("Failed to write run summary: {write_err}");
                }
            }
            Err(e).context("Profiling run failed")
        }
    }
}
