//! CLI argument definitions

use clap::Parser;
use depscope_common::{DEFAULT_RING_CAPACITY, DEFAULT_SHM_NAME};
use std::path::PathBuf;

use crate::analysis::DEFAULT_DEDUP_CAPACITY;
use crate::config::{ProfilerConfig, DEFAULT_PROGRESS_INTERVAL, DEFAULT_STACK_SIZE};
use crate::profiling::default_worker_count;

#[derive(Parser, Debug)]
#[command(
    name = "depscope",
    version,
    about = "Profile memory dependences of an instrumented loop",
    after_help = "\
EXAMPLES:
    depscope                                 Wait for the producer on /depscope-events
    depscope --shm /run-42 --output-dir out  Custom ring name and report directory
    depscope --replay events.bin             Replay a recorded stream (no live target)"
)]
pub struct Args {
    /// POSIX shared memory object of the event ring
    #[arg(long, value_name = "NAME", default_value = DEFAULT_SHM_NAME)]
    pub shm: String,

    /// Ring data capacity in bytes (power of two)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_RING_CAPACITY)]
    pub ring_size: usize,

    /// Attach to a ring the producer created instead of creating it
    #[arg(long, conflicts_with = "replay")]
    pub attach: bool,

    /// Read events from a recorded stream instead of shared memory
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Directory for deplog-<loop>.txt
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Dependence keys buffered before deduplication
    #[arg(long, value_name = "KEYS", default_value_t = DEFAULT_DEDUP_CAPACITY)]
    pub dedup_capacity: usize,

    /// Deduplication threads (default: online CPUs)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Bytes of the target stack to shadow at INIT
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_STACK_SIZE)]
    pub stack_size: u64,

    /// Do not shadow the target stack (implied by --replay)
    #[arg(long)]
    pub no_stack: bool,

    /// Ignore dependences whose store happened in an earlier loop invocation
    #[arg(long)]
    pub same_invocation_only: bool,

    /// Write a JSON run summary to FILE
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Session configuration selected by these arguments
    #[must_use]
    pub fn profiler_config(&self) -> ProfilerConfig {
        let shadow_stack = !self.no_stack && self.replay.is_none();
        ProfilerConfig {
            output_dir: self.output_dir.clone(),
            dedup_capacity: self.dedup_capacity,
            workers: self.workers.unwrap_or_else(default_worker_count).max(1),
            stack_size: shadow_stack.then_some(self.stack_size),
            same_invocation_only: self.same_invocation_only,
            progress_interval: if self.quiet { 0 } else { DEFAULT_PROGRESS_INTERVAL },
        }
    }
}
