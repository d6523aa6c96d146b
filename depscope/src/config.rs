//! Runtime configuration of a profiling run
//!
//! Built from command-line arguments by the binary, or directly by library
//! users and tests.

use std::path::PathBuf;

use crate::analysis::DEFAULT_DEDUP_CAPACITY;

/// Bytes of the target's stack shadowed at INIT (8 MiB, the usual rlimit)
pub const DEFAULT_STACK_SIZE: u64 = 8 << 20;

/// Events between progress log lines
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000_000;

#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Directory receiving `deplog-<loop>.txt`
    pub output_dir: PathBuf,
    /// Keys buffered before a compaction
    pub dedup_capacity: usize,
    /// Compaction threads
    pub workers: usize,
    /// Shadow this many bytes of the target stack at INIT; `None` skips it
    pub stack_size: Option<u64>,
    /// Ignore dependences whose source was written in another invocation
    pub same_invocation_only: bool,
    /// Log progress every this many events; 0 disables progress lines
    pub progress_interval: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            workers: crate::profiling::cpu_utils::default_worker_count(),
            stack_size: Some(DEFAULT_STACK_SIZE),
            same_invocation_only: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl ProfilerConfig {
    /// Configuration for consuming a stream whose producer is not a live
    /// process on this host (replays, tests): the stack is not shadowed.
    #[must_use]
    pub fn without_stack(mut self) -> Self {
        self.stack_size = None;
        self
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}
